use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// `verbose` default.
pub fn init(verbose: bool) -> Result<(), TryInitError> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
}
