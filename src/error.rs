use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// An item directory that cannot be converted as laid out on disk.
    #[error("malformed item `{item}`: {reason}")]
    MalformedItem { item: String, reason: String },

    #[error(
        "mask {} of item `{item}` is {}x{}, expected {}x{}",
        .mask.display(), .found.0, .found.1, .expected.0, .expected.1
    )]
    DimensionMismatch {
        item: String,
        mask: PathBuf,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("I/O failure on {}: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },

    /// Pretrained encoder weights are absent.
    #[error("pretrained weights not found at {}", .path.display())]
    MissingResource { path: PathBuf },

    #[error("encoder has no tap point named `{0}`")]
    UnknownTapPoint(String),

    #[error("invalid network configuration: {0}")]
    InvalidNetwork(String),

    #[error("failed to load record: {0}")]
    Record(String),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::IoFailure { path, source }
    }

    /// Short stable name of the error kind, used in conversion reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedItem { .. } => "MalformedItem",
            Error::DimensionMismatch { .. } => "DimensionMismatch",
            Error::IoFailure { .. } | Error::Decode { .. } | Error::Encode { .. } => "IOFailure",
            Error::MissingResource { .. } => "MissingResource",
            Error::UnknownTapPoint(_) => "UnknownTapPoint",
            Error::InvalidNetwork(_) => "InvalidNetwork",
            Error::Record(_) => "Record",
            Error::Join(_) => "Join",
        }
    }

    pub(crate) fn malformed(item: &str, reason: impl Into<String>) -> Error {
        Error::MalformedItem {
            item: item.to_owned(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
