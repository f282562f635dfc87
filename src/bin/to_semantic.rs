use std::{fs::File, io::BufWriter, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use semseg::{convert_concurrent, logging, ConvertOptions};
use serde_json::to_writer_pretty;
use tracing::info;

/// Merges per-instance masks into one semantic mask per image.
#[derive(Parser, Debug)]
struct Args {
    /// Dataset directory holding one directory per image.
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory; `images/` and `masks/` are created inside it.
    #[arg(short, long)]
    output: PathBuf,

    /// Items converted concurrently (defaults to the number of CPUs).
    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(long, default_value_t = 50)]
    progress_every: usize,

    /// Write the conversion report as JSON to this file.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Exit with an error when any item was skipped.
    #[arg(long)]
    strict: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    match (args.input.is_dir(), args.output.exists(), args.output.is_dir()) {
        (true, false, _) | (true, true, true) => {}
        (false, _, _) => bail!("input \"{}\" is not a directory", args.input.display()),
        _ => bail!("output \"{}\" exists and is not a directory", args.output.display()),
    }

    let mut options = ConvertOptions {
        progress_every: args.progress_every,
        ..Default::default()
    };
    if let Some(workers) = args.workers {
        options.workers = workers;
    }

    let report = convert_concurrent(&args.input, &args.output, &options).await?;

    if let Some(path) = &args.report {
        let file = File::create(path)
            .with_context(|| format!("creating report \"{}\"", path.display()))?;
        to_writer_pretty(BufWriter::new(file), &report)?;
        info!(report = %path.display(), "wrote conversion report");
    }

    if args.strict && !report.skipped.is_empty() {
        bail!("{} item(s) were skipped", report.skipped.len());
    }

    Ok(())
}
