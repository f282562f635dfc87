use std::path::PathBuf;

use anyhow::Result;
use burn::{
    backend::NdArray,
    config::Config,
    tensor::{backend::Backend, Tensor},
};
use clap::Parser;
use semseg::{
    logging,
    network::{build_pretrained, PyramidEncoderConfig},
    NetworkConfig,
};
use tracing::info;

type AssemblyBackend = NdArray<f32>;

/// Builds the segmentation network and checks its output shape contract.
#[derive(Parser, Debug)]
struct Args {
    /// Pretrained encoder weights (`.mpk` record).
    #[arg(short, long, default_value = "weights/pyramid_encoder.mpk")]
    weights: PathBuf,

    /// Network configuration JSON; flags below are ignored when given.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 224)]
    height: usize,

    #[arg(long, default_value_t = 224)]
    width: usize,

    #[arg(long, default_value_t = 3)]
    channels: usize,

    #[arg(short, long, default_value_t = 3)]
    num_classes: usize,

    #[arg(long, default_value_t = 4)]
    crop_size: usize,

    #[arg(long)]
    dropout: bool,

    #[arg(long)]
    batch_norm: bool,

    /// Write freshly initialised encoder weights to `--weights` first.
    #[arg(long)]
    init_weights: bool,

    /// Save the effective network configuration to this file.
    #[arg(long)]
    save_config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    let config = match &args.config {
        Some(path) => NetworkConfig::load(path)?,
        None => NetworkConfig::new([args.height, args.width, args.channels], args.num_classes)
            .with_crop_size(args.crop_size)
            .with_dropout(args.dropout)
            .with_batch_norm(args.batch_norm),
    };
    let encoder_config = PyramidEncoderConfig::new()
        .with_in_channels(config.input_shape[2])
        .with_taps(config.taps.clone());

    let device = <AssemblyBackend as Backend>::Device::default();

    if args.init_weights {
        if let Some(parent) = args.weights.parent() {
            std::fs::create_dir_all(parent)?;
        }
        encoder_config
            .init::<AssemblyBackend>(&device)?
            .save(&args.weights)?;
        info!(weights = %args.weights.display(), "initialised encoder weights");
    }

    let network = build_pretrained::<AssemblyBackend>(&config, &encoder_config, &args.weights, &device)?;

    let [height, width, channels] = config.input_shape;
    let probabilities = network.forward(Tensor::zeros([1, height, width, channels], &device));
    println!(
        "input {:?} -> output {:?}",
        [1, height, width, channels],
        probabilities.dims()
    );

    if let Some(path) = &args.save_config {
        config.save(path)?;
    }

    Ok(())
}
