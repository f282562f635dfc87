//! Encoder-decoder segmentation network assembly.
//!
//! A frozen [`FeatureExtractor`] is tapped at a fixed list of activations,
//! highest resolution first. The lowest-resolution map enters the decoder,
//! which upsamples it stage by stage and concatenates the remaining maps in
//! reverse, then projects to per-pixel class probabilities and crops.

use std::path::Path;

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};
use tracing::info;

use super::{
    decoder::{Decoder, DecoderConfig},
    encoder::{FeatureExtractor, PyramidEncoder, PyramidEncoderConfig, TapPoint},
};
use crate::error::{self, Error};

#[derive(Config, Debug)]
pub struct NetworkConfig {
    /// `[height, width, channels]` of the input images.
    pub input_shape: [usize; 3],
    pub num_classes: usize,
    /// Pixels trimmed from each spatial edge of the output.
    #[config(default = 4)]
    pub crop_size: usize,
    #[config(default = false)]
    pub dropout: bool,
    #[config(default = 0.5)]
    pub dropout_rate: f64,
    #[config(default = false)]
    pub batch_norm: bool,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = "vec![512, 256, 128, 64]")]
    pub decoder_channels: Vec<usize>,
    /// Encoder activations used as skips, highest resolution first.
    #[config(default = "crate::network::encoder::mobilenet_v2_tap_names()")]
    pub taps: Vec<String>,
}

impl NetworkConfig {
    /// `[height, width, num_classes]` of the network output.
    pub fn output_shape(&self) -> [usize; 3] {
        let [height, width, _] = self.input_shape;
        [
            height.saturating_sub(2 * self.crop_size),
            width.saturating_sub(2 * self.crop_size),
            self.num_classes,
        ]
    }

    /// Checks the configuration against `encoder` and returns the resolved
    /// tap points in configuration order.
    pub fn validate<B: Backend, E: FeatureExtractor<B>>(&self, encoder: &E) -> error::Result<Vec<TapPoint>> {
        let invalid = |msg: String| -> error::Result<Vec<TapPoint>> { Err(Error::InvalidNetwork(msg)) };
        let [height, width, channels] = self.input_shape;

        if self.num_classes == 0 {
            return invalid("num_classes must be at least 1".into());
        }
        if height == 0 || width == 0 || channels == 0 {
            return invalid(format!("input shape {:?} has an empty axis", self.input_shape));
        }
        if channels != encoder.in_channels() {
            return invalid(format!(
                "input has {channels} channels, the encoder expects {}",
                encoder.in_channels()
            ));
        }
        if self.kernel_size == 0 {
            return invalid("kernel_size must be at least 1".into());
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return invalid(format!("dropout rate {} is outside [0, 1)", self.dropout_rate));
        }
        if self.decoder_channels.is_empty() || self.decoder_channels.contains(&0) {
            return invalid(format!(
                "decoder channels {:?} must be non-empty and non-zero",
                self.decoder_channels
            ));
        }
        if self.taps.len() != self.decoder_channels.len() + 1 {
            return invalid(format!(
                "{} decoder stages need {} tap points, got {}",
                self.decoder_channels.len(),
                self.decoder_channels.len() + 1,
                self.taps.len()
            ));
        }

        let points = self
            .taps
            .iter()
            .map(|name| encoder.tap(name).ok_or_else(|| Error::UnknownTapPoint(name.clone())))
            .collect::<error::Result<Vec<_>>>()?;

        // Each stage and the final projection double resolution, so taps must
        // sit at strides 2, 4, 8, ...
        for (i, (name, point)) in self.taps.iter().zip(&points).enumerate() {
            let expected = 2 << i;
            if point.stride != expected {
                return invalid(format!(
                    "tap `{name}` has stride {}, expected {expected}",
                    point.stride
                ));
            }
        }

        let deepest = points.last().map_or(1, |point| point.stride);
        if height % deepest != 0 || width % deepest != 0 {
            return invalid(format!(
                "input {height}x{width} is not divisible by the deepest tap stride {deepest}"
            ));
        }
        if 2 * self.crop_size >= height || 2 * self.crop_size >= width {
            return invalid(format!(
                "crop of {} px per edge leaves nothing of a {height}x{width} output",
                self.crop_size
            ));
        }

        Ok(points)
    }

    pub fn init<B: Backend, E: FeatureExtractor<B>>(
        &self,
        encoder: E,
        device: &B::Device,
    ) -> error::Result<SegmentationNetwork<B, E>> {
        let points = self.validate::<B, E>(&encoder)?;
        let (deepest, skips) = points
            .split_last()
            .ok_or_else(|| Error::InvalidNetwork("no tap points".into()))?;

        let decoder = DecoderConfig::new(
            deepest.channels,
            skips.iter().map(|point| point.channels).collect(),
            self.decoder_channels.clone(),
            self.num_classes,
        )
        .with_crop_size(self.crop_size)
        .with_kernel_size(self.kernel_size)
        .with_dropout(self.dropout)
        .with_dropout_rate(self.dropout_rate)
        .with_batch_norm(self.batch_norm)
        .init(device);

        info!(
            input = ?self.input_shape,
            output = ?self.output_shape(),
            stages = decoder.num_stages(),
            "assembled segmentation network"
        );

        Ok(SegmentationNetwork {
            encoder,
            decoder,
            taps: self.taps.clone(),
            input_shape: self.input_shape,
            output_shape: self.output_shape(),
        })
    }
}

/// Builds a network around an already constructed encoder.
pub fn build<B: Backend, E: FeatureExtractor<B>>(
    config: &NetworkConfig,
    encoder: E,
    device: &B::Device,
) -> error::Result<SegmentationNetwork<B, E>> {
    config.init(encoder, device)
}

/// Builds a network whose encoder is a [`PyramidEncoder`] loaded from the
/// weight file at `weights`.
pub fn build_pretrained<B: Backend>(
    config: &NetworkConfig,
    encoder: &PyramidEncoderConfig,
    weights: &Path,
    device: &B::Device,
) -> error::Result<SegmentationNetwork<B, PyramidEncoder<B>>> {
    let encoder = encoder.load(weights, device)?;
    config.init(encoder, device)
}

#[derive(Debug)]
pub struct SegmentationNetwork<B: Backend, E> {
    encoder: E,
    decoder: Decoder<B>,
    taps: Vec<String>,
    input_shape: [usize; 3],
    output_shape: [usize; 3],
}

impl<B: Backend, E: FeatureExtractor<B>> SegmentationNetwork<B, E> {
    /// Maps `[batch, height, width, channels]` images to per-pixel class
    /// probabilities of shape `[batch, out_height, out_width, num_classes]`.
    ///
    /// # Panics
    ///
    /// If the image shape differs from the configured input shape, or the
    /// encoder returns fewer maps than there are taps.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, height, width, channels] = images.dims();
        assert_eq!(
            [height, width, channels],
            self.input_shape,
            "image shape does not match the network input"
        );

        let channels_first = images.swap_dims(1, 3).swap_dims(2, 3);
        let mut features = self.encoder.extract(channels_first, &self.taps);
        assert_eq!(
            features.len(),
            self.taps.len(),
            "encoder returned {} feature maps for {} taps",
            features.len(),
            self.taps.len()
        );

        let deepest = features.remove(features.len() - 1);
        self.decoder
            .forward(deepest, features)
            .swap_dims(1, 3)
            .swap_dims(1, 2)
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    pub fn output_shape(&self) -> [usize; 3] {
        self.output_shape
    }

    pub fn taps(&self) -> &[String] {
        &self.taps
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder<B> {
        &self.decoder
    }

    pub fn into_parts(self) -> (E, Decoder<B>) {
        (self.encoder, self.decoder)
    }
}
