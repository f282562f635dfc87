//! Frozen feature extractors feeding the decoder's skip connections.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{activation::relu, backend::Backend, Tensor},
};
use tracing::info;

use crate::error::{self, Error};

/// Shape of one exposed encoder activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapPoint {
    pub channels: usize,
    /// Downsampling factor relative to the input.
    pub stride: usize,
}

/// MobileNetV2 activations used as skip connections, highest resolution
/// first (112, 56, 28, 14 and 7 px for a 224 px input).
pub const MOBILENET_V2_TAPS: [(&str, TapPoint); 5] = [
    ("block_1_expand_relu", TapPoint { channels: 96, stride: 2 }),
    ("block_3_expand_relu", TapPoint { channels: 144, stride: 4 }),
    ("block_6_expand_relu", TapPoint { channels: 192, stride: 8 }),
    ("block_13_expand_relu", TapPoint { channels: 576, stride: 16 }),
    ("block_16_project", TapPoint { channels: 320, stride: 32 }),
];

pub fn mobilenet_v2_tap_names() -> Vec<String> {
    MOBILENET_V2_TAPS.iter().map(|(name, _)| name.to_string()).collect()
}

/// A pretrained backbone that exposes named intermediate activations.
///
/// Tensors are channel-first (`[batch, channels, height, width]`). The
/// returned maps are in the order of `taps` and must not carry gradients back
/// into the backbone.
pub trait FeatureExtractor<B: Backend> {
    /// Channels expected in the input images.
    fn in_channels(&self) -> usize;

    fn tap(&self, name: &str) -> Option<TapPoint>;

    fn extract(&self, input: Tensor<B, 4>, taps: &[String]) -> Vec<Tensor<B, 4>>;
}

#[derive(Config, Debug)]
pub struct PyramidEncoderConfig {
    #[config(default = 3)]
    pub in_channels: usize,
    /// One level per tap, each halving the resolution of the previous one.
    #[config(default = "crate::network::encoder::mobilenet_v2_tap_names()")]
    pub taps: Vec<String>,
    #[config(default = "vec![96, 144, 192, 576, 320]")]
    pub channels: Vec<usize>,
}

/// Stack of stride-2 convolutions; every level but the last is rectified,
/// the last is a linear projection.
#[derive(Module, Debug)]
pub struct PyramidBackbone<B: Backend> {
    levels: Vec<Conv2d<B>>,
}

impl<B: Backend> PyramidBackbone<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let last = self.levels.len().saturating_sub(1);
        let mut maps = Vec::with_capacity(self.levels.len());
        let mut x = input;
        for (i, conv) in self.levels.iter().enumerate() {
            x = conv.forward(x);
            if i != last {
                x = relu(x);
            }
            maps.push(x.clone());
        }
        maps
    }
}

/// Reference backbone publishing the MobileNetV2 tap names.
#[derive(Debug)]
pub struct PyramidEncoder<B: Backend> {
    backbone: PyramidBackbone<B>,
    in_channels: usize,
    taps: Vec<(String, TapPoint)>,
}

impl PyramidEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<PyramidEncoder<B>> {
        if self.taps.is_empty() || self.taps.len() != self.channels.len() {
            return Err(Error::InvalidNetwork(format!(
                "pyramid encoder needs one channel count per tap, got {} taps and {} counts",
                self.taps.len(),
                self.channels.len()
            )));
        }

        let mut levels = Vec::with_capacity(self.channels.len());
        let mut taps = Vec::with_capacity(self.channels.len());
        let mut in_channels = self.in_channels;
        let mut stride = 1;
        for (name, &channels) in self.taps.iter().zip(&self.channels) {
            levels.push(
                Conv2dConfig::new([in_channels, channels], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device),
            );
            stride *= 2;
            taps.push((name.clone(), TapPoint { channels, stride }));
            in_channels = channels;
        }

        Ok(PyramidEncoder {
            backbone: PyramidBackbone { levels },
            in_channels: self.in_channels,
            taps,
        })
    }

    /// Builds the encoder and loads its pretrained weights from a
    /// `NamedMpkFileRecorder` file.
    pub fn load<B: Backend>(&self, weights: &Path, device: &B::Device) -> error::Result<PyramidEncoder<B>> {
        let file = weights.with_extension("mpk");
        if !file.is_file() {
            return Err(Error::MissingResource { path: file });
        }

        let encoder = self.init::<B>(device)?;
        let backbone = encoder
            .backbone
            .load_file(
                file.clone(),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
                device,
            )
            .map_err(|err| Error::Record(format!("{}: {err:?}", file.display())))?;
        self.check_record(&backbone)
            .map_err(|reason| Error::Record(format!("{}: {reason}", file.display())))?;
        info!(weights = %file.display(), "loaded encoder weights");

        Ok(PyramidEncoder {
            backbone,
            in_channels: encoder.in_channels,
            taps: encoder.taps,
        })
    }

    /// Loaded weights must have the shapes this configuration describes;
    /// the tap points are derived from the configuration, not the record.
    fn check_record<B: Backend>(&self, backbone: &PyramidBackbone<B>) -> Result<(), String> {
        if backbone.levels.len() != self.channels.len() {
            return Err(format!(
                "record has {} levels, configuration expects {}",
                backbone.levels.len(),
                self.channels.len()
            ));
        }

        let inputs = std::iter::once(self.in_channels).chain(self.channels.iter().copied());
        for (i, (conv, (&channels, in_channels))) in
            backbone.levels.iter().zip(self.channels.iter().zip(inputs)).enumerate()
        {
            let expected = [channels, in_channels, 3, 3];
            let found = conv.weight.val().dims();
            if found != expected {
                return Err(format!(
                    "level {i} weight has shape {found:?}, configuration expects {expected:?}"
                ));
            }
        }
        Ok(())
    }
}

impl<B: Backend> PyramidEncoder<B> {
    pub fn save(self, weights: &Path) -> error::Result<()> {
        self.backbone
            .save_file(
                weights.to_owned(),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            )
            .map_err(|err| Error::Record(format!("{}: {err:?}", weights.display())))
    }
}

impl<B: Backend> FeatureExtractor<B> for PyramidEncoder<B> {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn tap(&self, name: &str) -> Option<TapPoint> {
        self.taps
            .iter()
            .find(|(tap, _)| tap == name)
            .map(|(_, point)| *point)
    }

    fn extract(&self, input: Tensor<B, 4>, taps: &[String]) -> Vec<Tensor<B, 4>> {
        let maps = self.backbone.forward(input);
        taps.iter()
            .filter_map(|name| self.taps.iter().position(|(tap, _)| tap == name))
            .map(|level| maps[level].clone().detach())
            .collect()
    }
}
