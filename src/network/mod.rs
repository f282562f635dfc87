//! U-Net style segmentation network built on a frozen, injected encoder.

pub mod assemble;
pub mod decoder;
pub mod encoder;

pub use assemble::{build, build_pretrained, NetworkConfig, SegmentationNetwork};
pub use decoder::{crop, Decoder, DecoderConfig, Upsample, UpsampleConfig};
pub use encoder::{
    mobilenet_v2_tap_names, FeatureExtractor, PyramidBackbone, PyramidEncoder,
    PyramidEncoderConfig, TapPoint, MOBILENET_V2_TAPS,
};
