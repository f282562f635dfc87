pub mod dataset;
pub mod error;
pub mod logging;
pub mod network;

pub use dataset::{convert, convert_concurrent, convert_with, ConversionReport, ConvertOptions};
pub use error::{Error, Result};
pub use network::{build, build_pretrained, NetworkConfig, SegmentationNetwork};
