//! Conversion of an instance-segmentation dataset (one directory per image,
//! one file per instance mask) into a flat semantic-segmentation dataset.

pub mod codec;
pub mod convert;
pub mod item;
pub mod layout;
pub mod mask;

pub use convert::{
    convert, convert_concurrent, convert_item, convert_with, ConversionReport, ConvertOptions,
    ItemSummary, OutputDirs, SkippedItem,
};
pub use item::{discover, Discovery, Item};
pub use layout::{inspect_layout, verify_dimensions, LayoutCheck};
pub use mask::{aggregate, SemanticMask, ShapeMismatch};
