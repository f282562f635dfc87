use image::{GrayImage, Luma};
use thiserror::Error;
use tracing::trace;

use super::{codec::read_mask, item::Item};
use crate::error::{Error, Result};

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("expected {}x{}, found {}x{}", .expected.0, .expected.1, .found.0, .found.1)]
pub struct ShapeMismatch {
    pub expected: (u32, u32),
    pub found: (u32, u32),
}

/// Binary class mask built as the per-pixel OR of an item's instance masks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticMask {
    buffer: GrayImage,
}

impl SemanticMask {
    /// All-background mask of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffer: GrayImage::from_pixel(width, height, Luma([BACKGROUND])),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Marks every pixel that is at full intensity in `instance` as
    /// foreground. Pixels already set stay set.
    pub fn accumulate(&mut self, instance: &GrayImage) -> std::result::Result<(), ShapeMismatch> {
        if instance.dimensions() != self.buffer.dimensions() {
            return Err(ShapeMismatch {
                expected: self.buffer.dimensions(),
                found: instance.dimensions(),
            });
        }

        for (dst, src) in self.buffer.iter_mut().zip(instance.iter()) {
            if *src == FOREGROUND {
                *dst = FOREGROUND;
            }
        }
        Ok(())
    }

    pub fn foreground_pixels(&self) -> usize {
        self.buffer.iter().filter(|&&p| p == FOREGROUND).count()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.buffer
    }

    pub fn into_image(self) -> GrayImage {
        self.buffer
    }
}

/// Reads every instance mask of `item` and merges them into one mask of
/// `width` x `height`.
pub fn aggregate(item: &Item, width: u32, height: u32) -> Result<SemanticMask> {
    let mut semantic = SemanticMask::new(width, height);
    for path in &item.mask_paths {
        let instance = read_mask(path)?;
        semantic
            .accumulate(&instance)
            .map_err(|mismatch| Error::DimensionMismatch {
                item: item.name.clone(),
                mask: path.clone(),
                expected: mismatch.expected,
                found: mismatch.found,
            })?;
        trace!(item = %item.name, mask = %path.display(), "merged instance mask");
    }
    Ok(semantic)
}
