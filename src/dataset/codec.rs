//! Raster decoding and lossless PNG encoding for dataset files.

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use image::{DynamicImage, GrayImage, ImageReader};
use png::{BitDepth, ColorType, Encoder};

use crate::error::{Error, Result};

/// Decodes an image of any format the `image` crate recognises, sniffing the
/// content rather than trusting the extension.
pub fn read_image(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .map_err(Error::io(path))?
        .with_guessed_format()
        .map_err(Error::io(path))?;
    reader.decode().map_err(|source| Error::Decode {
        path: path.to_owned(),
        source,
    })
}

/// Decodes an instance mask as 8-bit luma.
pub fn read_mask(path: &Path) -> Result<GrayImage> {
    Ok(read_image(path)?.to_luma8())
}

/// Raw 8-bit pixel data ready for the PNG encoder.
#[derive(Debug, Clone)]
pub struct PngImage {
    pub width: u32,
    pub height: u32,
    pub color: ColorType,
    pub data: Vec<u8>,
}

impl From<DynamicImage> for PngImage {
    fn from(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (color, data) = match image {
            DynamicImage::ImageLuma8(buf) => (ColorType::Grayscale, buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (ColorType::GrayscaleAlpha, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (ColorType::Rgb, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (ColorType::Rgba, buf.into_raw()),
            other if other.color().has_alpha() => (ColorType::Rgba, other.to_rgba8().into_raw()),
            other => (ColorType::Rgb, other.to_rgb8().into_raw()),
        };
        Self {
            width,
            height,
            color,
            data,
        }
    }
}

impl From<GrayImage> for PngImage {
    fn from(image: GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            color: ColorType::Grayscale,
            data: image.into_raw(),
        }
    }
}

pub fn write_png(path: &Path, image: &PngImage) -> Result<()> {
    let encode_err = |source| Error::Encode {
        path: path.to_owned(),
        source,
    };

    let file = File::create(path).map_err(Error::io(path))?;
    let mut encoder = Encoder::new(BufWriter::new(file), image.width, image.height);
    encoder.set_color(image.color);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(encode_err)?;
    writer.write_image_data(&image.data).map_err(encode_err)?;
    writer.finish().map_err(encode_err)
}

/// A file written under a hidden temporary name next to its target. It only
/// appears under the target name once committed; dropping it uncommitted
/// removes the temporary.
#[derive(Debug)]
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp, &self.target).map_err(Error::io(&self.target))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

pub fn stage_png(target: &Path, image: &PngImage) -> Result<StagedFile> {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{file_name}.partial"));

    // Constructed first so a failed encode still cleans up.
    let staged = StagedFile {
        temp,
        target: target.to_owned(),
        committed: false,
    };
    write_png(&staged.temp, image)?;
    Ok(staged)
}
