//! Discovery of conversion items in an instance-segmentation dataset.
//!
//! A dataset is a directory of item directories, each holding an `images/`
//! directory with exactly one source image and an optional `masks/` directory
//! with any number of instance masks. Discovery runs to completion before
//! anything is converted, so a malformed item is reported without touching
//! the output.

use std::{
    fs::read_dir,
    path::{Path, PathBuf},
};

use tracing::{debug, trace};

use crate::error::{Error, Result};

pub const IMAGES_DIR: &str = "images";
pub const MASKS_DIR: &str = "masks";

pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// One source image plus its instance masks, named after its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub name: String,
    pub image_path: PathBuf,
    pub mask_paths: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct Discovery {
    /// Valid items, sorted by name.
    pub items: Vec<Item>,
    /// Item directories that failed validation, with the reason.
    pub rejected: Vec<(String, Error)>,
}

/// Lists the visible regular files of `dir`, sorted by file name.
fn visible_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in read_dir(dir).map_err(Error::io(dir))? {
        let entry = entry.map_err(Error::io(dir))?;
        let path = entry.path();
        if is_hidden(&entry.file_name().to_string_lossy()) || !path.is_file() {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

impl Item {
    /// Validates a single item directory.
    pub fn from_dir(name: &str, dir: &Path) -> Result<Self> {
        let images_dir = dir.join(IMAGES_DIR);
        if !images_dir.is_dir() {
            return Err(Error::malformed(name, "missing images/ directory"));
        }

        let mut images = visible_files(&images_dir)?;
        let image_path = match images.len() {
            0 => return Err(Error::malformed(name, "images/ directory is empty")),
            1 => images.remove(0),
            n => {
                return Err(Error::malformed(
                    name,
                    format!("expected exactly one image in images/, found {n}"),
                ))
            }
        };

        let masks_dir = dir.join(MASKS_DIR);
        let mask_paths = if masks_dir.is_dir() {
            visible_files(&masks_dir)?
        } else {
            debug!(item = name, "no masks/ directory, treating as zero instances");
            Vec::new()
        };

        Ok(Self {
            name: name.to_owned(),
            image_path,
            mask_paths,
        })
    }
}

/// Enumerates the item directories directly under `dataset_path`.
///
/// Hidden entries and plain files are skipped silently. Only a failure to
/// read `dataset_path` itself is returned as an error; per-item problems land
/// in [`Discovery::rejected`].
pub fn discover(dataset_path: &Path) -> Result<Discovery> {
    let mut discovery = Discovery::default();

    for entry in read_dir(dataset_path).map_err(Error::io(dataset_path))? {
        let entry = entry.map_err(Error::io(dataset_path))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if is_hidden(&name) || !path.is_dir() {
            trace!(entry = %name, "skipping non-item entry");
            continue;
        }

        match Item::from_dir(&name, &path) {
            Ok(item) => discovery.items.push(item),
            Err(err) => discovery.rejected.push((name, err)),
        }
    }

    discovery.items.sort_by(|a, b| a.name.cmp(&b.name));
    discovery.rejected.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(discovery)
}
