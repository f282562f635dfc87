//! Consistency checks for a converted dataset: a flat `images/` and `masks/`
//! pair of directories where every image has exactly one mask with the same
//! base name.

use std::{
    collections::BTreeMap,
    fs::read_dir,
    path::{Path, PathBuf},
};

use serde::Serialize;

use super::item::{is_hidden, IMAGES_DIR, MASKS_DIR};
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutCheck {
    /// Base names present in both directories.
    pub pairs: Vec<String>,
    pub orphan_images: Vec<String>,
    pub orphan_masks: Vec<String>,
    /// Subdirectories, which a flat layout must not have.
    pub nested: Vec<PathBuf>,
    /// Pairs whose image and mask sizes differ. Only filled by
    /// [`verify_dimensions`].
    pub size_mismatches: Vec<String>,
}

impl LayoutCheck {
    pub fn is_consistent(&self) -> bool {
        self.orphan_images.is_empty()
            && self.orphan_masks.is_empty()
            && self.nested.is_empty()
            && self.size_mismatches.is_empty()
    }
}

/// Visible files in `dir` keyed by file stem. Missing directories read as
/// empty.
fn files_by_stem(dir: &Path, nested: &mut Vec<PathBuf>) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    if !dir.exists() {
        return Ok(files);
    }

    for entry in read_dir(dir).map_err(Error::io(dir))? {
        let entry = entry.map_err(Error::io(dir))?;
        let path = entry.path();
        if is_hidden(&entry.file_name().to_string_lossy()) {
            continue;
        }
        if path.is_dir() {
            nested.push(path);
            continue;
        }
        if let Some(stem) = path.file_stem() {
            files.insert(stem.to_string_lossy().into_owned(), path);
        }
    }
    Ok(files)
}

pub fn inspect_layout(out_path: &Path) -> Result<LayoutCheck> {
    let mut check = LayoutCheck::default();
    let images = files_by_stem(&out_path.join(IMAGES_DIR), &mut check.nested)?;
    let masks = files_by_stem(&out_path.join(MASKS_DIR), &mut check.nested)?;

    for stem in images.keys() {
        if masks.contains_key(stem) {
            check.pairs.push(stem.clone());
        } else {
            check.orphan_images.push(stem.clone());
        }
    }
    check.orphan_masks = masks
        .keys()
        .filter(|stem| !images.contains_key(*stem))
        .cloned()
        .collect();
    check.nested.sort();

    Ok(check)
}

/// Compares image and mask sizes for every pair in `check`, reading only the
/// file headers.
pub fn verify_dimensions(out_path: &Path, check: &mut LayoutCheck) -> Result<()> {
    let mut nested = Vec::new();
    let images = files_by_stem(&out_path.join(IMAGES_DIR), &mut nested)?;
    let masks = files_by_stem(&out_path.join(MASKS_DIR), &mut nested)?;

    let header = |path: &PathBuf| {
        image::image_dimensions(path).map_err(|source| Error::Decode {
            path: path.clone(),
            source,
        })
    };

    check.size_mismatches.clear();
    for stem in &check.pairs {
        let (Some(image), Some(mask)) = (images.get(stem), masks.get(stem)) else {
            continue;
        };
        if header(image)? != header(mask)? {
            check.size_mismatches.push(stem.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use std::fs;

    fn write(path: &Path, width: u32, height: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        GrayImage::new(width, height).save(path).unwrap();
    }

    #[test]
    fn matched_layout_is_consistent() {
        let out = tempfile::tempdir().unwrap();
        write(&out.path().join("images/a.png"), 2, 2);
        write(&out.path().join("masks/a.png"), 2, 2);
        write(&out.path().join("images/b.png"), 3, 1);
        write(&out.path().join("masks/b.png"), 3, 1);
        fs::write(out.path().join("masks/.b.png.partial"), b"").unwrap();

        let mut check = inspect_layout(out.path()).unwrap();
        verify_dimensions(out.path(), &mut check).unwrap();
        assert_eq!(check.pairs, ["a", "b"]);
        assert!(check.is_consistent());
    }

    #[test]
    fn orphans_and_nesting_are_reported() {
        let out = tempfile::tempdir().unwrap();
        write(&out.path().join("images/a.png"), 2, 2);
        write(&out.path().join("masks/z.png"), 2, 2);
        write(&out.path().join("masks/deep/a.png"), 2, 2);

        let check = inspect_layout(out.path()).unwrap();
        assert!(check.pairs.is_empty());
        assert_eq!(check.orphan_images, ["a"]);
        assert_eq!(check.orphan_masks, ["z"]);
        assert_eq!(check.nested, [out.path().join("masks/deep")]);
        assert!(!check.is_consistent());
    }

    #[test]
    fn size_mismatch_is_reported() {
        let out = tempfile::tempdir().unwrap();
        write(&out.path().join("images/a.png"), 2, 2);
        write(&out.path().join("masks/a.png"), 2, 3);

        let mut check = inspect_layout(out.path()).unwrap();
        assert!(check.is_consistent());
        verify_dimensions(out.path(), &mut check).unwrap();
        assert_eq!(check.size_mismatches, ["a"]);
        assert!(!check.is_consistent());
    }

    #[test]
    fn empty_output_is_consistent() {
        let out = tempfile::tempdir().unwrap();
        let check = inspect_layout(out.path()).unwrap();
        assert_eq!(check, LayoutCheck::default());
    }
}
