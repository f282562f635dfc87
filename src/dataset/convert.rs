//! Instance-to-semantic dataset conversion.
//!
//! Each item is converted independently: its image is re-encoded to
//! `images/<item>.png` and its merged mask written to `masks/<item>.png`.
//! Both files are staged and only renamed into place once the whole item has
//! succeeded, so a failed or interrupted item leaves no partial pair. Item
//! failures are logged and reported, never fatal to the batch.

use std::{
    fs::{create_dir_all, remove_file},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    thread::available_parallelism,
};

use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{
    codec::{read_image, stage_png, PngImage},
    item::{discover, Discovery, Item, IMAGES_DIR, MASKS_DIR},
    layout::{inspect_layout, LayoutCheck},
    mask::aggregate,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Items converted at once by [`convert_concurrent`].
    pub workers: usize,
    /// Log progress every this many items; 0 disables progress logging.
    pub progress_every: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            workers: available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
            progress_every: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub images: PathBuf,
    pub masks: PathBuf,
}

impl OutputDirs {
    /// Creates `out_path/images` and `out_path/masks` if they are absent.
    pub fn create(out_path: &Path) -> Result<Self> {
        let dirs = Self {
            images: out_path.join(IMAGES_DIR),
            masks: out_path.join(MASKS_DIR),
        };
        create_dir_all(&dirs.images).map_err(Error::io(&dirs.images))?;
        create_dir_all(&dirs.masks).map_err(Error::io(&dirs.masks))?;
        Ok(dirs)
    }

    pub fn image_path(&self, item: &str) -> PathBuf {
        self.images.join(format!("{item}.png"))
    }

    pub fn mask_path(&self, item: &str) -> PathBuf {
        self.masks.join(format!("{item}.png"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ItemSummary {
    pub width: u32,
    pub height: u32,
    pub instances: usize,
    pub foreground_pixels: usize,
}

/// Converts one item, writing its image and semantic mask under `dirs`.
pub fn convert_item(item: &Item, dirs: &OutputDirs) -> Result<ItemSummary> {
    let image = read_image(&item.image_path)?;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(Error::malformed(&item.name, "source image has zero size"));
    }

    let semantic = aggregate(item, width, height)?;
    let foreground_pixels = semantic.foreground_pixels();

    let staged_image = stage_png(&dirs.image_path(&item.name), &PngImage::from(image))?;
    let staged_mask = stage_png(
        &dirs.mask_path(&item.name),
        &PngImage::from(semantic.into_image()),
    )?;
    let mask_path = staged_mask.target().to_owned();
    staged_mask.commit()?;
    if let Err(err) = staged_image.commit() {
        // An unpaired mask would break the layout; drop it with the image.
        let _ = remove_file(&mask_path);
        return Err(err);
    }

    let summary = ItemSummary {
        width,
        height,
        instances: item.mask_paths.len(),
        foreground_pixels,
    };
    debug!(item = %item.name, ?summary, "converted item");
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub item: String,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ConversionReport {
    pub converted: Vec<String>,
    pub skipped: Vec<SkippedItem>,
    pub layout: LayoutCheck,
}

impl ConversionReport {
    fn record(&mut self, item: String, outcome: Result<ItemSummary>) {
        match outcome {
            Ok(_) => self.converted.push(item),
            Err(err) => self.skip(item, err),
        }
    }

    fn skip(&mut self, item: String, err: Error) {
        warn!(item = %item, error = %err, "skipping item");
        self.skipped.push(SkippedItem {
            item,
            kind: err.kind(),
            reason: err.to_string(),
        });
    }

    fn finish(mut self, out_path: &Path) -> Result<Self> {
        self.converted.sort();
        self.skipped.sort_by(|a, b| a.item.cmp(&b.item));
        self.layout = inspect_layout(out_path)?;

        if !self.layout.is_consistent() {
            warn!(
                orphan_images = self.layout.orphan_images.len(),
                orphan_masks = self.layout.orphan_masks.len(),
                nested = self.layout.nested.len(),
                "output directory is not a clean image/mask pairing"
            );
        }
        info!(
            converted = self.converted.len(),
            skipped = self.skipped.len(),
            "conversion finished"
        );
        Ok(self)
    }
}

struct Progress {
    done: usize,
    total: usize,
    every: usize,
}

impl Progress {
    fn new(total: usize, every: usize) -> Self {
        Self {
            done: 0,
            total,
            every,
        }
    }

    fn tick(&mut self) {
        if self.every > 0 && self.done % self.every == 0 {
            info!("Processing image {} out of {}", self.done, self.total);
        }
        self.done += 1;
    }
}

fn start(discovery: Discovery) -> (Vec<Item>, ConversionReport) {
    let mut report = ConversionReport::default();
    for (name, err) in discovery.rejected {
        report.skip(name, err);
    }
    (discovery.items, report)
}

/// Converts the dataset at `dataset_path` into `out_path` with default options.
pub fn convert(
    dataset_path: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
) -> Result<ConversionReport> {
    convert_with(dataset_path, out_path, &ConvertOptions::default())
}

/// Sequential conversion, one item after another in name order.
pub fn convert_with(
    dataset_path: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
    options: &ConvertOptions,
) -> Result<ConversionReport> {
    let out_path = out_path.as_ref();
    let dirs = OutputDirs::create(out_path)?;
    let (items, mut report) = start(discover(dataset_path.as_ref())?);

    let mut progress = Progress::new(items.len(), options.progress_every);
    for item in items {
        progress.tick();
        let outcome = convert_item(&item, &dirs);
        report.record(item.name, outcome);
    }

    report.finish(out_path)
}

/// Converts items on the blocking thread pool with at most
/// `options.workers` in flight. Completion order is arbitrary; the report is
/// sorted by item name.
pub async fn convert_concurrent(
    dataset_path: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
    options: &ConvertOptions,
) -> Result<ConversionReport> {
    let dataset_path = dataset_path.as_ref().to_owned();
    let out_path = out_path.as_ref().to_owned();

    let setup_out = out_path.clone();
    let (dirs, discovery) = tokio::task::spawn_blocking(move || {
        Ok::<_, Error>((OutputDirs::create(&setup_out)?, discover(&dataset_path)?))
    })
    .await??;

    let dirs = Arc::new(dirs);
    let (items, mut report) = start(discovery);
    let mut progress = Progress::new(items.len(), options.progress_every);

    let mut jobs = stream::iter(items)
        .map(move |item| {
            let dirs = Arc::clone(&dirs);
            tokio::task::spawn_blocking(move || {
                let outcome = convert_item(&item, &dirs);
                (item.name, outcome)
            })
        })
        .buffer_unordered(options.workers.max(1));

    while let Some(joined) = jobs.next().await {
        let (name, outcome) = joined?;
        progress.tick();
        report.record(name, outcome);
    }

    tokio::task::spawn_blocking(move || report.finish(&out_path)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::fs;

    fn item_with_image(root: &Path, name: &str, width: u32, height: u32) -> Item {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("images")).unwrap();
        fs::create_dir_all(dir.join("masks")).unwrap();
        let image_path = dir.join("images").join(format!("{name}.png"));
        RgbImage::from_pixel(width, height, Rgb([9, 8, 7]))
            .save(&image_path)
            .unwrap();
        Item {
            name: name.to_owned(),
            image_path,
            mask_paths: Vec::new(),
        }
    }

    #[test]
    fn output_dirs_are_idempotent() {
        let out = tempfile::tempdir().unwrap();
        OutputDirs::create(out.path()).unwrap();
        let dirs = OutputDirs::create(out.path()).unwrap();
        assert!(dirs.images.is_dir() && dirs.masks.is_dir());
        assert_eq!(dirs.mask_path("x"), out.path().join("masks/x.png"));
    }

    #[test]
    fn mismatched_mask_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut item = item_with_image(root.path(), "cell", 4, 4);
        let mask_path = root.path().join("cell/masks/m.png");
        GrayImage::from_pixel(4, 2, Luma([255]))
            .save(&mask_path)
            .unwrap();
        item.mask_paths.push(mask_path);

        let dirs = OutputDirs::create(out.path()).unwrap();
        let err = convert_item(&item, &dirs).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(fs::read_dir(&dirs.images).unwrap().count(), 0);
        assert_eq!(fs::read_dir(&dirs.masks).unwrap().count(), 0);
    }

    #[test]
    fn failed_image_commit_leaves_no_mask() {
        let root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let item = item_with_image(root.path(), "cell", 2, 2);
        let dirs = OutputDirs::create(out.path()).unwrap();
        // A directory in the image's place makes the final rename fail.
        fs::create_dir_all(dirs.image_path("cell").join("blocker")).unwrap();

        let err = convert_item(&item, &dirs).unwrap_err();
        assert!(matches!(err, Error::IoFailure { .. }), "{err}");
        assert_eq!(fs::read_dir(&dirs.masks).unwrap().count(), 0);
        let leftovers: Vec<_> = fs::read_dir(&dirs.images)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, ["cell.png"]);
    }

    #[test]
    fn summary_counts_instances_and_foreground() {
        let root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut item = item_with_image(root.path(), "cell", 3, 2);
        for (i, x) in [0u32, 2].into_iter().enumerate() {
            let mut mask = GrayImage::new(3, 2);
            mask.put_pixel(x, 1, Luma([255]));
            let path = root.path().join(format!("cell/masks/{i}.png"));
            mask.save(&path).unwrap();
            item.mask_paths.push(path);
        }

        let dirs = OutputDirs::create(out.path()).unwrap();
        let summary = convert_item(&item, &dirs).unwrap();
        assert_eq!(
            summary,
            ItemSummary {
                width: 3,
                height: 2,
                instances: 2,
                foreground_pixels: 2
            }
        );
    }

    #[test]
    fn report_lists_discovery_rejections() {
        let root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        item_with_image(root.path(), "good", 2, 2);
        fs::create_dir_all(root.path().join("bad/images")).unwrap();

        let report = convert_with(
            root.path(),
            out.path(),
            &ConvertOptions {
                workers: 1,
                progress_every: 1,
            },
        )
        .unwrap();
        assert_eq!(report.converted, ["good"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].item, "bad");
        assert_eq!(report.skipped[0].kind, "MalformedItem");
        assert!(report.layout.is_consistent());
    }
}
