// ============================================================
// Layer 4 — Segmentation Datasets
// ============================================================
// Datasets implement Burn's `Dataset<SegmentationItem>` trait and
// are built from validated `DatasetSpec`s found in the pipeline
// YAML:
//
//   LyftDataset              → explicit image / mask path lists
//   LyftDataset.from_folder  → every *.{extension} file of two
//                              sibling folders, sorted by name
//   SyntheticShapes          → generated rectangles, no files
//
// Items are decoded lazily in `get`, so worker threads of the
// data loader do the image I/O in parallel.
//
// Reference: Burn Book §4 (Dataset)

use burn::data::dataset::Dataset;
use image::RgbImage;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::config::{
    error::ConfigError,
    getter::{parse_args, Args, Factory},
};
use crate::data::{error::DataError, preprocessor::Preprocessor};
use crate::domain::{registry::Registry, sample::SegmentationItem};

/// Number of pairs kept when `sample: true`
pub const SAMPLE_SIZE: usize = 4;

/// Type-erased dataset handed to the splitter and loaders.
pub type DynDataset = Arc<dyn Dataset<SegmentationItem>>;

fn default_image_size() -> [usize; 2] {
    [224, 224]
}

fn default_extension() -> String {
    "png".to_string()
}

// ─── LyftDataset ──────────────────────────────────────────────────────────────
/// Paired RGB camera images and segmentation masks.
#[derive(Debug, Clone)]
pub struct LyftDataset {
    rgb_paths:  Vec<PathBuf>,
    mask_paths: Vec<PathBuf>,
    pre:        Preprocessor,
    test:       bool,
}

impl LyftDataset {
    /// `test` yields items without masks; `sample` keeps the first four pairs.
    pub fn new(
        mut rgb_paths:  Vec<PathBuf>,
        mut mask_paths: Vec<PathBuf>,
        image_size:     [usize; 2],
        test:           bool,
        sample:         bool,
    ) -> Result<Self, DataError> {
        let unlabeled = test && mask_paths.is_empty();
        if !unlabeled && rgb_paths.len() != mask_paths.len() {
            return Err(DataError::LengthMismatch { images: rgb_paths.len(), masks: mask_paths.len() });
        }
        if sample {
            rgb_paths.truncate(SAMPLE_SIZE);
            mask_paths.truncate(SAMPLE_SIZE);
        }
        tracing::info!("LyftDataset: {} images (test={})", rgb_paths.len(), test);
        Ok(Self { rgb_paths, mask_paths, pre: Preprocessor::new(image_size), test })
    }

    /// Every `*.{extension}` file under `root/image_folder_name` and
    /// `root/mask_folder_name`, sorted by file name.
    pub fn from_folder(
        root:              &Path,
        image_folder_name: &str,
        mask_folder_name:  &str,
        extension:         &str,
        image_size:        [usize; 2],
        test:              bool,
        sample:            bool,
    ) -> Result<Self, DataError> {
        let rgb = list_files(&root.join(image_folder_name), extension)?;
        let mask_dir = root.join(mask_folder_name);
        let masks = if test && !mask_dir.exists() { Vec::new() } else { list_files(&mask_dir, extension)? };
        Self::new(rgb, masks, image_size, test, sample)
    }

    /// Decode and preprocess one pair.
    pub fn load(&self, index: usize) -> Result<SegmentationItem, DataError> {
        let input = self.pre.image_to_input(&open_rgb(&self.rgb_paths[index])?);
        let mask = match (self.test, self.mask_paths.get(index)) {
            (true, _) | (false, None) => None,
            (false, Some(path)) => Some(self.pre.mask_to_labels(&open_rgb(path)?)),
        };
        Ok(SegmentationItem { index, input, mask, height: self.pre.height, width: self.pre.width })
    }
}

impl Dataset<SegmentationItem> for LyftDataset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        if index >= self.rgb_paths.len() {
            return None;
        }
        match self.load(index) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::error!("failed to load item {index}: {e}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.rgb_paths.len()
    }
}

fn open_rgb(path: &Path) -> Result<RgbImage, DataError> {
    let img = image::open(path).map_err(|source| DataError::Image { path: path.to_path_buf(), source })?;
    Ok(img.to_rgb8())
}

fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, DataError> {
    let entries = fs::read_dir(dir).map_err(|source| DataError::Io { path: dir.to_path_buf(), source })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|source| DataError::Io { path: dir.to_path_buf(), source })?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ─── SyntheticShapes ──────────────────────────────────────────────────────────
/// In-memory dataset: each item is a flat background with one
/// axis-aligned rectangle of a random foreground class. Items are
/// a pure function of `(seed, index)`.
#[derive(Debug, Clone)]
pub struct SyntheticShapes {
    len:         usize,
    pre:         Preprocessor,
    num_classes: usize,
    seed:        u64,
}

impl SyntheticShapes {
    pub fn new(len: usize, image_size: [usize; 2], num_classes: usize, seed: u64) -> Self {
        Self { len, pre: Preprocessor::new(image_size), num_classes: num_classes.max(2), seed }
    }

    fn generate(&self, index: usize) -> SegmentationItem {
        let (h, w) = (self.pre.height, self.pre.width);
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_mul(1_000_003).wrapping_add(index as u64));

        let class = rng.gen_range(1..self.num_classes) as i64;
        let y0 = rng.gen_range(0..h.max(1));
        let x0 = rng.gen_range(0..w.max(1));
        let y1 = rng.gen_range(y0..h.max(1)) + 1;
        let x1 = rng.gen_range(x0..w.max(1)) + 1;

        let mut img = RgbImage::new(w as u32, h as u32);
        let mut mask = vec![0i64; h * w];
        let palette = crate::domain::colormap::color_map(self.num_classes);
        for y in 0..h {
            for x in 0..w {
                let label = if (y0..y1).contains(&y) && (x0..x1).contains(&x) { class } else { 0 };
                mask[y * w + x] = label;
                img.put_pixel(x as u32, y as u32, image::Rgb(palette[label as usize]));
            }
        }

        SegmentationItem { index, input: self.pre.image_to_input(&img), mask: Some(mask), height: h, width: w }
    }
}

impl Dataset<SegmentationItem> for SyntheticShapes {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        (index < self.len).then(|| self.generate(index))
    }

    fn len(&self) -> usize {
        self.len
    }
}

// ─── Specs ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LyftListArgs {
    pub rgb_path_ls:  Vec<PathBuf>,
    pub mask_path_ls: Vec<PathBuf>,
    #[serde(default = "default_image_size")]
    pub image_size:   [usize; 2],
    #[serde(default)]
    pub test:         bool,
    #[serde(default)]
    pub sample:       bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LyftFolderArgs {
    pub root:              PathBuf,
    pub image_folder_name: String,
    pub mask_folder_name:  String,
    #[serde(default = "default_extension")]
    pub extension:         String,
    #[serde(default = "default_image_size")]
    pub image_size:        [usize; 2],
    #[serde(default)]
    pub test:              bool,
    #[serde(default)]
    pub sample:            bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticArgs {
    pub len:         usize,
    #[serde(default = "default_synthetic_size")]
    pub image_size:  [usize; 2],
    pub num_classes: usize,
    #[serde(default)]
    pub seed:        u64,
}

fn default_synthetic_size() -> [usize; 2] {
    [32, 32]
}

/// A validated dataset declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetSpec {
    LyftList(LyftListArgs),
    LyftFolder(LyftFolderArgs),
    Synthetic(SyntheticArgs),
}

impl DatasetSpec {
    pub fn build(&self) -> Result<DynDataset, DataError> {
        Ok(match self {
            Self::LyftList(a) => Arc::new(LyftDataset::new(
                a.rgb_path_ls.clone(),
                a.mask_path_ls.clone(),
                a.image_size,
                a.test,
                a.sample,
            )?),
            Self::LyftFolder(a) => Arc::new(LyftDataset::from_folder(
                &a.root,
                &a.image_folder_name,
                &a.mask_folder_name,
                &a.extension,
                a.image_size,
                a.test,
                a.sample,
            )?),
            Self::Synthetic(a) => Arc::new(SyntheticShapes::new(a.len, a.image_size, a.num_classes, a.seed)),
        })
    }
}

fn check_image_size(size: [usize; 2]) -> Result<(), ConfigError> {
    if size.iter().any(|&s| s == 0) {
        return Err(ConfigError::invalid("image_size", "both sides must be positive"));
    }
    Ok(())
}

fn lyft_list(args: Args) -> Result<DatasetSpec, ConfigError> {
    let a: LyftListArgs = parse_args("LyftDataset", args)?;
    check_image_size(a.image_size)?;
    Ok(DatasetSpec::LyftList(a))
}

fn lyft_folder(args: Args) -> Result<DatasetSpec, ConfigError> {
    let a: LyftFolderArgs = parse_args("LyftDataset.from_folder", args)?;
    check_image_size(a.image_size)?;
    Ok(DatasetSpec::LyftFolder(a))
}

fn synthetic(args: Args) -> Result<DatasetSpec, ConfigError> {
    let a: SyntheticArgs = parse_args("SyntheticShapes", args)?;
    check_image_size(a.image_size)?;
    if a.num_classes < 2 {
        return Err(ConfigError::invalid("num_classes", "SyntheticShapes needs at least 2 classes"));
    }
    Ok(DatasetSpec::Synthetic(a))
}

pub fn register(registry: &mut Registry<Factory<DatasetSpec>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("LyftDataset", lyft_list))?;
    registry.register(Factory::new("LyftDataset.from_folder", lyft_folder))?;
    registry.register(Factory::new("SyntheticShapes", synthetic))?;
    Ok(())
}
