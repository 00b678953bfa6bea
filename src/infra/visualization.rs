// ============================================================
// Layer 6 — Sample Visualization
// ============================================================
// Turns the last batch of a pass into three image grids:
//
//   inputs → inverse-normalized RGB images
//   labels → ground-truth class maps through the VOC color map
//   preds  → predicted class maps through the VOC color map
//
// Grids tile the batch 5 per row with a 2 px black border, and
// are written as PNG to `<exp>/samples/` and to the dashboard.

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use crate::data::preprocessor::{inverse_normalize, IMAGENET_MEAN, IMAGENET_STD};
use crate::domain::colormap::{color_map, labels_to_rgb};
use crate::infra::dashboard::Dashboard;

pub const GRID_NROW: usize = 5;
pub const GRID_PADDING: u32 = 2;
const PALETTE_SIZE: usize = 256;

/// Tile equally-sized images `nrow` per row. Returns None for an empty slice.
pub fn make_grid(tiles: &[RgbImage], nrow: usize, padding: u32) -> Option<RgbImage> {
    let first = tiles.first()?;
    let (w, h) = first.dimensions();
    let cols = nrow.max(1).min(tiles.len());
    let rows = tiles.len().div_ceil(cols);
    let (cell_w, cell_h) = (w + padding, h + padding);

    let mut grid = RgbImage::new(cell_w * cols as u32 + padding, cell_h * rows as u32 + padding);
    for (i, tile) in tiles.iter().enumerate() {
        let x0 = (i % cols) as u32 * cell_w + padding;
        let y0 = (i / cols) as u32 * cell_h + padding;
        for (x, y, px) in tile.enumerate_pixels() {
            if x < w && y < h {
                grid.put_pixel(x0 + x, y0 + y, *px);
            }
        }
    }
    Some(grid)
}

/// Host-side copy of one batch: inputs [N,3,H,W], labels and preds [N,H,W].
pub struct SampleBatch {
    pub inputs: Vec<f32>,
    pub labels: Option<Vec<i64>>,
    pub preds:  Vec<i64>,
    pub count:  usize,
    pub height: usize,
    pub width:  usize,
}

impl SampleBatch {
    pub fn input_images(&self) -> Vec<RgbImage> {
        let plane = 3 * self.height * self.width;
        self.inputs
            .chunks(plane)
            .take(self.count)
            .filter_map(|chw| {
                let hwc = inverse_normalize(chw, self.height, self.width, IMAGENET_MEAN, IMAGENET_STD);
                RgbImage::from_raw(self.width as u32, self.height as u32, hwc)
            })
            .collect()
    }

    pub fn label_images(labels: &[i64], count: usize, height: usize, width: usize) -> Vec<RgbImage> {
        let palette = color_map(PALETTE_SIZE);
        labels
            .chunks(height * width)
            .take(count)
            .filter_map(|hw| RgbImage::from_raw(width as u32, height as u32, labels_to_rgb(hw, &palette)))
            .collect()
    }
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("Cannot encode PNG")?;
    Ok(bytes)
}

/// Writes sample grids for one stage (`val` or `train`).
pub struct SampleWriter {
    dir: PathBuf,
}

impl SampleWriter {
    pub fn new(exp_dir: &Path) -> Result<Self> {
        let dir = exp_dir.join("samples");
        fs::create_dir_all(&dir).with_context(|| format!("Cannot create '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    fn file_name(stage: &str, kind: &str) -> String {
        if stage == "val" {
            format!("last_batch_{kind}.png")
        } else {
            format!("{stage}_last_batch_{kind}.png")
        }
    }

    /// Save grids as PNG and push them to the dashboard under
    /// `<stage>/samples/last_batch/<kind>` at `step`.
    pub fn write(&self, stage: &str, batch: &SampleBatch, dashboard: &mut Dashboard, step: usize) -> Result<Vec<PathBuf>> {
        let mut grids = vec![("inputs", batch.input_images())];
        if let Some(labels) = &batch.labels {
            grids.push(("labels", SampleBatch::label_images(labels, batch.count, batch.height, batch.width)));
        }
        grids.push(("preds", SampleBatch::label_images(&batch.preds, batch.count, batch.height, batch.width)));

        let mut written = Vec::new();
        for (kind, tiles) in grids {
            let Some(grid) = make_grid(&tiles, GRID_NROW, GRID_PADDING) else {
                continue;
            };
            let path = self.dir.join(Self::file_name(stage, kind));
            grid.save(&path).with_context(|| format!("Cannot write '{}'", path.display()))?;

            let png = encode_png(&grid)?;
            dashboard.add_image(&format!("{stage}/samples/last_batch/{kind}"), png, grid.height(), grid.width(), step)?;
            written.push(path);
        }
        tracing::debug!("Wrote {} {stage} sample grids at step {step}", written.len());
        Ok(written)
    }
}
