// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records one CSV row per validated epoch in `<exp>/metrics.csv`.
//
// The metric columns are fixed when the file is created from the
// configured metric names:
//
//   epoch,global_step,lr,train_loss,val_loss,MeanIoU,PixelAccuracy
//   2,120,0.010000,0.613204,0.588410,0.412000,0.871000
//   4,240,0.010000,0.501377,0.497100,0.455000,0.889000
//
// An existing file is appended to, so a resumed run keeps its
// earlier rows.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// Everything logged about one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch:       usize,
    pub global_step: usize,
    pub lr:          f64,
    /// Mean training loss over the epoch's batches
    pub train_loss:  f64,
    /// None when the epoch was not validated
    pub val_loss:    Option<f64>,
    pub metrics:     BTreeMap<String, f64>,
}

impl EpochRecord {
    pub fn new(epoch: usize, global_step: usize, lr: f64, train_loss: f64) -> Self {
        Self { epoch, global_step, lr, train_loss, val_loss: None, metrics: BTreeMap::new() }
    }

    pub fn with_validation(mut self, val_loss: f64, metrics: BTreeMap<String, f64>) -> Self {
        self.val_loss = Some(val_loss);
        self.metrics = metrics;
        self
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
    columns:  Vec<String>,
}

impl MetricsLogger {
    /// Writes the header only if the file doesn't exist yet.
    pub fn new(dir: &Path, metric_names: &[String]) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let csv_path = dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            let mut header = String::from("epoch,global_step,lr,train_loss,val_loss");
            for name in metric_names {
                header.push(',');
                header.push_str(name);
            }
            writeln!(f, "{header}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path, columns: metric_names.to_vec() })
    }

    /// Append one row. Missing values are left empty.
    pub fn log(&self, r: &EpochRecord) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        let mut row = format!("{},{},{:.6},{:.6},{}", r.epoch, r.global_step, r.lr, r.train_loss, fmt_opt(r.val_loss));
        for name in &self.columns {
            row.push(',');
            row.push_str(&fmt_opt(r.metrics.get(name).copied()));
        }
        writeln!(f, "{row}")?;

        tracing::debug!("Logged epoch {} metrics to '{}'", r.epoch, self.csv_path.display());
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.6}")).unwrap_or_default()
}
