// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses flags with clap,
// merges them over the option file and hands the resolved
// `Opts` to Layer 2 (application).
//
//   seg-trainer --opt-file configs/opt.yaml --nepochs 20
//   seg-trainer --id unet --resume
//   seg-trainer --test --load-model runs/unet_.../model_best.mpk
//   seg-trainer --list
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;

use crate::application::pipeline::{Pipeline, RunOutcome};
use crate::config::{opts::Opts, registries::Registries};
use commands::OptArgs;

#[derive(Parser, Debug)]
#[command(
    name = "seg-trainer",
    version = "0.1.0",
    about = "Train and evaluate semantic segmentation models from YAML pipelines."
)]
pub struct Cli {
    /// Option file with an `opts:` mapping of defaults
    #[arg(long, default_value = "opt.yaml")]
    pub opt_file: PathBuf,

    /// Use this option file instead of `--opt-file`; must exist
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Print every registered component name and exit
    #[arg(long)]
    pub list: bool,

    #[command(flatten)]
    pub opts: OptArgs,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let regs = Registries::builtin().context("Failed to register built-in components")?;
        if self.list {
            for (kind, names) in regs.summary() {
                println!("{kind:<11} {}", names.join(", "));
            }
            return Ok(());
        }

        let opts = Opts::load(self.opts.into(), &self.opt_file, self.config_path.as_deref(), Local::now())
            .context("Failed to resolve run options")?;
        tracing::info!("Run '{}' (pipeline '{}')", opts.id, opts.cfg_pipeline.display());

        let pipeline = Pipeline::new(opts, &regs)?;
        let exp_dir = pipeline.exp_dir().clone();
        match pipeline.run()? {
            RunOutcome::Trained(summary) => {
                println!(
                    "Training complete: {} epochs, {} steps, best {} = {}",
                    summary.epochs,
                    summary.global_step,
                    summary.objective.name,
                    summary.best_metric.map_or("n/a".to_string(), |v| format!("{v:.4}")),
                );
            }
            RunOutcome::Evaluated(report) => {
                println!("Evaluation: loss = {:.4}", report.loss);
                for (name, value) in &report.metrics {
                    println!("  {name} = {value:.4}");
                }
            }
        }
        println!("Outputs in '{}'", exp_dir.display());
        Ok(())
    }
}
