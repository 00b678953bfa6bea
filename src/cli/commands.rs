// ============================================================
// Layer 1 — CLI Arguments
// ============================================================
// Every run option can be given on the command line. Flags left
// out fall back to the option file, so all of them are optional
// here and merged later by `Opts::load`.
//
// Switches (`--test`, `--resume`, ...) can only turn an option on;
// leaving one out keeps whatever the option file says.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::Args;

use crate::config::opts::OptsOverlay;

#[derive(Args, Debug, Default)]
pub struct OptArgs {
    /// Experiment name, prefix of the experiment directory
    #[arg(long)]
    pub id: Option<String>,

    /// Evaluate only, no parameter updates
    #[arg(long)]
    pub test: bool,

    /// Debug level; > 0 forces batch size 1, no workers and one GPU
    #[arg(long)]
    pub debug: Option<u32>,

    /// Also write training-batch samples
    #[arg(long)]
    pub demo: bool,

    /// Request half precision (runs in f32 with a warning)
    #[arg(long)]
    pub fp16: bool,

    /// Weights to start from (model_<slot>.mpk written by a previous run)
    #[arg(long)]
    pub load_model: Option<String>,

    /// Pipeline YAML describing data, model, loss, optimizer and learner
    #[arg(long)]
    pub cfg_pipeline: Option<String>,

    /// Continue the newest run with the same id
    #[arg(long)]
    pub resume: bool,

    /// Comma separated device indices, -1 for CPU
    #[arg(long, allow_hyphen_values = true)]
    pub gpus: Option<String>,

    #[arg(long)]
    pub num_workers: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// 0 shows a progress bar, > 0 logs every `log_step` iterations
    #[arg(long)]
    pub verbose: Option<u32>,

    #[arg(long)]
    pub nepochs: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Cap on training iterations per epoch
    #[arg(long)]
    pub num_iters: Option<usize>,

    /// Validate every N epochs
    #[arg(long)]
    pub val_step: Option<usize>,

    #[arg(long)]
    pub log_step: Option<usize>,

    /// Root directory for experiment directories
    #[arg(long)]
    pub save_dir: Option<String>,
}

fn switch(on: bool) -> Option<bool> {
    on.then_some(true)
}

impl From<OptArgs> for OptsOverlay {
    fn from(a: OptArgs) -> Self {
        OptsOverlay {
            id:           a.id,
            test:         switch(a.test),
            debug:        a.debug,
            demo:         switch(a.demo),
            fp16:         switch(a.fp16),
            load_model:   a.load_model,
            cfg_pipeline: a.cfg_pipeline,
            resume:       switch(a.resume),
            gpus:         a.gpus,
            num_workers:  a.num_workers,
            seed:         a.seed,
            verbose:      a.verbose,
            nepochs:      a.nepochs,
            batch_size:   a.batch_size,
            num_iters:    a.num_iters,
            val_step:     a.val_step,
            log_step:     a.log_step,
            save_dir:     a.save_dir,
        }
    }
}
