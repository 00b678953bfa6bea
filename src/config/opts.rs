// ============================================================
// Config — Run Options
// ============================================================
// Run-level options come from two places:
//
//   1. command-line flags                 (highest priority)
//   2. the `opts:` mapping of opt.yaml    (defaults)
//
// For every option the first non-null value wins. An option that
// is still unset after the merge is reported; all missing names
// are collected into one `ConfigError::Unresolved`.
//
// After the merge:
//   - save_dir becomes <save_dir>/<id>_<%Y_%m_%d-%H_%M_%S>
//   - gpus "0,1" becomes [0, 1] ("-1" selects the CPU)
//   - debug > 0 forces num_workers = 0, batch_size = 1 and
//     keeps only the first GPU
//
// Reference: Rust Book §6 (Option), serde field attributes

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::config::error::ConfigError;

/// strftime format of the experiment directory suffix
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%H_%M_%S";

// ─── OptsOverlay ──────────────────────────────────────────────────────────────
/// One partial source of options. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptsOverlay {
    pub id:           Option<String>,
    pub test:         Option<bool>,
    pub debug:        Option<u32>,
    pub demo:         Option<bool>,
    pub fp16:         Option<bool>,
    pub load_model:   Option<String>,
    pub cfg_pipeline: Option<String>,
    pub resume:       Option<bool>,
    pub gpus:         Option<String>,
    pub num_workers:  Option<usize>,
    pub seed:         Option<u64>,
    pub verbose:      Option<u32>,
    pub nepochs:      Option<usize>,
    pub batch_size:   Option<usize>,
    pub num_iters:    Option<usize>,
    pub val_step:     Option<usize>,
    pub log_step:     Option<usize>,
    pub save_dir:     Option<String>,
}

#[derive(Debug, Deserialize)]
struct OptFile {
    opts: OptsOverlay,
}

impl OptsOverlay {
    /// Field-wise merge: values already set in `self` win over `defaults`.
    pub fn or(self, defaults: OptsOverlay) -> OptsOverlay {
        OptsOverlay {
            id:           self.id.or(defaults.id),
            test:         self.test.or(defaults.test),
            debug:        self.debug.or(defaults.debug),
            demo:         self.demo.or(defaults.demo),
            fp16:         self.fp16.or(defaults.fp16),
            load_model:   self.load_model.or(defaults.load_model),
            cfg_pipeline: self.cfg_pipeline.or(defaults.cfg_pipeline),
            resume:       self.resume.or(defaults.resume),
            gpus:         self.gpus.or(defaults.gpus),
            num_workers:  self.num_workers.or(defaults.num_workers),
            seed:         self.seed.or(defaults.seed),
            verbose:      self.verbose.or(defaults.verbose),
            nepochs:      self.nepochs.or(defaults.nepochs),
            batch_size:   self.batch_size.or(defaults.batch_size),
            num_iters:    self.num_iters.or(defaults.num_iters),
            val_step:     self.val_step.or(defaults.val_step),
            log_step:     self.log_step.or(defaults.log_step),
            save_dir:     self.save_dir.or(defaults.save_dir),
        }
    }

    /// Read the `opts:` mapping of an option file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let file: OptFile = serde_yaml::from_str(&text)
            .map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })?;
        Ok(file.opts)
    }
}

// ─── Opts ─────────────────────────────────────────────────────────────────────
/// Fully resolved run options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opts {
    pub id:           String,
    pub test:         bool,
    pub debug:        u32,
    pub demo:         bool,
    pub fp16:         bool,
    pub load_model:   Option<PathBuf>,
    pub cfg_pipeline: PathBuf,
    pub resume:       bool,
    /// Device indices; `[-1]` means CPU
    pub gpus:         Vec<i32>,
    pub num_workers:  usize,
    pub seed:         u64,
    pub verbose:      u32,
    pub nepochs:      usize,
    pub batch_size:   usize,
    /// Iterations per epoch; None = every batch of the loader
    pub num_iters:    Option<usize>,
    pub val_step:     usize,
    pub log_step:     usize,
    /// Root under which experiment directories are created
    pub save_root:    PathBuf,
    /// This run's experiment directory
    pub save_dir:     PathBuf,
}

impl Opts {
    /// Merge CLI flags over the option file and resolve.
    ///
    /// `config_path` replaces `opt_file` as the source of defaults and
    /// must exist; a missing default `opt_file` is treated as empty.
    pub fn load(
        cli:         OptsOverlay,
        opt_file:    &Path,
        config_path: Option<&Path>,
        now:         DateTime<Local>,
    ) -> Result<Self, ConfigError> {
        let defaults = match config_path {
            Some(path) => OptsOverlay::from_file(path)?,
            None if opt_file.exists() => OptsOverlay::from_file(opt_file)?,
            None => {
                tracing::warn!("option file '{}' not found, using command-line values only", opt_file.display());
                OptsOverlay::default()
            }
        };
        Self::resolve(cli.or(defaults), now)
    }

    /// Turn a merged overlay into `Opts`, reporting every unset option at once.
    pub fn resolve(merged: OptsOverlay, now: DateTime<Local>) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        macro_rules! required {
            ($field:ident) => {{
                if merged.$field.is_none() {
                    missing.push(stringify!($field).to_string());
                }
                merged.$field.clone()
            }};
        }

        let id           = required!(id);
        let debug        = required!(debug);
        let gpus         = required!(gpus);
        let num_workers  = required!(num_workers);
        let seed         = required!(seed);
        let verbose      = required!(verbose);
        let nepochs      = required!(nepochs);
        let batch_size   = required!(batch_size);
        let val_step     = required!(val_step);
        let log_step     = required!(log_step);
        let save_dir     = required!(save_dir);
        let cfg_pipeline = required!(cfg_pipeline);

        let (
            Some(id), Some(debug), Some(gpus), Some(mut num_workers), Some(seed), Some(verbose),
            Some(nepochs), Some(mut batch_size), Some(val_step), Some(log_step), Some(save_dir),
            Some(cfg_pipeline),
        ) = (
            id, debug, gpus, num_workers, seed, verbose, nepochs, batch_size, val_step, log_step,
            save_dir, cfg_pipeline,
        )
        else {
            return Err(ConfigError::Unresolved(missing));
        };

        if batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if val_step == 0 {
            return Err(ConfigError::invalid("val_step", "must be at least 1"));
        }
        if log_step == 0 {
            return Err(ConfigError::invalid("log_step", "must be at least 1"));
        }
        if merged.num_iters == Some(0) {
            return Err(ConfigError::invalid("num_iters", "must be at least 1"));
        }

        let mut gpus = parse_gpus(&gpus)?;
        if debug > 0 {
            num_workers = 0;
            batch_size = 1;
            gpus.truncate(1);
        }

        let save_root = PathBuf::from(save_dir);
        let run_dir = save_root.join(format!("{}_{}", id, now.format(TIMESTAMP_FORMAT)));

        Ok(Self {
            id,
            test:         merged.test.unwrap_or(false),
            debug,
            demo:         merged.demo.unwrap_or(false),
            fp16:         merged.fp16.unwrap_or(false),
            load_model:   merged.load_model.filter(|p| !p.is_empty()).map(PathBuf::from),
            cfg_pipeline: PathBuf::from(cfg_pipeline),
            resume:       merged.resume.unwrap_or(false),
            gpus,
            num_workers,
            seed,
            verbose,
            nepochs,
            batch_size,
            num_iters:    merged.num_iters,
            val_step,
            log_step,
            save_root,
            save_dir:     run_dir,
        })
    }

    /// `false` when `--gpus -1` selected the CPU.
    pub fn uses_gpu(&self) -> bool {
        self.gpus.first().is_some_and(|&g| g >= 0)
    }
}

/// Parse a comma separated device list such as "0,1" or "-1".
pub fn parse_gpus(raw: &str) -> Result<Vec<i32>, ConfigError> {
    let gpus = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i32>()
                .map_err(|_| ConfigError::invalid("gpus", format!("'{s}' is not a device index")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if gpus.is_empty() {
        return Err(ConfigError::invalid("gpus", "no device given"));
    }
    Ok(gpus)
}
