pub mod dataset;
pub mod train;

pub use dataset::SequenceDataset;
pub use train::{EarlyStopping, FitSummary, Metrics, Trainer, TrainingState};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the encoder bundle written next to the checkpoints.
pub const LANG_PARAMS_FILE: &str = "lang_params.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "SGD", alias = "sgd")]
    Sgd,
    #[serde(rename = "Adam", alias = "adam")]
    Adam,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Sgd => f.write_str("SGD"),
            OptimizerKind::Adam => f.write_str("Adam"),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            other => Err(format!("unknown optimizer {other:?} (expected SGD or Adam)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    pub max_seq_len: usize,
    pub batch_size: usize,
    /// Threads used to encode batch items; 0 keeps the rayon default.
    pub num_workers: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub optimizer: OptimizerKind,
    pub momentum: f64,
    pub seed: u64,
    pub log_interval: usize,
    pub eval_interval: usize,
    pub save_interval: usize,
    pub early_stopping: bool,
    /// Dev evaluations without improvement before stopping.
    pub patience: usize,
    /// Epochs at which the learning rate is multiplied by `lr_gamma`.
    pub lr_milestones: Vec<usize>,
    pub lr_gamma: f64,
    pub resume: Option<PathBuf>,
    /// Directory of CSV files evaluated after training, in addition to test/.
    pub external_test: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/random_split"),
            model_dir: PathBuf::from("model_weights"),
            max_seq_len: 120,
            batch_size: 32,
            num_workers: 0,
            num_epochs: 25,
            learning_rate: 1e-2,
            weight_decay: 1e-2,
            optimizer: OptimizerKind::Sgd,
            momentum: 0.9,
            seed: 0,
            log_interval: 100,
            eval_interval: 500,
            save_interval: 500,
            early_stopping: false,
            patience: 3,
            lr_milestones: vec![5, 8, 10, 12, 14, 16, 18, 20],
            lr_gamma: 0.9,
            resume: None,
            external_test: None,
        }
    }
}

impl TrainerConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read training config {:?}", path.as_ref()))?;
        serde_yaml::from_str(&content).context("Failed to parse training config")
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_seq_len > 0, "max_seq_len must be positive");
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.log_interval > 0, "log_interval must be positive");
        ensure!(self.eval_interval > 0, "eval_interval must be positive");
        ensure!(self.save_interval > 0, "save_interval must be positive");
        ensure!(self.learning_rate > 0.0, "learning_rate must be positive");
        ensure!(
            !self.early_stopping || self.patience > 0,
            "patience must be positive when early_stopping is enabled"
        );
        Ok(())
    }

    pub fn lang_params_path(&self) -> PathBuf {
        self.model_dir.join(LANG_PARAMS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: TrainerConfig = serde_yaml::from_str(
            "batch_size: 64\noptimizer: Adam\nlr_milestones: [3, 6]\n",
        )
        .unwrap();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert_eq!(config.lr_milestones, vec![3, 6]);
        assert_eq!(config.max_seq_len, 120);
        assert_eq!(config.momentum, 0.9);
    }

    #[test]
    fn optimizer_names_are_case_insensitive() {
        assert_eq!("SGD".parse::<OptimizerKind>(), Ok(OptimizerKind::Sgd));
        assert_eq!("adam".parse::<OptimizerKind>(), Ok(OptimizerKind::Adam));
        assert!("rmsprop".parse::<OptimizerKind>().is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = TrainerConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(TrainerConfig::default().validate().is_ok());
    }

    #[test]
    fn early_stopping_needs_patience() {
        let config = TrainerConfig {
            early_stopping: true,
            patience: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let without_stopping = TrainerConfig {
            patience: 0,
            ..Default::default()
        };
        assert!(without_stopping.validate().is_ok());
    }
}
