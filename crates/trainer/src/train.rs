use anyhow::{bail, Context, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::Device;

use protcnn_core::safetensors_util::{load_safetensors, save_safetensors};
use protcnn_core::{ModelConfig, ProtCNN};

use crate::dataset::SequenceDataset;
use crate::{OptimizerKind, TrainerConfig};

/// Multi-step decay: the base rate times `gamma` for every milestone already
/// reached by `epoch`.
pub fn lr_at_epoch(base_lr: f64, milestones: &[usize], gamma: f64, epoch: usize) -> f64 {
    let reached = milestones.iter().filter(|&&m| m <= epoch).count();
    base_lr * gamma.powi(reached as i32)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

impl Metrics {
    /// Folds in one batch whose `loss` and `accuracy` are batch means.
    fn add_batch(&mut self, loss: f64, accuracy: f64, size: usize) {
        let total = self.samples + size;
        if total == 0 {
            return;
        }
        let w = size as f64 / total as f64;
        self.loss += (loss - self.loss) * w;
        self.accuracy += (accuracy - self.accuracy) * w;
        self.samples = total;
    }
}

/// Stops training once the monitored loss has not improved for `patience`
/// consecutive evaluations.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    bad_evals: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            bad_evals: 0,
        }
    }

    /// Returns true when `loss` is a new best.
    pub fn update(&mut self, loss: f64) -> bool {
        match self.best {
            Some(best) if loss >= best => {
                self.bad_evals += 1;
                false
            }
            _ => {
                self.best = Some(loss);
                self.bad_evals = 0;
                true
            }
        }
    }

    pub fn should_stop(&self) -> bool {
        self.bad_evals >= self.patience
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

#[derive(Debug, Clone, Default)]
pub struct FitSummary {
    pub epochs_completed: usize,
    pub steps: usize,
    pub best_dev: Option<Metrics>,
    pub stopped_early: bool,
    pub last_checkpoint: Option<PathBuf>,
}

/// Progress written next to every checkpoint so a resumed run continues
/// from the same epoch and step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    /// First epoch the resumed run trains.
    pub next_epoch: usize,
    pub step: usize,
}

impl TrainingState {
    /// `epoch-001-step-0000004.safetensors` -> `epoch-001-step-0000004.state.json`
    pub fn path_for(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("state.json")
    }

    pub fn save(&self, checkpoint: &Path) -> Result<()> {
        let path = Self::path_for(checkpoint);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Reads the state file of `checkpoint`, falling back to the epoch and
    /// step encoded in its file name.
    pub fn load(checkpoint: &Path) -> Result<Self> {
        let path = Self::path_for(checkpoint);
        if path.is_file() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            return serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", path));
        }

        match Self::from_checkpoint_name(checkpoint) {
            Some(state) => {
                warn!("No training state next to {:?}, using its file name", checkpoint);
                Ok(state)
            }
            None => bail!("Cannot recover epoch and step for {:?}", checkpoint),
        }
    }

    /// The epoch in a name is the one being trained, so it is repeated.
    fn from_checkpoint_name(checkpoint: &Path) -> Option<Self> {
        let stem = checkpoint.file_stem()?.to_str()?;
        let rest = stem.strip_prefix("epoch-")?;
        let (epoch, step) = rest.split_once("-step-")?;
        Some(Self {
            next_epoch: epoch.parse().ok()?,
            step: step.parse().ok()?,
        })
    }
}

pub struct Trainer {
    config: TrainerConfig,
    model: ProtCNN,
    optimizer: nn::Optimizer,
    device: Device,
    vs: nn::VarStore,
    step: usize,
    start_epoch: usize,
    monitor: EarlyStopping,
}

impl Trainer {
    pub fn new(
        model_config: ModelConfig,
        trainer_config: TrainerConfig,
        device: Device,
    ) -> Result<Self> {
        let mut vs = nn::VarStore::new(device);
        let model = ProtCNN::new(&vs.root(), &model_config);

        let mut state = TrainingState::default();
        if let Some(path) = &trainer_config.resume {
            info!("Resuming from checkpoint {:?}", path);
            load_safetensors(&mut vs, path)
                .with_context(|| format!("Failed to resume from {:?}", path))?;
            state = TrainingState::load(path)?;
            info!(
                "Continuing at epoch {} after {} steps",
                state.next_epoch, state.step
            );
        }

        let optimizer = match trainer_config.optimizer {
            OptimizerKind::Sgd => nn::Sgd {
                momentum: trainer_config.momentum,
                dampening: 0.0,
                wd: trainer_config.weight_decay,
                nesterov: false,
            }
            .build(&vs, trainer_config.learning_rate)?,
            OptimizerKind::Adam => nn::Adam {
                wd: trainer_config.weight_decay,
                ..Default::default()
            }
            .build(&vs, trainer_config.learning_rate)?,
        };

        let monitor = EarlyStopping::new(trainer_config.patience);

        Ok(Self {
            config: trainer_config,
            model,
            optimizer,
            device,
            vs,
            step: state.step,
            start_epoch: state.next_epoch,
            monitor,
        })
    }

    pub fn model(&self) -> &ProtCNN {
        &self.model
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn fit(&mut self, train: &SequenceDataset, dev: &SequenceDataset) -> Result<FitSummary> {
        let mut summary = FitSummary {
            epochs_completed: self.start_epoch,
            ..Default::default()
        };
        let num_batches = train.num_batches(self.config.batch_size);

        info!("Starting training with configuration: {:?}", self.config);
        if self.start_epoch >= self.config.num_epochs {
            warn!(
                "Checkpoint already covers {} of {} epochs, nothing to train",
                self.start_epoch, self.config.num_epochs
            );
        }

        'epochs: for epoch in self.start_epoch..self.config.num_epochs {
            let lr = lr_at_epoch(
                self.config.learning_rate,
                &self.config.lr_milestones,
                self.config.lr_gamma,
                epoch,
            );
            self.optimizer.set_lr(lr);

            // Per-epoch seed so a resumed run shuffles like an uninterrupted one.
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
            let mut epoch_metrics = Metrics::default();
            let batches = train.shuffled_batches(self.config.batch_size, &mut rng, self.device);

            for (batch_idx, (input, target)) in batches.enumerate() {
                let logits = self.model.forward_t(&input, true);
                let loss = logits.cross_entropy_for_logits(&target);
                self.optimizer.backward_step(&loss);

                let loss_val = loss.double_value(&[]);
                let acc_val = logits.accuracy_for_logits(&target).double_value(&[]);
                epoch_metrics.add_batch(loss_val, acc_val, target.size()[0] as usize);
                self.step += 1;

                if self.step % self.config.log_interval == 0 {
                    info!(
                        "Epoch {} | Batch {}/{} | Step {} | Loss: {:.4} | Acc: {:.4} | LR: {:.2e}",
                        epoch,
                        batch_idx + 1,
                        num_batches,
                        self.step,
                        loss_val,
                        acc_val,
                        lr
                    );
                }

                // The epoch-end pass below evaluates and saves the last batch.
                if batch_idx + 1 == num_batches {
                    continue;
                }

                if self.step % self.config.eval_interval == 0 && self.validate(dev, &mut summary)? {
                    summary.stopped_early = true;
                    summary.epochs_completed = epoch + 1;
                    summary.last_checkpoint = Some(self.save_checkpoint(epoch, epoch)?);
                    break 'epochs;
                }

                if self.step % self.config.save_interval == 0 {
                    summary.last_checkpoint = Some(self.save_checkpoint(epoch, epoch)?);
                }
            }

            info!(
                "Epoch {} Average Loss: {:.4} | Accuracy: {:.4}",
                epoch, epoch_metrics.loss, epoch_metrics.accuracy
            );
            summary.epochs_completed = epoch + 1;
            summary.last_checkpoint = Some(self.save_checkpoint(epoch, epoch + 1)?);

            if self.validate(dev, &mut summary)? {
                summary.stopped_early = true;
                break;
            }
        }

        summary.steps = self.step;
        Ok(summary)
    }

    /// Evaluates on the dev split and returns whether training should stop.
    fn validate(&mut self, dev: &SequenceDataset, summary: &mut FitSummary) -> Result<bool> {
        let metrics = self.evaluate(dev)?;
        info!(
            "Step {} | Dev Loss: {:.4} | Dev Acc: {:.4}",
            self.step, metrics.loss, metrics.accuracy
        );
        if metrics.samples == 0 {
            return Ok(false);
        }

        if self.monitor.update(metrics.loss) {
            summary.best_dev = Some(metrics);
        }
        Ok(self.config.early_stopping && self.monitor.should_stop())
    }

    pub fn evaluate(&self, dataset: &SequenceDataset) -> Result<Metrics> {
        let _guard = tch::no_grad_guard();
        let mut metrics = Metrics::default();

        for (input, target) in dataset.batches(self.config.batch_size, self.device) {
            let logits = self.model.forward_t(&input, false);
            let loss = logits.cross_entropy_for_logits(&target).double_value(&[]);
            let acc = logits.accuracy_for_logits(&target).double_value(&[]);
            metrics.add_batch(loss, acc, target.size()[0] as usize);
        }

        if metrics.samples == 0 {
            warn!("Evaluation dataset is empty");
        }
        Ok(metrics)
    }

    /// Writes weights for `epoch` at the current step, plus `config.json` and
    /// the state a resumed run starts from at `next_epoch`.
    pub fn save_checkpoint(&self, epoch: usize, next_epoch: usize) -> Result<PathBuf> {
        let path = PathBuf::from(&self.config.model_dir);
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }

        let filename = path.join(format!("epoch-{:03}-step-{:07}.safetensors", epoch, self.step));
        save_safetensors(&self.vs, &filename)?;
        self.model.config.save(path.join("config.json"))?;
        TrainingState {
            next_epoch,
            step: self.step,
        }
        .save(&filename)?;

        info!("Saved checkpoint {:?}", filename);
        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learning_rate_decays_at_milestones() {
        let milestones = [2, 4];
        assert_eq!(lr_at_epoch(0.1, &milestones, 0.5, 0), 0.1);
        assert_eq!(lr_at_epoch(0.1, &milestones, 0.5, 1), 0.1);
        assert_eq!(lr_at_epoch(0.1, &milestones, 0.5, 2), 0.05);
        assert_eq!(lr_at_epoch(0.1, &milestones, 0.5, 5), 0.025);
        assert_eq!(lr_at_epoch(0.1, &[], 0.5, 100), 0.1);
    }

    #[test]
    fn early_stopping_counts_evaluations_without_improvement() {
        let mut monitor = EarlyStopping::new(2);
        assert!(monitor.update(1.0));
        assert!(monitor.update(0.8));
        assert!(!monitor.update(0.8));
        assert!(!monitor.should_stop());
        assert!(!monitor.update(0.9));
        assert!(monitor.should_stop());
        assert_eq!(monitor.best(), Some(0.8));

        assert!(monitor.update(0.5));
        assert!(!monitor.should_stop());
    }

    fn tiny_dataset() -> SequenceDataset {
        use protlang::{Corpus, LabelMap, SequenceEncoder, VocabBuilder};

        let mut corpus = Corpus::new();
        for (sequence, family) in [
            ("ACDACD", "PF00001.21"),
            ("EEGEEG", "PF00959.19"),
            ("ACDAC", "PF00001.21"),
            ("EEGEE", "PF00959.19"),
        ] {
            corpus.push(sequence, family);
        }
        let vocab = VocabBuilder::new().build(&corpus.sequences);
        let labels = LabelMap::build(&corpus.families);
        let encoder = SequenceEncoder::new(vocab, labels, 6).unwrap();
        SequenceDataset::new(corpus, encoder)
    }

    #[test]
    fn fit_writes_checkpoint_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tiny_dataset();
        let encoder = dataset.encoder();
        let model_config = ModelConfig {
            hidden_channels: 4,
            ..ModelConfig::new(encoder.vocab_size(), encoder.num_classes(), encoder.max_len())
        };
        let config = TrainerConfig {
            model_dir: dir.path().to_path_buf(),
            batch_size: 2,
            num_epochs: 2,
            ..Default::default()
        };

        let mut trainer = Trainer::new(model_config.clone(), config, Device::Cpu).unwrap();
        let summary = trainer.fit(&dataset, &dataset).unwrap();

        assert_eq!(summary.epochs_completed, 2);
        assert_eq!(summary.steps, 4);
        assert!(summary.best_dev.is_some());
        let checkpoint = summary.last_checkpoint.unwrap();
        assert!(checkpoint.ends_with("epoch-001-step-0000004.safetensors"));
        assert!(checkpoint.exists());
        assert_eq!(
            ModelConfig::load(dir.path().join("config.json")).unwrap(),
            model_config
        );

        let metrics = trainer.evaluate(&dataset).unwrap();
        assert_eq!(metrics.samples, 4);
        assert!(metrics.loss.is_finite());
    }

    fn tiny_model_config(dataset: &SequenceDataset) -> ModelConfig {
        let encoder = dataset.encoder();
        ModelConfig {
            hidden_channels: 4,
            ..ModelConfig::new(encoder.vocab_size(), encoder.num_classes(), encoder.max_len())
        }
    }

    #[test]
    fn last_batch_of_epoch_is_evaluated_once() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tiny_dataset();
        // Two batches per epoch, so the interval lands on the epoch's last batch.
        let config = TrainerConfig {
            model_dir: dir.path().to_path_buf(),
            batch_size: 2,
            num_epochs: 1,
            eval_interval: 2,
            save_interval: 2,
            early_stopping: true,
            patience: 1,
            ..Default::default()
        };

        let mut trainer = Trainer::new(tiny_model_config(&dataset), config, Device::Cpu).unwrap();
        let summary = trainer.fit(&dataset, &dataset).unwrap();

        assert!(!summary.stopped_early);
        assert_eq!(trainer.monitor.bad_evals, 0);
        assert_eq!(summary.epochs_completed, 1);
        let checkpoint = summary.last_checkpoint.unwrap();
        assert_eq!(
            TrainingState::load(&checkpoint).unwrap(),
            TrainingState {
                next_epoch: 1,
                step: 2
            }
        );
    }

    #[test]
    fn fit_stops_early_mid_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tiny_dataset();
        let config = TrainerConfig {
            model_dir: dir.path().to_path_buf(),
            batch_size: 2,
            num_epochs: 3,
            eval_interval: 1,
            early_stopping: true,
            patience: 1,
            ..Default::default()
        };

        let mut trainer = Trainer::new(tiny_model_config(&dataset), config, Device::Cpu).unwrap();
        // No dev loss can beat this, so the first evaluation exhausts patience.
        trainer.monitor.update(f64::NEG_INFINITY);
        let summary = trainer.fit(&dataset, &dataset).unwrap();

        assert!(summary.stopped_early);
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.epochs_completed, 1);
        assert!(summary.best_dev.is_none());
        let checkpoint = summary.last_checkpoint.unwrap();
        assert!(checkpoint.ends_with("epoch-000-step-0000001.safetensors"));
        assert_eq!(
            TrainingState::load(&checkpoint).unwrap(),
            TrainingState {
                next_epoch: 0,
                step: 1
            }
        );
    }

    #[test]
    fn resume_continues_epochs_and_steps() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tiny_dataset();
        let model_config = tiny_model_config(&dataset);
        let config = TrainerConfig {
            model_dir: dir.path().to_path_buf(),
            batch_size: 2,
            num_epochs: 2,
            ..Default::default()
        };

        let mut first = Trainer::new(model_config.clone(), config.clone(), Device::Cpu).unwrap();
        let first_checkpoint = first.fit(&dataset, &dataset).unwrap().last_checkpoint.unwrap();

        let resumed_config = TrainerConfig {
            num_epochs: 3,
            resume: Some(first_checkpoint.clone()),
            ..config
        };
        let mut resumed = Trainer::new(model_config, resumed_config, Device::Cpu).unwrap();
        assert_eq!(resumed.start_epoch(), 2);
        assert_eq!(resumed.step(), 4);

        let summary = resumed.fit(&dataset, &dataset).unwrap();
        assert_eq!(summary.epochs_completed, 3);
        assert_eq!(summary.steps, 6);
        let checkpoint = summary.last_checkpoint.unwrap();
        assert!(checkpoint.ends_with("epoch-002-step-0000006.safetensors"));

        assert_eq!(inference::resolve_checkpoint(dir.path()).unwrap(), checkpoint);
        assert_ne!(checkpoint, first_checkpoint);
    }

    #[test]
    fn state_falls_back_to_checkpoint_name() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("epoch-007-step-0001234.safetensors");
        assert_eq!(
            TrainingState::load(&checkpoint).unwrap(),
            TrainingState {
                next_epoch: 7,
                step: 1234
            }
        );

        TrainingState {
            next_epoch: 8,
            step: 1234,
        }
        .save(&checkpoint)
        .unwrap();
        assert_eq!(TrainingState::load(&checkpoint).unwrap().next_epoch, 8);

        assert!(TrainingState::load(&dir.path().join("final.safetensors")).is_err());
    }

    #[test]
    fn metrics_are_sample_weighted() {
        let mut metrics = Metrics::default();
        metrics.add_batch(1.0, 0.5, 3);
        metrics.add_batch(3.0, 1.0, 1);
        assert_eq!(metrics.samples, 4);
        assert!((metrics.loss - 1.5).abs() < 1e-12);
        assert!((metrics.accuracy - 0.625).abs() < 1e-12);
    }
}
