use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use tch::Device;

use protcnn_core::ModelConfig;
use protlang::{Corpus, LabelMap, LangParams, SequenceEncoder, Split, VocabBuilder};
use trainer::{OptimizerKind, SequenceDataset, Trainer, TrainerConfig};

/// Train a ProtCNN family classifier on a Pfam-style random split.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML training configuration; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing train/, dev/ and test/ splits
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory for checkpoints, config.json and lang_params.json
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Use a GPU when one is available
    #[arg(long)]
    gpu: bool,

    /// Force CPU training
    #[arg(long, conflicts_with = "gpu")]
    cpu: bool,

    /// Max sequence length of protein (avoid changing this)
    #[arg(long)]
    max_seq_len: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Threads used to encode batches
    #[arg(long)]
    num_workers: Option<usize>,

    #[arg(long)]
    num_epochs: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Weight decay (L2 penalty)
    #[arg(long)]
    weight_decay: Option<f64>,

    /// SGD or Adam
    #[arg(long)]
    optimizer: Option<OptimizerKind>,

    #[arg(long)]
    momentum: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    log_interval: Option<usize>,

    #[arg(long)]
    eval_interval: Option<usize>,

    #[arg(long)]
    save_interval: Option<usize>,

    /// Stop when the dev loss stops improving
    #[arg(long)]
    early_stopping: bool,

    #[arg(long)]
    patience: Option<usize>,

    /// Comma separated epochs at which the learning rate decays
    #[arg(long, value_delimiter = ',')]
    lr_milestones: Option<Vec<usize>>,

    #[arg(long)]
    lr_gamma: Option<f64>,

    /// Resume training from this checkpoint
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Also evaluate on the CSV files directly inside this directory
    #[arg(long)]
    external_test: Option<PathBuf>,
}

impl Args {
    fn resolve_config(&self) -> Result<TrainerConfig> {
        let mut config = match &self.config {
            Some(path) => TrainerConfig::from_yaml_file(path)?,
            None => TrainerConfig::default(),
        };

        if let Some(v) = &self.data_dir {
            config.data_dir = v.clone();
        }
        if let Some(v) = &self.model_dir {
            config.model_dir = v.clone();
        }
        if let Some(v) = self.max_seq_len {
            config.max_seq_len = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.num_workers {
            config.num_workers = v;
        }
        if let Some(v) = self.num_epochs {
            config.num_epochs = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.weight_decay {
            config.weight_decay = v;
        }
        if let Some(v) = self.optimizer {
            config.optimizer = v;
        }
        if let Some(v) = self.momentum {
            config.momentum = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.log_interval {
            config.log_interval = v;
        }
        if let Some(v) = self.eval_interval {
            config.eval_interval = v;
        }
        if let Some(v) = self.save_interval {
            config.save_interval = v;
        }
        if self.early_stopping {
            config.early_stopping = true;
        }
        if let Some(v) = self.patience {
            config.patience = v;
        }
        if let Some(v) = &self.lr_milestones {
            config.lr_milestones = v.clone();
        }
        if let Some(v) = self.lr_gamma {
            config.lr_gamma = v;
        }
        if let Some(v) = &self.resume {
            config.resume = Some(v.clone());
        }
        if let Some(v) = &self.external_test {
            config.external_test = Some(v.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn select_device(gpu: bool, cpu: bool) -> Device {
    if cpu || !gpu {
        return Device::Cpu;
    }
    if tch::Cuda::is_available() {
        Device::Cuda(0)
    } else if tch::utils::has_mps() {
        Device::Mps
    } else {
        warn!("--gpu is set but no GPU is found on this machine. Using CPU instead.");
        Device::Cpu
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.resolve_config()?;

    tch::manual_seed(config.seed as i64);
    if config.num_workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .build_global()
            .context("Failed to configure worker pool")?;
    }

    let device = select_device(args.gpu, args.cpu);
    info!("Device: {:?}", device);

    // 1. Read the training split
    let train_corpus = Corpus::read_split(&config.data_dir, Split::Train)
        .with_context(|| format!("Failed to read train split from {:?}", config.data_dir))?;

    // 2. Label and residue vocabularies come from the training split only
    let labels = LabelMap::build(&train_corpus.families);
    info!("Family mapping formed with {} classes.", labels.num_classes());
    let vocab = VocabBuilder::new().build(&train_corpus.sequences);
    info!("AA dictionary formed. The length of dictionary is: {}.", vocab.len());

    let encoder = SequenceEncoder::new(vocab, labels, config.max_seq_len)?;

    // 3. Persist the encoder bundle for prediction
    fs::create_dir_all(&config.model_dir)?;
    let lang_params_path = config.lang_params_path();
    LangParams::from_encoder(&encoder)
        .save(&lang_params_path)
        .with_context(|| format!("Failed to save {:?}", lang_params_path))?;
    info!("Saved language params to {:?}", lang_params_path);

    let train = SequenceDataset::new(train_corpus, encoder.clone());
    let dev = SequenceDataset::from_split(&encoder, &config.data_dir, Split::Dev)?;
    let test = SequenceDataset::from_split(&encoder, &config.data_dir, Split::Test)?;
    let external_test = match &config.external_test {
        Some(dir) => Some(SequenceDataset::from_dir(&encoder, dir)?),
        None => None,
    };

    if let Some((input, target)) = test.batches(config.batch_size, Device::Cpu).next() {
        info!(
            "INPUT_SHAPE: {:?}, OUTPUT_SHAPE: {:?}",
            input.size(),
            target.size()
        );
    }

    // 4. Model and training
    let model_config = ModelConfig::new(
        encoder.vocab_size(),
        encoder.num_classes(),
        config.max_seq_len,
    );
    let mut trainer = Trainer::new(model_config, config, device)?;
    let summary = trainer.fit(&train, &dev)?;

    let test_metrics = trainer.evaluate(&test)?;
    println!(
        "Training complete after {} epoch(s), {} step(s){}.",
        summary.epochs_completed,
        summary.steps,
        if summary.stopped_early { " (early stop)" } else { "" }
    );
    if let Some(best) = summary.best_dev {
        println!("Best dev loss: {:.4} | accuracy: {:.4}", best.loss, best.accuracy);
    }
    println!(
        "Test loss: {:.4} | accuracy: {:.4} over {} sequences",
        test_metrics.loss, test_metrics.accuracy, test_metrics.samples
    );
    if let Some(external) = &external_test {
        let metrics = trainer.evaluate(external)?;
        println!(
            "External test loss: {:.4} | accuracy: {:.4} over {} sequences",
            metrics.loss, metrics.accuracy, metrics.samples
        );
    }
    if let Some(path) = summary.last_checkpoint {
        println!("Last checkpoint: {:?}", path);
    }

    Ok(())
}
