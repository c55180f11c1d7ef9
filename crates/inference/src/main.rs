use anyhow::{ensure, Result};
use clap::Parser;
use std::path::PathBuf;
use tch::Device;

use inference::Predictor;

/// Predict the Pfam family of one protein sequence.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input protein sequence
    #[arg(long)]
    input_seq: String,

    /// Checkpoint file, or a directory whose last checkpoint is used
    #[arg(long, default_value = "model_weights")]
    model_checkpoint: PathBuf,

    /// Language params written during training
    #[arg(long, default_value = "model_weights/lang_params.json")]
    lang_params: PathBuf,

    /// Use a GPU when one is available
    #[arg(long)]
    gpu: bool,

    /// Number of families to report
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Print the prediction as JSON
    #[arg(long)]
    json: bool,
}

fn select_device(gpu: bool) -> Device {
    if !gpu {
        return Device::Cpu;
    }
    if tch::Cuda::is_available() {
        Device::Cuda(0)
    } else if tch::utils::has_mps() {
        Device::Mps
    } else {
        tracing::warn!("--gpu is set but no GPU is found on this machine. Using CPU instead.");
        Device::Cpu
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    ensure!(!args.input_seq.is_empty(), "--input-seq must not be empty");

    let device = select_device(args.gpu);
    tracing::info!("Device: {:?}", device);

    let predictor = Predictor::load(&args.model_checkpoint, &args.lang_params, device)?;
    let prediction = predictor.predict(&args.input_seq, args.top_k)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
        return Ok(());
    }

    for (rank, score) in prediction.top.iter().enumerate() {
        println!(
            "{:>2}. {:<16} class {:>6}  p={:.4}",
            rank + 1,
            score.family,
            score.class_id,
            score.probability
        );
    }

    Ok(())
}
