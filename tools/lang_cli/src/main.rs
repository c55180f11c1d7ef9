use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use protlang::{Corpus, LabelMap, LangParams, SequenceEncoder, Split, VocabBuilder};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build vocabulary and label mapping from one split
    Build {
        /// Directory containing train/, dev/ and test/
        #[arg(long, default_value = "data/random_split")]
        data_dir: PathBuf,

        /// Split to build from
        #[arg(long, default_value = "train")]
        split: Split,

        /// Fixed encoded length
        #[arg(long, default_value_t = 120)]
        max_seq_len: usize,

        /// Output path for the bundle
        #[arg(short, long, default_value = "model_weights/lang_params.json")]
        output: PathBuf,
    },
    /// Encode one sequence with an existing bundle
    Encode {
        /// Path to lang_params.json
        #[arg(long)]
        lang_params: PathBuf,

        /// Sequence to encode
        #[arg(short, long)]
        sequence: String,

        /// Optional family label to resolve
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Print the contents of a bundle
    Inspect {
        /// Path to lang_params.json
        #[arg(long)]
        lang_params: PathBuf,
    },
}

fn build(data_dir: PathBuf, split: Split, max_seq_len: usize, output: PathBuf) -> Result<()> {
    let corpus = Corpus::read_split(&data_dir, split)
        .with_context(|| format!("Failed to read {} split from {:?}", split, data_dir))?;

    let vocab = VocabBuilder::new().build(&corpus.sequences);
    let labels = LabelMap::build(&corpus.families);
    let encoder = SequenceEncoder::new(vocab, labels, max_seq_len)?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    LangParams::from_encoder(&encoder)
        .save(&output)
        .context("Failed to save language params")?;

    println!(
        "Saved {} symbols and {} classes to {:?}",
        encoder.vocab_size(),
        encoder.num_classes(),
        output
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            data_dir,
            split,
            max_seq_len,
            output,
        } => build(data_dir, split, max_seq_len, output)?,
        Commands::Encode {
            lang_params,
            sequence,
            label,
        } => {
            let encoder = LangParams::load(&lang_params)
                .context("Failed to load language params")?
                .into_encoder()?;
            let sample = encoder.encode(&sequence, label.as_deref());
            println!("Encoded IDs: {:?}", sample.ids);
            println!("One-hot shape: {:?}", sample.one_hot.shape());
            if let Some(target) = sample.target {
                println!("Class ID: {}", target);
            }
        }
        Commands::Inspect { lang_params } => {
            let params = LangParams::load(&lang_params).context("Failed to load language params")?;
            println!("max_seq_len: {}", params.max_seq_len);
            println!("vocabulary ({} entries):", params.vocab.len());
            for (token, id) in params.vocab.iter() {
                println!("  {:>3} {}", id, token);
            }
            println!("labels: {} classes", params.labels.num_classes());
            log::debug!(
                "labels: {}",
                serde_json::to_string(&params.labels).unwrap_or_default()
            );
        }
    }

    Ok(())
}
