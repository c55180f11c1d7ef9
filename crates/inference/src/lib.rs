use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tch::{nn, Device};

use protcnn_core::safetensors_util::load_safetensors;
use protcnn_core::{ModelConfig, ProtCNN};

pub mod predictor;

pub use predictor::{FamilyScore, Prediction, Predictor};

/// Accepts either a `.safetensors` file or a directory of them; for a
/// directory the last checkpoint by file name wins.
pub fn resolve_checkpoint(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        bail!("Checkpoint {:?} does not exist", path);
    }

    let mut checkpoints: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("Failed to list {:?}", path))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "safetensors"))
        .collect();
    checkpoints.sort();

    match checkpoints.pop() {
        Some(latest) => Ok(latest),
        None => bail!("No .safetensors checkpoint found in {:?}", path),
    }
}

/// Loads `config.json` from the checkpoint's directory, builds the model and
/// copies the weights in. The returned `VarStore` owns the variables.
pub fn load_model(checkpoint: &Path, device: Device) -> Result<(ProtCNN, nn::VarStore)> {
    let weights = resolve_checkpoint(checkpoint)?;
    let config_path = weights
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("config.json");

    // 1. Load Config
    let config = ModelConfig::load(&config_path)?;

    // 2. Initialize Model
    let mut vs = nn::VarStore::new(device);
    let model = ProtCNN::new(&vs.root(), &config);

    // 3. Load weights
    tracing::info!("Loading weights from {:?}", weights);
    load_safetensors(&mut vs, &weights)
        .with_context(|| format!("Failed to load checkpoint {:?}", weights))?;

    Ok((model, vs))
}
