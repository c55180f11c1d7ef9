use anyhow::{bail, Context, Result};
use memmap2::MmapOptions;
use safetensors::SafeTensors;
use std::fs::File;
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

/// Copies every tensor of a safetensors file into the matching variable of
/// `vs`. Every variable of the store must be present in the file; tensors in
/// the file that the store does not know are skipped with a warning.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();

    let missing: Vec<&String> = variables
        .keys()
        .filter(|name| tensors.tensor(name).is_err())
        .collect();
    if !missing.is_empty() {
        bail!("Checkpoint {:?} is missing variables: {:?}", path, missing);
    }

    for (name, view) in tensors.tensors() {
        if let Some(var) = variables.get_mut(&name) {
            let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
            if shape != var.size() {
                bail!(
                    "Shape mismatch for {}: checkpoint has {:?}, model expects {:?}",
                    name,
                    shape,
                    var.size()
                );
            }
            let kind = match view.dtype() {
                safetensors::Dtype::F32 => Kind::Float,
                safetensors::Dtype::F64 => Kind::Double,
                safetensors::Dtype::F16 => Kind::Half,
                safetensors::Dtype::BF16 => Kind::BFloat16,
                _ => bail!("Unsupported dtype: {:?}", view.dtype()),
            };

            let data = view.data();
            let tch_tensor = Tensor::from_data_size(data, &shape, kind).to_device(device);

            tch::no_grad(|| {
                var.copy_(&tch_tensor);
            });
            log::debug!("Loaded tensor: {}", name);
        } else {
            log::warn!("Tensor {} found in safetensors but not in model", name);
        }
    }

    Ok(())
}

/// Writes all variables of `vs` (trainable weights and batch-norm running
/// statistics) to a safetensors file.
pub fn save_safetensors<P: AsRef<Path>>(vs: &nn::VarStore, path: P) -> Result<()> {
    let mut named: Vec<(String, Tensor)> = vs
        .variables()
        .into_iter()
        .map(|(name, tensor)| (name, tensor.to_device(Device::Cpu).contiguous()))
        .collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));

    Tensor::write_safetensors(&named, path.as_ref())
        .with_context(|| format!("Failed to write safetensors to {:?}", path.as_ref()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModelConfig, ProtCNN};

    fn small_config() -> ModelConfig {
        ModelConfig {
            hidden_channels: 4,
            ..ModelConfig::new(5, 3, 8)
        }
    }

    #[test]
    fn saved_weights_load_into_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let source = nn::VarStore::new(Device::Cpu);
        let _model = ProtCNN::new(&source.root(), &small_config());
        save_safetensors(&source, &path).unwrap();

        let mut target = nn::VarStore::new(Device::Cpu);
        let _restored = ProtCNN::new(&target.root(), &small_config());
        load_safetensors(&mut target, &path).unwrap();

        let src = source.variables();
        for (name, tensor) in target.variables() {
            assert!(tensor.equal(&src[&name]), "{name} differs after reload");
        }
    }

    #[test]
    fn rejects_checkpoint_for_other_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let source = nn::VarStore::new(Device::Cpu);
        let _model = ProtCNN::new(&source.root(), &small_config());
        save_safetensors(&source, &path).unwrap();

        let mut target = nn::VarStore::new(Device::Cpu);
        let _other = ProtCNN::new(&target.root(), &ModelConfig::new(5, 7, 8));
        assert!(load_safetensors(&mut target, &path).is_err());
    }
}
