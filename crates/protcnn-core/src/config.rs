use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Input channels, equal to the vocabulary size of the one-hot encoding.
    pub in_channels: i64,
    /// Number of output classes (family labels including `<unk>`).
    pub num_classes: i64,
    /// Fixed sequence length the input tensors are padded/truncated to.
    pub max_seq_len: i64,
    /// Channels of the residual trunk.
    pub hidden_channels: i64,
    /// Dilation of the first convolution in each residual block.
    pub dilations: Vec<i64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            in_channels: 22, // 20 standard residues + <pad> + <unk>
            num_classes: 2,
            max_seq_len: 120,
            hidden_channels: 128,
            dilations: vec![2, 3],
        }
    }
}

impl ModelConfig {
    pub fn new(in_channels: usize, num_classes: usize, max_seq_len: usize) -> Self {
        Self {
            in_channels: in_channels as i64,
            num_classes: num_classes as i64,
            max_seq_len: max_seq_len as i64,
            ..Self::default()
        }
    }

    /// Sequence length after the stride-2 max pool (kernel 3, padding 1).
    pub fn pooled_len(&self) -> i64 {
        (self.max_seq_len + 2 - 3) / 2 + 1
    }

    /// Input width of the classification head.
    pub fn flattened_features(&self) -> i64 {
        self.hidden_channels * self.pooled_len()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write model config to {:?}", path.as_ref()))?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read model config at {:?}", path.as_ref()))?;
        serde_json::from_str(&content).context("Failed to parse model config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_length_matches_reference_geometry() {
        let config = ModelConfig::default();
        assert_eq!(config.pooled_len(), 60);
        assert_eq!(config.flattened_features(), 7680);

        let odd = ModelConfig::new(22, 10, 7);
        assert_eq!(odd.pooled_len(), 4);
    }

    #[test]
    fn config_survives_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = ModelConfig::new(25, 17882, 120);
        config.save(&path).unwrap();
        assert_eq!(ModelConfig::load(&path).unwrap(), config);
    }
}
