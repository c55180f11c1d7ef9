use tch::nn::{self, ModuleT};
use tch::{Kind, Tensor};

use crate::config::ModelConfig;

const POOL_KERNEL: i64 = 3;
const POOL_STRIDE: i64 = 2;
const POOL_PADDING: i64 = 1;
const POOL_DILATION: i64 = 1;

/// Pre-activation residual block:
/// BN -> ReLU -> dilated conv(k=3) -> BN -> ReLU -> conv(k=3), plus identity.
#[derive(Debug)]
pub struct ResidualBlock {
    bn1: nn::BatchNorm,
    conv1: nn::Conv1D,
    bn2: nn::BatchNorm,
    conv2: nn::Conv1D,
}

impl ResidualBlock {
    pub fn new(vs: &nn::Path, channels: i64, dilation: i64) -> Self {
        let dilated = nn::ConvConfig {
            padding: dilation,
            dilation,
            bias: false,
            ..Default::default()
        };
        let same = nn::ConvConfig {
            padding: 1,
            bias: false,
            ..Default::default()
        };

        Self {
            bn1: nn::batch_norm1d(vs / "bn1", channels, Default::default()),
            conv1: nn::conv1d(vs / "conv1", channels, channels, 3, dilated),
            bn2: nn::batch_norm1d(vs / "bn2", channels, Default::default()),
            conv2: nn::conv1d(vs / "conv2", channels, channels, 3, same),
        }
    }
}

impl ModuleT for ResidualBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let h = xs.apply_t(&self.bn1, train).relu().apply(&self.conv1);
        let h = h.apply_t(&self.bn2, train).relu().apply(&self.conv2);
        h + xs
    }
}

/// Convolutional protein-family classifier over channel-first one-hot input.
///
/// xs: [batch, in_channels, max_seq_len]
/// returns logits: [batch, num_classes]
#[derive(Debug)]
pub struct ProtCNN {
    stem: nn::Conv1D,
    blocks: Vec<ResidualBlock>,
    head: nn::Linear,
    pub config: ModelConfig,
}

impl ProtCNN {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let stem = nn::conv1d(
            vs / "stem",
            config.in_channels,
            config.hidden_channels,
            1,
            nn::ConvConfig {
                bias: false,
                ..Default::default()
            },
        );

        let blocks = config
            .dilations
            .iter()
            .enumerate()
            .map(|(i, &dilation)| {
                ResidualBlock::new(&(vs / "blocks" / i), config.hidden_channels, dilation)
            })
            .collect();

        let head = nn::linear(
            vs / "head",
            config.flattened_features(),
            config.num_classes,
            Default::default(),
        );

        Self {
            stem,
            blocks,
            head,
            config: config.clone(),
        }
    }
}

impl ModuleT for ProtCNN {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let mut x = xs.to_kind(Kind::Float).apply(&self.stem);
        for block in &self.blocks {
            x = x.apply_t(block, train);
        }
        x.max_pool1d(
            &[POOL_KERNEL][..],
            &[POOL_STRIDE][..],
            &[POOL_PADDING][..],
            &[POOL_DILATION][..],
            false,
        )
        .flatten(1, -1)
        .apply(&self.head)
    }
}
