use anyhow::{ensure, Context, Result};
use serde::Serialize;
use std::path::Path;
use tch::nn::{self, ModuleT};
use tch::{Device, Kind, Tensor};

use protcnn_core::ProtCNN;
use protlang::{LangParams, SequenceEncoder};

use crate::load_model;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyScore {
    pub family: String,
    pub class_id: u32,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Highest probability first.
    pub top: Vec<FamilyScore>,
}

impl Prediction {
    pub fn best(&self) -> Option<&FamilyScore> {
        self.top.first()
    }
}

/// A trained model paired with the encoder it was trained with.
pub struct Predictor {
    model: ProtCNN,
    _vs: nn::VarStore,
    encoder: SequenceEncoder,
    device: Device,
}

impl Predictor {
    pub fn new(
        model: ProtCNN,
        vs: nn::VarStore,
        encoder: SequenceEncoder,
        device: Device,
    ) -> Result<Self> {
        let config = &model.config;
        ensure!(
            config.in_channels == encoder.vocab_size() as i64,
            "Model expects {} input channels but the vocabulary has {} symbols",
            config.in_channels,
            encoder.vocab_size()
        );
        ensure!(
            config.num_classes == encoder.num_classes() as i64,
            "Model has {} classes but the label mapping has {}",
            config.num_classes,
            encoder.num_classes()
        );
        ensure!(
            config.max_seq_len == encoder.max_len() as i64,
            "Model was built for length {} but the encoder pads to {}",
            config.max_seq_len,
            encoder.max_len()
        );

        Ok(Self {
            model,
            _vs: vs,
            encoder,
            device,
        })
    }

    pub fn load(checkpoint: &Path, lang_params: &Path, device: Device) -> Result<Self> {
        let params = LangParams::load(lang_params)
            .with_context(|| format!("Failed to read language params {:?}", lang_params))?;
        let encoder = params.into_encoder()?;
        let (model, vs) = load_model(checkpoint, device)?;
        Self::new(model, vs, encoder, device)
    }

    pub fn encoder(&self) -> &SequenceEncoder {
        &self.encoder
    }

    /// One sequence as a `[1, vocab_size, max_len]` float tensor on the
    /// predictor's device.
    pub fn encode(&self, sequence: &str) -> Tensor {
        let one_hot = self.encoder.encode_single(sequence);
        let (channels, length) = one_hot.shape();
        Tensor::from_slice(one_hot.as_slice())
            .view([1, channels as i64, length as i64])
            .to(self.device)
    }

    /// Raw scores: `[1, num_classes]`.
    pub fn logits(&self, sequence: &str) -> Tensor {
        let _guard = tch::no_grad_guard();
        self.model.forward_t(&self.encode(sequence), false)
    }

    pub fn predict(&self, sequence: &str, top_k: usize) -> Result<Prediction> {
        let probs = self
            .logits(sequence)
            .softmax(-1, Kind::Float)
            .squeeze_dim(0)
            .to_device(Device::Cpu);

        let k = top_k.clamp(1, self.encoder.num_classes());
        let (values, indices) = probs.topk(k as i64, 0, true, true);
        let values = Vec::<f32>::try_from(&values)?;
        let indices = Vec::<i64>::try_from(&indices)?;

        let labels = self.encoder.labels();
        let top = indices
            .into_iter()
            .zip(values)
            .map(|(class_id, probability)| {
                let class_id = class_id as u32;
                FamilyScore {
                    family: labels.get_label(class_id).unwrap_or_default().to_string(),
                    class_id,
                    probability: probability as f64,
                }
            })
            .collect();

        Ok(Prediction { top })
    }
}
