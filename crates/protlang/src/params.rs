use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::encoder::SequenceEncoder;
use crate::error::Result;
use crate::labels::LabelMap;
use crate::vocab::Vocab;

/// Everything an inference process needs to rebuild the training-time
/// encoder: vocabulary, label mapping and `max_seq_len`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangParams {
    pub vocab: Vocab,
    pub labels: LabelMap,
    pub max_seq_len: usize,
}

impl LangParams {
    pub fn new(vocab: Vocab, labels: LabelMap, max_seq_len: usize) -> Self {
        Self {
            vocab,
            labels,
            max_seq_len,
        }
    }

    pub fn from_encoder(encoder: &SequenceEncoder) -> Self {
        Self::new(
            encoder.vocab().clone(),
            encoder.labels().clone(),
            encoder.max_len(),
        )
    }

    pub fn encoder(&self) -> Result<SequenceEncoder> {
        self.clone().into_encoder()
    }

    pub fn into_encoder(self) -> Result<SequenceEncoder> {
        SequenceEncoder::new(self.vocab, self.labels, self.max_seq_len)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
