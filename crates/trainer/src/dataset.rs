use anyhow::{Context, Result};
use protlang::labels::UNK_LABEL_ID;
use protlang::{Corpus, EncodedSample, SequenceEncoder, Split};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use std::path::Path;
use tch::{Device, Tensor};

/// A labelled corpus paired with the encoder shared by every split.
pub struct SequenceDataset {
    corpus: Corpus,
    encoder: SequenceEncoder,
}

impl SequenceDataset {
    pub fn new(corpus: Corpus, encoder: SequenceEncoder) -> Self {
        Self { corpus, encoder }
    }

    pub fn from_split(encoder: &SequenceEncoder, data_dir: &Path, split: Split) -> Result<Self> {
        let corpus = Corpus::read_split(data_dir, split)
            .with_context(|| format!("Failed to read {} split from {:?}", split, data_dir))?;
        Ok(Self::new(corpus, encoder.clone()))
    }

    /// Reads every CSV file directly inside `dir`, for held-out sets kept
    /// outside the split layout.
    pub fn from_dir(encoder: &SequenceEncoder, dir: &Path) -> Result<Self> {
        let corpus = Corpus::read_dir(dir)
            .with_context(|| format!("Failed to read external test set from {:?}", dir))?;
        Ok(Self::new(corpus, encoder.clone()))
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn encoder(&self) -> &SequenceEncoder {
        &self.encoder
    }

    pub fn get(&self, index: usize) -> Option<EncodedSample> {
        let (sequence, family) = self.corpus.get(index)?;
        Some(self.encoder.encode(sequence, Some(family)))
    }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.len().div_ceil(batch_size)
    }

    /// Encodes the given items in parallel and stacks them.
    ///
    /// Returns (input, target) where:
    /// input: [batch, vocab_size, max_len] float
    /// target: [batch] int64
    pub fn batch(&self, indices: &[usize], device: Device) -> (Tensor, Tensor) {
        let samples: Vec<EncodedSample> = indices
            .par_iter()
            .filter_map(|&index| self.get(index))
            .collect();

        let channels = self.encoder.vocab_size();
        let length = self.encoder.max_len();
        let mut inputs = Vec::with_capacity(samples.len() * channels * length);
        let mut targets = Vec::with_capacity(samples.len());

        for sample in samples {
            targets.push(sample.target.unwrap_or(UNK_LABEL_ID) as i64);
            inputs.extend_from_slice(sample.one_hot.as_slice());
        }

        let input_tensor = Tensor::from_slice(&inputs)
            .view([targets.len() as i64, channels as i64, length as i64])
            .to(device);

        let target_tensor = Tensor::from_slice(&targets).to(device);

        (input_tensor, target_tensor)
    }

    /// Batches in corpus order; the last batch may be short.
    pub fn batches(&self, batch_size: usize, device: Device) -> Batches<'_> {
        Batches::new(self, (0..self.len()).collect(), batch_size, device)
    }

    pub fn shuffled_batches<R: Rng>(
        &self,
        batch_size: usize,
        rng: &mut R,
        device: Device,
    ) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        Batches::new(self, order, batch_size, device)
    }
}

pub struct Batches<'a> {
    dataset: &'a SequenceDataset,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
    device: Device,
}

impl<'a> Batches<'a> {
    fn new(dataset: &'a SequenceDataset, order: Vec<usize>, batch_size: usize, device: Device) -> Self {
        Self {
            dataset,
            order,
            batch_size: batch_size.max(1),
            position: 0,
            device,
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = (Tensor, Tensor);

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let batch = self.dataset.batch(&self.order[self.position..end], self.device);
        self.position = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}
