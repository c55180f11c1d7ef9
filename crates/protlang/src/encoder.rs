use std::sync::Arc;

use crate::error::{LangError, Result};
use crate::labels::{LabelMap, UNK_LABEL_ID};
use crate::vocab::{Vocab, PAD_ID, PAD_TOKEN, UNK_ID, UNK_TOKEN};

/// Channel-first one-hot matrix of shape `(channels, length)`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct OneHot {
    data: Vec<f32>,
    channels: usize,
    length: usize,
}

impl OneHot {
    /// Every id must be below `channels`.
    pub fn from_ids(ids: &[u32], channels: usize) -> Self {
        let length = ids.len();
        let mut data = vec![0.0; channels * length];
        for (position, &id) in ids.iter().enumerate() {
            debug_assert!((id as usize) < channels, "id {id} out of range");
            data[id as usize * length + position] = 1.0;
        }
        Self {
            data,
            channels,
            length,
        }
    }

    /// `(channels, length)`
    pub fn shape(&self) -> (usize, usize) {
        (self.channels, self.length)
    }

    pub fn get(&self, channel: usize, position: usize) -> f32 {
        self.data[channel * self.length + position]
    }

    /// The one-hot vector at a sequence position.
    pub fn column(&self, position: usize) -> Vec<f32> {
        (0..self.channels)
            .map(|channel| self.get(channel, position))
            .collect()
    }

    /// Recovers the id sequence by taking the set channel of every column.
    pub fn ids(&self) -> Vec<u32> {
        (0..self.length)
            .map(|position| {
                (0..self.channels)
                    .find(|&channel| self.get(channel, position) > 0.0)
                    .unwrap_or(0) as u32
            })
            .collect()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSample {
    pub ids: Vec<u32>,
    pub one_hot: OneHot,
    pub target: Option<u32>,
}

/// Turns raw sequences into fixed-length one-hot tensors.
///
/// Holds the vocabulary and label mapping behind `Arc` so clones are cheap
/// and can be handed to parallel workers. Encoding never fails once the
/// encoder exists.
#[derive(Debug, Clone)]
pub struct SequenceEncoder {
    vocab: Arc<Vocab>,
    labels: Arc<LabelMap>,
    max_len: usize,
}

impl SequenceEncoder {
    pub fn new(
        vocab: impl Into<Arc<Vocab>>,
        labels: impl Into<Arc<LabelMap>>,
        max_len: usize,
    ) -> Result<Self> {
        let vocab = vocab.into();
        let labels = labels.into();

        if max_len == 0 {
            return Err(LangError::InvalidMaxLen);
        }
        if vocab.get_id(PAD_TOKEN) != Some(PAD_ID) {
            return Err(LangError::MissingReserved {
                token: PAD_TOKEN,
                expected: PAD_ID,
            });
        }
        if vocab.get_id(UNK_TOKEN) != Some(UNK_ID) {
            return Err(LangError::MissingReserved {
                token: UNK_TOKEN,
                expected: UNK_ID,
            });
        }
        if labels.get_id(UNK_TOKEN) != Some(UNK_LABEL_ID) {
            return Err(LangError::MissingReserved {
                token: UNK_TOKEN,
                expected: UNK_LABEL_ID,
            });
        }

        Ok(Self {
            vocab,
            labels,
            max_len,
        })
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn num_classes(&self) -> usize {
        self.labels.num_classes()
    }

    /// First `max_len` symbols mapped to ids, right-padded with `<pad>`.
    pub fn token_ids(&self, sequence: &str) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.max_len);
        ids.extend(
            sequence
                .chars()
                .take(self.max_len)
                .map(|symbol| self.vocab.id_or_unk(symbol)),
        );
        ids.resize(self.max_len, PAD_ID);
        ids
    }

    pub fn label_id(&self, label: &str) -> u32 {
        self.labels.id_or_unk(label)
    }

    pub fn encode(&self, sequence: &str, label: Option<&str>) -> EncodedSample {
        let ids = self.token_ids(sequence);
        let one_hot = OneHot::from_ids(&ids, self.vocab_size());
        EncodedSample {
            ids,
            one_hot,
            target: label.map(|label| self.label_id(label)),
        }
    }

    /// Inference path: no label, just the `(vocab_size, max_len)` tensor.
    pub fn encode_single(&self, sequence: &str) -> OneHot {
        OneHot::from_ids(&self.token_ids(sequence), self.vocab_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::VocabBuilder;

    fn encoder(max_len: usize) -> SequenceEncoder {
        let vocab = VocabBuilder::new().build(["ACD", "ACE"]);
        let labels = LabelMap::build(["PF00001.21", "PF00959.19"]);
        SequenceEncoder::new(vocab, labels, max_len).unwrap()
    }

    #[test]
    fn pads_and_maps_unknown_symbols() {
        let sample = encoder(5).encode("ACDX", None);
        assert_eq!(sample.ids, vec![2, 3, 4, 1, 0]);
        assert_eq!(sample.one_hot.shape(), (6, 5));
        assert_eq!(sample.target, None);
    }

    #[test]
    fn truncates_from_the_tail() {
        assert_eq!(encoder(3).token_ids("ACDE"), vec![2, 3, 4]);
    }

    #[test]
    fn output_length_is_always_max_len() {
        let enc = encoder(4);
        for sequence in ["", "A", "ACDE", "ACDEACDEACDE"] {
            let one_hot = enc.encode_single(sequence);
            assert_eq!(one_hot.shape(), (6, 4), "sequence {sequence:?}");
            assert_eq!(one_hot.as_slice().iter().sum::<f32>(), 4.0);
        }
    }

    #[test]
    fn padding_fills_exactly_the_trailing_positions() {
        let ids = encoder(8).token_ids("CAD");
        assert_eq!(&ids[..3], &[3, 2, 4]);
        assert!(ids[3..].iter().all(|&id| id == PAD_ID));
    }

    #[test]
    fn unknown_symbol_column_matches_unk_column() {
        let enc = encoder(3);
        let unknown = enc.encode_single("AWD");
        let rare = enc.encode_single("AZD");
        let mut expected = vec![0.0; 6];
        expected[UNK_ID as usize] = 1.0;

        assert_eq!(unknown.column(1), expected);
        assert_eq!(rare.column(1), expected);
        assert_eq!(unknown, rare);
    }

    #[test]
    fn one_hot_is_channel_first() {
        let one_hot = encoder(5).encode_single("ACDX");
        assert_eq!(one_hot.get(2, 0), 1.0);
        assert_eq!(one_hot.get(3, 1), 1.0);
        assert_eq!(one_hot.get(4, 2), 1.0);
        assert_eq!(one_hot.get(1, 3), 1.0);
        assert_eq!(one_hot.get(0, 4), 1.0);
        assert_eq!(one_hot.ids(), vec![2, 3, 4, 1, 0]);
    }

    #[test]
    fn resolves_labels_totally() {
        let enc = encoder(2);
        assert_eq!(enc.encode("AC", Some("PF00959.19")).target, Some(2));
        assert_eq!(enc.encode("AC", Some("PF12345.6")).target, Some(UNK_LABEL_ID));
    }

    #[test]
    fn rejects_zero_max_len() {
        let vocab = VocabBuilder::new().build(["ACD"]);
        let labels = LabelMap::build(["PF00001.21"]);
        assert!(matches!(
            SequenceEncoder::new(vocab, labels, 0),
            Err(LangError::InvalidMaxLen)
        ));
    }

    #[test]
    fn clones_share_mappings() {
        let enc = encoder(3);
        let clone = enc.clone();
        assert!(std::ptr::eq(enc.vocab(), clone.vocab()));
        assert_eq!(clone.token_ids("EDCA"), enc.token_ids("EDCA"));
    }
}
