use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LangError, Result};
use crate::vocab::{invert_contiguous, UNK_TOKEN};

/// Class id reserved for families never seen during training.
pub const UNK_LABEL_ID: u32 = 0;

/// Immutable mapping from family accession to class id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u32>", into = "BTreeMap<String, u32>")]
pub struct LabelMap {
    label_to_id: BTreeMap<String, u32>,
    id_to_label: Vec<String>,
}

impl LabelMap {
    /// `<unk>` takes id 0; every distinct label then gets the next id in
    /// order of first appearance.
    pub fn build<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut label_to_id = BTreeMap::new();
        label_to_id.insert(UNK_TOKEN.to_string(), UNK_LABEL_ID);
        let mut id_to_label = vec![UNK_TOKEN.to_string()];

        for target in targets {
            let target = target.as_ref();
            if !label_to_id.contains_key(target) {
                label_to_id.insert(target.to_string(), id_to_label.len() as u32);
                id_to_label.push(target.to_string());
            }
        }

        Self {
            label_to_id,
            id_to_label,
        }
    }

    pub fn get_id(&self, label: &str) -> Option<u32> {
        self.label_to_id.get(label).copied()
    }

    pub fn id_or_unk(&self, label: &str) -> u32 {
        self.get_id(label).unwrap_or(UNK_LABEL_ID)
    }

    pub fn get_label(&self, id: u32) -> Option<&str> {
        self.id_to_label.get(id as usize).map(String::as_str)
    }

    pub fn unk_id(&self) -> u32 {
        UNK_LABEL_ID
    }

    /// Number of model output classes, `<unk>` included.
    pub fn num_classes(&self) -> usize {
        self.id_to_label.len()
    }

    pub fn len(&self) -> usize {
        self.id_to_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_label.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.id_to_label
            .iter()
            .enumerate()
            .map(|(id, label)| (label.as_str(), id as u32))
    }
}

impl TryFrom<BTreeMap<String, u32>> for LabelMap {
    type Error = LangError;

    fn try_from(label_to_id: BTreeMap<String, u32>) -> Result<Self> {
        if label_to_id.get(UNK_TOKEN) != Some(&UNK_LABEL_ID) {
            return Err(LangError::MissingReserved {
                token: UNK_TOKEN,
                expected: UNK_LABEL_ID,
            });
        }
        let id_to_label = invert_contiguous(&label_to_id)?;

        Ok(Self {
            label_to_id,
            id_to_label,
        })
    }
}

impl From<LabelMap> for BTreeMap<String, u32> {
    fn from(labels: LabelMap) -> Self {
        labels.label_to_id
    }
}
