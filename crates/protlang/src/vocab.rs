use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{LangError, Result};

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";
pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;

/// Ambiguous or non-standard residue codes. They never get an id of their
/// own and always encode as `<unk>`.
pub const RARE_AMINO_ACIDS: [char; 5] = ['X', 'U', 'B', 'O', 'Z'];

/// Immutable mapping from amino-acid symbols to contiguous ids.
///
/// `<pad>` is always 0 and `<unk>` is always 1. Every other entry is a single
/// character. A `Vocab` can only be obtained from [`VocabBuilder::build`] or
/// by deserializing a map that satisfies these rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u32>", into = "BTreeMap<String, u32>")]
pub struct Vocab {
    token_to_id: BTreeMap<String, u32>,
    id_to_token: Vec<String>,
}

impl Vocab {
    pub fn get_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    /// Looks up a single residue symbol.
    pub fn symbol_id(&self, symbol: char) -> Option<u32> {
        let mut buf = [0u8; 4];
        self.get_id(symbol.encode_utf8(&mut buf))
    }

    /// Total lookup: anything outside the vocabulary maps to `<unk>`.
    pub fn id_or_unk(&self, symbol: char) -> u32 {
        self.symbol_id(symbol).unwrap_or(UNK_ID)
    }

    pub fn get_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    pub fn pad_id(&self) -> u32 {
        PAD_ID
    }

    pub fn unk_id(&self) -> u32 {
        UNK_ID
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Tokens in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.id_to_token
            .iter()
            .enumerate()
            .map(|(id, token)| (token.as_str(), id as u32))
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

impl TryFrom<BTreeMap<String, u32>> for Vocab {
    type Error = LangError;

    fn try_from(token_to_id: BTreeMap<String, u32>) -> Result<Self> {
        for (token, expected) in [(PAD_TOKEN, PAD_ID), (UNK_TOKEN, UNK_ID)] {
            if token_to_id.get(token) != Some(&expected) {
                return Err(LangError::MissingReserved { token, expected });
            }
        }
        for token in token_to_id.keys() {
            if token != PAD_TOKEN && token != UNK_TOKEN && token.chars().count() != 1 {
                return Err(LangError::InvalidSymbol(token.clone()));
            }
        }
        let id_to_token = invert_contiguous(&token_to_id)?;

        Ok(Self {
            token_to_id,
            id_to_token,
        })
    }
}

impl From<Vocab> for BTreeMap<String, u32> {
    fn from(vocab: Vocab) -> Self {
        vocab.token_to_id
    }
}

/// Inverts a token -> id map, requiring ids to be exactly `0..len`.
pub(crate) fn invert_contiguous(map: &BTreeMap<String, u32>) -> Result<Vec<String>> {
    let mut pairs: Vec<(u32, &String)> = map.iter().map(|(token, &id)| (id, token)).collect();
    pairs.sort();

    let mut tokens = Vec::with_capacity(pairs.len());
    for (expected, (id, token)) in pairs.into_iter().enumerate() {
        let expected = expected as u32;
        if id < expected {
            return Err(LangError::DuplicateId {
                id,
                token: token.clone(),
            });
        }
        if id > expected {
            return Err(LangError::NonContiguousIds { expected, found: id });
        }
        tokens.push(token.clone());
    }
    Ok(tokens)
}

/// Builds a [`Vocab`] from a training corpus.
///
/// The result depends only on the set of symbols in the corpus, never on
/// the order sequences are supplied in.
#[derive(Debug, Clone)]
pub struct VocabBuilder {
    rare: BTreeSet<char>,
}

impl VocabBuilder {
    pub fn new() -> Self {
        Self {
            rare: RARE_AMINO_ACIDS.into_iter().collect(),
        }
    }

    pub fn is_rare(&self, symbol: char) -> bool {
        self.rare.contains(&symbol)
    }

    pub fn build<I, S>(&self, corpus: I) -> Vocab
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut symbols = BTreeSet::new();
        for sequence in corpus {
            symbols.extend(sequence.as_ref().chars());
        }

        let mut token_to_id = BTreeMap::new();
        token_to_id.insert(PAD_TOKEN.to_string(), PAD_ID);
        token_to_id.insert(UNK_TOKEN.to_string(), UNK_ID);
        let mut id_to_token = vec![PAD_TOKEN.to_string(), UNK_TOKEN.to_string()];

        // BTreeSet iteration is already sorted by code point.
        for symbol in symbols.difference(&self.rare) {
            let token = symbol.to_string();
            token_to_id.insert(token.clone(), id_to_token.len() as u32);
            id_to_token.push(token);
        }

        log::debug!(
            "Built vocabulary of {} symbols ({} excluded as rare)",
            id_to_token.len(),
            symbols.intersection(&self.rare).count()
        );

        Vocab {
            token_to_id,
            id_to_token,
        }
    }
}

impl Default for VocabBuilder {
    fn default() -> Self {
        Self::new()
    }
}
