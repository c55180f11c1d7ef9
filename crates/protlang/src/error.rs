use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LangError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Reserved token missing or misplaced: {token} must map to {expected}")]
    MissingReserved { token: &'static str, expected: u32 },

    #[error("Duplicate id {id} for token {token:?}")]
    DuplicateId { id: u32, token: String },

    #[error("Ids are not contiguous: expected {expected}, found {found}")]
    NonContiguousIds { expected: u32, found: u32 },

    #[error("Vocabulary symbol {0:?} is not a single character")]
    InvalidSymbol(String),

    #[error("max_len must be greater than zero")]
    InvalidMaxLen,

    #[error("No data files found in {0:?}")]
    NoData(PathBuf),
}

pub type Result<T> = std::result::Result<T, LangError>;
