pub mod corpus;
pub mod encoder;
pub mod error;
pub mod labels;
pub mod params;
pub mod vocab;

pub use corpus::{Corpus, Split};
pub use encoder::{EncodedSample, OneHot, SequenceEncoder};
pub use error::LangError;
pub use labels::LabelMap;
pub use params::LangParams;
pub use vocab::{Vocab, VocabBuilder};
