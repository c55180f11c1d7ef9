use csv::ReaderBuilder;
use serde::Deserialize;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{LangError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "dev" => Ok(Split::Dev),
            "test" => Ok(Split::Test),
            other => Err(format!("unknown split {other:?} (expected train, dev or test)")),
        }
    }
}

/// Only these two columns are read; anything else in the file is ignored.
#[derive(Debug, Deserialize)]
struct Record {
    sequence: String,
    family_accession: String,
}

/// Parallel columns of raw sequences and their family labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    pub sequences: Vec<String>,
    pub families: Vec<String>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `<data_dir>/<split>/*`.
    pub fn read_split<P: AsRef<Path>>(data_dir: P, split: Split) -> Result<Self> {
        Self::read_dir(data_dir.as_ref().join(split.as_str()))
    }

    /// Reads every CSV file directly inside `dir`, in file-name order.
    pub fn read_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map_or(false, |name| !name.starts_with('.'))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(LangError::NoData(dir.to_path_buf()));
        }

        let mut corpus = Self::new();
        for path in &files {
            log::debug!("Reading {:?}", path);
            corpus.read_csv(File::open(path)?)?;
        }
        log::info!(
            "Read {} sequences from {} file(s) in {:?}",
            corpus.len(),
            files.len(),
            dir
        );
        Ok(corpus)
    }

    /// Appends the records of one CSV stream (header row required).
    pub fn read_csv<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
        for result in csv_reader.deserialize::<Record>() {
            let record = result?;
            self.push(record.sequence, record.family_accession);
        }
        Ok(())
    }

    pub fn push(&mut self, sequence: impl Into<String>, family: impl Into<String>) {
        self.sequences.push(sequence.into());
        self.families.push(family.into());
    }

    pub fn get(&self, index: usize) -> Option<(&str, &str)> {
        Some((
            self.sequences.get(index)?.as_str(),
            self.families.get(index)?.as_str(),
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.sequences
            .iter()
            .zip(&self.families)
            .map(|(s, f)| (s.as_str(), f.as_str()))
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "family_id,sequence_name,family_accession,aligned_sequence,sequence";

    fn write_shard(dir: &Path, name: &str, rows: &[(&str, &str)]) {
        let mut file = File::create(dir.join(name)).unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for (sequence, family) in rows {
            writeln!(file, "fam,seq/1-9,{family},{sequence}..,{sequence}").unwrap();
        }
    }

    #[test]
    fn reads_only_sequence_and_family_columns() {
        let mut corpus = Corpus::new();
        let data = format!("{HEADER}\nGMC,R9/1-3,PF00001.21,A.C,ACD\n");
        corpus.read_csv(data.as_bytes()).unwrap();
        assert_eq!(corpus.get(0), Some(("ACD", "PF00001.21")));
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn concatenates_shards_in_name_order() {
        let root = tempfile::tempdir().unwrap();
        let train = root.path().join("train");
        fs::create_dir(&train).unwrap();
        write_shard(&train, "data-00001", &[("MKV", "PF00959.19")]);
        write_shard(&train, "data-00000", &[("ACD", "PF00001.21"), ("ACE", "PF00001.21")]);
        File::create(train.join(".hidden")).unwrap();

        let corpus = Corpus::read_split(root.path(), Split::Train).unwrap();
        let rows: Vec<_> = corpus.iter().collect();
        assert_eq!(
            rows,
            vec![
                ("ACD", "PF00001.21"),
                ("ACE", "PF00001.21"),
                ("MKV", "PF00959.19")
            ]
        );
    }

    #[test]
    fn empty_split_directory_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("dev")).unwrap();
        let err = Corpus::read_split(root.path(), Split::Dev).unwrap_err();
        assert!(matches!(err, LangError::NoData(_)));
    }

    #[test]
    fn missing_column_is_reported() {
        let mut corpus = Corpus::new();
        let err = corpus
            .read_csv("family_accession\nPF00001.21\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, LangError::Csv(_)));
    }

    #[test]
    fn parses_split_names() {
        assert_eq!("dev".parse::<Split>(), Ok(Split::Dev));
        assert!("validation".parse::<Split>().is_err());
        assert_eq!(Split::Test.to_string(), "test");
    }
}
