//! Feature dataset adapter
//!
//! Each dataset lives in its own directory under the data root:
//!
//! ```text
//! <data_root>/<dataset>/prototypes.json   {"classnames": [...], "weights": [[...], ...]}
//! <data_root>/<dataset>/features.jsonl    {"features": [...], "label": 3}   one per line
//! ```
//!
//! `prototypes.json` holds one class prototype (text embedding) per class.
//! `features.jsonl` is read lazily and in order, one sample per line; blank
//! lines are skipped and a malformed line ends the stream with an error.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::classifier::PrototypeClassifier;
use crate::constants::{FEATURES_FILE, PROTOTYPES_FILE};
use crate::errors::{AdaptError, Result};

/// Split a slash-separated dataset list such as `I/A/V/R/S`
pub fn parse_dataset_list(list: &str) -> Vec<String> {
    list.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Locations of one dataset's files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub name: String,
    pub prototypes: PathBuf,
    pub features: PathBuf,
}

impl DatasetPaths {
    pub fn new(data_root: &Path, name: &str) -> Self {
        let dir = data_root.join(name);
        Self {
            name: name.to_string(),
            prototypes: dir.join(PROTOTYPES_FILE),
            features: dir.join(FEATURES_FILE),
        }
    }
}

/// Class names with one prototype vector each
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassPrototypes {
    pub classnames: Vec<String>,
    pub weights: Vec<Vec<f32>>,
}

impl ClassPrototypes {
    /// Load and shape-check a prototypes file
    pub fn load(path: &Path) -> AnyResult<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open prototypes file {}", path.display()))?;
        let prototypes: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse prototypes file {}", path.display()))?;

        if prototypes.classnames.len() != prototypes.weights.len() {
            anyhow::bail!(
                "{}: {} class names but {} prototype vectors",
                path.display(),
                prototypes.classnames.len(),
                prototypes.weights.len()
            );
        }
        Ok(prototypes)
    }

    pub fn num_classes(&self) -> usize {
        self.weights.len()
    }

    /// Build the zero-shot classifier over these prototypes
    pub fn into_classifier(self) -> Result<PrototypeClassifier> {
        PrototypeClassifier::new(self.weights)
    }
}

/// One labeled sample of the feature stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub features: Vec<f32>,
    pub label: usize,
}

/// Lazy, ordered reader over a JSON-lines feature file
pub struct FeatureStream<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
}

impl FeatureStream<BufReader<File>> {
    /// Open a feature file on disk
    pub fn open(path: &Path) -> AnyResult<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open feature stream {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> FeatureStream<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Adapt into the `(input, label)` items the adaptation loop consumes
    pub fn pairs(self) -> impl Iterator<Item = Result<(Vec<f32>, usize)>> {
        self.map(|sample| sample.map(|s| (s.features, s.label)))
    }
}

impl<R: BufRead> Iterator for FeatureStream<R> {
    type Item = Result<LabeledSample>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(AdaptError::Io(e))),
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            return Some(serde_json::from_str(&line).map_err(|e| {
                AdaptError::Dataset(format!("line {}: {e}", self.line_no))
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_dataset_list() {
        assert_eq!(parse_dataset_list("I/A/V"), vec!["I", "A", "V"]);
        assert_eq!(parse_dataset_list(" I // caltech101 "), vec!["I", "caltech101"]);
        assert!(parse_dataset_list("").is_empty());
    }

    #[test]
    fn test_dataset_paths() {
        let paths = DatasetPaths::new(Path::new("/data"), "I");
        assert_eq!(paths.prototypes, PathBuf::from("/data/I/prototypes.json"));
        assert_eq!(paths.features, PathBuf::from("/data/I/features.jsonl"));
    }

    #[test]
    fn test_stream_reads_in_order_and_skips_blank_lines() {
        let data = concat!(
            "{\"features\": [1.0, 0.0], \"label\": 1}\n",
            "\n",
            "{\"features\": [0.0, 1.0], \"label\": 0}\n",
        );
        let samples: Vec<LabeledSample> = FeatureStream::from_reader(Cursor::new(data))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label, 1);
        assert_eq!(samples[1].features, vec![0.0, 1.0]);
    }

    #[test]
    fn test_stream_reports_malformed_line() {
        let data = "{\"features\": [1.0], \"label\": 0}\n\n{\"features\": \"oops\"}\n";
        let mut stream = FeatureStream::from_reader(Cursor::new(data));
        assert!(stream.next().unwrap().is_ok());
        match stream.next().unwrap() {
            Err(AdaptError::Dataset(msg)) => assert!(msg.starts_with("line 3")),
            other => panic!("unexpected item: {other:?}"),
        }
    }
}
