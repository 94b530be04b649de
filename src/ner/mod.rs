//! NER record files and the conversions and scoring built on them.
//!
//! A record file is a JSON object keyed `sentence1`, `sentence2`, ... whose
//! values hold the sentence, its entity spans and one category per entity.
//! Key order is preserved on load and save.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::dataset::{read_json, write_json};
use crate::error::{DatasetError, NerError};

pub mod batch;
pub mod bio;
pub mod classification;
pub mod evaluate;
pub mod extraction;

pub use batch::{convert_directory, OutputFormat};
pub use bio::{from_bio, read_bio, render_bio, to_bio, tokenize, write_bio, BioSentence};
pub use classification::{
    convert_classification_directory, convert_classification_file, to_classification,
    ClassificationSummary, MISCELLANEOUS,
};
pub use evaluate::{evaluate, evaluate_files, EvaluationReport, Score};
pub use extraction::{extract_marked, mark_entities, to_extraction, MARKER};

/// Annotated entities of one sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NerRecord {
    pub sentence: String,
    #[serde(default)]
    pub entity: Vec<String>,
    #[serde(default)]
    pub category: Vec<String>,
}

impl NerRecord {
    pub fn new(sentence: impl Into<String>) -> Self {
        Self {
            sentence: sentence.into(),
            ..Default::default()
        }
    }

    /// Appends an entity with its category.
    pub fn push(&mut self, entity: impl Into<String>, category: impl Into<String>) {
        self.entity.push(entity.into());
        self.category.push(category.into());
    }

    /// Entity/category pairs, rejecting records whose lists disagree in length.
    pub fn pairs(&self, id: &str) -> Result<Vec<(&str, &str)>, NerError> {
        if self.entity.len() != self.category.len() {
            return Err(NerError::LengthMismatch {
                id: id.to_string(),
                entities: self.entity.len(),
                categories: self.category.len(),
            });
        }
        Ok(self
            .entity
            .iter()
            .map(String::as_str)
            .zip(self.category.iter().map(String::as_str))
            .collect())
    }
}

/// Records in file order, with their keys.
pub type NerRecords = Vec<(String, NerRecord)>;

/// Key of the `n`-th record (1-based).
pub fn record_key(n: usize) -> String {
    format!("sentence{}", n)
}

/// Loads a record file, keeping key order.
pub fn load_records(path: impl AsRef<Path>) -> Result<NerRecords, NerError> {
    let path = path.as_ref();
    let object: Map<String, Value> = read_json(path)?;
    let mut records = Vec::with_capacity(object.len());
    for (key, value) in object {
        let record: NerRecord =
            serde_json::from_value(value).map_err(|source| DatasetError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        records.push((key, record));
    }
    tracing::debug!(path = %path.display(), records = records.len(), "Loaded NER records");
    Ok(records)
}

/// Writes records as a pretty-printed JSON object.
pub fn save_records(
    path: impl AsRef<Path>,
    records: &[(String, NerRecord)],
) -> Result<(), NerError> {
    let mut object = Map::new();
    for (key, record) in records {
        let value = serde_json::to_value(record).map_err(DatasetError::Json)?;
        object.insert(key.clone(), value);
    }
    write_json(path, &object)?;
    Ok(())
}
