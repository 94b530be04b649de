//! JSON file I/O for datasets and other artifacts.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use super::Conversation;
use crate::error::DatasetError;

/// Reads any JSON document from disk.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, DatasetError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| DatasetError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes a value as pretty-printed JSON, creating parent directories.
///
/// Non-ASCII text is written as-is.
pub fn write_json<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), DatasetError> {
    let path = path.as_ref();
    let write_err = |source| DatasetError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).map_err(write_err)
}

/// Loads a conversation dataset.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<Conversation>, DatasetError> {
    let path = path.as_ref();
    let dataset: Vec<Conversation> = read_json(path)?;
    tracing::debug!(path = %path.display(), conversations = dataset.len(), "Loaded dataset");
    Ok(dataset)
}

/// Saves a conversation dataset.
pub fn save_dataset(path: impl AsRef<Path>, dataset: &[Conversation]) -> Result<(), DatasetError> {
    let path = path.as_ref();
    write_json(path, dataset)?;
    tracing::debug!(path = %path.display(), conversations = dataset.len(), "Saved dataset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("train.json");
        let dataset = vec![Conversation::new("Typ: Stadt, Land?", "Stadt")];

        save_dataset(&path, &dataset).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Stadt, Land"));

        let loaded = load_dataset(&path).unwrap();
        assert_eq!(loaded, dataset);
    }

    #[test]
    fn test_non_ascii_written_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ja.json");
        save_dataset(&path, &[Conversation::new("種類: 都市, 国?", "都市")]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("都市"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_dataset("/no/such/dataset.json").unwrap_err();
        assert!(matches!(err, DatasetError::Read { .. }));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_dataset(&path).unwrap_err();
        assert!(matches!(err, DatasetError::Parse { .. }));
    }
}
