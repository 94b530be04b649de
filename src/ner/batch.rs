//! Directory-wide conversion of NER record files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

use super::{load_records, to_bio, to_extraction, write_bio};
use crate::dataset::save_dataset;
use crate::error::NerError;

/// Target format of a batch conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// BIO text, written as `<stem>.txt`.
    Bio,
    /// Extraction conversations, written as `<stem>.json`.
    Extraction,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Bio => "txt",
            OutputFormat::Extraction => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Bio => write!(f, "bio"),
            OutputFormat::Extraction => write!(f, "extraction"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bio" => Ok(OutputFormat::Bio),
            "extraction" => Ok(OutputFormat::Extraction),
            other => Err(format!("Unknown format '{}' (expected bio or extraction)", other)),
        }
    }
}

/// Converts one record file.
pub fn convert_file(input: &Path, output: &Path, format: OutputFormat) -> Result<(), NerError> {
    let records = load_records(input)?;
    match format {
        OutputFormat::Bio => write_bio(output, &to_bio(&records)?)?,
        OutputFormat::Extraction => save_dataset(output, &to_extraction(&records))?,
    }
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        format = %format,
        records = records.len(),
        "Converted record file"
    );
    Ok(())
}

/// Converts every `*.json` file directly inside `input_dir`, writing
/// same-stem outputs to `output_dir`. Returns the written paths, sorted.
///
/// # Errors
///
/// Stops at the first file that cannot be read, parsed or written.
pub fn convert_directory(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    format: OutputFormat,
) -> Result<Vec<PathBuf>, NerError> {
    convert_each(
        input_dir.as_ref(),
        output_dir.as_ref(),
        format.extension(),
        |input, output| convert_file(input, output, format),
    )
}

/// Record files directly inside `dir`, sorted.
fn record_files(dir: &Path) -> Vec<PathBuf> {
    let mut inputs: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    inputs.sort();
    inputs
}

/// Runs `convert` on every record file of `input_dir`, targeting
/// `<output_dir>/<stem>.<extension>`.
pub(super) fn convert_each<F>(
    input_dir: &Path,
    output_dir: &Path,
    extension: &str,
    mut convert: F,
) -> Result<Vec<PathBuf>, NerError>
where
    F: FnMut(&Path, &Path) -> Result<(), NerError>,
{
    let inputs = record_files(input_dir);
    let mut written = Vec::with_capacity(inputs.len());
    for input in inputs {
        let Some(stem) = input.file_stem() else {
            continue;
        };
        let output = output_dir.join(format!("{}.{}", stem.to_string_lossy(), extension));
        convert(&input, &output)?;
        written.push(output);
    }

    tracing::info!(
        input_dir = %input_dir.display(),
        output_dir = %output_dir.display(),
        files = written.len(),
        "Batch conversion complete"
    );
    Ok(written)
}
