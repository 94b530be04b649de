//! Conversion between NER records and BIO-tagged token files.
//!
//! A BIO file has one `token TAG` pair per line and a blank line after each
//! sentence. Tags are `O`, `B-<category>` or `I-<category>`; spaces inside
//! category names become underscores.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::{record_key, NerRecord, NerRecords};
use crate::error::{DatasetError, NerError};

/// Outside tag.
pub const OUTSIDE: &str = "O";

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+|[^\w\s]").expect("token pattern is valid"));

/// Tokens and tags of one sentence.
pub type BioSentence = Vec<(String, String)>;

/// Splits text into word runs and single punctuation characters.
pub fn tokenize(text: &str) -> Vec<&str> {
    TOKEN_PATTERN.find_iter(text).map(|m| m.as_str()).collect()
}

fn tag_category(category: &str) -> String {
    category.replace(' ', "_")
}

/// Tags every record's tokens.
///
/// Each entity tags the first exact match of its token sequence; entities
/// that do not occur in the sentence leave no trace.
pub fn to_bio(records: &[(String, NerRecord)]) -> Result<Vec<BioSentence>, NerError> {
    let mut sentences = Vec::with_capacity(records.len());

    for (id, record) in records {
        let tokens = tokenize(&record.sentence);
        let mut tags = vec![OUTSIDE.to_string(); tokens.len()];

        for (entity, category) in record.pairs(id)? {
            let entity_tokens = tokenize(entity);
            if entity_tokens.is_empty() || entity_tokens.len() > tokens.len() {
                continue;
            }
            let Some(start) = tokens
                .windows(entity_tokens.len())
                .position(|window| window == entity_tokens.as_slice())
            else {
                tracing::debug!(id = %id, entity = %entity, "Entity not found in sentence");
                continue;
            };

            let category = tag_category(category);
            tags[start] = format!("B-{}", category);
            for tag in &mut tags[start + 1..start + entity_tokens.len()] {
                *tag = format!("I-{}", category);
            }
        }

        sentences.push(
            tokens
                .into_iter()
                .map(str::to_string)
                .zip(tags)
                .collect(),
        );
    }

    Ok(sentences)
}

/// Renders tagged sentences as BIO text.
pub fn render_bio(sentences: &[BioSentence]) -> String {
    let mut out = String::new();
    for sentence in sentences {
        for (token, tag) in sentence {
            out.push_str(token);
            out.push(' ');
            out.push_str(tag);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Writes tagged sentences to a BIO file, creating parent directories.
pub fn write_bio(path: impl AsRef<Path>, sentences: &[BioSentence]) -> Result<(), NerError> {
    let path = path.as_ref();
    let write_err = |source| DatasetError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, render_bio(sentences)).map_err(write_err)?;
    Ok(())
}

/// Accumulates one sentence while reading BIO lines.
#[derive(Default)]
struct SentenceBuilder {
    tokens: Vec<String>,
    record: NerRecord,
    span: Vec<String>,
    category: String,
}

impl SentenceBuilder {
    fn close_span(&mut self) {
        if !self.span.is_empty() {
            let entity = self.span.join(" ");
            self.span.clear();
            self.record.push(entity, std::mem::take(&mut self.category));
        }
    }

    fn push(&mut self, token: &str, tag: &str) {
        self.tokens.push(token.to_string());
        if let Some(category) = tag.strip_prefix("B-") {
            self.close_span();
            self.span.push(token.to_string());
            self.category = category.to_string();
        } else if let Some(category) = tag.strip_prefix("I-") {
            // An I- tag without an open span starts one.
            if self.span.is_empty() {
                self.category = category.to_string();
            }
            self.span.push(token.to_string());
        } else {
            self.close_span();
        }
    }

    fn finish(mut self) -> Option<NerRecord> {
        self.close_span();
        if self.tokens.is_empty() {
            return None;
        }
        self.record.sentence = self.tokens.join(" ");
        Some(self.record)
    }
}

/// Parses BIO text into records keyed `sentence1`, `sentence2`, ...
///
/// Sentence text is the tokens joined with single spaces. Runs of blank
/// lines do not produce empty records.
///
/// # Errors
///
/// Returns `NerError::MalformedBioLine` for a non-blank line that is not
/// exactly a token and a tag.
pub fn from_bio(text: &str) -> Result<NerRecords, NerError> {
    let mut records = Vec::new();
    let mut current = SentenceBuilder::default();

    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if let Some(record) = std::mem::take(&mut current).finish() {
                records.push((record_key(records.len() + 1), record));
            }
            continue;
        }

        let mut fields = trimmed.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(token), Some(tag), None) => current.push(token, tag),
            _ => {
                return Err(NerError::MalformedBioLine {
                    line: index + 1,
                    content: line.to_string(),
                })
            }
        }
    }

    if let Some(record) = current.finish() {
        records.push((record_key(records.len() + 1), record));
    }

    Ok(records)
}

/// Reads and parses a BIO file.
pub fn read_bio(path: impl AsRef<Path>) -> Result<NerRecords, NerError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| NerError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_bio(&text)
}
