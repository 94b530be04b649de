//! Candidate-list codec.
//!
//! Classification questions end with the candidate categories, e.g.
//! `Which type does ##Paris## belong to in the list: city, country, person?`.
//! The list starts after the last `:` and ends with `?`.

use crate::error::CodecError;

/// Extracts the ordered candidate names from a question.
///
/// # Errors
///
/// Returns `CodecError::MissingDelimiter` if the question has no `:` and
/// `CodecError::EmptyList` if nothing follows it.
pub fn extract(question: &str) -> Result<Vec<String>, CodecError> {
    let start = question.rfind(':').ok_or(CodecError::MissingDelimiter)?;
    let tail = question[start + 1..].trim().trim_matches('?').trim();
    if tail.is_empty() {
        return Err(CodecError::EmptyList);
    }
    Ok(tail.split(',').map(|name| name.trim().to_string()).collect())
}

/// Replaces everything after the last `:` with `names` in canonical form.
pub fn rebuild<S: AsRef<str>>(question: &str, names: &[S]) -> Result<String, CodecError> {
    let start = question.rfind(':').ok_or(CodecError::MissingDelimiter)?;
    let joined = names
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("{} {}?", &question[..=start], joined))
}
