//! Text normalization shared by synonym lookup, memoization and hierarchy
//! resolution.
//!
//! Matching is case- and accent-insensitive: "Élysée" and "elysee" compare
//! equal once normalized.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercases, applies NFKD decomposition and drops every non-ASCII code point.
///
/// Combining marks produced by the decomposition are non-ASCII, so accents are
/// removed while the base letters survive. Scripts with no ASCII decomposition
/// normalize to the empty string.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .nfkd()
        .filter(|c| c.is_ascii())
        .collect()
}

/// Key used to compare labels for equality.
///
/// Text that folds to ASCII without losing letters uses [`normalize_text`].
/// Text with letters outside ASCII (CJK, Cyrillic, `ß`) keeps them and is only
/// lowercased, so distinct non-Latin labels never share a key.
pub fn match_key(text: &str) -> String {
    let trimmed = text.trim();
    let lossy = trimmed
        .nfkd()
        .any(|c| !c.is_ascii() && !is_combining_mark(c));
    if lossy {
        trimmed.to_lowercase()
    } else {
        normalize_text(trimmed)
    }
}

/// Collapses runs of whitespace into single spaces and trims.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
