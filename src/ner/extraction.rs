//! Entity extraction format: the answer repeats the sentence with every
//! entity wrapped in `##` markers.

use super::NerRecord;
use crate::dataset::Conversation;

/// Entity delimiter.
pub const MARKER: &str = "##";

/// A marked phrase located in the unmarked text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedSpan {
    /// Byte offset in the text with all markers removed.
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl MarkedSpan {
    pub fn overlaps(&self, other: &MarkedSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Wraps every occurrence of each entity in markers.
///
/// Longer entities are marked first; an occurrence that overlaps an already
/// marked region is left alone, so nested entities never double-wrap.
pub fn mark_entities<S: AsRef<str>>(sentence: &str, entities: &[S]) -> String {
    let mut sorted: Vec<&str> = entities
        .iter()
        .map(|e| e.as_ref())
        .filter(|e| !e.is_empty())
        .collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut marked: Vec<(usize, usize)> = Vec::new();
    for entity in sorted {
        for (start, _) in sentence.match_indices(entity) {
            let end = start + entity.len();
            if marked.iter().all(|&(s, e)| end <= s || e <= start) {
                marked.push((start, end));
            }
        }
    }
    marked.sort_unstable();

    let mut out = String::with_capacity(sentence.len() + marked.len() * 2 * MARKER.len());
    let mut cursor = 0;
    for (start, end) in marked {
        out.push_str(&sentence[cursor..start]);
        out.push_str(MARKER);
        out.push_str(&sentence[start..end]);
        out.push_str(MARKER);
        cursor = end;
    }
    out.push_str(&sentence[cursor..]);
    out
}

/// Builds extraction training conversations from records: the sentence as
/// the question, the marked sentence as the answer.
pub fn to_extraction(records: &[(String, NerRecord)]) -> Vec<Conversation> {
    records
        .iter()
        .map(|(_, record)| {
            Conversation::new(
                record.sentence.clone(),
                mark_entities(&record.sentence, &record.entity),
            )
        })
        .collect()
}

/// Finds the marked phrases of a response, in order.
///
/// Markers pair up left to right; an unpaired trailing marker is ignored.
pub fn extract_marked(text: &str) -> Vec<MarkedSpan> {
    let mut spans = Vec::new();
    let mut rest = text;
    let mut clean_offset = 0;

    while let Some(open) = rest.find(MARKER) {
        let after_open = &rest[open + MARKER.len()..];
        let Some(close) = after_open.find(MARKER) else {
            break;
        };
        let start = clean_offset + open;
        let phrase = &after_open[..close];
        spans.push(MarkedSpan {
            start,
            end: start + phrase.len(),
            text: phrase.to_string(),
        });
        clean_offset = start + phrase.len();
        rest = &after_open[close + MARKER.len()..];
    }

    spans
}
