//! Two-model NER inference: an extraction model marks entity spans, then a
//! categorization model walks each entity down the category hierarchy.

mod categorizer;

pub use categorizer::{
    category_prompt, CategorizerConfig, HierarchicalCategorizer, InferenceReport, SYSTEM_PROMPT,
};

use crate::ner::extraction::{extract_marked, MarkedSpan};

/// Entities from repeated extraction responses for one sentence.
///
/// Every span of the first response is kept. Spans of later responses are
/// added only when they overlap nothing kept so far, measured on the
/// marker-free text.
pub fn merge_extractions<S: AsRef<str>>(responses: &[S]) -> Vec<String> {
    let mut kept: Vec<MarkedSpan> = Vec::new();

    for (index, response) in responses.iter().enumerate() {
        for span in extract_marked(response.as_ref()) {
            if span.text.trim().is_empty() {
                continue;
            }
            if index == 0 || kept.iter().all(|existing| !existing.overlaps(&span)) {
                kept.push(span);
            }
        }
    }

    kept.into_iter().map(|span| span.text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_extractions_adds_disjoint_spans() {
        let responses = [
            "##Alice## flew to Paris with Bob",
            "##Alice## flew to ##Paris## with Bob",
            "Alice flew to ##Paris with## ##Bob##",
        ];
        assert_eq!(merge_extractions(&responses), ["Alice", "Paris", "Bob"]);
    }

    #[test]
    fn test_merge_extractions_empty() {
        let responses: [&str; 2] = ["no markers", "#### still none"];
        assert!(merge_extractions(&responses).is_empty());
    }
}
