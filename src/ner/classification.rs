//! Classification conversations from NER records.
//!
//! Every annotated entity yields one multiple-choice question per level of
//! its category's path through the hierarchy: the first-level list, then the
//! siblings at each deeper level. These are the conversations the
//! augmentation pipeline consumes.

use std::path::{Path, PathBuf};

use super::batch::convert_each;
use super::{load_records, NerRecord, MARKER};
use crate::categories::Hierarchy;
use crate::dataset::{save_dataset, Conversation};
use crate::error::NerError;

/// Answer for categories the hierarchy does not know.
pub const MISCELLANEOUS: &str = "miscellaneous";

/// Counts from one record conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationSummary {
    pub entities: usize,
    pub conversations: usize,
    /// Entities whose category was not found and fell back to
    /// [`MISCELLANEOUS`].
    pub fallbacks: usize,
}

/// Categories from the top of the hierarchy down to `category`, with the
/// candidate list offered at each step.
///
/// An unknown category yields a single first-level step answered with
/// [`MISCELLANEOUS`], which is appended to the list when absent.
pub fn category_steps<'a>(hierarchy: &'a Hierarchy, category: &str) -> Vec<(&'a str, Vec<&'a str>)> {
    let Some(name) = hierarchy.resolve(category) else {
        let mut options: Vec<&str> = hierarchy.first_level().iter().map(String::as_str).collect();
        if !options.contains(&MISCELLANEOUS) {
            options.push(MISCELLANEOUS);
        }
        return vec![(MISCELLANEOUS, options)];
    };

    let mut path = hierarchy.ancestors_of(name);
    path.reverse();
    path.push(name);
    path.into_iter()
        .map(|step| {
            let options = hierarchy.siblings_of(step).iter().map(String::as_str).collect();
            (step, options)
        })
        .collect()
}

/// Wraps the `index`-th entity in markers.
///
/// Entities are located left to right, each search starting after the
/// previous match, so a repeated surface form marks the right occurrence.
/// The sentence is returned unchanged when the entity is not found.
pub fn highlight_entity<S: AsRef<str>>(sentence: &str, entities: &[S], index: usize) -> String {
    let mut cursor = 0;
    for (position, entity) in entities.iter().enumerate() {
        let entity = entity.as_ref();
        if entity.is_empty() {
            continue;
        }
        let Some(offset) = sentence[cursor..].find(entity) else {
            continue;
        };
        let start = cursor + offset;
        let end = start + entity.len();
        if position == index {
            return format!(
                "{}{MARKER}{}{MARKER}{}",
                &sentence[..start],
                &sentence[start..end],
                &sentence[end..]
            );
        }
        cursor = end;
    }
    sentence.to_string()
}

/// The question for one classification step.
pub fn classification_question(entity: &str, highlighted: &str, options: &[&str]) -> String {
    format!(
        "The {MARKER}{entity}{MARKER} in the sentence: \"{highlighted}\" belongs to which entity in the list: {}?",
        options.join(", ")
    )
}

fn record_conversations(
    id: &str,
    record: &NerRecord,
    hierarchy: &Hierarchy,
    summary: &mut ClassificationSummary,
    out: &mut Vec<Conversation>,
) -> Result<(), NerError> {
    for (index, (entity, category)) in record.pairs(id)?.into_iter().enumerate() {
        let steps = category_steps(hierarchy, category);
        if hierarchy.resolve(category).is_none() {
            tracing::debug!(id, entity, category, "Unknown category, using miscellaneous");
            summary.fallbacks += 1;
        }
        let highlighted = highlight_entity(&record.sentence, &record.entity, index);
        for (answer, options) in steps {
            out.push(Conversation::new(
                classification_question(entity, &highlighted, &options),
                answer,
            ));
        }
        summary.entities += 1;
    }
    Ok(())
}

/// Builds classification conversations for every entity of every record.
///
/// # Errors
///
/// Fails on a record whose entity and category lists differ in length.
pub fn to_classification(
    records: &[(String, NerRecord)],
    hierarchy: &Hierarchy,
) -> Result<(Vec<Conversation>, ClassificationSummary), NerError> {
    let mut summary = ClassificationSummary::default();
    let mut conversations = Vec::new();
    for (id, record) in records {
        record_conversations(id, record, hierarchy, &mut summary, &mut conversations)?;
    }
    summary.conversations = conversations.len();
    if summary.fallbacks > 0 {
        tracing::warn!(
            fallbacks = summary.fallbacks,
            entities = summary.entities,
            "Categories missing from the hierarchy were labeled miscellaneous"
        );
    }
    Ok((conversations, summary))
}

/// Converts one record file into a classification dataset.
pub fn convert_classification_file(
    input: &Path,
    output: &Path,
    hierarchy: &Hierarchy,
) -> Result<ClassificationSummary, NerError> {
    let records = load_records(input)?;
    let (conversations, summary) = to_classification(&records, hierarchy)?;
    save_dataset(output, &conversations)?;
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        entities = summary.entities,
        conversations = summary.conversations,
        "Converted record file to classification conversations"
    );
    Ok(summary)
}

/// Converts every `*.json` record file directly inside `input_dir` to
/// `<output_dir>/<stem>.json`.
pub fn convert_classification_directory(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    hierarchy: &Hierarchy,
) -> Result<Vec<PathBuf>, NerError> {
    convert_each(input_dir.as_ref(), output_dir.as_ref(), "json", |input, output| {
        convert_classification_file(input, output, hierarchy).map(|_| ())
    })
}
