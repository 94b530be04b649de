//! Micro-averaged precision, recall and F1 of predicted NER records.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::{load_records, NerRecord};
use crate::error::NerError;

/// Micro-averaged counts and scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub true_positives: usize,
    pub predicted: usize,
    pub gold: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Score {
    fn from_counts(true_positives: usize, predicted: usize, gold: usize) -> Self {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(true_positives, predicted);
        let recall = ratio(true_positives, gold);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            true_positives,
            predicted,
            gold,
            precision,
            recall,
            f1,
        }
    }
}

/// Scores over the sentences present in both files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Sentences scored.
    pub sentences: usize,
    /// Entity text and category must both match.
    pub typed: Score,
    /// Entity text alone must match.
    pub entity: Score,
}

impl EvaluationReport {
    pub fn summary(&self) -> String {
        format!(
            "Sentences: {}\n\
             Precision (entity + category): {:.4}\n\
             Recall (entity + category): {:.4}\n\
             F1 (entity + category): {:.4}\n\
             Entity-level precision: {:.4}\n\
             Entity-level recall: {:.4}\n\
             Entity-level F1: {:.4}",
            self.sentences,
            self.typed.precision,
            self.typed.recall,
            self.typed.f1,
            self.entity.precision,
            self.entity.recall,
            self.entity.f1
        )
    }
}

#[derive(Default)]
struct Tally {
    true_positives: usize,
    predicted: usize,
    gold: usize,
}

impl Tally {
    fn add<T: Eq + std::hash::Hash>(&mut self, gold: &HashSet<T>, predicted: &HashSet<T>) {
        self.true_positives += gold.intersection(predicted).count();
        self.predicted += predicted.len();
        self.gold += gold.len();
    }

    fn score(&self) -> Score {
        Score::from_counts(self.true_positives, self.predicted, self.gold)
    }
}

fn typed_set(id: &str, record: &NerRecord) -> Result<HashSet<(String, String)>, NerError> {
    Ok(record
        .pairs(id)?
        .into_iter()
        .map(|(entity, category)| (entity.to_lowercase(), category.to_lowercase()))
        .collect())
}

fn entity_set(record: &NerRecord) -> HashSet<String> {
    record.entity.iter().map(|e| e.to_lowercase()).collect()
}

/// Compares predictions against ground truth, matching sentences by key.
///
/// Matching is case-insensitive and set-based per sentence, so repeated
/// entities count once. Sentences missing from either side are ignored.
pub fn evaluate(
    gold: &[(String, NerRecord)],
    predicted: &[(String, NerRecord)],
) -> Result<EvaluationReport, NerError> {
    let predicted: HashMap<&str, &NerRecord> =
        predicted.iter().map(|(k, r)| (k.as_str(), r)).collect();

    let mut sentences = 0;
    let mut typed = Tally::default();
    let mut entity = Tally::default();

    for (id, gold_record) in gold {
        let Some(pred_record) = predicted.get(id.as_str()) else {
            continue;
        };
        sentences += 1;
        typed.add(&typed_set(id, gold_record)?, &typed_set(id, pred_record)?);
        entity.add(&entity_set(gold_record), &entity_set(pred_record));
    }

    Ok(EvaluationReport {
        sentences,
        typed: typed.score(),
        entity: entity.score(),
    })
}

/// Loads both record files and evaluates them.
pub fn evaluate_files(
    gold_path: impl AsRef<Path>,
    predicted_path: impl AsRef<Path>,
) -> Result<EvaluationReport, NerError> {
    let gold = load_records(gold_path)?;
    let predicted = load_records(predicted_path)?;
    let report = evaluate(&gold, &predicted)?;
    tracing::info!(
        sentences = report.sentences,
        f1 = report.typed.f1,
        entity_f1 = report.entity.f1,
        "Evaluation complete"
    );
    Ok(report)
}
