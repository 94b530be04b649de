//! Hierarchy-aware augmentation stages for classification datasets.
//!
//! The pipeline runs four stages in a fixed order:
//!
//! 1. [`MergeStage`] - fold windows of three examples into harder lists
//! 2. [`SynonymStage`] - swap category names for synonyms
//! 3. [`PruneStage`] - shorten candidate lists
//! 4. [`SpecialStage`] - relabel towards catch-all categories
//!
//! Each stage reads a [`StageContext`] computed from its input dataset and
//! draws every random decision from the RNG it is handed. Conversations that
//! cannot be processed are skipped and counted in the [`StageReport`]; they
//! never abort a batch.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::categories::Hierarchy;
use crate::dataset::{label_counts, Conversation};
use crate::diversity::MetricsSnapshot;

pub mod merge;
pub mod prune;
pub mod special;
pub mod synonym;

pub use merge::{MergeParams, MergeStage};
pub use prune::{PruneParams, PruneStage, PruneStrategy};
pub use special::{SpecialParams, SpecialSelection, SpecialStage};
pub use synonym::{ReplaceStrategy, SynonymParams, SynonymStage, SynonymTable};

/// How stage parameters are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Fixed, configured parameters.
    Baseline,
    /// Parameters derived from the metrics of each stage input.
    #[default]
    Adaptive,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Baseline => write!(f, "baseline"),
            Mode::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Ok(Mode::Baseline),
            "adaptive" => Ok(Mode::Adaptive),
            other => Err(format!("Unknown mode '{}' (expected baseline or adaptive)", other)),
        }
    }
}

/// Read-only inputs shared by every stage invocation.
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub hierarchy: &'a Hierarchy,
    pub metrics: MetricsSnapshot,
    pub frequencies: HashMap<String, usize>,
}

impl<'a> StageContext<'a> {
    /// Computes the metrics snapshot and label frequencies of a stage input.
    pub fn new(dataset: &[Conversation], hierarchy: &'a Hierarchy) -> Self {
        Self {
            hierarchy,
            metrics: MetricsSnapshot::calculate(dataset, hierarchy),
            frequencies: label_counts(dataset),
        }
    }
}

/// Why a conversation was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Missing the question or the answer turn.
    Incomplete,
    /// The question carries no parseable candidate list.
    MalformedList,
    /// The candidate list is too short for the stage.
    TooFewCandidates,
    /// The ground-truth answer is not among the candidates.
    AnswerMissing,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::Incomplete => "incomplete conversation",
            SkipReason::MalformedList => "malformed candidate list",
            SkipReason::TooFewCandidates => "too few candidates",
            SkipReason::AnswerMissing => "answer missing from candidates",
        };
        f.write_str(text)
    }
}

/// Counters describing one stage invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name.
    pub stage: String,

    /// Conversations in the stage input.
    pub input_len: usize,

    /// Conversations in the stage output.
    pub output_len: usize,

    /// Items (conversations, or windows for merge) that passed the gate.
    pub processed: usize,

    /// Items whose content changed.
    pub transformed: usize,

    /// Items skipped because they could not be processed.
    pub skipped: usize,

    /// Skipped items broken down by reason.
    pub skip_reasons: BTreeMap<SkipReason, usize>,

    /// Effective parameters the stage ran with.
    pub parameters: serde_json::Value,
}

impl StageReport {
    pub fn new(stage: &str, input_len: usize, parameters: serde_json::Value) -> Self {
        Self {
            stage: stage.to_string(),
            input_len,
            parameters,
            ..Default::default()
        }
    }

    /// Records a skipped item.
    pub fn skip(&mut self, index: usize, reason: SkipReason) {
        tracing::debug!(stage = %self.stage, index, reason = %reason, "Skipping item");
        self.skipped += 1;
        *self.skip_reasons.entry(reason).or_insert(0) += 1;
    }

    /// Finalizes the report and logs it.
    pub fn finish(mut self, output_len: usize) -> Self {
        self.output_len = output_len;
        tracing::info!(
            stage = %self.stage,
            input = self.input_len,
            output = self.output_len,
            processed = self.processed,
            transformed = self.transformed,
            "Stage complete"
        );
        if self.skipped > 0 {
            tracing::warn!(
                stage = %self.stage,
                skipped = self.skipped,
                reasons = ?self.skip_reasons,
                "Stage skipped items"
            );
        }
        self
    }
}

/// A dataset transformation step.
pub trait Stage {
    /// Short stage name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Transforms the dataset in place.
    fn apply(
        &self,
        dataset: &mut Vec<Conversation>,
        ctx: &StageContext<'_>,
        rng: &mut ChaCha8Rng,
    ) -> StageReport;
}

/// Returns true with probability `p`.
pub(crate) fn gate(rng: &mut ChaCha8Rng, p: f64) -> bool {
    rng.random::<f64>() < p
}

/// Draws a bucket index from a weight ladder.
///
/// Zero-weight buckets are never chosen. Returns `None` if no weight is
/// positive.
pub(crate) fn draw_ladder(rng: &mut ChaCha8Rng, weights: &[f64]) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return None;
    }

    let random_value = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last_positive = None;

    for (index, &weight) in weights.iter().enumerate() {
        if weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = Some(index);
        if random_value < cumulative {
            return Some(index);
        }
    }

    last_positive
}

/// Draws `count` entries uniformly without replacement, in random order.
pub(crate) fn sample_without_replacement<T: Clone>(
    rng: &mut ChaCha8Rng,
    items: &[T],
    count: usize,
) -> Vec<T> {
    let mut pool = items.to_vec();
    pool.shuffle(rng);
    pool.truncate(count);
    pool
}

/// Parses the candidate list and answer of a conversation.
pub(crate) fn parse_item(conversation: &Conversation) -> Result<(Vec<String>, String), SkipReason> {
    let answer = conversation
        .answer()
        .ok_or(SkipReason::Incomplete)?
        .to_string();
    let options = conversation
        .candidates()
        .map_err(|_| SkipReason::MalformedList)?;
    Ok((options, answer))
}
