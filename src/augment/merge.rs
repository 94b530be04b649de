//! Merge stage: fold pairs of examples into a single, harder candidate list.
//!
//! The dataset is read in windows of three. When a window is selected, the
//! first example's list absorbs the second example's answer plus a few of its
//! distractors, preferring categories close to that answer in the taxonomy.
//! The second example is consumed; the third passes through.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use super::{draw_ladder, gate, parse_item, Mode, SkipReason, Stage, StageContext, StageReport};
use crate::categories::Hierarchy;
use crate::dataset::{Conversation, Turn};
use crate::diversity::MetricsSnapshot;

/// Number of conversations read per merge window.
pub const WINDOW: usize = 3;

/// Weights for injecting 0, 1, 2 or 3 extra distractors.
const INJECTION_LADDER: [f64; 4] = [0.2, 0.2, 0.3, 0.3];

const BASE_MERGE_PROBABILITY: f64 = 0.4;
const LOW_COHESION_THRESHOLD: f64 = 0.04;

/// Parameters of the merge stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeParams {
    /// Probability that a window is merged.
    pub merge_probability: f64,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            merge_probability: BASE_MERGE_PROBABILITY,
        }
    }
}

impl MergeParams {
    /// Merges more often when labels are scattered across sibling groups.
    pub fn adaptive(metrics: &MetricsSnapshot) -> Self {
        let merge_probability = if metrics.cohesion_score < LOW_COHESION_THRESHOLD {
            (BASE_MERGE_PROBABILITY * 1.5).min(0.6)
        } else {
            BASE_MERGE_PROBABILITY
        };
        Self { merge_probability }
    }
}

/// Stage 1 of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct MergeStage {
    mode: Mode,
    baseline: MergeParams,
}

impl MergeStage {
    pub fn new(mode: Mode, baseline: MergeParams) -> Self {
        Self { mode, baseline }
    }

    /// Returns the parameters this stage runs with for the given metrics.
    pub fn params(&self, metrics: &MetricsSnapshot) -> MergeParams {
        match self.mode {
            Mode::Baseline => self.baseline,
            Mode::Adaptive => MergeParams::adaptive(metrics),
        }
    }
}

impl Stage for MergeStage {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn apply(
        &self,
        dataset: &mut Vec<Conversation>,
        ctx: &StageContext<'_>,
        rng: &mut ChaCha8Rng,
    ) -> StageReport {
        let params = self.params(&ctx.metrics);
        tracing::info!(
            stage = self.name(),
            merge_probability = params.merge_probability,
            cohesion = ctx.metrics.cohesion_score,
            "Starting stage"
        );

        let mut report = StageReport::new(
            self.name(),
            dataset.len(),
            serde_json::to_value(params).unwrap_or_default(),
        );

        let input = std::mem::take(dataset);
        let mut output = Vec::with_capacity(input.len());

        for (window_index, window) in input.chunks(WINDOW).enumerate() {
            if window.len() < 2 || !gate(rng, params.merge_probability) {
                output.extend_from_slice(window);
                continue;
            }

            report.processed += 1;
            match merge_window(ctx.hierarchy, &window[0], &window[1], rng) {
                Ok(merged) => {
                    output.push(merged);
                    output.extend_from_slice(&window[2..]);
                    report.transformed += 1;
                }
                Err(reason) => {
                    report.skip(window_index * WINDOW, reason);
                    output.extend_from_slice(window);
                }
            }
        }

        *dataset = output;
        report.finish(dataset.len())
    }
}

fn merge_window(
    hierarchy: &Hierarchy,
    first: &Conversation,
    second: &Conversation,
    rng: &mut ChaCha8Rng,
) -> Result<Conversation, SkipReason> {
    let base_list = first.candidates().map_err(|_| SkipReason::MalformedList)?;
    let (donor_list, answer) = parse_item(second)?;

    let pool: Vec<&str> = dedup_preserving_order(donor_list.iter().map(String::as_str))
        .into_iter()
        .filter(|name| *name != answer)
        .collect();

    let mut injected = vec![answer.as_str()];
    injected.extend(select_distractors(hierarchy, &answer, &pool, rng));

    let merged_list = merge_lists(hierarchy, &base_list, &injected, &answer);

    let mut merged = first.clone();
    merged
        .set_candidates(merged_list.as_slice())
        .map_err(|_| SkipReason::MalformedList)?;
    if merged.is_complete() {
        merged.set_answer(answer.as_str());
    } else {
        merged.conversations.push(Turn::assistant(answer.as_str()));
    }
    Ok(merged)
}

/// Picks up to three distractors from `pool`, related categories first.
fn select_distractors<'a>(
    hierarchy: &Hierarchy,
    answer: &str,
    pool: &[&'a str],
    rng: &mut ChaCha8Rng,
) -> Vec<&'a str> {
    let max_count = pool.len().min(INJECTION_LADDER.len() - 1);
    let count = draw_ladder(rng, &INJECTION_LADDER[..=max_count]).unwrap_or(0);
    if count == 0 {
        return Vec::new();
    }

    let related = hierarchy.related_to(answer);
    let (mut preferred, mut rest): (Vec<&str>, Vec<&str>) =
        pool.iter().copied().partition(|name| related.contains(*name));
    preferred.shuffle(rng);
    rest.shuffle(rng);

    preferred.into_iter().chain(rest).take(count).collect()
}

/// Combines a base list with injected categories without ancestry conflicts.
///
/// The answer always survives. Base entries that are ancestors of an injected
/// entry are dropped, as is anything above or below the answer, and finally
/// any entry that is an ancestor of another surviving entry. The result is
/// sorted.
pub fn merge_lists<S: AsRef<str>>(
    hierarchy: &Hierarchy,
    base: &[S],
    injected: &[&str],
    answer: &str,
) -> Vec<String> {
    let mut union: BTreeSet<&str> = base
        .iter()
        .map(|item| item.as_ref())
        .filter(|item| !injected.iter().any(|new| hierarchy.is_ancestor(item, new)))
        .collect();
    union.extend(injected.iter().copied());
    union.insert(answer);
    union.retain(|item| !hierarchy.related_by_ancestry(item, answer));

    let snapshot: Vec<&str> = union.iter().copied().collect();
    snapshot
        .iter()
        .filter(|item| {
            **item == answer
                || !snapshot
                    .iter()
                    .any(|other| other != *item && hierarchy.is_ancestor(item, other))
        })
        .map(|item| item.to_string())
        .collect()
}

fn dedup_preserving_order<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(*item)).collect()
}
