//! Special-case stage: relabel examples towards catch-all categories.
//!
//! A selected conversation loses its original answer. The new answer is a
//! `miscellaneous…` / `other…` option when one is listed, otherwise the literal
//! `unknown`, which teaches the model to abstain.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{
    draw_ladder, gate, parse_item, sample_without_replacement, Mode, SkipReason, Stage,
    StageContext, StageReport,
};
use crate::dataset::Conversation;
use crate::diversity::MetricsSnapshot;

/// Label used when no catch-all option is listed.
pub const UNKNOWN: &str = "unknown";

/// Prefixes (lowercase) that mark catch-all options.
pub const SPECIAL_PREFIXES: [&str; 2] = ["miscellaneous", "other"];

/// Lists never shrink below this many options.
const MIN_OPTIONS: usize = 3;

const HEALTHY_THRESHOLD: f64 = 0.4;
const LOW_COHESION_THRESHOLD: f64 = 0.03;
const LOW_ENTROPY_THRESHOLD: f64 = 0.75;

/// Default weights for removing 0, 1, 2 or 3 options.
pub const DEFAULT_REMOVAL_LADDER: [f64; 4] = [0.2, 0.3, 0.3, 0.2];
const UNHEALTHY_REMOVAL_LADDER: [f64; 4] = [0.1, 0.2, 0.2, 0.5];

/// Returns true for `miscellaneous…` and `other…` options, ignoring case.
pub fn is_special(option: &str) -> bool {
    let lower = option.to_lowercase();
    SPECIAL_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}

/// Which special option becomes the new answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialSelection {
    /// The first listed special option.
    First,
    /// A uniformly random special option.
    Random,
    /// The special option that is rarest as a ground-truth label.
    LeastFrequent,
}

/// Parameters of the special-case stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialParams {
    pub process_probability: f64,
    /// Weights for removing 0, 1, 2 or 3 options.
    pub removal_ladder: Vec<f64>,
    pub selection: SpecialSelection,
}

impl Default for SpecialParams {
    fn default() -> Self {
        Self {
            process_probability: 0.3,
            removal_ladder: DEFAULT_REMOVAL_LADDER.to_vec(),
            selection: SpecialSelection::First,
        }
    }
}

impl SpecialParams {
    /// Derives parameters from the dataset health score.
    pub fn adaptive(metrics: &MetricsSnapshot) -> Self {
        let (mut process_probability, removal_ladder, mut aggressive) =
            if metrics.health_score() < HEALTHY_THRESHOLD {
                (0.2, UNHEALTHY_REMOVAL_LADDER, false)
            } else {
                (0.3, DEFAULT_REMOVAL_LADDER, true)
            };

        if metrics.cohesion_score < LOW_COHESION_THRESHOLD {
            process_probability *= 0.8;
        }
        if metrics.normalized_entropy < LOW_ENTROPY_THRESHOLD {
            aggressive = false;
        }

        Self {
            process_probability,
            removal_ladder: removal_ladder.to_vec(),
            selection: if aggressive {
                SpecialSelection::LeastFrequent
            } else {
                SpecialSelection::Random
            },
        }
    }
}

/// Stage 4 of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SpecialStage {
    mode: Mode,
    baseline: SpecialParams,
}

impl SpecialStage {
    pub fn new(mode: Mode, baseline: SpecialParams) -> Self {
        Self { mode, baseline }
    }

    pub fn params(&self, metrics: &MetricsSnapshot) -> SpecialParams {
        match self.mode {
            Mode::Baseline => self.baseline.clone(),
            Mode::Adaptive => SpecialParams::adaptive(metrics),
        }
    }
}

impl Stage for SpecialStage {
    fn name(&self) -> &'static str {
        "special"
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
            process_probability = params.process_probability,
            removal_ladder = ?params.removal_ladder,
            selection = ?params.selection,
            health = ctx.metrics.health_score(),
            "Starting stage"
        );

        let mut report = StageReport::new(
            self.name(),
            dataset.len(),
            serde_json::to_value(&params).unwrap_or_default(),
        );

        for (index, conversation) in dataset.iter_mut().enumerate() {
            if !gate(rng, params.process_probability) {
                continue;
            }
            report.processed += 1;

            let result = parse_item(conversation).and_then(|(options, answer)| {
                consolidate(options, &answer, &params, &ctx.frequencies, rng)
                    .ok_or(SkipReason::TooFewCandidates)
            });
            let (kept, new_answer) = match result {
                Ok(outcome) => outcome,
                Err(reason) => {
                    report.skip(index, reason);
                    continue;
                }
            };

            if conversation.set_candidates(kept.as_slice()).is_err() {
                report.skip(index, SkipReason::MalformedList);
                continue;
            }
            conversation.set_answer(new_answer);
            report.transformed += 1;
        }

        let len = dataset.len();
        report.finish(len)
    }
}

/// Keeps only the first special option, preserving order.
fn collapse_specials(options: Vec<String>) -> Vec<String> {
    let mut seen_special = false;
    options
        .into_iter()
        .filter(|option| {
            if !is_special(option) {
                return true;
            }
            !std::mem::replace(&mut seen_special, true)
        })
        .collect()
}

fn select_answer(
    options: &[String],
    selection: SpecialSelection,
    frequencies: &HashMap<String, usize>,
    rng: &mut ChaCha8Rng,
) -> String {
    let specials: Vec<&String> = options.iter().filter(|option| is_special(option)).collect();
    let chosen = match selection {
        SpecialSelection::First => specials.first().copied(),
        SpecialSelection::Random => specials.choose(rng).copied(),
        // min_by_key keeps the first of equal minima.
        SpecialSelection::LeastFrequent => specials
            .iter()
            .copied()
            .min_by_key(|option| frequencies.get(option.as_str()).copied().unwrap_or(0)),
    };
    chosen.cloned().unwrap_or_else(|| UNKNOWN.to_string())
}

/// Returns the rewritten options and the new answer, or `None` when fewer
/// than three options remain after collapsing duplicates or after swapping
/// the old answer for the new one.
fn consolidate(
    options: Vec<String>,
    answer: &str,
    params: &SpecialParams,
    frequencies: &HashMap<String, usize>,
    rng: &mut ChaCha8Rng,
) -> Option<(Vec<String>, String)> {
    let mut options = collapse_specials(options);
    if options.len() < MIN_OPTIONS {
        return None;
    }
    if let Some(position) = options.iter().position(|option| option == answer) {
        options.remove(position);
    }

    let new_answer = select_answer(&options, params.selection, frequencies, rng);
    if !options.contains(&new_answer) {
        options.push(new_answer.clone());
    }
    if options.len() < MIN_OPTIONS {
        return None;
    }

    let drawn = draw_ladder(rng, &params.removal_ladder).unwrap_or(0);
    let to_remove = drawn.min(options.len().saturating_sub(MIN_OPTIONS));

    let removable: Vec<String> = options
        .iter()
        .filter(|option| **option != new_answer)
        .cloned()
        .collect();
    let removed = sample_without_replacement(rng, &removable, to_remove);

    let mut kept: Vec<String> = options
        .into_iter()
        .filter(|option| !removed.contains(option))
        .collect();
    kept.shuffle(rng);
    Some((kept, new_answer))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{conversation, hierarchy, rng};
    use super::*;

    fn always(selection: SpecialSelection, ladder: &[f64]) -> SpecialStage {
        SpecialStage::new(
            Mode::Baseline,
            SpecialParams {
                process_probability: 1.0,
                removal_ladder: ladder.to_vec(),
                selection,
            },
        )
    }

    fn run(stage: &SpecialStage, dataset: &mut Vec<Conversation>, seed: u64) -> StageReport {
        let h = hierarchy();
        let ctx = StageContext::new(dataset, &h);
        stage.apply(dataset, &ctx, &mut rng(seed))
    }

    #[test]
    fn test_is_special() {
        assert!(is_special("miscellaneous location"));
        assert!(is_special("Other person"));
        assert!(is_special("MISCELLANEOUS"));
        assert!(!is_special("person other"));
    }

    #[test]
    fn test_collapse_specials() {
        let options = ["A", "other x", "B", "Miscellaneous y", "C"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(collapse_specials(options), ["A", "other x", "B", "C"]);
    }

    #[test]
    fn test_listed_special_answer_needs_three_options() {
        let stage = always(SpecialSelection::First, &[1.0, 0.0, 0.0, 0.0]);
        let mut dataset = vec![conversation(&["A", "B", "other x"], "A")];
        let original = dataset.clone();
        let report = run(&stage, &mut dataset, 4);

        assert_eq!(report.skipped, 1);
        assert_eq!(report.transformed, 0);
        assert_eq!(dataset, original);

        let mut dataset = vec![conversation(&["A", "B", "C", "other x"], "A")];
        run(&stage, &mut dataset, 4);
        let mut list = dataset[0].candidates().unwrap();
        list.sort();
        assert_eq!(list, ["B", "C", "other x"]);
        assert_eq!(dataset[0].answer(), Some("other x"));
    }

    #[test]
    fn test_unknown_answer_scenario() {
        // No removals, so the only randomness left is the shuffle.
        let stage = always(SpecialSelection::First, &[1.0, 0.0, 0.0, 0.0]);
        let mut dataset = vec![conversation(&["A", "B", "C"], "A")];
        run(&stage, &mut dataset, 2);

        assert_eq!(dataset[0].answer(), Some(UNKNOWN));
        let mut list = dataset[0].candidates().unwrap();
        list.sort();
        assert_eq!(list, ["B", "C", "unknown"]);
    }

    #[test]
    fn test_first_special_wins() {
        let stage = always(SpecialSelection::First, &[1.0]);
        let mut dataset = vec![conversation(&["A", "other b", "B", "other a", "C"], "B")];
        run(&stage, &mut dataset, 0);
        assert_eq!(dataset[0].answer(), Some("other b"));
        let list = dataset[0].candidates().unwrap();
        assert!(!list.iter().any(|c| c == "other a" || c == "B"));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_least_frequent_selection() {
        let freqs: HashMap<String, usize> = [("other a", 5), ("other b", 1)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let options: Vec<String> = ["other a", "other b"].iter().map(|s| s.to_string()).collect();
        let chosen = select_answer(&options, SpecialSelection::LeastFrequent, &freqs, &mut rng(0));
        assert_eq!(chosen, "other b");

        // Ties go to list order.
        let chosen = select_answer(&options, SpecialSelection::LeastFrequent, &HashMap::new(), &mut rng(0));
        assert_eq!(chosen, "other a");
    }

    #[test]
    fn test_removal_respects_minimum() {
        let stage = always(SpecialSelection::First, &[0.0, 0.0, 0.0, 1.0]);
        for seed in 0..50 {
            let mut dataset = vec![conversation(&["A", "B", "C", "A1", "miscellaneous"], "A")];
            run(&stage, &mut dataset, seed);
            let list = dataset[0].candidates().unwrap();
            // A removed, 4 left, at most one more can go.
            assert_eq!(list.len(), 3);
            assert!(list.iter().any(|c| c == "miscellaneous"));
            assert_eq!(dataset[0].answer(), Some("miscellaneous"));
        }
    }

    #[test]
    fn test_too_few_options_skipped() {
        let stage = always(SpecialSelection::First, &DEFAULT_REMOVAL_LADDER);
        let mut dataset = vec![conversation(&["other a", "other b", "A"], "A")];
        let before = dataset.clone();
        let report = run(&stage, &mut dataset, 0);
        assert_eq!(dataset, before);
        assert_eq!(report.skip_reasons.get(&SkipReason::TooFewCandidates), Some(&1));
    }

    #[test]
    fn test_adaptive_params() {
        let healthy = MetricsSnapshot {
            cohesion_score: 0.5,
            normalized_entropy: 0.9,
            gini_coefficient: 0.1,
            coefficient_of_variation: 0.2,
        };
        let params = SpecialParams::adaptive(&healthy);
        assert_eq!(params.selection, SpecialSelection::LeastFrequent);
        assert_eq!(params.removal_ladder, DEFAULT_REMOVAL_LADDER);
        assert!((params.process_probability - 0.3).abs() < 1e-12);

        let poor = MetricsSnapshot {
            cohesion_score: 0.0,
            normalized_entropy: 0.2,
            gini_coefficient: 0.9,
            coefficient_of_variation: 3.0,
        };
        let params = SpecialParams::adaptive(&poor);
        assert_eq!(params.selection, SpecialSelection::Random);
        assert_eq!(params.removal_ladder, UNHEALTHY_REMOVAL_LADDER);
        assert!((params.process_probability - 0.16).abs() < 1e-12);
    }
}
