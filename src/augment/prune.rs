//! Prune stage: shorten long candidate lists while keeping the answer.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{
    draw_ladder, gate, parse_item, sample_without_replacement, Mode, SkipReason, Stage,
    StageContext, StageReport,
};
use crate::dataset::Conversation;
use crate::diversity::MetricsSnapshot;

/// Lists at or below this length are never pruned, and pruning never goes
/// below it.
pub const MIN_CANDIDATES: usize = 3;

const BASE_PROCESS_PROBABILITY: f64 = 0.3;
const LOW_ENTROPY_THRESHOLD: f64 = 0.8;

/// Default weights for removing 1, 2, 3 or 4 distractors.
pub const DEFAULT_REMOVAL_LADDER: [f64; 4] = [0.3, 0.25, 0.25, 0.2];

/// How many candidates a selected conversation loses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PruneStrategy {
    /// Draw the number of removed distractors from a weight ladder; bucket
    /// `i` removes `i + 1`. Requires the answer to be listed.
    RemovalLadder { ladder: Vec<f64> },
    /// Keep a uniformly drawn number of candidates, answer included.
    UniformKeep,
}

/// Parameters of the prune stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneParams {
    pub process_probability: f64,
    pub strategy: PruneStrategy,
}

impl Default for PruneParams {
    fn default() -> Self {
        Self {
            process_probability: BASE_PROCESS_PROBABILITY,
            strategy: PruneStrategy::RemovalLadder {
                ladder: DEFAULT_REMOVAL_LADDER.to_vec(),
            },
        }
    }
}

impl PruneParams {
    /// Prunes less often when labels are already concentrated.
    pub fn adaptive(metrics: &MetricsSnapshot) -> Self {
        let process_probability = if metrics.normalized_entropy < LOW_ENTROPY_THRESHOLD {
            BASE_PROCESS_PROBABILITY * 0.8
        } else {
            BASE_PROCESS_PROBABILITY
        };
        Self {
            process_probability,
            strategy: PruneStrategy::UniformKeep,
        }
    }
}

/// Stage 3 of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PruneStage {
    mode: Mode,
    baseline: PruneParams,
}

impl PruneStage {
    pub fn new(mode: Mode, baseline: PruneParams) -> Self {
        Self { mode, baseline }
    }

    pub fn params(&self, metrics: &MetricsSnapshot) -> PruneParams {
        match self.mode {
            Mode::Baseline => self.baseline.clone(),
            Mode::Adaptive => PruneParams::adaptive(metrics),
        }
    }
}

impl Stage for PruneStage {
    fn name(&self) -> &'static str {
        "prune"
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
            strategy = ?params.strategy,
            entropy = ctx.metrics.normalized_entropy,
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

            let pruned = parse_item(conversation).and_then(|(options, answer)| {
                let options = dedup_candidates(options);
                if options.len() <= MIN_CANDIDATES {
                    return Err(SkipReason::TooFewCandidates);
                }
                match &params.strategy {
                    PruneStrategy::RemovalLadder { ladder } => {
                        remove_by_ladder(options, &answer, ladder, rng)
                    }
                    PruneStrategy::UniformKeep => Ok(keep_uniform(options, &answer, rng)),
                }
            });

            match pruned.and_then(|kept| {
                conversation
                    .set_candidates(kept.as_slice())
                    .map_err(|_| SkipReason::MalformedList)
            }) {
                Ok(()) => report.transformed += 1,
                Err(reason) => report.skip(index, reason),
            }
        }

        let len = dataset.len();
        report.finish(len)
    }
}

/// Drops repeated candidates, keeping the first occurrence.
fn dedup_candidates(options: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    options
        .into_iter()
        .filter(|option| seen.insert(option.clone()))
        .collect()
}

/// Removes `1..=min(|others| - 2, ladder length)` distractors.
fn remove_by_ladder(
    mut options: Vec<String>,
    answer: &str,
    ladder: &[f64],
    rng: &mut ChaCha8Rng,
) -> Result<Vec<String>, SkipReason> {
    let position = options
        .iter()
        .position(|option| option == answer)
        .ok_or(SkipReason::AnswerMissing)?;
    let answer = options.remove(position);

    let max_removable = options.len().saturating_sub(MIN_CANDIDATES - 1);
    let buckets = max_removable.min(ladder.len());
    if buckets == 0 {
        return Err(SkipReason::TooFewCandidates);
    }
    let to_remove = draw_ladder(rng, &ladder[..buckets]).ok_or(SkipReason::TooFewCandidates)? + 1;

    let mut kept = sample_without_replacement(rng, &options, options.len() - to_remove);
    kept.push(answer);
    kept.shuffle(rng);
    Ok(kept)
}

/// Keeps the answer plus a uniform number of other candidates, at least
/// three entries in total.
fn keep_uniform(mut options: Vec<String>, answer: &str, rng: &mut ChaCha8Rng) -> Vec<String> {
    if !options.iter().any(|option| option == answer) {
        options.push(answer.to_string());
    }

    let num_to_keep = rng.random_range(MIN_CANDIDATES..=options.len());
    let others: Vec<String> = options.into_iter().filter(|option| option != answer).collect();

    let mut kept = vec![answer.to_string()];
    kept.extend(sample_without_replacement(rng, &others, num_to_keep - 1));
    kept.shuffle(rng);
    kept
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{conversation, hierarchy, rng};
    use super::*;

    const LONG: [&str; 8] = ["A", "B", "C", "A1", "A2", "B1", "B2", "A1a"];

    fn run(stage: &PruneStage, dataset: &mut Vec<Conversation>, seed: u64) -> StageReport {
        let h = hierarchy();
        let ctx = StageContext::new(dataset, &h);
        stage.apply(dataset, &ctx, &mut rng(seed))
    }

    fn always(strategy: PruneStrategy) -> PruneStage {
        PruneStage::new(
            Mode::Baseline,
            PruneParams {
                process_probability: 1.0,
                strategy,
            },
        )
    }

    #[test]
    fn test_adaptive_params() {
        let flat = MetricsSnapshot {
            normalized_entropy: 0.5,
            ..Default::default()
        };
        let params = PruneParams::adaptive(&flat);
        assert!((params.process_probability - 0.24).abs() < 1e-12);
        assert_eq!(params.strategy, PruneStrategy::UniformKeep);

        let even = MetricsSnapshot {
            normalized_entropy: 0.9,
            ..Default::default()
        };
        assert!((PruneParams::adaptive(&even).process_probability - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_ladder_pruning_bounds() {
        let stage = always(PruneStrategy::RemovalLadder {
            ladder: DEFAULT_REMOVAL_LADDER.to_vec(),
        });
        for seed in 0..100 {
            let mut dataset = vec![conversation(&LONG, "B1")];
            let report = run(&stage, &mut dataset, seed);
            assert_eq!(report.transformed, 1);

            let list = dataset[0].candidates().unwrap();
            // 7 others, remove 1..=4, keep the answer.
            assert!((4..=7).contains(&list.len()), "len {}", list.len());
            assert!(list.iter().any(|c| c == "B1"));
            assert!(list.iter().all(|c| LONG.contains(&c.as_str())));
        }
    }

    #[test]
    fn test_ladder_pruning_short_list() {
        let stage = always(PruneStrategy::RemovalLadder {
            ladder: DEFAULT_REMOVAL_LADDER.to_vec(),
        });
        // 3 others: exactly one can go.
        let mut dataset = vec![conversation(&["A", "B", "C", "A2"], "A2")];
        run(&stage, &mut dataset, 4);
        let list = dataset[0].candidates().unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.iter().any(|c| c == "A2"));
    }

    #[test]
    fn test_ladder_pruning_requires_answer() {
        let stage = always(PruneStrategy::RemovalLadder {
            ladder: DEFAULT_REMOVAL_LADDER.to_vec(),
        });
        let mut dataset = vec![conversation(&["A", "B", "C", "A1"], "B2")];
        let before = dataset.clone();
        let report = run(&stage, &mut dataset, 0);
        assert_eq!(dataset, before);
        assert_eq!(report.skip_reasons.get(&SkipReason::AnswerMissing), Some(&1));
    }

    #[test]
    fn test_short_lists_untouched() {
        for strategy in [
            PruneStrategy::UniformKeep,
            PruneStrategy::RemovalLadder {
                ladder: DEFAULT_REMOVAL_LADDER.to_vec(),
            },
        ] {
            let stage = always(strategy);
            let mut dataset = vec![conversation(&["A", "B", "C"], "A")];
            let before = dataset.clone();
            let report = run(&stage, &mut dataset, 0);
            assert_eq!(dataset, before);
            assert_eq!(report.skip_reasons.get(&SkipReason::TooFewCandidates), Some(&1));
        }
    }

    #[test]
    fn test_repeated_candidates_are_collapsed() {
        let stage = always(PruneStrategy::UniformKeep);
        for seed in 0..100 {
            let mut dataset = vec![conversation(&["A", "B", "A", "C", "A", "A1"], "A")];
            run(&stage, &mut dataset, seed);
            let list = dataset[0].candidates().unwrap();
            assert!((3..=4).contains(&list.len()), "{list:?}");
            assert_eq!(list.iter().filter(|c| *c == "A").count(), 1);
        }

        // Only three distinct candidates: nothing to prune.
        let mut dataset = vec![conversation(&["A", "A", "A", "B", "C"], "A")];
        let before = dataset.clone();
        let report = run(&stage, &mut dataset, 0);
        assert_eq!(dataset, before);
        assert_eq!(report.skip_reasons.get(&SkipReason::TooFewCandidates), Some(&1));
    }

    #[test]
    fn test_uniform_keep_adds_missing_answer() {
        let stage = always(PruneStrategy::UniformKeep);
        for seed in 0..100 {
            let mut dataset = vec![conversation(&["A", "B", "C", "A1"], "B2")];
            run(&stage, &mut dataset, seed);
            let list = dataset[0].candidates().unwrap();
            assert!((3..=5).contains(&list.len()));
            assert!(list.iter().any(|c| c == "B2"));
        }
    }

    #[test]
    fn test_gate_zero_is_identity() {
        let stage = PruneStage::new(
            Mode::Baseline,
            PruneParams {
                process_probability: 0.0,
                ..Default::default()
            },
        );
        let mut dataset: Vec<Conversation> = (0..10).map(|_| conversation(&LONG, "A")).collect();
        let before = dataset.clone();
        run(&stage, &mut dataset, 8);
        assert_eq!(dataset, before);
    }
}
