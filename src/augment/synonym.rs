//! Synonym stage: replace category names with alternative surface forms.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::{gate, parse_item, Mode, SkipReason, Stage, StageContext, StageReport};
use crate::dataset::Conversation;
use crate::diversity::MetricsSnapshot;
use crate::error::SynonymError;
use crate::utils::match_key;

/// Separator between a term and its replacement in a synonym file.
pub const SEPARATOR: &str = "---";

/// Lookup table from normalized terms to replacements.
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    entries: HashMap<String, String>,
}

impl SynonymTable {
    /// Reads a `term---replacement` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SynonymError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SynonymError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse(&content);
        tracing::debug!(path = %path.display(), entries = table.len(), "Loaded synonym table");
        Ok(table)
    }

    /// Parses `term---replacement` lines. Lines without exactly one separator
    /// are ignored; later entries for the same term win.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.trim().split(SEPARATOR).collect();
                match parts.as_slice() {
                    [term, replacement] => {
                        Some((match_key(term), replacement.trim().to_string()))
                    }
                    _ => None,
                }
            })
            .collect();
        Self { entries }
    }

    /// Returns the replacement for a word, matched case and accent
    /// insensitively.
    pub fn lookup(&self, word: &str) -> Option<&str> {
        self.entries.get(&match_key(word)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decides whether a word with a synonym gets replaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Replace with a fixed probability.
    CoinFlip { replace_probability: f64 },
    /// Replace labels above (or below) the median label frequency.
    FrequencyAdaptive { high_frequency: bool },
}

/// Parameters of the synonym stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynonymParams {
    /// Probability that a conversation is considered at all.
    pub process_probability: f64,
    pub strategy: ReplaceStrategy,
}

impl Default for SynonymParams {
    fn default() -> Self {
        Self {
            process_probability: 0.8,
            strategy: ReplaceStrategy::CoinFlip {
                replace_probability: 0.5,
            },
        }
    }
}

impl SynonymParams {
    /// Touches fewer conversations when counts vary wildly, and targets the
    /// frequent labels when the distribution is unequal.
    pub fn adaptive(metrics: &MetricsSnapshot) -> Self {
        let process_probability = if metrics.coefficient_of_variation > 2.0 {
            0.2
        } else {
            0.4
        };
        Self {
            process_probability,
            strategy: ReplaceStrategy::FrequencyAdaptive {
                high_frequency: metrics.gini_coefficient > 0.6,
            },
        }
    }
}

/// Upper median of label counts: sorted counts at index `len / 2`.
fn median_frequency(frequencies: &HashMap<String, usize>) -> usize {
    let mut counts: Vec<usize> = frequencies.values().copied().collect();
    counts.sort_unstable();
    counts.get(counts.len() / 2).copied().unwrap_or(0)
}

/// Stage 2 of the pipeline.
#[derive(Debug, Clone)]
pub struct SynonymStage {
    table: SynonymTable,
    mode: Mode,
    baseline: SynonymParams,
}

impl SynonymStage {
    pub fn new(table: SynonymTable, mode: Mode, baseline: SynonymParams) -> Self {
        Self {
            table,
            mode,
            baseline,
        }
    }

    pub fn params(&self, metrics: &MetricsSnapshot) -> SynonymParams {
        match self.mode {
            Mode::Baseline => self.baseline,
            Mode::Adaptive => SynonymParams::adaptive(metrics),
        }
    }
}

/// Per-conversation replacement decisions, keyed by normalized word.
struct Replacer<'a> {
    table: &'a SynonymTable,
    strategy: ReplaceStrategy,
    frequencies: &'a HashMap<String, usize>,
    median: usize,
    decisions: HashMap<String, Option<String>>,
}

impl Replacer<'_> {
    fn replace(&mut self, word: &str, rng: &mut ChaCha8Rng) -> Option<String> {
        let key = match_key(word);
        if let Some(decision) = self.decisions.get(&key) {
            return decision.clone();
        }

        let decision = match self.table.lookup(word) {
            Some(replacement) if self.should_replace(word, rng) => Some(replacement.to_string()),
            _ => None,
        };
        self.decisions.insert(key, decision.clone());
        decision
    }

    fn should_replace(&self, word: &str, rng: &mut ChaCha8Rng) -> bool {
        match self.strategy {
            ReplaceStrategy::CoinFlip {
                replace_probability,
            } => rng.random::<f64>() < replace_probability,
            ReplaceStrategy::FrequencyAdaptive { high_frequency } => {
                let frequency = self.frequencies.get(word).copied().unwrap_or(0);
                if high_frequency {
                    frequency > self.median
                } else {
                    frequency < self.median
                }
            }
        }
    }
}

impl Stage for SynonymStage {
    fn name(&self) -> &'static str {
        "synonym"
    }

    fn apply(
        &self,
        dataset: &mut Vec<Conversation>,
        ctx: &StageContext<'_>,
        rng: &mut ChaCha8Rng,
    ) -> StageReport {
        let params = self.params(&ctx.metrics);
        let median = median_frequency(&ctx.frequencies);
        tracing::info!(
            stage = self.name(),
            process_probability = params.process_probability,
            strategy = ?params.strategy,
            median_frequency = median,
            synonyms = self.table.len(),
            "Starting stage"
        );

        let mut report = StageReport::new(
            self.name(),
            dataset.len(),
            serde_json::to_value(params).unwrap_or_default(),
        );

        for (index, conversation) in dataset.iter_mut().enumerate() {
            if !gate(rng, params.process_probability) {
                continue;
            }
            report.processed += 1;

            let (options, answer) = match parse_item(conversation) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    report.skip(index, reason);
                    continue;
                }
            };

            let mut replacer = Replacer {
                table: &self.table,
                strategy: params.strategy,
                frequencies: &ctx.frequencies,
                median,
                decisions: HashMap::new(),
            };

            let mut changed = false;
            let mut new_options: Vec<String> = options
                .iter()
                .map(|option| match replacer.replace(option, rng) {
                    Some(replacement) => {
                        changed |= replacement != *option;
                        replacement
                    }
                    None => option.clone(),
                })
                .collect();
            let new_answer = match replacer.replace(&answer, rng) {
                Some(replacement) => {
                    changed |= replacement != answer;
                    replacement
                }
                None => answer,
            };

            if !changed {
                continue;
            }
            // A replacement can coincide with an option already listed.
            let mut seen = HashSet::new();
            new_options.retain(|option| seen.insert(option.clone()));
            if let Err(err) = conversation.set_candidates(new_options.as_slice()) {
                tracing::debug!(index, error = %err, "Failed to rebuild candidate list");
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
