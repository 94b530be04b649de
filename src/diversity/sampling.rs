//! Category-balanced sampling of paired training examples.
//!
//! Datasets produced for two-stage models store examples as consecutive
//! pairs: conversation `2i` asks the coarse question and `2i + 1` the fine
//! one. The pair is labelled by the answer of its second conversation and is
//! always kept or dropped as a unit.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::Conversation;

/// Outcome of a uniform sampling run.
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// Selected conversations, pairs kept adjacent.
    pub conversations: Vec<Conversation>,

    /// Pairs drawn from each category.
    pub per_category: usize,

    /// Number of distinct categories seen.
    pub categories: usize,

    /// Pairs available before sampling.
    pub total_pairs: usize,
}

/// Draws the same number of pairs from every category.
#[derive(Debug, Clone, Default)]
pub struct UniformSampler {
    /// Random seed for reproducibility (None = non-deterministic).
    seed: Option<u64>,
}

impl UniformSampler {
    /// Creates a new sampler with a non-deterministic seed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Samples up to `sample_size` pairs, balanced across categories.
    ///
    /// Each category contributes `min(sample_size / categories, smallest
    /// category)` pairs. Categories are emitted in order of first appearance.
    /// A trailing unpaired conversation and pairs whose second conversation
    /// has no answer are ignored.
    pub fn sample(&self, dataset: &[Conversation], sample_size: usize) -> SampleResult {
        let mut order: Vec<&str> = Vec::new();
        let mut by_category: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut total_pairs = 0;

        for (pair_index, pair) in dataset.chunks_exact(2).enumerate() {
            let Some(category) = pair[1].answer() else {
                continue;
            };
            total_pairs += 1;
            by_category
                .entry(category)
                .or_insert_with(|| {
                    order.push(category);
                    Vec::new()
                })
                .push(pair_index);
        }

        let categories = order.len();
        if categories == 0 || sample_size == 0 {
            return SampleResult {
                conversations: Vec::new(),
                per_category: 0,
                categories,
                total_pairs,
            };
        }

        let smallest = by_category.values().map(Vec::len).min().unwrap_or(0);
        let per_category = (sample_size / categories).min(smallest);

        let mut rng = self.create_rng();
        let mut conversations = Vec::with_capacity(per_category * categories * 2);
        for category in &order {
            if let Some(pairs) = by_category.get_mut(category) {
                pairs.shuffle(&mut rng);
                for &pair_index in pairs.iter().take(per_category) {
                    conversations.extend_from_slice(&dataset[pair_index * 2..pair_index * 2 + 2]);
                }
            }
        }

        tracing::info!(
            categories,
            per_category,
            total_pairs,
            selected_pairs = conversations.len() / 2,
            "Uniform sampling complete"
        );

        SampleResult {
            conversations,
            per_category,
            categories,
            total_pairs,
        }
    }

    fn create_rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(counts: &[(&str, usize)]) -> Vec<Conversation> {
        let mut dataset = Vec::new();
        for (category, count) in counts {
            for i in 0..*count {
                dataset.push(Conversation::new(format!("coarse {i}: a, b?"), "a"));
                dataset.push(Conversation::new(format!("fine {i}: {category}, z?"), *category));
            }
        }
        dataset
    }

    fn categories_in_order(conversations: &[Conversation]) -> Vec<&str> {
        conversations
            .chunks_exact(2)
            .filter_map(|pair| pair[1].answer())
            .collect()
    }

    #[test]
    fn test_balanced_sampling() {
        let dataset = pairs(&[("X", 10), ("Y", 5), ("Z", 2)]);
        let result = UniformSampler::new().with_seed(42).sample(&dataset, 6);

        assert_eq!(result.per_category, 2);
        assert_eq!(result.categories, 3);
        assert_eq!(result.total_pairs, 17);
        assert_eq!(result.conversations.len(), 12);
        assert_eq!(
            categories_in_order(&result.conversations),
            ["X", "X", "Y", "Y", "Z", "Z"]
        );
    }

    #[test]
    fn test_limited_by_smallest_category() {
        let dataset = pairs(&[("X", 10), ("Y", 1)]);
        let result = UniformSampler::new().with_seed(1).sample(&dataset, 100);
        assert_eq!(result.per_category, 1);
        assert_eq!(result.conversations.len(), 4);
    }

    #[test]
    fn test_pairs_stay_together() {
        let dataset = pairs(&[("X", 4), ("Y", 4)]);
        let result = UniformSampler::new().with_seed(3).sample(&dataset, 4);
        for pair in result.conversations.chunks_exact(2) {
            let first = pair[0].question().unwrap();
            let second = pair[1].question().unwrap();
            let index = first.trim_start_matches("coarse ").split(':').next();
            assert_eq!(index, second.trim_start_matches("fine ").split(':').next());
        }
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let dataset = pairs(&[("X", 10), ("Y", 10)]);
        let a = UniformSampler::new().with_seed(7).sample(&dataset, 6);
        let b = UniformSampler::new().with_seed(7).sample(&dataset, 6);
        assert_eq!(a.conversations, b.conversations);
    }

    #[test]
    fn test_empty_and_odd_input() {
        let result = UniformSampler::new().sample(&[], 10);
        assert!(result.conversations.is_empty());

        let mut dataset = pairs(&[("X", 1)]);
        dataset.push(Conversation::new("orphan: a?", "a"));
        let result = UniformSampler::new().with_seed(0).sample(&dataset, 10);
        assert_eq!(result.total_pairs, 1);
        assert_eq!(result.conversations.len(), 2);
    }
}
