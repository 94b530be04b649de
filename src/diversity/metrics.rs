//! Distributional health metrics for classification datasets.
//!
//! All metrics are pure functions of the multiset of ground-truth labels.
//! They gate how aggressively the augmentation stages rewrite a dataset.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::categories::Hierarchy;
use crate::dataset::{label_counts, labels, Conversation};

/// Weights of the composite health score, in field order of `MetricsSnapshot`.
const HEALTH_WEIGHTS: [f64; 4] = [0.4, 0.3, 0.2, 0.1];

/// Coefficient of variation at or above which the CV term contributes nothing.
const CV_CEILING: f64 = 2.5;

/// Snapshot of the label distribution of a dataset.
///
/// Recomputed before every stage; never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Share of example pairs whose labels sit in the same sibling group.
    pub cohesion_score: f64,

    /// Shannon entropy over labels divided by its maximum (0.0 to 1.0).
    pub normalized_entropy: f64,

    /// Inequality of per-label counts (0.0 = perfectly even).
    pub gini_coefficient: f64,

    /// Population standard deviation of per-label counts over their mean.
    pub coefficient_of_variation: f64,
}

impl MetricsSnapshot {
    /// Calculates the snapshot for a dataset.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use nerforge::diversity::MetricsSnapshot;
    ///
    /// let snapshot = MetricsSnapshot::calculate(&dataset, &hierarchy);
    /// println!("Health: {:.3}", snapshot.health_score());
    /// ```
    pub fn calculate(dataset: &[Conversation], hierarchy: &Hierarchy) -> Self {
        let labels = labels(dataset);
        let distribution = label_counts(dataset);
        Self {
            cohesion_score: cohesion_score(&labels, hierarchy),
            normalized_entropy: normalized_entropy(&distribution),
            gini_coefficient: gini_coefficient(&distribution),
            coefficient_of_variation: coefficient_of_variation(&distribution),
        }
    }

    /// Composite data-quality score used by the consolidation stage.
    pub fn health_score(&self) -> f64 {
        let cv_term = (CV_CEILING - self.coefficient_of_variation.min(CV_CEILING)) / CV_CEILING;
        HEALTH_WEIGHTS[0] * self.cohesion_score
            + HEALTH_WEIGHTS[1] * self.normalized_entropy
            + HEALTH_WEIGHTS[2] * (1.0 - self.gini_coefficient)
            + HEALTH_WEIGHTS[3] * cv_term
    }

    /// Returns a summary of the metrics as a formatted string.
    pub fn summary(&self) -> String {
        format!(
            "Metrics Summary:\n\
             - Cohesion Score: {:.4}\n\
             - Normalized Entropy: {:.4}\n\
             - Gini Coefficient: {:.4}\n\
             - Coefficient of Variation: {:.4}\n\
             - Health Score: {:.4}",
            self.cohesion_score,
            self.normalized_entropy,
            self.gini_coefficient,
            self.coefficient_of_variation,
            self.health_score()
        )
    }
}

/// Fraction of unordered example pairs whose labels share a sibling group.
///
/// A sibling group is the set of second-level children of one first-level
/// category, or the third-level children of one second-level category.
/// Identical labels inside a group count as cohesive; first-level and unknown
/// labels never do. Counting per group gives the same result as scanning all
/// pairs.
pub fn cohesion_score(labels: &[&str], hierarchy: &Hierarchy) -> f64 {
    let n = labels.len();
    if n < 2 {
        return 0.0;
    }

    let mut group_sizes: HashMap<&str, usize> = HashMap::new();
    for label in labels {
        if let Some(group) = hierarchy.sibling_group(label) {
            *group_sizes.entry(group).or_insert(0) += 1;
        }
    }

    let cohesive: usize = group_sizes.values().map(|&k| k * k.saturating_sub(1) / 2).sum();
    let total = n * (n - 1) / 2;
    cohesive as f64 / total as f64
}

/// Calculates Shannon entropy (bits) for a distribution.
///
/// # Arguments
///
/// * `distribution` - Map from labels to counts.
pub fn shannon_entropy(distribution: &HashMap<String, usize>) -> f64 {
    let total: usize = distribution.values().sum();
    if total == 0 {
        return 0.0;
    }

    let total_f = total as f64;

    distribution
        .values()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total_f;
            -p * p.log2()
        })
        .sum()
}

/// Calculates normalized entropy (0.0 to 1.0).
///
/// Normalized by `log2` of the number of distinct labels; 0 for one label or
/// none.
pub fn normalized_entropy(distribution: &HashMap<String, usize>) -> f64 {
    let max_entropy = (distribution.len() as f64).log2();

    if max_entropy > 0.0 {
        (shannon_entropy(distribution) / max_entropy).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Calculates the Gini coefficient of per-label counts.
///
/// Uses the Lorenz-curve form `(n + 1 - 2 * sum(cumsum) / total) / n` over
/// counts sorted ascending. 0 means every label has the same count; the value
/// is bounded above by `(n - 1) / n`.
pub fn gini_coefficient(distribution: &HashMap<String, usize>) -> f64 {
    if distribution.is_empty() {
        return 0.0;
    }

    let mut values: Vec<usize> = distribution.values().copied().collect();
    values.sort_unstable();

    let total: usize = values.iter().sum();
    if total == 0 {
        return 0.0;
    }

    let mut running = 0usize;
    let mut cumsum_total = 0usize;
    for value in &values {
        running += value;
        cumsum_total += running;
    }

    let n = values.len() as f64;
    (n + 1.0 - 2.0 * cumsum_total as f64 / total as f64) / n
}

/// Population standard deviation of per-label counts divided by their mean.
pub fn coefficient_of_variation(distribution: &HashMap<String, usize>) -> f64 {
    if distribution.is_empty() {
        return 0.0;
    }

    let n = distribution.len() as f64;
    let mean = distribution.values().sum::<usize>() as f64 / n;
    if mean <= 0.0 {
        return 0.0;
    }

    let variance = distribution
        .values()
        .map(|&count| {
            let diff = count as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;

    variance.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(counts: &[(&str, usize)]) -> HashMap<String, usize> {
        counts
            .iter()
            .map(|(label, count)| (label.to_string(), *count))
            .collect()
    }

    fn hierarchy() -> Hierarchy {
        Hierarchy::from_json_str(
            r#"{
                "first-level": "A, B",
                "second-level": {"A": "A1, A2", "B": "B1"},
                "third-level": {"A1": "A1a, A1b"}
            }"#,
        )
        .expect("valid hierarchy")
    }

    #[test]
    fn test_entropy_single_label_is_zero() {
        assert_eq!(normalized_entropy(&distribution(&[("x", 10)])), 0.0);
        assert_eq!(shannon_entropy(&distribution(&[("x", 10)])), 0.0);
    }

    #[test]
    fn test_entropy_uniform_is_one() {
        let dist = distribution(&[("a", 5), ("b", 5), ("c", 5), ("d", 5)]);
        assert!((normalized_entropy(&dist) - 1.0).abs() < 1e-10);
        assert!((shannon_entropy(&dist) - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_entropy_empty() {
        assert_eq!(normalized_entropy(&HashMap::new()), 0.0);
    }

    #[test]
    fn test_entropy_skewed_is_lower() {
        let even = distribution(&[("a", 50), ("b", 50)]);
        let skewed = distribution(&[("a", 90), ("b", 10)]);
        assert!(normalized_entropy(&skewed) < normalized_entropy(&even));
    }

    #[test]
    fn test_gini_equal_counts() {
        let dist = distribution(&[("a", 10), ("b", 10), ("c", 10)]);
        assert!(gini_coefficient(&dist).abs() < 1e-10);
    }

    #[test]
    fn test_gini_two_labels_is_bounded() {
        // 99 / 1 over two labels: the formula tops out at (n - 1) / n = 0.5.
        let dist = distribution(&[("a", 99), ("b", 1)]);
        assert!((gini_coefficient(&dist) - 0.49).abs() < 1e-10);
    }

    #[test]
    fn test_gini_concentrated() {
        let mut counts: Vec<(String, usize)> = (0..19).map(|i| (format!("rare{i}"), 1)).collect();
        counts.push(("common".to_string(), 981));
        let dist: HashMap<String, usize> = counts.into_iter().collect();
        let gini = gini_coefficient(&dist);
        assert!(gini > 0.9, "Concentrated distribution should have Gini > 0.9, got {gini}");
    }

    #[test]
    fn test_gini_empty() {
        assert_eq!(gini_coefficient(&HashMap::new()), 0.0);
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(&distribution(&[("a", 4), ("b", 4)])), 0.0);
        // counts 2 and 6: mean 4, population std 2.
        let cv = coefficient_of_variation(&distribution(&[("a", 2), ("b", 6)]));
        assert!((cv - 0.5).abs() < 1e-10);
        assert_eq!(coefficient_of_variation(&HashMap::new()), 0.0);
    }

    #[test]
    fn test_cohesion() {
        let h = hierarchy();
        // Pairs: (A1,A2) same group, (A1,B1) no, (A2,B1) no.
        let score = cohesion_score(&["A1", "A2", "B1"], &h);
        assert!((score - 1.0 / 3.0).abs() < 1e-10);

        // Third-level siblings and identical grouped labels both count.
        assert_eq!(cohesion_score(&["A1a", "A1b"], &h), 1.0);
        assert_eq!(cohesion_score(&["A2", "A2"], &h), 1.0);

        // First-level and unknown labels never cohere.
        assert_eq!(cohesion_score(&["A", "B", "zzz", "zzz"], &h), 0.0);
        assert_eq!(cohesion_score(&["A1"], &h), 0.0);
    }

    #[test]
    fn test_snapshot_and_health() {
        let h = hierarchy();
        let dataset = vec![
            Conversation::new("q: A1, A2?", "A1"),
            Conversation::new("q: A1, A2?", "A2"),
        ];
        let snapshot = MetricsSnapshot::calculate(&dataset, &h);
        assert_eq!(snapshot.cohesion_score, 1.0);
        assert!((snapshot.normalized_entropy - 1.0).abs() < 1e-10);
        assert!(snapshot.gini_coefficient.abs() < 1e-10);
        assert_eq!(snapshot.coefficient_of_variation, 0.0);
        // 0.4 + 0.3 + 0.2 + 0.1
        assert!((snapshot.health_score() - 1.0).abs() < 1e-10);
        assert!(snapshot.summary().contains("Health Score: 1.0000"));
    }

    #[test]
    fn test_snapshot_empty_dataset() {
        let snapshot = MetricsSnapshot::calculate(&[], &hierarchy());
        assert_eq!(snapshot, MetricsSnapshot::default());
        // Empty data is fully "equal": only the Gini and CV terms contribute.
        assert!((snapshot.health_score() - 0.3).abs() < 1e-10);
    }
}
