//! Distribution analysis and balanced sampling for classification datasets.
//!
//! Two components:
//!
//! 1. **Metrics** - cohesion, entropy, Gini and coefficient of variation over
//!    ground-truth labels, combined into a health score
//! 2. **Sampling** - draw the same number of example pairs from every category
//!
//! # Usage
//!
//! ```rust,ignore
//! use nerforge::diversity::{MetricsSnapshot, UniformSampler};
//!
//! let snapshot = MetricsSnapshot::calculate(&dataset, &hierarchy);
//! println!("{}", snapshot.summary());
//!
//! let balanced = UniformSampler::new().with_seed(42).sample(&dataset, 1000);
//! ```

pub mod metrics;
pub mod sampling;

pub use metrics::{
    coefficient_of_variation, cohesion_score, gini_coefficient, normalized_entropy,
    shannon_entropy, MetricsSnapshot,
};
pub use sampling::{SampleResult, UniformSampler};
