//! nerforge: hierarchy-aware augmentation of multi-stage NER training data.
//!
//! The core is a four-stage pipeline over classification conversations whose
//! questions carry comma-separated candidate lists. Around it sit diversity
//! metrics, uniform sampling, NER format conversions, evaluation and an
//! LLM-driven categorizer.

pub mod augment;
pub mod categories;
pub mod cli;
pub mod dataset;
pub mod diversity;
pub mod error;
pub mod inference;
pub mod llm;
pub mod ner;
pub mod pipeline;
pub mod utils;

pub use augment::{Mode, Stage, StageContext, StageReport};
pub use categories::{Hierarchy, Level};
pub use dataset::Conversation;
pub use diversity::MetricsSnapshot;
pub use error::{
    CodecError, DatasetError, HierarchyError, LlmError, NerError, PipelineError, SynonymError,
};
pub use pipeline::{ConfigError, PipelineConfig, PipelineRunner, RunManifest};
