//! Command-line interface for nerforge.
//!
//! Provides commands for dataset augmentation, metrics, sampling, NER format
//! conversion, evaluation and LLM-based categorization.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
