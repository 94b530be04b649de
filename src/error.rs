//! Error types for nerforge operations.
//!
//! Defines error types for the major subsystems:
//! - Taxonomy loading
//! - Dataset and synonym file I/O
//! - Candidate-list parsing
//! - NER record conversion and evaluation
//! - LLM API interactions
//! - Pipeline runs

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading a category hierarchy.
///
/// All of these are fatal to a pipeline run.
#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("Failed to read hierarchy file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed hierarchy JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hierarchy has no first-level categories")]
    EmptyFirstLevel,

    #[error("Category '{name}' appears more than once (under '{first}' and '{second}')")]
    DuplicateCategory {
        name: String,
        first: String,
        second: String,
    },
}

/// Errors that can occur while reading or writing conversation datasets.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write dataset '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed dataset '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when a question does not carry a parseable candidate list.
///
/// These are per-item failures: stages skip the conversation and move on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("No ':' delimiter before the candidate list")]
    MissingDelimiter,

    #[error("Candidate list is empty")]
    EmptyList,
}

/// Errors that can occur while loading a synonym table.
#[derive(Debug, Error)]
pub enum SynonymError {
    #[error("Failed to read synonym file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur during NER record conversion and scoring.
#[derive(Debug, Error)]
pub enum NerError {
    #[error("Malformed BIO line {line}: '{content}'")]
    MalformedBioLine { line: usize, content: String },

    #[error("Record '{id}' has {entities} entities but {categories} categories")]
    LengthMismatch {
        id: String,
        entities: usize,
        categories: usize,
    },

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: NERFORGE_LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Response contained no choices")]
    EmptyResponse,
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::pipeline::ConfigError),

    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Synonym error: {0}")]
    Synonym(#[from] SynonymError),

    #[error("Stage {stage} cannot start: previous artifact '{path}' does not exist")]
    MissingArtifact { stage: u8, path: PathBuf },
}
