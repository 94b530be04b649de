//! Pipeline configuration for the augmentation driver.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `NERFORGE_*` environment variables, then command-line flags applied by the
//! caller through the builder methods.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::augment::{
    MergeParams, Mode, PruneParams, PruneStrategy, ReplaceStrategy, SpecialParams, SynonymParams,
};

/// First and last stage index a run may start from.
pub const STAGE_RANGE: std::ops::RangeInclusive<u8> = 1..=4;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML configuration file.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fixed or metrics-driven stage parameters.
    pub mode: Mode,
    /// RNG seed; drawn once per run when absent.
    pub seed: Option<u64>,
    /// Directory receiving stage artifacts and the manifest.
    pub output_dir: PathBuf,
    /// Split name used as the artifact file prefix (e.g. `dev`, `train`).
    pub split: String,
    /// Stage to start from (1-4). Later starts read the previous artifact.
    pub start_stage: u8,

    // Baseline stage parameters
    pub merge: MergeParams,
    pub synonym: SynonymParams,
    pub prune: PruneParams,
    pub special: SpecialParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Adaptive,
            seed: None,
            output_dir: PathBuf::from("./augmented"),
            split: "train".to_string(),
            start_stage: 1,
            merge: MergeParams::default(),
            synonym: SynonymParams::default(),
            prune: PruneParams::default(),
            special: SpecialParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the configuration from defaults, an optional YAML file and the
    /// process environment, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `NERFORGE_MODE`: `adaptive` or `baseline` (default: adaptive)
    /// - `NERFORGE_SEED`: RNG seed
    /// - `NERFORGE_OUTPUT_DIR`: Artifact directory (default: ./augmented)
    /// - `NERFORGE_SPLIT`: Split name (default: train)
    /// - `NERFORGE_START_STAGE`: Stage to resume from (default: 1)
    /// - `NERFORGE_MERGE_PROBABILITY`: Baseline merge probability (default: 0.4)
    /// - `NERFORGE_SYNONYM_PROBABILITY`: Baseline synonym processing probability (default: 0.8)
    /// - `NERFORGE_SYNONYM_REPLACE_PROBABILITY`: Baseline coin-flip probability (default: 0.5)
    /// - `NERFORGE_PRUNE_PROBABILITY`: Baseline pruning probability (default: 0.3)
    /// - `NERFORGE_PRUNE_LADDER`: Comma-separated removal weights (default: 0.3,0.25,0.25,0.2)
    /// - `NERFORGE_SPECIAL_PROBABILITY`: Baseline special-case probability (default: 0.3)
    /// - `NERFORGE_SPECIAL_LADDER`: Comma-separated removal weights (default: 0.2,0.3,0.3,0.2)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `NERFORGE_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("NERFORGE_MODE") {
            self.mode = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "NERFORGE_MODE".to_string(),
                message,
            })?;
        }

        if let Some(val) = lookup("NERFORGE_SEED") {
            self.seed = Some(parse_env_value(&val, "NERFORGE_SEED")?);
        }

        if let Some(val) = lookup("NERFORGE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("NERFORGE_SPLIT") {
            self.split = val;
        }

        if let Some(val) = lookup("NERFORGE_START_STAGE") {
            self.start_stage = parse_env_value(&val, "NERFORGE_START_STAGE")?;
        }

        // Baseline stage parameters
        if let Some(val) = lookup("NERFORGE_MERGE_PROBABILITY") {
            self.merge.merge_probability = parse_env_value(&val, "NERFORGE_MERGE_PROBABILITY")?;
        }

        if let Some(val) = lookup("NERFORGE_SYNONYM_PROBABILITY") {
            self.synonym.process_probability =
                parse_env_value(&val, "NERFORGE_SYNONYM_PROBABILITY")?;
        }

        if let Some(val) = lookup("NERFORGE_SYNONYM_REPLACE_PROBABILITY") {
            self.synonym.strategy = ReplaceStrategy::CoinFlip {
                replace_probability: parse_env_value(&val, "NERFORGE_SYNONYM_REPLACE_PROBABILITY")?,
            };
        }

        if let Some(val) = lookup("NERFORGE_PRUNE_PROBABILITY") {
            self.prune.process_probability = parse_env_value(&val, "NERFORGE_PRUNE_PROBABILITY")?;
        }

        if let Some(val) = lookup("NERFORGE_PRUNE_LADDER") {
            self.prune.strategy = PruneStrategy::RemovalLadder {
                ladder: parse_env_list(&val, "NERFORGE_PRUNE_LADDER")?,
            };
        }

        if let Some(val) = lookup("NERFORGE_SPECIAL_PROBABILITY") {
            self.special.process_probability =
                parse_env_value(&val, "NERFORGE_SPECIAL_PROBABILITY")?;
        }

        if let Some(val) = lookup("NERFORGE_SPECIAL_LADDER") {
            self.special.removal_ladder = parse_env_list(&val, "NERFORGE_SPECIAL_LADDER")?;
        }

        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.split.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "split cannot be empty".to_string(),
            ));
        }

        if !STAGE_RANGE.contains(&self.start_stage) {
            return Err(ConfigError::ValidationFailed(format!(
                "start_stage must be between 1 and 4, got {}",
                self.start_stage
            )));
        }

        check_probability("merge.merge_probability", self.merge.merge_probability)?;
        check_probability("synonym.process_probability", self.synonym.process_probability)?;
        if let ReplaceStrategy::CoinFlip {
            replace_probability,
        } = self.synonym.strategy
        {
            check_probability("synonym.replace_probability", replace_probability)?;
        }
        check_probability("prune.process_probability", self.prune.process_probability)?;
        if let PruneStrategy::RemovalLadder { ladder } = &self.prune.strategy {
            check_ladder("prune.ladder", ladder)?;
            // Short lists only reach the first bucket (remove one candidate).
            if ladder[0] <= 0.0 {
                return Err(ConfigError::ValidationFailed(
                    "prune.ladder needs a positive first weight".to_string(),
                ));
            }
        }
        check_probability("special.process_probability", self.special.process_probability)?;
        check_ladder("special.removal_ladder", &self.special.removal_ladder)?;

        Ok(())
    }

    /// Builder method to set the parameter mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder method to set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Builder method to set the split name.
    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    /// Builder method to set the stage to start from.
    pub fn with_start_stage(mut self, stage: u8) -> Self {
        self.start_stage = stage;
        self
    }

    /// Builder method to set the baseline merge probability.
    pub fn with_merge_probability(mut self, probability: f64) -> Self {
        self.merge.merge_probability = probability;
        self
    }
}

fn check_probability(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ValidationFailed(format!(
            "{} must be between 0.0 and 1.0, got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_ladder(name: &str, ladder: &[f64]) -> Result<(), ConfigError> {
    if ladder.is_empty() {
        return Err(ConfigError::ValidationFailed(format!("{} cannot be empty", name)));
    }
    if ladder.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
        return Err(ConfigError::ValidationFailed(format!(
            "{} weights must be non-negative",
            name
        )));
    }
    if ladder.iter().sum::<f64>() <= 0.0 {
        return Err(ConfigError::ValidationFailed(format!(
            "{} needs at least one positive weight",
            name
        )));
    }
    Ok(())
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse a comma-separated list of numbers.
fn parse_env_list(value: &str, key: &str) -> Result<Vec<f64>, ConfigError> {
    value
        .split(',')
        .map(|item| parse_env_value(item, key))
        .collect()
}
