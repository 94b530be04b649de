//! Augmentation pipeline driver.
//!
//! # Pipeline Flow
//!
//! 1. **Load**: the hierarchy and synonym table are loaded once; a bad file
//!    aborts the run before any stage executes
//! 2. **Stage input**: the input dataset, or the previous stage's artifact
//!    when resuming from `start_stage`
//! 3. **Metrics**: a snapshot and label frequencies are computed from the
//!    stage input and drive adaptive parameters
//! 4. **Stages**: merge, synonym, prune, special, each with its own RNG
//!    derived from the run seed
//! 5. **Artifacts**: `<split>1.json` to `<split>3.json`, the final
//!    `<split>.json` and `<split>.manifest.json`
//!
//! # Example
//!
//! ```rust,ignore
//! use nerforge::pipeline::{PipelineConfig, PipelineRunner};
//!
//! let config = PipelineConfig::load(None)?
//!     .with_output_dir("out/de")
//!     .with_split("dev")
//!     .with_seed(42);
//!
//! let runner = PipelineRunner::from_paths(config, "hierarchy.json", "synonyms.txt")?;
//! let manifest = runner.run("balanced/de/dev.json")?;
//! println!("{}", manifest.summary());
//! ```

pub mod config;
pub mod runner;

pub use config::{ConfigError, PipelineConfig};
pub use runner::{stage_rng, PipelineRunner, RunManifest, StageRecord, STAGE_COUNT};
