//! Stage-by-stage driver for the augmentation pipeline.
//!
//! The runner owns the hierarchy and synonym table for a run, sequences the
//! four stages, writes every intermediate dataset to disk and records what
//! happened in a JSON manifest next to the artifacts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::config::PipelineConfig;
use crate::augment::{
    MergeStage, Mode, PruneStage, SpecialStage, Stage, StageContext, StageReport, SynonymStage,
    SynonymTable,
};
use crate::categories::Hierarchy;
use crate::dataset::{load_dataset, read_json, save_dataset, write_json, Conversation};
use crate::diversity::MetricsSnapshot;
use crate::error::{DatasetError, PipelineError};

/// Number of stages in a full run.
pub const STAGE_COUNT: u8 = 4;

/// Per-stage RNG stream spacing.
const STAGE_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Outcome of one stage within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage index (1-4).
    pub index: u8,
    /// Dataset the stage read.
    pub input_path: PathBuf,
    /// Dataset the stage wrote.
    pub output_path: PathBuf,
    /// Metrics of the stage input, which drove its parameters.
    pub input_metrics: MetricsSnapshot,
    pub report: StageReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Record of a pipeline run, written as `<split>.manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Unique identifier for this run.
    pub run_id: Uuid,
    pub split: String,
    pub mode: Mode,
    /// Seed every stage RNG was derived from.
    pub seed: u64,
    pub start_stage: u8,
    /// Dataset the first executed stage read.
    pub input_path: PathBuf,
    /// Hex SHA-256 of that dataset file.
    pub input_sha256: String,
    /// Run whose earlier stage records were carried over on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<Uuid>,
    /// Every stage that produced the current artifacts, in stage order.
    pub stages: Vec<StageRecord>,
    /// Metrics of the final dataset.
    pub final_metrics: MetricsSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunManifest {
    /// Returns a human-readable run summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Run {} ({} mode, seed {}, split '{}')",
            self.run_id, self.mode, self.seed, self.split
        )];
        if let Some(previous) = self.resumed_from {
            lines.push(format!("  resumed at stage {} from run {}", self.start_stage, previous));
        }
        for stage in &self.stages {
            lines.push(format!(
                "  stage {} {:<8} {:>6} -> {:<6} transformed {:>5}, skipped {:>4}",
                stage.index,
                stage.report.stage,
                stage.report.input_len,
                stage.report.output_len,
                stage.report.transformed,
                stage.report.skipped
            ));
        }
        lines.push(self.final_metrics.summary());
        lines.join("\n")
    }
}

/// Runs the augmentation stages for one dataset split.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    config: PipelineConfig,
    hierarchy: Hierarchy,
    synonyms: SynonymTable,
}

impl PipelineRunner {
    /// Creates a runner from already-loaded inputs.
    pub fn new(config: PipelineConfig, hierarchy: Hierarchy, synonyms: SynonymTable) -> Self {
        Self {
            config,
            hierarchy,
            synonyms,
        }
    }

    /// Loads the hierarchy and synonym files, failing fast on either.
    pub fn from_paths(
        config: PipelineConfig,
        hierarchy_path: impl AsRef<Path>,
        synonym_path: impl AsRef<Path>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let hierarchy = Hierarchy::load(hierarchy_path)?;
        let synonyms = SynonymTable::load(synonym_path)?;
        Ok(Self::new(config, hierarchy, synonyms))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Path of the dataset written by `stage`: `<split>N.json` for stages 1-3
    /// and `<split>.json` for the final stage.
    pub fn artifact_path(&self, stage: u8) -> PathBuf {
        let name = if stage >= STAGE_COUNT {
            format!("{}.json", self.config.split)
        } else {
            format!("{}{}.json", self.config.split, stage)
        };
        self.config.output_dir.join(name)
    }

    /// Path of the run manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.manifest.json", self.config.split))
    }

    fn build_stage(&self, index: u8) -> Box<dyn Stage> {
        let mode = self.config.mode;
        match index {
            1 => Box::new(MergeStage::new(mode, self.config.merge)),
            2 => Box::new(SynonymStage::new(
                self.synonyms.clone(),
                mode,
                self.config.synonym,
            )),
            3 => Box::new(PruneStage::new(mode, self.config.prune.clone())),
            _ => Box::new(SpecialStage::new(mode, self.config.special.clone())),
        }
    }

    /// Resolves the dataset the first executed stage reads.
    fn stage_input(&self, input: &Path) -> Result<PathBuf, PipelineError> {
        let start = self.config.start_stage;
        if start <= 1 {
            return Ok(input.to_path_buf());
        }
        let previous = self.artifact_path(start - 1);
        if !previous.exists() {
            return Err(PipelineError::MissingArtifact {
                stage: start,
                path: previous,
            });
        }
        Ok(previous)
    }

    /// Stage records of the run that wrote the artifacts a resumed run starts
    /// from. An absent or unreadable manifest yields none.
    fn previous_stages(&self) -> (Option<Uuid>, Vec<StageRecord>) {
        let start = self.config.start_stage;
        let path = self.manifest_path();
        if start <= 1 || !path.exists() {
            return (None, Vec::new());
        }
        match read_json::<RunManifest>(&path) {
            Ok(previous) => {
                let stages = previous
                    .stages
                    .into_iter()
                    .filter(|stage| stage.index < start)
                    .collect();
                (Some(previous.run_id), stages)
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Ignoring unreadable manifest of the earlier run"
                );
                (None, Vec::new())
            }
        }
    }

    /// Runs stages `start_stage..=4` on `input` (or on the previous artifact
    /// when resuming) and writes the manifest.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid, the input or a
    /// resume artifact is missing or malformed, or an artifact cannot be
    /// written. Per-conversation problems never fail the run.
    pub fn run(&self, input: impl AsRef<Path>) -> Result<RunManifest, PipelineError> {
        self.config.validate()?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let seed = self
            .config
            .seed
            .unwrap_or_else(|| rand::rng().random::<u64>());

        let input_path = self.stage_input(input.as_ref())?;
        let input_sha256 = file_sha256(&input_path)?;
        let mut dataset = load_dataset(&input_path)?;

        tracing::info!(
            run_id = %run_id,
            split = %self.config.split,
            mode = %self.config.mode,
            seed,
            start_stage = self.config.start_stage,
            input = %input_path.display(),
            conversations = dataset.len(),
            "Starting pipeline run"
        );

        let (resumed_from, mut stages) = self.previous_stages();
        let mut stage_input_path = input_path.clone();
        for index in self.config.start_stage..=STAGE_COUNT {
            let record = self.run_stage(index, seed, &mut dataset, &stage_input_path)?;
            stage_input_path = record.output_path.clone();
            stages.push(record);
        }

        let final_metrics = MetricsSnapshot::calculate(&dataset, &self.hierarchy);
        tracing::info!(
            cohesion = final_metrics.cohesion_score,
            entropy = final_metrics.normalized_entropy,
            gini = final_metrics.gini_coefficient,
            cv = final_metrics.coefficient_of_variation,
            health = final_metrics.health_score(),
            conversations = dataset.len(),
            "Final metrics"
        );

        let manifest = RunManifest {
            run_id,
            split: self.config.split.clone(),
            mode: self.config.mode,
            seed,
            start_stage: self.config.start_stage,
            input_path,
            input_sha256,
            resumed_from,
            stages,
            final_metrics,
            started_at,
            finished_at: Utc::now(),
        };

        let manifest_path = self.manifest_path();
        write_json(&manifest_path, &manifest)?;
        tracing::info!(path = %manifest_path.display(), "Wrote run manifest");

        Ok(manifest)
    }

    fn run_stage(
        &self,
        index: u8,
        seed: u64,
        dataset: &mut Vec<Conversation>,
        input_path: &Path,
    ) -> Result<StageRecord, PipelineError> {
        let started_at = Utc::now();
        let ctx = StageContext::new(dataset, &self.hierarchy);
        tracing::info!(
            stage = index,
            conversations = dataset.len(),
            cohesion = ctx.metrics.cohesion_score,
            entropy = ctx.metrics.normalized_entropy,
            gini = ctx.metrics.gini_coefficient,
            cv = ctx.metrics.coefficient_of_variation,
            "Stage input metrics"
        );

        let stage = self.build_stage(index);
        let mut rng = stage_rng(seed, index);
        let report = stage.apply(dataset, &ctx, &mut rng);

        let output_path = self.artifact_path(index);
        save_dataset(&output_path, dataset)?;
        tracing::info!(
            stage = index,
            name = stage.name(),
            path = %output_path.display(),
            "Wrote stage artifact"
        );

        Ok(StageRecord {
            index,
            input_path: input_path.to_path_buf(),
            output_path,
            input_metrics: ctx.metrics,
            report,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// RNG for one stage; independent of which stage the run started from.
pub fn stage_rng(seed: u64, stage: u8) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.wrapping_add(STAGE_SEED_STRIDE.wrapping_mul(u64::from(stage))))
}

fn file_sha256(path: &Path) -> Result<String, DatasetError> {
    let bytes = std::fs::read(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIERARCHY: &str = r#"{
        "first-level": "A, B",
        "second-level": {"A": "A1, A2", "B": "B1, B2"}
    }"#;

    fn runner(dir: &Path) -> PipelineRunner {
        let config = PipelineConfig::new()
            .with_output_dir(dir)
            .with_split("dev")
            .with_seed(42);
        PipelineRunner::new(
            config,
            Hierarchy::from_json_str(HIERARCHY).unwrap(),
            SynonymTable::parse("A1---Alpha One\n"),
        )
    }

    #[test]
    fn test_artifact_paths() {
        let runner = runner(Path::new("/out"));
        assert_eq!(runner.artifact_path(1), PathBuf::from("/out/dev1.json"));
        assert_eq!(runner.artifact_path(3), PathBuf::from("/out/dev3.json"));
        assert_eq!(runner.artifact_path(4), PathBuf::from("/out/dev.json"));
        assert_eq!(runner.manifest_path(), PathBuf::from("/out/dev.manifest.json"));
    }

    #[test]
    fn test_stage_rng_streams_differ() {
        let a: u64 = stage_rng(1, 1).random();
        let b: u64 = stage_rng(1, 2).random();
        let again: u64 = stage_rng(1, 1).random();
        assert_ne!(a, b);
        assert_eq!(a, again);
    }

    #[test]
    fn test_resume_without_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path());
        runner.config.start_stage = 3;
        let err = runner.run(dir.path().join("input.json")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { stage: 3, .. }));
    }

    #[test]
    fn test_resume_ignores_unreadable_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path());
        runner.config.start_stage = 3;
        let dataset = vec![Conversation::new("Pick one: A1, A2, B1, B2?", "A1")];
        save_dataset(runner.artifact_path(2), &dataset).unwrap();
        std::fs::write(runner.manifest_path(), "not a manifest").unwrap();

        let manifest = runner.run(dir.path().join("unused.json")).unwrap();
        assert_eq!(manifest.resumed_from, None);
        let indexes: Vec<u8> = manifest.stages.iter().map(|s| s.index).collect();
        assert_eq!(indexes, [3, 4]);
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(dir.path())
            .run(dir.path().join("absent.json"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Dataset(DatasetError::Read { .. })));
        assert!(!runner(dir.path()).manifest_path().exists());
    }

    #[test]
    fn test_file_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
