//! End-to-end pipeline runs on a synthetic dataset.

use std::path::{Path, PathBuf};

use nerforge::augment::Mode;
use nerforge::dataset::{load_dataset, save_dataset, Conversation};
use nerforge::pipeline::{PipelineConfig, PipelineRunner, RunManifest, STAGE_COUNT};
use nerforge::PipelineError;

const HIERARCHY: &str = r#"{
    "first-level": "location, person, organization, other",
    "second-level": {
        "location": "city, country, region",
        "person": "athlete, politician, artist",
        "organization": "company, school"
    },
    "third-level": {"city": "capital, port city"}
}"#;

const SYNONYMS: &str = "city---town\nathlete---sportsperson\ncompany---firm\nnot a synonym line\n";

const LABELS: [&str; 14] = [
    "location",
    "person",
    "organization",
    "city",
    "country",
    "region",
    "athlete",
    "politician",
    "artist",
    "company",
    "school",
    "capital",
    "port city",
    "other",
];

fn question(options: &[&str]) -> String {
    format!(
        "Given the sentence, which type is the marked entity? Choose from this list: {}",
        options.join(", ")
    )
}

/// Answers cycle through the labels; each list holds the answer plus four
/// other labels, and every fourth list also offers a catch-all option.
fn synthetic_dataset(len: usize) -> Vec<Conversation> {
    let mut dataset: Vec<Conversation> = (0..len)
        .map(|i| {
            let mut options: Vec<&str> = (0..5).map(|k| LABELS[(i + k * 3) % LABELS.len()]).collect();
            if i % 4 == 0 {
                options.push("miscellaneous");
            }
            Conversation::new(question(&options), LABELS[i % LABELS.len()])
        })
        .collect();
    dataset.push(Conversation::new("no candidate list here", "city"));
    dataset
}

struct Fixture {
    dir: tempfile::TempDir,
    input: PathBuf,
    hierarchy: PathBuf,
    synonyms: PathBuf,
}

impl Fixture {
    fn new(len: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("train.json");
        let hierarchy = dir.path().join("category.json");
        let synonyms = dir.path().join("synonyms.txt");
        save_dataset(&input, &synthetic_dataset(len)).unwrap();
        std::fs::write(&hierarchy, HIERARCHY).unwrap();
        std::fs::write(&synonyms, SYNONYMS).unwrap();
        Self {
            dir,
            input,
            hierarchy,
            synonyms,
        }
    }

    fn config(&self, out: &str) -> PipelineConfig {
        PipelineConfig::new()
            .with_output_dir(self.dir.path().join(out))
            .with_split("train")
            .with_seed(42)
    }

    fn runner(&self, config: PipelineConfig) -> PipelineRunner {
        PipelineRunner::from_paths(config, &self.hierarchy, &self.synonyms).unwrap()
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn test_full_run_writes_artifacts_and_manifest() {
    let fixture = Fixture::new(90);
    let runner = fixture.runner(fixture.config("out"));
    let manifest = runner.run(&fixture.input).unwrap();
    assert_eq!(manifest.resumed_from, None);

    for stage in 1..=STAGE_COUNT {
        assert!(runner.artifact_path(stage).exists(), "missing artifact {stage}");
    }
    assert!(runner.artifact_path(STAGE_COUNT).ends_with("train.json"));
    assert!(runner.manifest_path().exists());

    assert_eq!(manifest.seed, 42);
    assert_eq!(manifest.mode, Mode::Adaptive);
    assert_eq!(manifest.stages.len(), 4);
    assert_eq!(manifest.input_sha256.len(), 64);
    let names: Vec<&str> = manifest.stages.iter().map(|s| s.report.stage.as_str()).collect();
    assert_eq!(names, ["merge", "synonym", "prune", "special"]);

    // Stage outputs chain into the next stage's input.
    assert_eq!(manifest.stages[0].report.input_len, 91);
    for pair in manifest.stages.windows(2) {
        assert_eq!(pair[0].report.output_len, pair[1].report.input_len);
        assert_eq!(pair[0].output_path, pair[1].input_path);
    }
    // Only merge changes the number of conversations.
    assert!(manifest.stages[0].report.output_len <= 91);
    assert_eq!(
        manifest.stages[0].report.output_len,
        manifest.stages[3].report.output_len
    );

    let written: serde_json::Value = serde_json::from_str(&read(&runner.manifest_path())).unwrap();
    assert_eq!(written["seed"], 42);
    assert_eq!(written["stages"].as_array().unwrap().len(), 4);
}

#[test]
fn test_answers_stay_in_candidate_lists() {
    let fixture = Fixture::new(120);
    for (out, mode) in [("adaptive", Mode::Adaptive), ("baseline", Mode::Baseline)] {
        let runner = fixture.runner(fixture.config(out).with_mode(mode));
        runner.run(&fixture.input).unwrap();

        let final_dataset = load_dataset(runner.artifact_path(STAGE_COUNT)).unwrap();
        let mut malformed = 0;
        for conversation in &final_dataset {
            let Ok(options) = conversation.candidates() else {
                malformed += 1;
                assert_eq!(conversation.question(), Some("no candidate list here"));
                continue;
            };
            let answer = conversation.answer().unwrap();
            assert!(
                options.iter().any(|o| o == answer),
                "{mode} answer '{answer}' missing from {options:?}"
            );
        }
        assert_eq!(malformed, 1, "malformed conversation must pass through untouched");
    }
}

#[test]
fn test_same_seed_same_output() {
    let fixture = Fixture::new(75);
    let first = fixture.runner(fixture.config("a"));
    let second = fixture.runner(fixture.config("b"));
    first.run(&fixture.input).unwrap();
    second.run(&fixture.input).unwrap();

    for stage in 1..=STAGE_COUNT {
        assert_eq!(
            read(&first.artifact_path(stage)),
            read(&second.artifact_path(stage)),
            "stage {stage} differs"
        );
    }
}

#[test]
fn test_resume_reproduces_later_stages() {
    let fixture = Fixture::new(75);
    let full = fixture.runner(fixture.config("out"));
    full.run(&fixture.input).unwrap();
    let final_before = read(&full.artifact_path(STAGE_COUNT));
    let third_before = read(&full.artifact_path(3));
    let final_manifest_before = read(&full.manifest_path());

    let resumed = fixture.runner(fixture.config("out").with_start_stage(3));
    let manifest = resumed.run(&fixture.input).unwrap();

    assert_eq!(manifest.start_stage, 3);
    assert_eq!(manifest.input_path, full.artifact_path(2));

    // Records of stages 1 and 2 are carried over from the first run.
    let full_manifest: RunManifest = serde_json::from_str(&final_manifest_before).unwrap();
    assert_eq!(manifest.resumed_from, Some(full_manifest.run_id));
    let indexes: Vec<u8> = manifest.stages.iter().map(|s| s.index).collect();
    assert_eq!(indexes, [1, 2, 3, 4]);
    assert_eq!(
        manifest.stages[1].report.output_len,
        full_manifest.stages[1].report.output_len
    );
    let written: RunManifest = serde_json::from_str(&read(&resumed.manifest_path())).unwrap();
    assert_eq!(written.stages.len(), 4);
    assert_eq!(read(&resumed.artifact_path(3)), third_before);
    assert_eq!(read(&resumed.artifact_path(STAGE_COUNT)), final_before);
}

#[test]
fn test_resume_requires_previous_artifact() {
    let fixture = Fixture::new(10);
    let runner = fixture.runner(fixture.config("fresh").with_start_stage(2));
    let err = runner.run(&fixture.input).unwrap_err();
    assert!(matches!(err, PipelineError::MissingArtifact { stage: 2, .. }));
    assert!(!runner.manifest_path().exists());
}

#[test]
fn test_missing_synonym_file_is_fatal() {
    let fixture = Fixture::new(10);
    let result = PipelineRunner::from_paths(
        fixture.config("out"),
        &fixture.hierarchy,
        fixture.dir.path().join("absent.txt"),
    );
    assert!(matches!(result, Err(PipelineError::Synonym(_))));
}

#[test]
fn test_zero_probabilities_leave_dataset_unchanged() {
    let fixture = Fixture::new(30);
    let yaml = r#"
mode: baseline
merge:
  merge_probability: 0.0
synonym:
  process_probability: 0.0
prune:
  process_probability: 0.0
special:
  process_probability: 0.0
"#;
    let config = PipelineConfig::from_yaml_str(yaml)
        .unwrap()
        .with_output_dir(fixture.dir.path().join("identity"))
        .with_split("train")
        .with_seed(1);
    let runner = fixture.runner(config);
    runner.run(&fixture.input).unwrap();

    let input = load_dataset(&fixture.input).unwrap();
    let output = load_dataset(runner.artifact_path(STAGE_COUNT)).unwrap();
    assert_eq!(input, output);
}
