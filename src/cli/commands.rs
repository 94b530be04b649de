//! CLI command definitions for nerforge.
//!
//! Every command is a thin wrapper over the library: it resolves paths and
//! configuration, runs one operation and prints either a human summary or,
//! with `--json`, a machine-readable one.

use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::augment::Mode;
use crate::categories::Hierarchy;
use crate::dataset::{load_dataset, save_dataset};
use crate::diversity::{MetricsSnapshot, UniformSampler};
use crate::inference::{CategorizerConfig, HierarchicalCategorizer};
use crate::llm::ChatClient;
use crate::ner::{self, OutputFormat};
use crate::pipeline::{PipelineConfig, PipelineRunner};

/// Hierarchy-aware augmentation and evaluation of NER training data.
#[derive(Parser)]
#[command(name = "nerforge")]
#[command(about = "Augment, sample, convert and evaluate hierarchical NER datasets")]
#[command(version)]
#[command(
    long_about = "nerforge turns classification conversations into harder training data by merging, \
    renaming, pruning and relabeling candidate lists along a three-level category hierarchy.\n\n\
    Example usage:\n  nerforge augment train.json --hierarchy category.json --synonyms synonyms.txt --seed 7"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the four augmentation stages on a dataset split.
    #[command(alias = "aug")]
    Augment(AugmentArgs),

    /// Print the diversity metrics of a dataset.
    Metrics(MetricsArgs),

    /// Draw a category-balanced sample of question pairs.
    Sample(SampleArgs),

    /// Convert between NER record files, BIO text and extraction conversations.
    Convert(ConvertArgs),

    /// Score predicted NER records against ground truth.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Extract and categorize entities with an LLM.
    Categorize(CategorizeArgs),
}

/// Arguments for `nerforge augment`.
#[derive(Parser, Debug)]
pub struct AugmentArgs {
    /// Input dataset (JSON array of conversations).
    pub input: PathBuf,

    /// Category hierarchy JSON file.
    #[arg(long, env = "NERFORGE_HIERARCHY")]
    pub hierarchy: PathBuf,

    /// Synonym table (`term---replacement` per line).
    #[arg(long, env = "NERFORGE_SYNONYMS")]
    pub synonyms: PathBuf,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Parameter mode (adaptive or baseline).
    #[arg(long)]
    pub mode: Option<Mode>,

    /// RNG seed; drawn at random and recorded in the manifest if omitted.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for stage artifacts and the run manifest.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Split name used for artifact file names.
    #[arg(long)]
    pub split: Option<String>,

    /// Stage to start from (1-4); later stages resume from saved artifacts.
    #[arg(long)]
    pub start_stage: Option<u8>,

    /// Print the run manifest as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `nerforge metrics`.
#[derive(Parser, Debug)]
pub struct MetricsArgs {
    /// Dataset to measure.
    pub input: PathBuf,

    /// Category hierarchy JSON file.
    #[arg(long, env = "NERFORGE_HIERARCHY")]
    pub hierarchy: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `nerforge sample`.
#[derive(Parser, Debug)]
pub struct SampleArgs {
    /// Dataset of consecutive question pairs.
    pub input: PathBuf,

    /// Output dataset.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Number of pairs to draw in total.
    #[arg(short = 'n', long, default_value = "1000")]
    pub size: usize,

    /// RNG seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `nerforge convert`.
#[derive(Parser, Debug)]
pub struct ConvertArgs {
    #[command(subcommand)]
    pub command: ConvertSubcommand,
}

/// Conversion directions.
#[derive(clap::Subcommand, Debug)]
pub enum ConvertSubcommand {
    /// NER records to BIO text. A directory input converts every `*.json` file in it.
    ToBio(ConvertPathArgs),

    /// BIO text to NER records.
    FromBio(ConvertPathArgs),

    /// NER records to extraction conversations. A directory input converts every `*.json` file in it.
    ToExtraction(ConvertPathArgs),

    /// NER records to per-level classification conversations. A directory input converts every `*.json` file in it.
    ToClassification(ClassificationArgs),
}

/// Input and output of a conversion.
#[derive(Parser, Debug)]
pub struct ConvertPathArgs {
    /// Input file or directory.
    pub input: PathBuf,

    /// Output file, or directory when the input is a directory.
    pub output: PathBuf,
}

/// Arguments for `nerforge convert to-classification`.
#[derive(Parser, Debug)]
pub struct ClassificationArgs {
    #[command(flatten)]
    pub paths: ConvertPathArgs,

    /// Category hierarchy JSON file.
    #[arg(long, env = "NERFORGE_HIERARCHY")]
    pub hierarchy: PathBuf,
}

/// Arguments for `nerforge evaluate`.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Ground-truth NER records.
    pub gold: PathBuf,

    /// Predicted NER records.
    pub predicted: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `nerforge categorize`.
#[derive(Parser, Debug)]
pub struct CategorizeArgs {
    /// NER records whose sentences are categorized (entities are ignored).
    pub input: PathBuf,

    /// Output NER records.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Category hierarchy JSON file.
    #[arg(long, env = "NERFORGE_HIERARCHY")]
    pub hierarchy: PathBuf,

    /// Model that marks entities (defaults to NERFORGE_LLM_MODEL).
    #[arg(long, default_value = "")]
    pub extraction_model: String,

    /// Model that picks categories (defaults to NERFORGE_LLM_MODEL).
    #[arg(long, default_value = "")]
    pub categorization_model: String,

    /// Extraction samples per sentence.
    #[arg(long, default_value = "3")]
    pub repeat: usize,

    /// Stop after this many sentences.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Augment(args) => run_augment_command(args).await,
        Commands::Metrics(args) => run_metrics_command(args).await,
        Commands::Sample(args) => run_sample_command(args).await,
        Commands::Convert(args) => run_convert_command(args).await,
        Commands::Evaluate(args) => run_evaluate_command(args).await,
        Commands::Categorize(args) => run_categorize_command(args).await,
    }
}

/// Layers CLI flags over the file and environment configuration.
fn augment_config(args: &AugmentArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        config = config.with_mode(mode);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(ref dir) = args.output_dir {
        config = config.with_output_dir(dir);
    }
    if let Some(ref split) = args.split {
        config = config.with_split(split);
    }
    if let Some(stage) = args.start_stage {
        config = config.with_start_stage(stage);
    }
    config.validate()?;
    Ok(config)
}

async fn run_augment_command(args: AugmentArgs) -> anyhow::Result<()> {
    let config = augment_config(&args)?;
    info!(
        mode = %config.mode,
        split = %config.split,
        output_dir = %config.output_dir.display(),
        "Starting augmentation"
    );

    let runner = PipelineRunner::from_paths(config, &args.hierarchy, &args.synonyms)?;
    let manifest = runner.run(&args.input)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
    } else {
        println!("{}", manifest.summary());
        println!("Manifest: {}", runner.manifest_path().display());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct MetricsOutput {
    conversations: usize,
    #[serde(flatten)]
    metrics: MetricsSnapshot,
    health_score: f64,
}

async fn run_metrics_command(args: MetricsArgs) -> anyhow::Result<()> {
    let hierarchy = Hierarchy::load(&args.hierarchy)?;
    let dataset = load_dataset(&args.input)?;
    let metrics = MetricsSnapshot::calculate(&dataset, &hierarchy);

    if args.json {
        let output = MetricsOutput {
            conversations: dataset.len(),
            metrics,
            health_score: metrics.health_score(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Conversations: {}", dataset.len());
        println!("{}", metrics.summary());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SampleOutput {
    output: PathBuf,
    total_pairs: usize,
    categories: usize,
    per_category: usize,
    conversations: usize,
}

async fn run_sample_command(args: SampleArgs) -> anyhow::Result<()> {
    let dataset = load_dataset(&args.input)?;
    let mut sampler = UniformSampler::new();
    if let Some(seed) = args.seed {
        sampler = sampler.with_seed(seed);
    }
    let result = sampler.sample(&dataset, args.size);
    save_dataset(&args.output, &result.conversations)?;

    let output = SampleOutput {
        output: args.output,
        total_pairs: result.total_pairs,
        categories: result.categories,
        per_category: result.per_category,
        conversations: result.conversations.len(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Sampled {} pairs per category from {} categories ({} of {} pairs) -> {}",
            output.per_category,
            output.categories,
            output.conversations / 2,
            output.total_pairs,
            output.output.display()
        );
    }
    Ok(())
}

/// Converts a file, or every record file of a directory.
fn convert_records(input: &Path, output: &Path, format: OutputFormat) -> anyhow::Result<usize> {
    if input.is_dir() {
        Ok(ner::convert_directory(input, output, format)?.len())
    } else {
        ner::batch::convert_file(input, output, format)?;
        Ok(1)
    }
}

async fn run_convert_command(args: ConvertArgs) -> anyhow::Result<()> {
    match args.command {
        ConvertSubcommand::ToBio(paths) => {
            let files = convert_records(&paths.input, &paths.output, OutputFormat::Bio)?;
            println!("Converted {} file(s) to BIO -> {}", files, paths.output.display());
        }
        ConvertSubcommand::ToExtraction(paths) => {
            let files = convert_records(&paths.input, &paths.output, OutputFormat::Extraction)?;
            println!(
                "Converted {} file(s) to extraction conversations -> {}",
                files,
                paths.output.display()
            );
        }
        ConvertSubcommand::ToClassification(args) => {
            let hierarchy = Hierarchy::load(&args.hierarchy)?;
            let paths = args.paths;
            if paths.input.is_dir() {
                let written =
                    ner::convert_classification_directory(&paths.input, &paths.output, &hierarchy)?;
                println!(
                    "Converted {} file(s) to classification conversations -> {}",
                    written.len(),
                    paths.output.display()
                );
            } else {
                let summary =
                    ner::convert_classification_file(&paths.input, &paths.output, &hierarchy)?;
                println!(
                    "Converted {} entities to {} classification conversations ({} miscellaneous) -> {}",
                    summary.entities,
                    summary.conversations,
                    summary.fallbacks,
                    paths.output.display()
                );
            }
        }
        ConvertSubcommand::FromBio(paths) => {
            let records = ner::read_bio(&paths.input)?;
            ner::save_records(&paths.output, &records)?;
            println!(
                "Converted {} sentence(s) to NER records -> {}",
                records.len(),
                paths.output.display()
            );
        }
    }
    Ok(())
}

async fn run_evaluate_command(args: EvaluateArgs) -> anyhow::Result<()> {
    let report = ner::evaluate_files(&args.gold, &args.predicted)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

async fn run_categorize_command(args: CategorizeArgs) -> anyhow::Result<()> {
    let hierarchy = Hierarchy::load(&args.hierarchy)?;
    let records = ner::load_records(&args.input)?;
    let client = ChatClient::from_env()?;
    info!(
        api_base = client.api_base(),
        default_model = client.default_model(),
        sentences = records.len(),
        "Starting categorization"
    );

    let config = CategorizerConfig {
        extraction_model: args.extraction_model,
        categorization_model: args.categorization_model,
        repeat: args.repeat,
        limit: args.limit,
        temperature: args.temperature,
        ..Default::default()
    };
    let categorizer = HierarchicalCategorizer::new(&client, &hierarchy, config);
    let (output, report) = categorizer.categorize_records(&records).await;
    ner::save_records(&args.output, &output)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Categorized {} of {} sentences ({} without entities, {} unresolved, {} failed) -> {}",
            report.categorized,
            report.processed,
            report.no_entities,
            report.unresolved,
            report.failed,
            args.output.display()
        );
    }
    Ok(())
}
