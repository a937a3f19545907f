use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use env_logger::{Builder, Env};
use log::{error, info};
use serde::Serialize;

use ev_classifier::model_store::BEST_MODEL_NAME;
use ev_classifier::trainer::CandidateOutcome;
use ev_classifier::{train_from_directories, ClassifyFailure, Config, Error, InferenceService, PipelineContext};

#[derive(Subcommand)]
enum Commands
{
    /// Fit every candidate classifier and persist the best one
    Train
    {
        /// Directory with one subdirectory of images per class
        #[arg(long)]
        train_dir: PathBuf,

        /// Labeled directory used to score and select the candidates
        #[arg(long)]
        eval_dir: PathBuf,
    },

    /// Classify a single image with the best persisted model
    Classify
    {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },

    /// Print a classification report for a persisted model on a labeled directory
    Evaluate
    {
        #[arg(long)]
        test_dir: PathBuf,

        /// Artifact name in the model store
        #[arg(long, default_value = BEST_MODEL_NAME)]
        model: String,
    },
}

#[derive(Parser)]
#[command(name = "ev-classifier")]
#[command(about = "Electric bus / electric car image classifier")]
struct Cli
{
    /// JSON configuration file; defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    command: Commands,
}

/// Response body of `classify`, shaped like the prediction API's JSON.
#[derive(Serialize)]
struct Prediction
{
    prediction: String,
    confidence: f64,
}

fn init_logging(verbosity: &Verbosity<WarnLevel>)
{
    // RUST_LOG wins when set; otherwise -v / -q decide, warnings by default.
    let mut logger = if std::env::var_os("RUST_LOG").is_some() {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(verbosity.log_level_filter());
        b
    };
    logger.format_timestamp(None).init();
}

fn round_confidence(confidence: f32) -> f64
{
    (f64::from(confidence) * 10_000.0).round() / 10_000.0
}

fn build_context(config_path: Option<&Path>) -> Result<PipelineContext, Error>
{
    let config = Config::load_or_default(config_path)?;
    PipelineContext::from_config(config)
}

fn run_train(context: &PipelineContext, train_dir: &Path, eval_dir: &Path) -> Result<(), Error>
{
    let report = train_from_directories(context, train_dir, eval_dir)?;
    for candidate in &report.candidates
    {
        match candidate
        {
            CandidateOutcome::Fitted { name, accuracy, path, elapsed } => {
                println!("{:<16} accuracy {:.4}  ({:.1?})  {}", name, accuracy, elapsed, path.display());
            },
            CandidateOutcome::Failed { name, error } => {
                println!("{:<16} failed: {}", name, error);
            },
        }
    }
    println!("Best model: {} with accuracy {:.4}", report.best_name, report.best_accuracy);
    for load in [&report.train_load, &report.eval_load].into_iter().flatten()
    {
        if load.skipped_count() > 0 {
            println!("Skipped {} unreadable files", load.skipped_count());
        }
    }
    Ok(())
}

/// Reads the image named on the command line. A path that cannot be read is the
/// caller's mistake, so it is reported as a client error like undecodable bytes.
fn read_input_image(path: &Path) -> Result<Vec<u8>, ClassifyFailure>
{
    std::fs::read(path).map_err(|e| ClassifyFailure { client_error: true, error: Error::Io(e) })
}

fn run_classify(context: &PipelineContext, image: &Path) -> Result<(), ClassifyFailure>
{
    let bytes = read_input_image(image)?;
    let service = InferenceService::load(context)?;
    let result = service.classify(&bytes)?;
    let prediction = Prediction { prediction: result.label, confidence: round_confidence(result.confidence) };
    println!("{}", serde_json::to_string(&prediction).map_err(Error::from)?);
    Ok(())
}

fn run_evaluate(context: &PipelineContext, test_dir: &Path, model: &str) -> Result<(), Error>
{
    let service = InferenceService::load_named(context, model)?;
    let evaluation = service.evaluate_directory(test_dir)?;
    println!("Model: {}", service.artifact().algorithm);
    println!("{}", evaluation.report);
    println!("Confusion matrix:");
    print!("{}", evaluation.confusion);
    Ok(())
}

fn main() -> ExitCode
{
    let cli = Cli::parse();
    init_logging(&cli.verbosity);

    let result = build_context(cli.config.as_deref())
        .map_err(ClassifyFailure::from)
        .and_then(|context| match &cli.command
        {
            Commands::Train { train_dir, eval_dir } => run_train(&context, train_dir, eval_dir).map_err(ClassifyFailure::from),
            Commands::Classify { image } => run_classify(&context, image),
            Commands::Evaluate { test_dir, model } => run_evaluate(&context, test_dir, model).map_err(ClassifyFailure::from),
        });

    match result
    {
        Ok(()) => {
            info!("Done");
            ExitCode::SUCCESS
        },
        Err(failure) => {
            error!("{}", failure.error);
            let code = if failure.client_error { 2 } else { 1 };
            match serde_json::to_string(&failure)
            {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("{}", failure.error),
            }
            ExitCode::from(code)
        },
    }
}
