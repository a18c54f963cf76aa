//! Debias CLI binary.
//!
//! Fits bias models on calibration questions and corrects simulated survey
//! responses with them.

mod integration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use debias::embed::{
    CachedProvider, EmbeddingProvider, OpenAiEmbeddings, RetryConfig, RetryingProvider, StaticProvider,
};
use debias::model::{
    CalibrationSet, EstimatorConfig, EvaluationReport, FactorConfig, SelectorConfig, SourceWeighting,
    TransferConfig, evaluate,
};
use debias::output::{ExportFormat, Exporter};
use debias::{
    DEFAULT_EMBEDDING_MODEL, DebiasService, PipelineConfig, fit_factor_model, fit_transfer_model,
    transfer_report,
};
use indicatif::{ProgressBar, ProgressStyle};
use integration::cache_manager::{cache_summary, open_cache};
use integration::io::{load_calibration, load_model, load_requests, save_model};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "debias")]
#[command(about = "Debias: correct simulated survey responses toward human answers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a bias model on calibration questions
    Fit {
        /// Calibration file (the historical source for the transfer path)
        calibration: PathBuf,

        /// Fitting path
        #[arg(long, value_enum, default_value_t = FitMethod::Factor)]
        method: FitMethod,

        /// New-domain calibration file (transfer path)
        #[arg(long)]
        new_domain: Option<PathBuf>,

        /// Where to write the fitted model
        #[arg(short, long, default_value = "model.json")]
        output: PathBuf,

        /// Also write the fit report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        hyper: Hyperparameters,
    },

    /// Debias raw responses to new questions
    Debias {
        /// Fitted model file
        #[arg(long)]
        model: PathBuf,

        /// Request file with `Question` and `llm_resp` fields
        input: PathBuf,

        /// Output file; printed to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (csv, json or pretty-json); guessed from the output extension
        #[arg(long)]
        format: Option<String>,

        #[command(flatten)]
        embedding: EmbeddingArgs,
    },

    /// Fit on a seeded training split and report train/validation MSE
    Evaluate {
        /// Calibration file (the historical source for the transfer path)
        calibration: PathBuf,

        /// Fitting path
        #[arg(long, value_enum, default_value_t = FitMethod::Factor)]
        method: FitMethod,

        /// New-domain calibration file, split for the transfer path
        #[arg(long)]
        new_domain: Option<PathBuf>,

        /// Fraction of items used for training
        #[arg(long, default_value_t = 0.8)]
        train_fraction: f64,

        /// Shuffle seed for the split
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Write per-question validation rows to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        hyper: Hyperparameters,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FitMethod {
    /// Factor analysis plus penalized gradient descent
    Factor,
    /// Weighted ridge over two calibration sources
    Transfer,
}

#[derive(Debug, Args)]
struct Hyperparameters {
    /// Cumulative explained-variance threshold for choosing the factor count
    #[arg(long, default_value_t = 0.90)]
    variance_threshold: f64,

    /// Weight of the sign-mismatch penalty
    #[arg(long, default_value_t = 15.0)]
    penalty_weight: f64,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Gradient epochs
    #[arg(long, default_value_t = 500)]
    epochs: usize,

    /// Seed for the factor analysis initialization
    #[arg(long)]
    factor_seed: Option<u64>,

    /// Weight of the historical source (transfer path)
    #[arg(long, default_value_t = 0.5)]
    source_weight: f64,

    /// Ridge strength (transfer path)
    #[arg(long, default_value_t = 1.0)]
    ridge_strength: f64,

    /// Apply the source weight only as a sample weight, not to the targets
    #[arg(long)]
    sample_weight_only: bool,
}

impl Hyperparameters {
    fn pipeline_config(&self) -> PipelineConfig {
        let weighting = if self.sample_weight_only {
            SourceWeighting::SampleOnly
        } else {
            SourceWeighting::TargetAndSample
        };
        PipelineConfig {
            selector: SelectorConfig {
                variance_threshold: self.variance_threshold,
            },
            factor: FactorConfig {
                seed: self.factor_seed,
                ..FactorConfig::default()
            },
            estimator: EstimatorConfig {
                penalty_weight: self.penalty_weight,
                learning_rate: self.learning_rate,
                epoch_count: self.epochs,
                ..EstimatorConfig::default()
            },
            transfer: TransferConfig {
                source_weight: self.source_weight,
                ridge_strength: self.ridge_strength,
                weighting,
            },
            ..PipelineConfig::default()
        }
    }
}

#[derive(Debug, Args)]
struct EmbeddingArgs {
    /// Embedding model identifier
    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Concurrent embedding requests
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Retries per embedding request on transient failures
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Disable the embedding cache
    #[arg(long)]
    no_cache: bool,

    /// Embedding cache database (defaults to the platform cache directory)
    #[arg(long)]
    cache_path: Option<PathBuf>,
}

impl EmbeddingArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            retry: RetryConfig {
                max_retries: self.max_retries,
                ..RetryConfig::default()
            },
            embedding_model: self.embedding_model.clone(),
            embedding_concurrency: self.concurrency,
            ..PipelineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fit {
            calibration,
            method,
            new_domain,
            output,
            report,
            hyper,
        } => {
            fit(&calibration, method, new_domain.as_deref(), &output, report.as_deref(), &hyper)?;
        }
        Commands::Debias {
            model,
            input,
            output,
            format,
            embedding,
        } => {
            debias_requests(&model, &input, output.as_deref(), format.as_deref(), &embedding).await?;
        }
        Commands::Evaluate {
            calibration,
            method,
            new_domain,
            train_fraction,
            seed,
            output,
            hyper,
        } => {
            run_evaluation(
                &calibration,
                method,
                new_domain.as_deref(),
                train_fraction,
                seed,
                output.as_deref(),
                &hyper,
            )?;
        }
    }

    Ok(())
}

fn spinner(message: &'static str) -> Result<ProgressBar, Box<dyn Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message);
    Ok(pb)
}

fn require_new_domain(new_domain: Option<&Path>) -> Result<&Path, Box<dyn Error>> {
    new_domain.ok_or_else(|| "--new-domain is required for the transfer method".into())
}

fn fit(
    calibration: &Path,
    method: FitMethod,
    new_domain: Option<&Path>,
    output: &Path,
    report_path: Option<&Path>,
    hyper: &Hyperparameters,
) -> Result<(), Box<dyn Error>> {
    let config = hyper.pipeline_config();
    config.validate()?;

    let set = load_calibration(calibration)?;
    println!(
        "Loaded {} calibration questions (dimension {})",
        set.len(),
        set.dimension()
    );

    let pb = spinner("Fitting bias model...")?;
    let fitted = match method {
        FitMethod::Factor => fit_factor_model(&set, &config).map(|fit| {
            let report = fit.report(&set, &config);
            (fit.model, report)
        }),
        FitMethod::Transfer => {
            let new_set = load_calibration(require_new_domain(new_domain)?)?;
            fit_transfer_model(&set, &new_set, &config).map(|model| {
                let report = transfer_report(&model, &set, &new_set, &config);
                (model, report)
            })
        }
    };
    let (model, report) = match fitted {
        Ok(fitted) => {
            pb.finish_with_message("Fitted");
            fitted
        }
        Err(e) => {
            pb.finish_with_message("Failed!");
            return Err(e.into());
        }
    };
    let report = report?;

    save_model(&model, output)?;
    println!("\n{}", report.to_text());
    println!("Model written to {}", output.display());

    if let Some(path) = report_path {
        std::fs::write(path, report.to_json()?)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

async fn debias_requests(
    model_path: &Path,
    input: &Path,
    output: Option<&Path>,
    format: Option<&str>,
    embedding: &EmbeddingArgs,
) -> Result<(), Box<dyn Error>> {
    let config = embedding.pipeline_config();
    config.validate()?;

    let model = load_model(model_path)?;
    let requests = load_requests(input)?;
    let needs_embedding = requests.iter().filter(|r| r.embedding.is_none()).count();

    let provider: Arc<dyn EmbeddingProvider> = if needs_embedding == 0 {
        Arc::new(StaticProvider::new())
    } else {
        let client = RetryingProvider::with_config(OpenAiEmbeddings::from_env()?, config.retry);
        if embedding.no_cache {
            Arc::new(client)
        } else {
            let cache = open_cache(embedding.cache_path.as_deref())?;
            tracing::info!("{}", cache_summary(&cache, embedding.cache_path.as_deref()));
            Arc::new(CachedProvider::new(client, Arc::new(cache)))
        }
    };

    let service = DebiasService::with_model(provider, config, model)?;

    let pb = spinner("Embedding and debiasing questions...")?;
    let results = match service.debias(&requests).await {
        Ok(results) => {
            pb.finish_with_message(format!(
                "Debiased {} questions ({} embedded)",
                results.len(),
                needs_embedding
            ));
            results
        }
        Err(e) => {
            pb.finish_with_message("Failed!");
            return Err(e.into());
        }
    };

    let format = match (format, output) {
        (Some(name), _) => name.parse::<ExportFormat>()?,
        (None, Some(path)) => ExportFormat::from_path(path).unwrap_or_default(),
        (None, None) => ExportFormat::default(),
    };

    match output {
        Some(path) => {
            let path = with_format_extension(path, format);
            results.export_to_file(&path, format)?;
            eprintln!("Results written to {}", path.display());
        }
        None => println!("{}", results.export_to_string(format)?),
    }
    Ok(())
}

/// Give an extensionless output path the format's extension.
fn with_format_extension(path: &Path, format: ExportFormat) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(format.extension())
    }
}

fn train_size(n: usize, fraction: f64) -> Result<usize, Box<dyn Error>> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(format!("train fraction must be in (0, 1), got {fraction}").into());
    }
    let size = (n as f64 * fraction).round() as usize;
    Ok(size.clamp(1, n.saturating_sub(1).max(1)))
}

fn run_evaluation(
    calibration: &Path,
    method: FitMethod,
    new_domain: Option<&Path>,
    train_fraction: f64,
    seed: u64,
    output: Option<&Path>,
    hyper: &Hyperparameters,
) -> Result<(), Box<dyn Error>> {
    let config = hyper.pipeline_config();
    config.validate()?;

    let set = load_calibration(calibration)?;
    let (model, train, valid) = match method {
        FitMethod::Factor => {
            let (train, valid) = set.split(train_size(set.len(), train_fraction)?, seed)?;
            let fit = fit_factor_model(&train, &config)?;
            (fit.model, train, valid)
        }
        FitMethod::Transfer => {
            let new_set = load_calibration(require_new_domain(new_domain)?)?;
            let (train, valid) = new_set.split(train_size(new_set.len(), train_fraction)?, seed)?;
            let model = fit_transfer_model(&set, &train, &config)?;
            (model, train, valid)
        }
    };

    let train_report = evaluate(&model, &train)?;
    let valid_report = evaluate(&model, &valid)?;

    println!("\nEvaluation ({} model, seed {seed})", model.kind());
    print_split("train", &train, &train_report);
    print_split("valid", &valid, &valid_report);

    if let Some(path) = output {
        let format = ExportFormat::from_path(path).unwrap_or_default();
        valid_report.export_to_file(path, format)?;
        println!("Validation rows written to {}", path.display());
    }
    Ok(())
}

fn print_split(name: &str, set: &CalibrationSet, report: &EvaluationReport) {
    let improvement = report
        .improvement()
        .map_or_else(|| "n/a".to_string(), |r| format!("{:+.1}%", r * 100.0));
    println!(
        "  {name:<5} n={:<4} raw MSE {:.6}  debiased MSE {:.6}  improvement {improvement}",
        set.len(),
        report.raw_mse,
        report.debiased_mse
    );
}
