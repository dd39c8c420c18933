use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueHint};
use phishnet::config::RunConfig;
use phishnet::ml::registry::ModelRegistry;
use phishnet::observability::{log_snapshot, write_snapshot};
use phishnet::prediction::{BatchPredictor, expand_inputs, read_inputs};
use phishnet::preflight::preflight;
use phishnet::presets::init;
use phishnet::settings::{PipelineSettings, StoreSettings};
use phishnet::store::{connect, push_csv};
use phishnet::{PipelineError, TrainingPipeline};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing(cli.otlp_endpoint.as_deref())?;

    let result = match cli.command {
        Commands::Train(args) => train(args),
        Commands::Predict(args) => predict(args),
        Commands::PushData(args) => push_data(args),
        Commands::Check { settings } => check(&settings),
        Commands::Init { directory, force } => init_command(&directory, force),
        Commands::ListModels => {
            list_models();
            Ok(())
        }
    };

    #[cfg(feature = "otel")]
    if cli.otlp_endpoint.is_some() {
        phishnet::observability::otel::shutdown();
    }

    result
}

fn configure_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = otlp_endpoint {
            let tracer = phishnet::observability::otel::tracer("phishnet", endpoint)?;
            return tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|err| anyhow!(err.to_string()));
        }
    }

    #[cfg(not(feature = "otel"))]
    if let Some(endpoint) = otlp_endpoint {
        eprintln!(
            "warning: --otlp-endpoint '{endpoint}' requested but OpenTelemetry support is not enabled. Rebuild with --features otel."
        );
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))
}

fn load_settings(path: &Path) -> Result<PipelineSettings> {
    PipelineSettings::load(path)
        .with_context(|| format!("Run `phishnet init` to create a default {}", path.display()))
}

fn train(args: TrainArgs) -> Result<()> {
    let settings = load_settings(&args.settings)?;
    let store_settings = args.store.resolve();
    let store = connect(&store_settings)
        .map_err(PipelineError::ingestion("DocumentStore::connect"))?;
    let run = match args.timestamp {
        Some(timestamp) => RunConfig::new(
            &settings.artifact_dir,
            settings.final_model_dir.clone(),
            timestamp,
        ),
        None => RunConfig::now(&settings.artifact_dir, settings.final_model_dir.clone()),
    };

    let pipeline = TrainingPipeline::new(settings, run, store.as_ref(), store_settings.database)
        .skip_publish(args.skip_publish);
    let outcome = pipeline.run();

    if args.print_metrics || args.metrics_json.is_some() {
        let snapshot = pipeline.metrics().snapshot();
        if args.print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = &args.metrics_json {
            write_snapshot(&snapshot, path)?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
    }

    match outcome {
        Ok(outcome) => {
            info!(
                timestamp = outcome.timestamp.as_str(),
                model = outcome.trainer.best_model_name.as_str(),
                test_accuracy = outcome.trainer.test_accuracy,
                test_f1 = outcome.trainer.test_metrics.f1_score,
                manifest = %outcome.manifest_file.display(),
                "Training run finished"
            );
            Ok(())
        }
        Err(err) => {
            error!(stage = err.kind(), tag = err.tag(), "{err}");
            Err(err.into())
        }
    }
}

fn predict(args: PredictArgs) -> Result<()> {
    let settings = load_settings(&args.settings)?;
    let store_settings = args.store.resolve();
    let store = connect(&store_settings)?;

    let inputs = expand_inputs(&args.inputs)?;
    let table = read_inputs(&inputs)?;
    info!(files = inputs.len(), rows = table.n_rows(), "Prediction inputs loaded");

    let predictor = BatchPredictor::load(&settings.final_model_dir, settings.target_column)?;
    let outcome = predictor.run(
        &table,
        &args.output_dir,
        store.as_ref(),
        &store_settings.database,
        Local::now(),
    )?;
    info!(
        rows = outcome.rows,
        output = %outcome.output_file.display(),
        collection = outcome.collection.as_str(),
        inserted = outcome.inserted,
        "Prediction finished"
    );
    Ok(())
}

fn push_data(args: PushDataArgs) -> Result<()> {
    let settings = load_settings(&args.settings)?;
    let store_settings = args.store.resolve();
    let store = connect(&store_settings)?;
    let collection = args
        .collection
        .unwrap_or_else(|| settings.ingestion.collection.clone());
    let inserted = push_csv(store.as_ref(), &store_settings.database, &collection, &args.file)?;
    info!(
        file = %args.file.display(),
        database = store_settings.database.as_str(),
        collection = collection.as_str(),
        inserted,
        "Records pushed"
    );
    Ok(())
}

fn check(settings_path: &Path) -> Result<()> {
    let settings = load_settings(settings_path)?;
    let report = preflight(&settings, &ModelRegistry::with_defaults());

    for warning in &report.warnings {
        warn!(file = %settings_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %settings_path.display(), "Preflight passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %settings_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Preflight failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn init_command(directory: &Path, force: bool) -> Result<()> {
    let output = init(directory, force)?;
    for path in [&output.settings, &output.schema, &output.model_params] {
        info!(path = %path.display(), "Wrote");
    }
    println!("{}", output.settings.display());
    Ok(())
}

fn list_models() {
    let registry = ModelRegistry::with_defaults();
    println!("Available model families:");
    for family in registry.known_families() {
        println!("- {family}: {}", family.parameter_names().join(", "));
    }
}

#[derive(Parser)]
#[command(
    name = "phishnet",
    version,
    about = "Phishing-URL classifier training pipeline"
)]
struct Cli {
    /// Export spans to this OTLP collector (requires the `otel` feature).
    #[arg(long = "otlp-endpoint", global = true)]
    otlp_endpoint: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest, validate, transform, train and publish.
    Train(TrainArgs),
    /// Score CSV files with the production model.
    Predict(PredictArgs),
    /// Load a CSV into the source collection.
    PushData(PushDataArgs),
    /// Check settings, schema and hyperparameter files without training.
    Check {
        #[arg(long, default_value = "pipeline.yaml", value_hint = ValueHint::FilePath)]
        settings: PathBuf,
    },
    /// Write default pipeline.yaml, schema.yaml and model_params.yaml.
    Init {
        #[arg(long, default_value = ".", value_hint = ValueHint::DirPath)]
        directory: PathBuf,
        #[arg(long)]
        force: bool,
    },
    ListModels,
}

#[derive(Args)]
struct StoreArgs {
    #[arg(long = "store-uri", env = "ATLAS_MONGODB_URI")]
    store_uri: String,
    #[arg(long, env = "ATLAS_MONGODB_NAME")]
    database: String,
}

impl StoreArgs {
    fn resolve(self) -> StoreSettings {
        StoreSettings {
            uri: self.store_uri,
            database: self.database,
        }
    }
}

#[derive(Args)]
struct TrainArgs {
    #[arg(long, default_value = "pipeline.yaml", value_hint = ValueHint::FilePath)]
    settings: PathBuf,
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long)]
    skip_publish: bool,
    /// Run directory name; defaults to the current local time.
    #[arg(long)]
    timestamp: Option<String>,
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
}

#[derive(Args)]
struct PredictArgs {
    #[arg(long, default_value = "pipeline.yaml", value_hint = ValueHint::FilePath)]
    settings: PathBuf,
    #[command(flatten)]
    store: StoreArgs,
    /// CSV files or glob patterns.
    #[arg(long = "input", required = true)]
    inputs: Vec<String>,
    #[arg(long, default_value = "prediction_output", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,
}

#[derive(Args)]
struct PushDataArgs {
    #[arg(long, default_value = "pipeline.yaml", value_hint = ValueHint::FilePath)]
    settings: PathBuf,
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long, value_hint = ValueHint::FilePath)]
    file: PathBuf,
    /// Defaults to `ingestion.collection` from the settings.
    #[arg(long)]
    collection: Option<String>,
}
