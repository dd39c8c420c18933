use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::artifact::{
    IngestionArtifact, PublishArtifact, TrainerArtifact, TransformationArtifact,
    ValidationArtifact,
};
use crate::config::RunConfig;
use crate::error::{PipelineError, StageResult};
use crate::manifest::RunManifest;
use crate::ml::registry::ModelRegistry;
use crate::observability::MetricsCollector;
use crate::settings::PipelineSettings;
use crate::stages::{
    DataIngestion, DataTransformation, DataValidation, ModelPublisher, ModelTrainer, Stage,
};
use crate::store::DocumentStore;
use crate::tracking::{ExperimentTracker, tracker_from_settings};

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub timestamp: String,
    pub artifact_root: PathBuf,
    pub ingestion: IngestionArtifact,
    pub validation: ValidationArtifact,
    pub transformation: TransformationArtifact,
    pub trainer: TrainerArtifact,
    pub manifest_file: PathBuf,
    pub publish: Option<PublishArtifact>,
}

/// Runs ingest, validate, transform, train and publish in order.
///
/// The first failing stage aborts the run; files already written stay on disk.
pub struct TrainingPipeline<'a> {
    settings: PipelineSettings,
    run: RunConfig,
    store: &'a dyn DocumentStore,
    database: String,
    registry: ModelRegistry,
    tracker: Box<dyn ExperimentTracker>,
    metrics: MetricsCollector,
    publish: bool,
}

impl<'a> TrainingPipeline<'a> {
    pub fn new(
        settings: PipelineSettings,
        run: RunConfig,
        store: &'a dyn DocumentStore,
        database: impl Into<String>,
    ) -> Self {
        let tracker = tracker_from_settings(&settings.trainer.tracking);
        Self {
            settings,
            run,
            store,
            database: database.into(),
            registry: ModelRegistry::with_defaults(),
            tracker,
            metrics: MetricsCollector::new(),
            publish: true,
        }
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_tracker(mut self, tracker: Box<dyn ExperimentTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Leave the remote target untouched even when one is configured.
    pub fn skip_publish(mut self, skip: bool) -> Self {
        self.publish = !skip;
        self
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    fn run_stage<S: Stage>(&self, stage: &S, input: S::Input) -> StageResult<S::Output> {
        let span = tracing::span!(tracing::Level::INFO, "stage", stage = stage.name());
        let _span_guard = span.enter();
        let _timer = self.metrics.start_stage(stage.name());
        info!("Stage started");
        let output = stage.run(input)?;
        info!("Stage completed");
        Ok(output)
    }

    #[instrument(
        skip(self),
        fields(pipeline = %self.settings.pipeline_name, timestamp = %self.run.timestamp)
    )]
    pub fn run(&self) -> StageResult<PipelineOutcome> {
        let started = Instant::now();
        let outcome = self.execute();
        self.metrics.record_total_duration(started.elapsed());
        outcome
    }

    fn execute(&self) -> StageResult<PipelineOutcome> {
        let schema = self
            .settings
            .load_schema()
            .map_err(PipelineError::config("TrainingPipeline::load_schema"))?;
        let candidates = self
            .settings
            .load_hyperparameters()
            .map_err(PipelineError::config("TrainingPipeline::load_hyperparameters"))?;
        let combinations = self
            .registry
            .validate(&candidates)
            .map_err(PipelineError::config("TrainingPipeline::validate_candidates"))?;
        info!(
            candidates = candidates.models.len(),
            combinations,
            artifact_root = %self.run.artifact_root.display(),
            "Training pipeline started"
        );

        let ingestion_stage = DataIngestion::new(
            self.store,
            self.database.clone(),
            self.settings.ingestion.clone(),
            self.run.ingestion(&self.settings.ingestion.source_file_name),
        );
        let ingestion = self.run_stage(&ingestion_stage, ())?;

        let validation_stage = DataValidation::new(
            schema,
            self.settings.validation.clone(),
            self.run.validation(),
        );
        let validation = self.run_stage(&validation_stage, ingestion.clone())?;
        self.metrics.record_validation(validation.status);
        if !validation.status {
            if self.settings.validation.enforce_validation {
                return Err(PipelineError::ValidationRejected {
                    tag: "TrainingPipeline::enforce_validation",
                    report: validation.drift_report_file_path.clone(),
                });
            }
            warn!(
                report = %validation.drift_report_file_path.display(),
                "Validation failed; continuing because enforcement is disabled"
            );
        }

        let transformation_stage = DataTransformation::new(
            self.settings.target_column.clone(),
            self.settings.transformation.imputer.clone(),
            self.run.transformation(),
        );
        let transformation = self.run_stage(&transformation_stage, validation.clone())?;

        let trainer_stage = ModelTrainer::new(
            &self.registry,
            candidates,
            self.settings.trainer.clone(),
            self.run.trainer(),
            self.tracker.as_ref(),
        );
        let trainer = self.run_stage(&trainer_stage, transformation.clone())?;

        let manifest_file = self.run.manifest_file();
        RunManifest::build(&self.run, &self.settings, &trainer)
            .and_then(|manifest| manifest.write(&manifest_file))
            .map_err(PipelineError::training("TrainingPipeline::write_manifest"))?;

        let publish = match (&self.settings.publisher, self.publish) {
            (Some(publisher), true) => {
                let stage = ModelPublisher::new(self.run.publisher(&publisher.target))
                    .map_err(PipelineError::publish("ModelPublisher::connect"))?;
                Some(self.run_stage(&stage, ())?)
            }
            (Some(_), false) => {
                info!("Publishing skipped on request");
                None
            }
            (None, _) => None,
        };

        info!(
            model = trainer.best_model_name.as_str(),
            test_accuracy = trainer.test_accuracy,
            manifest = %manifest_file.display(),
            "Training pipeline completed"
        );

        Ok(PipelineOutcome {
            timestamp: self.run.timestamp.clone(),
            artifact_root: self.run.artifact_root.clone(),
            ingestion,
            validation,
            transformation,
            trainer,
            manifest_file,
            publish,
        })
    }
}
