use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::artifact::{ModelCandidateResult, TrainerArtifact, TransformationArtifact};
use crate::config::TrainerPaths;
use crate::error::{PipelineError, StageResult};
use crate::ml::imputer::Preprocessor;
use crate::ml::metrics::{accuracy, classification_metrics};
use crate::ml::models::Classifier;
use crate::ml::predictor::{CompositePredictor, read_json};
use crate::ml::registry::ModelRegistry;
use crate::ml::search::grid_search;
use crate::npy::read_npy;
use crate::settings::{HyperparameterFile, TrainerSettings};
use crate::stages::Stage;
use crate::tracking::ExperimentTracker;

/// Destination for serialized models.
pub trait ArtifactWriter: Send + Sync {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsWriter;

impl ArtifactWriter for FsWriter {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
    }
}

pub struct ModelTrainer<'a> {
    registry: &'a ModelRegistry,
    candidates: HyperparameterFile,
    settings: TrainerSettings,
    paths: TrainerPaths,
    tracker: &'a dyn ExperimentTracker,
    writer: Box<dyn ArtifactWriter>,
}

impl<'a> ModelTrainer<'a> {
    pub fn new(
        registry: &'a ModelRegistry,
        candidates: HyperparameterFile,
        settings: TrainerSettings,
        paths: TrainerPaths,
        tracker: &'a dyn ExperimentTracker,
    ) -> Self {
        Self {
            registry,
            candidates,
            settings,
            paths,
            tracker,
            writer: Box::new(FsWriter),
        }
    }

    pub fn with_writer(mut self, writer: Box<dyn ArtifactWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Grid-search every candidate family and evaluate the refit model on both splits.
    pub fn train_and_evaluate(
        &self,
        x_train: ArrayView2<'_, f64>,
        y_train: ArrayView1<'_, f64>,
        x_test: ArrayView2<'_, f64>,
        y_test: ArrayView1<'_, f64>,
    ) -> Result<Vec<ModelCandidateResult>> {
        if self.candidates.models.is_empty() {
            bail!("No candidate models configured");
        }
        let mut results = Vec::with_capacity(self.candidates.models.len());
        for (name, candidate) in &self.candidates.models {
            let search = grid_search(
                self.registry,
                candidate.model,
                &candidate.params,
                x_train,
                y_train,
                self.settings.cv_folds,
                self.settings.seed,
            )
            .with_context(|| format!("Grid search failed for candidate '{name}'"))?;

            let train_pred = search.model.predict(x_train)?;
            let test_pred = search.model.predict(x_test)?;
            let result = ModelCandidateResult {
                name: name.clone(),
                train_accuracy: accuracy(y_train, train_pred.view()),
                test_accuracy: accuracy(y_test, test_pred.view()),
                train_metrics: classification_metrics(y_train, train_pred.view()),
                test_metrics: classification_metrics(y_test, test_pred.view()),
                model: search.model,
                best_params: search.best_params,
                cv_f1_score: search.cv_f1_score,
            };
            info!(
                candidate = name.as_str(),
                family = candidate.model.as_str(),
                grid_points = search.evaluated,
                best_params = %(serde_json::Value::Object(result.best_params.clone())),
                cv_f1 = result.cv_f1_score,
                train_accuracy = result.train_accuracy,
                test_accuracy = result.test_accuracy,
                "Candidate evaluated"
            );
            results.push(result);
        }
        Ok(results)
    }

    fn record(&self, best: &ModelCandidateResult) {
        let mut metrics = BTreeMap::new();
        metrics.insert("train_accuracy".to_string(), best.train_accuracy);
        metrics.insert("test_accuracy".to_string(), best.test_accuracy);
        metrics.insert("cv_f1_score".to_string(), best.cv_f1_score);
        for (split, m) in [("train", best.train_metrics), ("test", best.test_metrics)] {
            metrics.insert(format!("{split}_f1_score"), m.f1_score);
            metrics.insert(format!("{split}_precision_score"), m.precision_score);
            metrics.insert(format!("{split}_recall_score"), m.recall_score);
        }
        let mut params = best.best_params.clone();
        params.insert("candidate".into(), Value::String(best.name.clone()));
        params.insert(
            "family".into(),
            Value::String(best.model.family().as_str().to_string()),
        );
        if let Err(err) = self.tracker.record_run(&metrics, &params) {
            warn!(error = %format!("{err:#}"), "Experiment tracking failed; continuing");
        }
    }

    fn persist(&self, path: &Path, bytes: &[u8], tag: &'static str) -> StageResult<()> {
        self.writer
            .write(path, bytes)
            .map_err(PipelineError::training(tag))?;
        let persisted = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        if !persisted {
            return Err(PipelineError::Persistence {
                tag,
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), bytes = bytes.len(), "Model persisted");
        Ok(())
    }
}

/// Highest test accuracy, then smallest train/test gap, then candidate name.
pub fn select_best(results: &[ModelCandidateResult]) -> Option<&ModelCandidateResult> {
    results.iter().min_by(|a, b| {
        b.test_accuracy
            .total_cmp(&a.test_accuracy)
            .then(a.accuracy_gap().total_cmp(&b.accuracy_gap()))
            .then_with(|| a.name.cmp(&b.name))
    })
}

fn split_features_target(matrix: &Array2<f64>) -> Result<(ArrayView2<'_, f64>, Array1<f64>)> {
    ensure!(
        matrix.ncols() >= 2,
        "transformed matrix needs at least one feature and the target, found {} column(s)",
        matrix.ncols()
    );
    let (x, y) = matrix.view().split_at(Axis(1), matrix.ncols() - 1);
    Ok((x, y.column(0).to_owned()))
}

fn load_split(path: &Path) -> Result<Array2<f64>> {
    read_npy(path).with_context(|| format!("Failed to load transformed data: {}", path.display()))
}

impl Stage for ModelTrainer<'_> {
    type Input = TransformationArtifact;
    type Output = TrainerArtifact;

    fn name(&self) -> &'static str {
        "model_trainer"
    }

    fn run(&self, transformation: TransformationArtifact) -> StageResult<TrainerArtifact> {
        let train = load_split(&transformation.transformed_train_file_path)
            .map_err(PipelineError::training("ModelTrainer::load_data"))?;
        let test = load_split(&transformation.transformed_test_file_path)
            .map_err(PipelineError::training("ModelTrainer::load_data"))?;
        let (x_train, y_train) = split_features_target(&train)
            .map_err(PipelineError::training("ModelTrainer::load_data"))?;
        let (x_test, y_test) = split_features_target(&test)
            .map_err(PipelineError::training("ModelTrainer::load_data"))?;
        if x_train.ncols() != x_test.ncols() {
            return Err(PipelineError::Training {
                tag: "ModelTrainer::load_data",
                source: anyhow::anyhow!(
                    "train has {} feature(s) but test has {}",
                    x_train.ncols(),
                    x_test.ncols()
                ),
            });
        }

        let results = self
            .train_and_evaluate(x_train, y_train.view(), x_test, y_test.view())
            .map_err(PipelineError::training("ModelTrainer::train_and_evaluate"))?;
        let best = select_best(&results)
            .ok_or_else(|| anyhow::anyhow!("no candidate produced a model"))
            .map_err(PipelineError::training("ModelTrainer::select_best"))?;
        info!(
            model = best.name.as_str(),
            family = best.model.family().as_str(),
            test_accuracy = best.test_accuracy,
            test_f1 = best.test_metrics.f1_score,
            test_precision = best.test_metrics.precision_score,
            test_recall = best.test_metrics.recall_score,
            "Best model selected"
        );
        self.record(best);

        let preprocessor: Preprocessor = read_json(&transformation.transformed_object_file_path)
            .map_err(PipelineError::training("ModelTrainer::load_preprocessor"))?;
        let composite = CompositePredictor::new(preprocessor, best.model.clone())
            .map_err(PipelineError::training("ModelTrainer::bundle"))?;

        let composite_bytes = serde_json::to_vec(&composite)
            .map_err(anyhow::Error::from)
            .map_err(PipelineError::training("ModelTrainer::serialize"))?;
        self.persist(
            &self.paths.trained_model_file,
            &composite_bytes,
            "ModelTrainer::persist_trained_model",
        )?;
        let classifier_bytes = serde_json::to_vec::<Classifier>(&best.model)
            .map_err(anyhow::Error::from)
            .map_err(PipelineError::training("ModelTrainer::serialize"))?;
        self.persist(
            &self.paths.final_model_file,
            &classifier_bytes,
            "ModelTrainer::persist_final_model",
        )?;

        Ok(TrainerArtifact {
            trained_model_file_path: self.paths.trained_model_file.clone(),
            final_model_file_path: self.paths.final_model_file.clone(),
            best_model_name: best.name.clone(),
            best_params: best.best_params.clone(),
            train_accuracy: best.train_accuracy,
            test_accuracy: best.test_accuracy,
            train_metrics: best.train_metrics,
            test_metrics: best.test_metrics,
            candidate_test_accuracy: results
                .iter()
                .map(|r| (r.name.clone(), r.test_accuracy))
                .collect(),
        })
    }
}
