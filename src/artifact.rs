//! Values handed from one stage to the next.
//!
//! Artifacts are created once by the producing stage and never mutated; the data
//! they describe lives on disk.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ml::models::Classifier;
use crate::ml::registry::ModelParameters;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionArtifact {
    pub feature_store_file_path: PathBuf,
    pub train_file_path: PathBuf,
    pub test_file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationArtifact {
    /// Schema conformance AND no drift.
    pub status: bool,
    pub valid_train_file_path: PathBuf,
    pub valid_test_file_path: PathBuf,
    pub invalid_train_file_path: PathBuf,
    pub invalid_test_file_path: PathBuf,
    pub drift_report_file_path: PathBuf,
}

/// Two-sample test outcome for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub feature: String,
    pub ks_statistic: f64,
    pub p_value: f64,
    pub drift_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// `true` when no column drifted.
    pub status: bool,
    pub drift_detected: bool,
    pub threshold: f64,
    pub report: Vec<ColumnDrift>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformationArtifact {
    pub transformed_object_file_path: PathBuf,
    pub transformed_train_file_path: PathBuf,
    pub transformed_test_file_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub f1_score: f64,
    pub precision_score: f64,
    pub recall_score: f64,
}

/// Outcome of the search for one candidate family.
#[derive(Debug, Clone)]
pub struct ModelCandidateResult {
    pub name: String,
    pub model: Classifier,
    pub best_params: ModelParameters,
    pub cv_f1_score: f64,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub train_metrics: ClassificationMetrics,
    pub test_metrics: ClassificationMetrics,
}

impl ModelCandidateResult {
    pub fn accuracy_gap(&self) -> f64 {
        (self.train_accuracy - self.test_accuracy).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainerArtifact {
    pub trained_model_file_path: PathBuf,
    pub final_model_file_path: PathBuf,
    pub best_model_name: String,
    pub best_params: ModelParameters,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub train_metrics: ClassificationMetrics,
    pub test_metrics: ClassificationMetrics,
    /// Held-out accuracy of every candidate, keyed by candidate name.
    pub candidate_test_accuracy: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishArtifact {
    pub artifact_url: String,
    pub model_url: String,
}
