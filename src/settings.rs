use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ml::imputer::NeighborWeights;
use crate::ml::models::ModelFamily;

pub const SETTINGS_VERSION: u32 = 1;
pub const STORE_URI_ENV: &str = "ATLAS_MONGODB_URI";
pub const STORE_DATABASE_ENV: &str = "ATLAS_MONGODB_NAME";

/// Top-level pipeline settings, usually loaded from `pipeline.yaml`.
///
/// Every field has a default, so an empty document yields the stock
/// network-security configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_final_model_dir")]
    pub final_model_dir: PathBuf,
    #[serde(default = "default_target_column")]
    pub target_column: String,
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,
    #[serde(default = "default_model_params_path")]
    pub model_params_path: PathBuf,
    #[serde(default)]
    pub ingestion: IngestionSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub transformation: TransformationSettings,
    #[serde(default)]
    pub trainer: TrainerSettings,
    #[serde(default)]
    pub publisher: Option<PublisherSettings>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            version: default_version(),
            pipeline_name: default_pipeline_name(),
            artifact_dir: default_artifact_dir(),
            final_model_dir: default_final_model_dir(),
            target_column: default_target_column(),
            schema_path: default_schema_path(),
            model_params_path: default_model_params_path(),
            ingestion: IngestionSettings::default(),
            validation: ValidationSettings::default(),
            transformation: TransformationSettings::default(),
            trainer: TrainerSettings::default(),
            publisher: None,
        }
    }
}

impl PipelineSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let settings: PipelineSettings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings YAML: {}", path.display()))?;
        Ok(settings)
    }

    pub fn load_schema(&self) -> Result<Schema> {
        Schema::load(&self.schema_path)
    }

    pub fn load_hyperparameters(&self) -> Result<HyperparameterFile> {
        HyperparameterFile::load(&self.model_params_path)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionSettings {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_source_file_name")]
    pub source_file_name: String,
    /// Fraction of rows held out for the test split.
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            source_file_name: default_source_file_name(),
            test_ratio: default_test_ratio(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationSettings {
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
    /// Abort the run when validation status is false instead of only logging it.
    #[serde(default)]
    pub enforce_validation: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            drift_threshold: default_drift_threshold(),
            enforce_validation: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransformationSettings {
    #[serde(default)]
    pub imputer: ImputerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImputerSettings {
    #[serde(default = "default_imputer_neighbors")]
    pub n_neighbors: usize,
    #[serde(default)]
    pub weights: NeighborWeights,
}

impl Default for ImputerSettings {
    fn default() -> Self {
        Self {
            n_neighbors: default_imputer_neighbors(),
            weights: NeighborWeights::Uniform,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainerSettings {
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub tracking: TrackingSettings,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            cv_folds: default_cv_folds(),
            seed: default_seed(),
            tracking: TrackingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackingSettings {
    #[default]
    None,
    Jsonl {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherSettings {
    /// Remote root such as `s3://bucket` or `file:///srv/models`.
    pub target: String,
}

/// Connection details for the document store, resolved once at process start.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub uri: String,
    pub database: String,
}

/// Expected table layout for validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub columns: Vec<String>,
    pub numerical_columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    columns: Vec<RawSchemaColumn>,
    #[serde(default)]
    numerical_columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSchemaColumn {
    Name(String),
    Typed(BTreeMap<String, String>),
}

impl Schema {
    pub fn new(columns: Vec<String>, numerical_columns: Vec<String>) -> Self {
        Self {
            columns,
            numerical_columns,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse schema YAML: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: RawSchema = serde_yaml::from_str(content)?;
        let mut columns = Vec::with_capacity(raw.columns.len());
        for (idx, column) in raw.columns.into_iter().enumerate() {
            match column {
                RawSchemaColumn::Name(name) => columns.push(name),
                RawSchemaColumn::Typed(map) => {
                    if map.len() != 1 {
                        bail!(
                            "Schema column {} must be a name or a single `name: dtype` entry",
                            idx + 1
                        );
                    }
                    columns.extend(map.into_keys());
                }
            }
        }
        Ok(Self {
            columns,
            numerical_columns: raw.numerical_columns,
        })
    }
}

pub type ParamGrid = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CandidateConfig {
    pub model: ModelFamily,
    #[serde(default)]
    pub params: ParamGrid,
}

/// Candidate model families and their hyperparameter grids.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HyperparameterFile {
    pub models: BTreeMap<String, CandidateConfig>,
}

impl HyperparameterFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| {
            format!("Failed to read hyperparameter file: {}", path.display())
        })?;
        let file: HyperparameterFile = serde_yaml::from_str(&content).with_context(|| {
            format!("Failed to parse hyperparameter YAML: {}", path.display())
        })?;
        Ok(file)
    }
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_pipeline_name() -> String {
    "network_security".to_string()
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_final_model_dir() -> PathBuf {
    PathBuf::from("final_models")
}

fn default_target_column() -> String {
    "Result".to_string()
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("data_schema/schema.yaml")
}

fn default_model_params_path() -> PathBuf {
    PathBuf::from("data_schema/model_params.yaml")
}

fn default_collection() -> String {
    "phishing_data".to_string()
}

fn default_source_file_name() -> String {
    "phishing_data.csv".to_string()
}

fn default_test_ratio() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_drift_threshold() -> f64 {
    0.005
}

fn default_imputer_neighbors() -> usize {
    3
}

fn default_cv_folds() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let settings: PipelineSettings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.target_column, "Result");
        assert_eq!(settings.ingestion.test_ratio, 0.2);
        assert_eq!(settings.validation.drift_threshold, 0.005);
        assert!(!settings.validation.enforce_validation);
        assert_eq!(settings.transformation.imputer.n_neighbors, 3);
        assert_eq!(settings.trainer.cv_folds, 5);
        assert!(settings.publisher.is_none());
        assert!(matches!(settings.trainer.tracking, TrackingSettings::None));
    }

    #[test]
    fn schema_accepts_bare_and_typed_columns() {
        let schema = Schema::from_yaml(
            "columns:\n  - having_IP_Address: int64\n  - URL_Length\n  - Result: int64\nnumerical_columns:\n  - URL_Length\n",
        )
        .unwrap();
        assert_eq!(
            schema.columns,
            vec!["having_IP_Address", "URL_Length", "Result"]
        );
        assert_eq!(schema.numerical_columns, vec!["URL_Length"]);
    }

    #[test]
    fn schema_rejects_multi_key_entries() {
        let err = Schema::from_yaml("columns:\n  - {a: int64, b: int64}\n").unwrap_err();
        assert!(err.to_string().contains("single"));
    }

    #[test]
    fn hyperparameter_file_rejects_unknown_family() {
        let err = serde_yaml::from_str::<HyperparameterFile>(
            "models:\n  svm:\n    model: SupportVectorMachine\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn hyperparameter_file_accepts_library_class_aliases() {
        let file: HyperparameterFile = serde_yaml::from_str(
            "models:\n  forest:\n    model: RandomForestClassifier\n    params:\n      n_estimators: [4, 8]\n",
        )
        .unwrap();
        let candidate = &file.models["forest"];
        assert_eq!(candidate.model, ModelFamily::RandomForest);
        assert_eq!(candidate.params["n_estimators"].len(), 2);
    }
}
