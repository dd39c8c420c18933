//! Per-run file-system layout.
//!
//! Everything here is pure path arithmetic; directories are created by the stage
//! that first writes into them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

pub const TIMESTAMP_FORMAT: &str = "%d_%m_%Y_%H_%M_%S";

pub const TRAIN_FILE_NAME: &str = "train_data.csv";
pub const TEST_FILE_NAME: &str = "test_data.csv";

pub const DATA_INGESTION_DIR: &str = "data_ingestion";
pub const FEATURE_STORE_DIR: &str = "feature_store";
pub const INGESTED_DIR: &str = "ingested";

pub const DATA_VALIDATION_DIR: &str = "data_validation";
pub const VALIDATED_DIR: &str = "validated";
pub const INVALID_DIR: &str = "invalid";
pub const DRIFT_REPORT_DIR: &str = "drift_report";
pub const DRIFT_REPORT_FILE_NAME: &str = "drift_report.yaml";

pub const DATA_TRANSFORMATION_DIR: &str = "data_transformation";
pub const TRANSFORMED_DIR: &str = "transformed";
pub const TRANSFORMED_OBJECT_DIR: &str = "transformed_object";
pub const TRANSFORMED_TRAIN_FILE_NAME: &str = "train_data.npy";
pub const TRANSFORMED_TEST_FILE_NAME: &str = "test_data.npy";
pub const PREPROCESSING_OBJECT_FILE_NAME: &str = "preprocessing.json";

pub const MODEL_TRAINER_DIR: &str = "model_trainer";
pub const TRAINED_MODEL_DIR: &str = "trained_model";
pub const MODEL_FILE_NAME: &str = "model.json";

pub const RUN_MANIFEST_FILE_NAME: &str = "run_manifest.yaml";

/// Identity of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub timestamp: String,
    /// `<artifact_dir>/<timestamp>`; every per-run path lives below it.
    pub artifact_root: PathBuf,
    /// Production location shared across runs.
    pub final_model_dir: PathBuf,
}

impl RunConfig {
    pub fn new(
        artifact_dir: impl AsRef<Path>,
        final_model_dir: impl Into<PathBuf>,
        timestamp: impl Into<String>,
    ) -> Self {
        let timestamp = timestamp.into();
        Self {
            artifact_root: artifact_dir.as_ref().join(&timestamp),
            timestamp,
            final_model_dir: final_model_dir.into(),
        }
    }

    pub fn at(
        artifact_dir: impl AsRef<Path>,
        final_model_dir: impl Into<PathBuf>,
        now: DateTime<Local>,
    ) -> Self {
        Self::new(
            artifact_dir,
            final_model_dir,
            now.format(TIMESTAMP_FORMAT).to_string(),
        )
    }

    pub fn now(artifact_dir: impl AsRef<Path>, final_model_dir: impl Into<PathBuf>) -> Self {
        Self::at(artifact_dir, final_model_dir, Local::now())
    }

    pub fn ingestion(&self, source_file_name: &str) -> IngestionPaths {
        let dir = self.artifact_root.join(DATA_INGESTION_DIR);
        IngestionPaths {
            feature_store_file: dir.join(FEATURE_STORE_DIR).join(source_file_name),
            train_file: dir.join(INGESTED_DIR).join(TRAIN_FILE_NAME),
            test_file: dir.join(INGESTED_DIR).join(TEST_FILE_NAME),
            dir,
        }
    }

    pub fn validation(&self) -> ValidationPaths {
        let dir = self.artifact_root.join(DATA_VALIDATION_DIR);
        let valid_dir = dir.join(VALIDATED_DIR);
        let invalid_dir = dir.join(INVALID_DIR);
        ValidationPaths {
            valid_train_file: valid_dir.join(TRAIN_FILE_NAME),
            valid_test_file: valid_dir.join(TEST_FILE_NAME),
            invalid_train_file: invalid_dir.join(TRAIN_FILE_NAME),
            invalid_test_file: invalid_dir.join(TEST_FILE_NAME),
            drift_report_file: dir.join(DRIFT_REPORT_DIR).join(DRIFT_REPORT_FILE_NAME),
            valid_dir,
            invalid_dir,
            dir,
        }
    }

    pub fn transformation(&self) -> TransformationPaths {
        let dir = self.artifact_root.join(DATA_TRANSFORMATION_DIR);
        TransformationPaths {
            transformed_train_file: dir.join(TRANSFORMED_DIR).join(TRANSFORMED_TRAIN_FILE_NAME),
            transformed_test_file: dir.join(TRANSFORMED_DIR).join(TRANSFORMED_TEST_FILE_NAME),
            transformed_object_file: dir
                .join(TRANSFORMED_OBJECT_DIR)
                .join(PREPROCESSING_OBJECT_FILE_NAME),
            final_preprocessor_file: self.final_model_dir.join(PREPROCESSING_OBJECT_FILE_NAME),
            dir,
        }
    }

    pub fn trainer(&self) -> TrainerPaths {
        let dir = self.artifact_root.join(MODEL_TRAINER_DIR);
        TrainerPaths {
            trained_model_file: dir.join(TRAINED_MODEL_DIR).join(MODEL_FILE_NAME),
            final_model_file: self.final_model_dir.join(MODEL_FILE_NAME),
            dir,
        }
    }

    pub fn publisher(&self, remote_root: &str) -> PublisherPaths {
        let remote_root = remote_root.trim_end_matches('/');
        PublisherPaths {
            local_artifact_dir: self.artifact_root.clone(),
            local_model_dir: self.final_model_dir.clone(),
            remote_artifact_url: format!("{remote_root}/artifacts/{}/", self.timestamp),
            remote_model_url: format!("{remote_root}/models/{}/", self.timestamp),
        }
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.artifact_root.join(RUN_MANIFEST_FILE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionPaths {
    pub dir: PathBuf,
    pub feature_store_file: PathBuf,
    pub train_file: PathBuf,
    pub test_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPaths {
    pub dir: PathBuf,
    pub valid_dir: PathBuf,
    pub invalid_dir: PathBuf,
    pub valid_train_file: PathBuf,
    pub valid_test_file: PathBuf,
    pub invalid_train_file: PathBuf,
    pub invalid_test_file: PathBuf,
    pub drift_report_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformationPaths {
    pub dir: PathBuf,
    pub transformed_train_file: PathBuf,
    pub transformed_test_file: PathBuf,
    pub transformed_object_file: PathBuf,
    pub final_preprocessor_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerPaths {
    pub dir: PathBuf,
    pub trained_model_file: PathBuf,
    pub final_model_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherPaths {
    pub local_artifact_dir: PathBuf,
    pub local_model_dir: PathBuf,
    pub remote_artifact_url: String,
    pub remote_model_url: String,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;

    fn run() -> RunConfig {
        RunConfig::new("artifacts", "final_models", "01_02_2025_10_20_30")
    }

    #[test]
    fn timestamp_uses_day_first_layout() {
        let now = Local.with_ymd_and_hms(2025, 2, 1, 10, 20, 30).unwrap();
        let run = RunConfig::at("artifacts", "final_models", now);
        assert_eq!(run.timestamp, "01_02_2025_10_20_30");
        assert_eq!(
            run.artifact_root,
            PathBuf::from("artifacts/01_02_2025_10_20_30")
        );
    }

    #[test]
    fn per_run_paths_are_unique_and_rooted() {
        let run = run();
        let ingestion = run.ingestion("phishing_data.csv");
        let validation = run.validation();
        let transformation = run.transformation();
        let trainer = run.trainer();

        let per_run = vec![
            ingestion.feature_store_file,
            ingestion.train_file,
            ingestion.test_file,
            validation.valid_train_file,
            validation.valid_test_file,
            validation.invalid_train_file,
            validation.invalid_test_file,
            validation.drift_report_file,
            transformation.transformed_train_file,
            transformation.transformed_test_file,
            transformation.transformed_object_file,
            trainer.trained_model_file,
            run.manifest_file(),
        ];
        let unique: HashSet<_> = per_run.iter().collect();
        assert_eq!(unique.len(), per_run.len());
        for path in &per_run {
            assert!(path.starts_with(&run.artifact_root), "{}", path.display());
        }

        assert!(!transformation.final_preprocessor_file.starts_with(&run.artifact_root));
        assert!(!trainer.final_model_file.starts_with(&run.artifact_root));
    }

    #[test]
    fn layout_matches_expected_names() {
        let run = run();
        assert_eq!(
            run.ingestion("phishing_data.csv").feature_store_file,
            PathBuf::from(
                "artifacts/01_02_2025_10_20_30/data_ingestion/feature_store/phishing_data.csv"
            )
        );
        assert_eq!(
            run.validation().drift_report_file,
            PathBuf::from(
                "artifacts/01_02_2025_10_20_30/data_validation/drift_report/drift_report.yaml"
            )
        );
        assert_eq!(
            run.trainer().trained_model_file,
            PathBuf::from("artifacts/01_02_2025_10_20_30/model_trainer/trained_model/model.json")
        );
        assert_eq!(
            run.transformation().final_preprocessor_file,
            PathBuf::from("final_models/preprocessing.json")
        );
    }

    #[test]
    fn publisher_urls_include_timestamp() {
        let paths = run().publisher("s3://bucket/");
        assert_eq!(
            paths.remote_artifact_url,
            "s3://bucket/artifacts/01_02_2025_10_20_30/"
        );
        assert_eq!(
            paths.remote_model_url,
            "s3://bucket/models/01_02_2025_10_20_30/"
        );
    }
}
