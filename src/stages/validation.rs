use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::artifact::{ColumnDrift, DriftReport, IngestionArtifact, ValidationArtifact};
use crate::config::ValidationPaths;
use crate::error::{PipelineError, StageResult};
use crate::ml::stats::ks_2samp;
use crate::settings::{Schema, ValidationSettings};
use crate::stages::Stage;
use crate::table::Table;

/// Structural and statistical checks on the ingested split.
pub struct DataValidation {
    schema: Schema,
    settings: ValidationSettings,
    paths: ValidationPaths,
}

impl DataValidation {
    pub fn new(schema: Schema, settings: ValidationSettings, paths: ValidationPaths) -> Self {
        Self {
            schema,
            settings,
            paths,
        }
    }

    pub fn validate_number_of_columns(&self, table: &Table, label: &str) -> bool {
        let expected = self.schema.columns.len();
        let ok = table.n_columns() == expected;
        if ok {
            info!(split = label, columns = expected, "Column count matches schema");
        } else {
            warn!(
                split = label,
                expected,
                found = table.n_columns(),
                "Column count does not match schema"
            );
        }
        ok
    }

    /// Declared numerical columns missing from `table`.
    pub fn missing_numerical_columns(&self, table: &Table) -> Vec<String> {
        self.schema
            .numerical_columns
            .iter()
            .filter(|name| !table.has_column(name))
            .cloned()
            .collect()
    }

    fn validate_numerical_columns(&self, table: &Table, label: &str) -> bool {
        let missing = self.missing_numerical_columns(table);
        if missing.is_empty() {
            return true;
        }
        warn!(
            split = label,
            missing = %missing.join(", "),
            "Numerical columns missing"
        );
        false
    }

    /// Every sub-check runs and logs; none short-circuits the others.
    pub fn schema_conforms(&self, train: &Table, test: &Table) -> bool {
        let checks = [
            self.validate_number_of_columns(train, "train"),
            self.validate_number_of_columns(test, "test"),
            train.n_columns() == test.n_columns(),
            self.validate_numerical_columns(train, "train"),
            self.validate_numerical_columns(test, "test"),
        ];
        checks.iter().all(|ok| *ok)
    }

    fn write_report(&self, report: &DriftReport) -> Result<()> {
        let path = &self.paths.drift_report_file;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(report).context("Failed to serialize drift report")?;
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write drift report: {}", path.display()))
    }
}

/// Two-sample KS test on every column present in both tables, in `base` order.
pub fn detect_drift(base: &Table, current: &Table, threshold: f64) -> DriftReport {
    let report: Vec<ColumnDrift> = base
        .columns()
        .iter()
        .filter_map(|name| {
            let a = base.column(name)?;
            let b = current.column(name)?;
            let a: Vec<f64> = a.to_vec();
            let b: Vec<f64> = b.to_vec();
            let (ks_statistic, p_value) = ks_2samp(&a, &b)
                .map(|t| (t.statistic, t.p_value))
                .unwrap_or((0.0, 1.0));
            Some(ColumnDrift {
                feature: name.clone(),
                ks_statistic,
                p_value,
                drift_detected: p_value < threshold,
            })
        })
        .collect();
    let drift_detected = report.iter().any(|c| c.drift_detected);
    DriftReport {
        status: !drift_detected,
        drift_detected,
        threshold,
        report,
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

impl Stage for DataValidation {
    type Input = IngestionArtifact;
    type Output = ValidationArtifact;

    fn name(&self) -> &'static str {
        "data_validation"
    }

    fn run(&self, ingestion: IngestionArtifact) -> StageResult<ValidationArtifact> {
        let train = Table::read_csv(&ingestion.train_file_path)
            .map_err(PipelineError::validation("DataValidation::read_train"))?;
        let test = Table::read_csv(&ingestion.test_file_path)
            .map_err(PipelineError::validation("DataValidation::read_test"))?;

        let schema_ok = self.schema_conforms(&train, &test);
        let drift = detect_drift(&train, &test, self.settings.drift_threshold);
        for column in drift.report.iter().filter(|c| c.drift_detected) {
            warn!(
                feature = column.feature.as_str(),
                p_value = column.p_value,
                "Drift detected"
            );
        }
        self.write_report(&drift)
            .map_err(PipelineError::validation("DataValidation::detect_dataset_drift"))?;

        let status = schema_ok && !drift.drift_detected;
        copy_file(&ingestion.train_file_path, &self.paths.valid_train_file)
            .and_then(|_| copy_file(&ingestion.test_file_path, &self.paths.valid_test_file))
            .map_err(PipelineError::validation("DataValidation::write_validated"))?;
        if !status {
            copy_file(&ingestion.train_file_path, &self.paths.invalid_train_file)
                .and_then(|_| copy_file(&ingestion.test_file_path, &self.paths.invalid_test_file))
                .map_err(PipelineError::validation("DataValidation::write_invalid"))?;
        }

        if status {
            info!(columns = drift.report.len(), "Validation passed");
        } else {
            warn!(
                schema_ok,
                drift_detected = drift.drift_detected,
                "Validation failed"
            );
        }

        Ok(ValidationArtifact {
            status,
            valid_train_file_path: self.paths.valid_train_file.clone(),
            valid_test_file_path: self.paths.valid_test_file.clone(),
            invalid_train_file_path: self.paths.invalid_train_file.clone(),
            invalid_test_file_path: self.paths.invalid_test_file.clone(),
            drift_report_file_path: self.paths.drift_report_file.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;
    use tempfile::tempdir;

    use super::*;
    use crate::config::RunConfig;

    fn schema() -> Schema {
        Schema::new(
            vec!["a".into(), "b".into(), "Result".into()],
            vec!["a".into(), "b".into()],
        )
    }

    fn table(columns: &[&str], rows: usize, shift: f64) -> Table {
        let values = Array2::from_shape_fn((rows, columns.len()), |(r, c)| {
            ((r * 7 + c * 3) % 11) as f64 + shift
        });
        Table::new(columns.iter().map(|c| c.to_string()).collect(), values).unwrap()
    }

    fn stage(root: &Path) -> DataValidation {
        let run = RunConfig::new(root, root.join("final"), "ts");
        DataValidation::new(schema(), ValidationSettings::default(), run.validation())
    }

    #[test]
    fn exact_schema_passes_and_missing_numerical_fails() {
        let temp = tempdir().unwrap();
        let stage = stage(temp.path());
        let full = table(&["a", "b", "Result"], 10, 0.0);
        assert!(stage.schema_conforms(&full, &full));

        let reduced = table(&["a", "Result", "extra"], 10, 0.0);
        assert_eq!(stage.missing_numerical_columns(&reduced), vec!["b"]);
        assert!(!stage.schema_conforms(&full, &reduced));

        let narrow = table(&["a", "b"], 10, 0.0);
        assert!(!stage.schema_conforms(&narrow, &narrow));
    }

    #[test]
    fn drift_flags_shifted_columns_only() {
        let base = table(&["a", "b"], 200, 0.0);
        let mut shifted_values = base.values().clone();
        shifted_values.column_mut(1).mapv_inplace(|v| v + 50.0);
        let current = Table::new(base.columns().to_vec(), shifted_values).unwrap();

        let report = detect_drift(&base, &current, 0.005);
        assert!(report.drift_detected);
        assert!(!report.status);
        assert!(!report.report[0].drift_detected);
        assert!(report.report[1].drift_detected);
    }

    #[test]
    fn run_copies_inputs_and_writes_report() {
        let temp = tempdir().unwrap();
        let train_path = temp.path().join("in/train.csv");
        let test_path = temp.path().join("in/test.csv");
        table(&["a", "b", "Result"], 40, 0.0)
            .write_csv(&train_path)
            .unwrap();
        table(&["a", "b", "Result"], 10, 0.0)
            .write_csv(&test_path)
            .unwrap();

        let stage = stage(temp.path());
        let artifact = stage
            .run(IngestionArtifact {
                feature_store_file_path: temp.path().join("in/all.csv"),
                train_file_path: train_path.clone(),
                test_file_path: test_path,
            })
            .unwrap();

        assert!(artifact.status);
        assert_eq!(
            fs::read(&artifact.valid_train_file_path).unwrap(),
            fs::read(&train_path).unwrap()
        );
        assert!(!artifact.invalid_train_file_path.exists());
        let report: DriftReport =
            serde_yaml::from_str(&fs::read_to_string(&artifact.drift_report_file_path).unwrap())
                .unwrap();
        assert_eq!(report.report.len(), 3);
        assert!(report.status);
    }

    #[test]
    fn failing_schema_still_writes_validated_and_invalid_copies() {
        let temp = tempdir().unwrap();
        let train_path = temp.path().join("in/train.csv");
        let test_path = temp.path().join("in/test.csv");
        table(&["a", "Result"], 20, 0.0).write_csv(&train_path).unwrap();
        table(&["a", "Result"], 5, 0.0).write_csv(&test_path).unwrap();

        let artifact = stage(temp.path())
            .run(IngestionArtifact {
                feature_store_file_path: temp.path().join("in/all.csv"),
                train_file_path: train_path,
                test_file_path: test_path,
            })
            .unwrap();
        assert!(!artifact.status);
        assert!(artifact.valid_test_file_path.exists());
        assert!(artifact.invalid_test_file_path.exists());
    }

    #[test]
    fn unreadable_input_is_a_validation_error() {
        let temp = tempdir().unwrap();
        let err = stage(temp.path())
            .run(IngestionArtifact {
                feature_store_file_path: temp.path().join("none.csv"),
                train_file_path: temp.path().join("missing_train.csv"),
                test_file_path: temp.path().join("missing_test.csv"),
            })
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
