use anyhow::Context;
use serde::Serialize;

use crate::ml::registry::ModelRegistry;
use crate::settings::{HyperparameterFile, PipelineSettings, SETTINGS_VERSION, Schema};
use crate::stages::publisher::backend_for;

/// Problems found before a run starts. Errors block training; warnings do not.
#[derive(Debug, Default, Serialize)]
pub struct PreflightReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: PreflightReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Check settings, the schema file and the hyperparameter file together,
/// reporting every problem found rather than stopping at the first.
pub fn preflight(settings: &PipelineSettings, registry: &ModelRegistry) -> PreflightReport {
    let mut report = check_settings(settings);

    match settings
        .load_schema()
        .context("Schema could not be loaded")
    {
        Ok(schema) => report.merge(check_schema(&schema, &settings.target_column)),
        Err(err) => report.errors.push(format!("{err:#}")),
    }

    match settings
        .load_hyperparameters()
        .context("Hyperparameter file could not be loaded")
    {
        Ok(file) => report.merge(check_candidates(&file, registry)),
        Err(err) => report.errors.push(format!("{err:#}")),
    }

    report
}

fn check_settings(settings: &PipelineSettings) -> PreflightReport {
    let mut report = PreflightReport::default();

    if settings.version != SETTINGS_VERSION {
        report
            .errors
            .push(format!("Unsupported settings version: {}", settings.version));
    }

    let ratio = settings.ingestion.test_ratio;
    if !(ratio > 0.0 && ratio < 1.0) {
        report.errors.push(format!(
            "ingestion.test_ratio must be between 0 and 1 (exclusive), got {ratio}"
        ));
    }

    let threshold = settings.validation.drift_threshold;
    if !(threshold > 0.0 && threshold < 1.0) {
        report.errors.push(format!(
            "validation.drift_threshold must be between 0 and 1 (exclusive), got {threshold}"
        ));
    }

    if settings.transformation.imputer.n_neighbors == 0 {
        report
            .errors
            .push("transformation.imputer.n_neighbors must be at least 1".into());
    }

    if settings.trainer.cv_folds < 2 {
        report.errors.push(format!(
            "trainer.cv_folds must be at least 2, got {}",
            settings.trainer.cv_folds
        ));
    }

    if settings.target_column.trim().is_empty() {
        report.errors.push("target_column cannot be empty".into());
    }

    if settings.artifact_dir == settings.final_model_dir {
        report.warnings.push(format!(
            "artifact_dir and final_model_dir are both {}; production models will be mixed with run trees",
            settings.artifact_dir.display()
        ));
    }

    if let Some(publisher) = &settings.publisher
        && let Err(err) = backend_for(&publisher.target)
    {
        report.errors.push(format!("publisher.target: {err}"));
    }

    if !settings.validation.enforce_validation {
        report.warnings.push(
            "validation.enforce_validation is off; drifted data will still be trained on".into(),
        );
    }

    report
}

fn check_schema(schema: &Schema, target_column: &str) -> PreflightReport {
    let mut report = PreflightReport::default();

    if schema.columns.is_empty() {
        report.errors.push("Schema declares no columns".into());
        return report;
    }

    if !schema.columns.iter().any(|c| c == target_column) {
        report.errors.push(format!(
            "Target column '{target_column}' is not declared in the schema"
        ));
    }

    for (idx, column) in schema.columns.iter().enumerate() {
        if schema.columns[..idx].contains(column) {
            report
                .errors
                .push(format!("Schema column '{column}' is declared more than once"));
        }
    }

    for column in &schema.numerical_columns {
        if !schema.columns.contains(column) {
            report.warnings.push(format!(
                "Numerical column '{column}' is not listed under columns"
            ));
        }
    }

    report
}

fn check_candidates(file: &HyperparameterFile, registry: &ModelRegistry) -> PreflightReport {
    let mut report = PreflightReport::default();

    if file.models.is_empty() {
        report
            .errors
            .push("Hyperparameter file declares no candidate models".into());
        return report;
    }

    for (name, candidate) in &file.models {
        for (param, values) in &candidate.params {
            if values.is_empty() {
                report.errors.push(format!(
                    "Candidate '{name}': parameter '{param}' has no values"
                ));
            }
        }
    }

    match registry.validate(file) {
        Ok(combinations) if combinations > 50 => report.warnings.push(format!(
            "{combinations} grid points across all candidates; training may be slow"
        )),
        Ok(_) => {}
        Err(err) => report.errors.push(format!("{err:#}")),
    }

    report
}
