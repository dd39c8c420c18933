use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::{Value, json};

use crate::ml::models::ModelFamily;
use crate::settings::{CandidateConfig, HyperparameterFile, ParamGrid, PipelineSettings};

pub const SETTINGS_FILE_NAME: &str = "pipeline.yaml";
pub const SCHEMA_FILE_NAME: &str = "schema.yaml";
pub const MODEL_PARAMS_FILE_NAME: &str = "model_params.yaml";

/// Feature columns of the phishing-website dataset, target last.
pub const PHISHING_COLUMNS: [&str; 31] = [
    "having_IP_Address",
    "URL_Length",
    "Shortining_Service",
    "having_At_Symbol",
    "double_slash_redirecting",
    "Prefix_Suffix",
    "having_Sub_Domain",
    "SSLfinal_State",
    "Domain_registeration_length",
    "Favicon",
    "port",
    "HTTPS_token",
    "Request_URL",
    "URL_of_Anchor",
    "Links_in_tags",
    "SFH",
    "Submitting_to_email",
    "Abnormal_URL",
    "Redirect",
    "on_mouseover",
    "RightClick",
    "popUpWidnow",
    "Iframe",
    "age_of_domain",
    "DNSRecord",
    "web_traffic",
    "Page_Rank",
    "Google_Index",
    "Links_pointing_to_page",
    "Statistical_report",
    "Result",
];

#[derive(Debug, Serialize)]
struct SchemaPreset {
    columns: Vec<BTreeMap<String, String>>,
    numerical_columns: Vec<String>,
}

/// Files written by [`init`].
#[derive(Debug, Clone)]
pub struct InitOutput {
    pub settings: PathBuf,
    pub schema: PathBuf,
    pub model_params: PathBuf,
}

/// Write a default settings file plus the schema and candidate grids it points at.
///
/// Existing files are left alone unless `force` is set.
pub fn init(directory: &Path, force: bool) -> Result<InitOutput> {
    let output = InitOutput {
        settings: directory.join(SETTINGS_FILE_NAME),
        schema: directory.join(SCHEMA_FILE_NAME),
        model_params: directory.join(MODEL_PARAMS_FILE_NAME),
    };
    if !force {
        for path in [&output.settings, &output.schema, &output.model_params] {
            if path.exists() {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
        }
    }
    fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create directory: {}", directory.display()))?;

    let settings = PipelineSettings {
        schema_path: output.schema.clone(),
        model_params_path: output.model_params.clone(),
        ..PipelineSettings::default()
    };
    write_yaml(&output.settings, &settings)?;
    write_yaml(&output.schema, &schema_preset())?;
    write_yaml(&output.model_params, &model_params_preset())?;
    Ok(output)
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let rendered = serde_yaml::to_string(value)?;
    fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))
}

fn schema_preset() -> SchemaPreset {
    SchemaPreset {
        columns: PHISHING_COLUMNS
            .iter()
            .map(|name| BTreeMap::from([(name.to_string(), "int64".to_string())]))
            .collect(),
        numerical_columns: PHISHING_COLUMNS.iter().map(|c| c.to_string()).collect(),
    }
}

fn grid(entries: Vec<(&str, Vec<Value>)>) -> ParamGrid {
    entries
        .into_iter()
        .map(|(name, values)| (name.to_string(), values))
        .collect()
}

fn candidate(model: ModelFamily, params: ParamGrid) -> CandidateConfig {
    CandidateConfig { model, params }
}

pub fn model_params_preset() -> HyperparameterFile {
    let models = BTreeMap::from([
        (
            "logistic_regression".to_string(),
            candidate(
                ModelFamily::LogisticRegression,
                grid(vec![("C", vec![json!(0.1), json!(1.0), json!(10.0)])]),
            ),
        ),
        (
            "k_neighbors".to_string(),
            candidate(
                ModelFamily::KNeighbors,
                grid(vec![
                    ("n_neighbors", vec![json!(3), json!(5), json!(7)]),
                    ("weights", vec![json!("uniform"), json!("distance")]),
                ]),
            ),
        ),
        (
            "decision_tree".to_string(),
            candidate(
                ModelFamily::DecisionTree,
                grid(vec![
                    ("criterion", vec![json!("gini"), json!("entropy")]),
                    ("max_depth", vec![json!(5), json!(10), Value::Null]),
                ]),
            ),
        ),
        (
            "random_forest".to_string(),
            candidate(
                ModelFamily::RandomForest,
                grid(vec![("n_estimators", vec![json!(16), json!(32), json!(64)])]),
            ),
        ),
        (
            "ada_boost".to_string(),
            candidate(
                ModelFamily::AdaBoost,
                grid(vec![
                    ("n_estimators", vec![json!(32), json!(64)]),
                    ("learning_rate", vec![json!(0.1), json!(1.0)]),
                ]),
            ),
        ),
        (
            "gradient_boosting".to_string(),
            candidate(
                ModelFamily::GradientBoosting,
                grid(vec![
                    ("n_estimators", vec![json!(32), json!(64)]),
                    ("learning_rate", vec![json!(0.05), json!(0.1)]),
                    ("subsample", vec![json!(0.8), json!(1.0)]),
                ]),
            ),
        ),
    ]);
    HyperparameterFile { models }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::ml::registry::ModelRegistry;
    use crate::settings::Schema;

    #[test]
    fn generated_files_load_and_validate() {
        let temp = tempdir().unwrap();
        let output = init(&temp.path().join("config"), false).unwrap();

        let settings = PipelineSettings::load(&output.settings).unwrap();
        assert_eq!(settings.schema_path, output.schema);

        let schema = Schema::load(&output.schema).unwrap();
        assert_eq!(schema.columns.len(), 31);
        assert_eq!(schema.columns.last().map(String::as_str), Some("Result"));

        let params = HyperparameterFile::load(&output.model_params).unwrap();
        assert_eq!(params.models.len(), ModelFamily::ALL.len());
        assert!(ModelRegistry::with_defaults().validate(&params).unwrap() > 0);
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let temp = tempdir().unwrap();
        init(temp.path(), false).unwrap();
        let err = init(temp.path(), false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        init(temp.path(), true).unwrap();
    }
}
