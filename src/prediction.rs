//! Batch scoring with the production model.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use chrono::{DateTime, Local};
use glob::glob;
use ndarray::{Axis, concatenate};
use tracing::info;

use crate::config::{MODEL_FILE_NAME, PREPROCESSING_OBJECT_FILE_NAME};
use crate::ml::predictor::CompositePredictor;
use crate::store::DocumentStore;
use crate::table::Table;

pub const PREDICTIONS_FILE_NAME: &str = "predictions.csv";
pub const PREDICTION_COLLECTION_PREFIX: &str = "predictions_";
const COLLECTION_TIMESTAMP_FORMAT: &str = "%d%m%Y%H%M%S";

/// Resolve glob patterns to files; a pattern matching nothing is an error.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    ensure!(!patterns.is_empty(), "At least one input pattern is required");
    let mut resolved = Vec::new();
    for pattern in patterns {
        let matches = glob(pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))?;
        let before = resolved.len();
        for entry in matches {
            let path = entry?;
            if path.is_file() {
                resolved.push(path);
            }
        }
        if resolved.len() == before {
            bail!("No inputs matched pattern: {pattern}");
        }
    }
    Ok(resolved)
}

/// Read every input and stack the rows; all inputs must share one header.
pub fn read_inputs(paths: &[PathBuf]) -> Result<Table> {
    let mut tables = Vec::with_capacity(paths.len());
    for path in paths {
        tables.push(Table::read_csv(path)?);
    }
    let Some(first) = tables.first() else {
        bail!("No input files to read");
    };
    for (path, table) in paths.iter().zip(&tables).skip(1) {
        ensure!(
            table.columns() == first.columns(),
            "{} has columns that differ from {}",
            path.display(),
            paths[0].display()
        );
    }
    let views: Vec<_> = tables.iter().map(|t| t.values().view()).collect();
    let values = concatenate(Axis(0), &views).context("Failed to combine input rows")?;
    Table::new(first.columns().to_vec(), values)
}

pub fn prediction_collection_name(now: DateTime<Local>) -> String {
    format!(
        "{PREDICTION_COLLECTION_PREFIX}{}",
        now.format(COLLECTION_TIMESTAMP_FORMAT)
    )
}

#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub rows: usize,
    pub output_file: PathBuf,
    pub collection: String,
    pub inserted: usize,
}

/// Scores tables with the preprocessor and classifier kept in the production directory.
pub struct BatchPredictor {
    predictor: CompositePredictor,
    target_column: String,
}

impl BatchPredictor {
    pub fn new(predictor: CompositePredictor, target_column: impl Into<String>) -> Self {
        Self {
            predictor,
            target_column: target_column.into(),
        }
    }

    pub fn load(final_model_dir: &Path, target_column: impl Into<String>) -> Result<Self> {
        let predictor = CompositePredictor::from_files(
            &final_model_dir.join(PREPROCESSING_OBJECT_FILE_NAME),
            &final_model_dir.join(MODEL_FILE_NAME),
        )?;
        Ok(Self::new(predictor, target_column))
    }

    /// Input rows with the predicted label in the target column.
    pub fn predict(&self, input: &Table) -> Result<Table> {
        let features = if input.has_column(&self.target_column) {
            input.drop_column(&self.target_column)?
        } else {
            input.clone()
        };
        let predictions = self.predictor.predict(&features)?;
        input.with_column(&self.target_column, predictions.view())
    }

    /// Predict, write `<output_dir>/predictions.csv` and insert the rows into a
    /// fresh timestamped collection.
    pub fn run(
        &self,
        input: &Table,
        output_dir: &Path,
        store: &dyn DocumentStore,
        database: &str,
        now: DateTime<Local>,
    ) -> Result<PredictionOutcome> {
        let scored = self.predict(input)?;
        let output_file = output_dir.join(PREDICTIONS_FILE_NAME);
        scored.write_csv(&output_file)?;

        let collection = prediction_collection_name(now);
        let inserted = store
            .insert_many(database, &collection, scored.to_records())
            .with_context(|| format!("Failed to insert predictions into {database}.{collection}"))?;
        info!(
            rows = scored.n_rows(),
            output = %output_file.display(),
            collection = collection.as_str(),
            "Predictions written"
        );
        Ok(PredictionOutcome {
            rows: scored.n_rows(),
            output_file,
            collection,
            inserted,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ndarray::{Array2, array};
    use tempfile::tempdir;

    use super::*;
    use crate::ml::imputer::build_transformer;
    use crate::ml::models::{DecisionTreeConfig, Estimator};
    use crate::ml::predictor::write_json;
    use crate::settings::ImputerSettings;
    use crate::store::MemoryStore;

    fn publish_model(dir: &Path) {
        let features = Table::new(
            vec!["a".into(), "b".into()],
            array![[-1.0, 0.0], [-1.0, 1.0], [1.0, 0.0], [1.0, 1.0]],
        )
        .unwrap();
        let mut pre = build_transformer(&ImputerSettings::default()).unwrap();
        let x = pre.fit_transform(&features).unwrap();
        let model = DecisionTreeConfig::default()
            .fit(x.view(), array![0.0, 0.0, 1.0, 1.0].view(), 0)
            .unwrap();
        write_json(&dir.join(PREPROCESSING_OBJECT_FILE_NAME), &pre).unwrap();
        write_json(&dir.join(MODEL_FILE_NAME), &model).unwrap();
    }

    #[test]
    fn collection_name_uses_compact_timestamp() {
        let now = Local.with_ymd_and_hms(2025, 3, 9, 8, 7, 6).unwrap();
        assert_eq!(prediction_collection_name(now), "predictions_09032025080706");
    }

    #[test]
    fn predictions_replace_target_and_reach_the_store() {
        let temp = tempdir().unwrap();
        publish_model(temp.path());
        let predictor = BatchPredictor::load(temp.path(), "Result").unwrap();

        // column order differs from training and the target is already present
        let input = Table::new(
            vec!["b".into(), "Result".into(), "a".into()],
            array![[1.0, 9.0, -1.0], [0.0, 9.0, 1.0], [f64::NAN, 9.0, 1.0]],
        )
        .unwrap();
        let store = MemoryStore::default();
        let now = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let outcome = predictor
            .run(&input, &temp.path().join("out"), &store, "netsec", now)
            .unwrap();

        assert_eq!(outcome.rows, 3);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(store.collection_len("netsec", &outcome.collection), 3);
        let written = Table::read_csv(&outcome.output_file).unwrap();
        assert_eq!(written.columns(), input.columns());
        assert_eq!(
            written.column("Result").unwrap().to_vec(),
            vec![0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn missing_model_files_are_reported() {
        let temp = tempdir().unwrap();
        let err = BatchPredictor::load(temp.path(), "Result").err().unwrap();
        assert!(err.to_string().contains("Model file not found"));
    }

    #[test]
    fn inputs_are_expanded_and_stacked() {
        let temp = tempdir().unwrap();
        let columns = vec!["a".to_string(), "b".to_string()];
        Table::new(columns.clone(), Array2::zeros((2, 2)))
            .unwrap()
            .write_csv(&temp.path().join("one.csv"))
            .unwrap();
        Table::new(columns, Array2::ones((3, 2)))
            .unwrap()
            .write_csv(&temp.path().join("two.csv"))
            .unwrap();

        let pattern = format!("{}/*.csv", temp.path().display());
        let paths = expand_inputs(&[pattern]).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(read_inputs(&paths).unwrap().n_rows(), 5);

        let missing = format!("{}/*.parquet", temp.path().display());
        assert!(expand_inputs(&[missing]).is_err());
    }
}
