use anyhow::{Context, Result, bail, ensure};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::artifact::IngestionArtifact;
use crate::config::IngestionPaths;
use crate::error::{PipelineError, StageResult};
use crate::settings::IngestionSettings;
use crate::stages::Stage;
use crate::store::{DocumentStore, ID_FIELD};
use crate::table::Table;

/// Pulls the source collection into a feature-store snapshot and a train/test split.
pub struct DataIngestion<'a> {
    store: &'a dyn DocumentStore,
    database: String,
    settings: IngestionSettings,
    paths: IngestionPaths,
}

impl<'a> DataIngestion<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        database: impl Into<String>,
        settings: IngestionSettings,
        paths: IngestionPaths,
    ) -> Self {
        Self {
            store,
            database: database.into(),
            settings,
            paths,
        }
    }

    /// Fetch every record, dropping the store identity column.
    pub fn export(&self) -> Result<Table> {
        let collection = &self.settings.collection;
        let documents = self
            .store
            .find_all(&self.database, collection)
            .with_context(|| format!("Failed to read {}.{collection}", self.database))?;
        if documents.is_empty() {
            bail!("Collection {}.{collection} is empty", self.database);
        }
        let table = Table::from_records(&documents, &[ID_FIELD])
            .with_context(|| format!("Collection {}.{collection} has invalid records", self.database))?;
        info!(
            collection = collection.as_str(),
            rows = table.n_rows(),
            columns = table.n_columns(),
            missing = table.missing_count(),
            "Collection exported"
        );
        Ok(table)
    }

    pub fn materialize_feature_store(&self, table: &Table) -> Result<()> {
        table.write_csv(&self.paths.feature_store_file)?;
        debug!(path = %self.paths.feature_store_file.display(), "Feature store written");
        Ok(())
    }
}

impl Stage for DataIngestion<'_> {
    type Input = ();
    type Output = IngestionArtifact;

    fn name(&self) -> &'static str {
        "data_ingestion"
    }

    fn run(&self, _input: ()) -> StageResult<IngestionArtifact> {
        let table = self
            .export()
            .map_err(PipelineError::ingestion("DataIngestion::export"))?;
        self.materialize_feature_store(&table)
            .map_err(PipelineError::ingestion("DataIngestion::materialize_feature_store"))?;

        let (train, test) = split(&table, self.settings.test_ratio, self.settings.seed)
            .map_err(PipelineError::ingestion("DataIngestion::split"))?;
        train
            .write_csv(&self.paths.train_file)
            .and_then(|_| test.write_csv(&self.paths.test_file))
            .map_err(PipelineError::ingestion("DataIngestion::split"))?;
        info!(
            train_rows = train.n_rows(),
            test_rows = test.n_rows(),
            "Train/test split written"
        );

        Ok(IngestionArtifact {
            feature_store_file_path: self.paths.feature_store_file.clone(),
            train_file_path: self.paths.train_file.clone(),
            test_file_path: self.paths.test_file.clone(),
        })
    }
}

/// Seeded random split; `ratio` is the fraction held out for test.
///
/// The test split receives `ceil(ratio * n)` rows, bounded so that neither side
/// is empty.
pub fn split(table: &Table, ratio: f64, seed: u64) -> Result<(Table, Table)> {
    ensure!(
        ratio > 0.0 && ratio < 1.0,
        "test ratio must be between 0 and 1 (exclusive), got {ratio}"
    );
    let n = table.n_rows();
    ensure!(n >= 2, "need at least 2 rows to split, got {n}");

    let n_test = ((ratio * n as f64).ceil() as usize).clamp(1, n - 1);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    let (test_rows, train_rows) = order.split_at(n_test);
    Ok((table.select_rows(train_rows), table.select_rows(test_rows)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use ndarray::Array2;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::config::RunConfig;
    use crate::store::{Document, MemoryStore};

    fn indexed_table(n: usize) -> Table {
        let values = Array2::from_shape_fn((n, 2), |(r, c)| if c == 0 { r as f64 } else { 1.0 });
        Table::new(vec!["id".into(), "Result".into()], values).unwrap()
    }

    fn ids(table: &Table) -> Vec<usize> {
        table
            .column("id")
            .unwrap()
            .iter()
            .map(|v| *v as usize)
            .collect()
    }

    #[test]
    fn split_is_disjoint_covering_and_sized() {
        for (n, ratio) in [(100, 0.2), (7, 0.25), (2, 0.5), (10, 0.99)] {
            let table = indexed_table(n);
            let (train, test) = split(&table, ratio, 42).unwrap();
            let train_ids: HashSet<_> = ids(&train).into_iter().collect();
            let test_ids: HashSet<_> = ids(&test).into_iter().collect();
            assert!(train_ids.is_disjoint(&test_ids));
            assert_eq!(train_ids.len() + test_ids.len(), n);
            let expected = ((ratio * n as f64).ceil() as usize).clamp(1, n - 1);
            assert_eq!(test.n_rows(), expected, "n={n} ratio={ratio}");
        }
    }

    #[test]
    fn split_is_reproducible_for_a_seed() {
        let table = indexed_table(50);
        let (a_train, a_test) = split(&table, 0.2, 7).unwrap();
        let (b_train, b_test) = split(&table, 0.2, 7).unwrap();
        assert_eq!(ids(&a_train), ids(&b_train));
        assert_eq!(ids(&a_test), ids(&b_test));

        let (_, c_test) = split(&table, 0.2, 8).unwrap();
        assert_ne!(ids(&a_test), ids(&c_test));
    }

    #[test]
    fn split_rejects_degenerate_inputs() {
        assert!(split(&indexed_table(10), 0.0, 1).is_err());
        assert!(split(&indexed_table(10), 1.0, 1).is_err());
        assert!(split(&indexed_table(1), 0.2, 1).is_err());
    }

    fn document(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn run_writes_snapshot_and_split() {
        let temp = tempdir().unwrap();
        let run = RunConfig::new(temp.path().join("artifacts"), temp.path().join("final"), "ts");
        let docs = (0..10)
            .map(|i| {
                let x = if i == 3 { json!("na") } else { json!(i) };
                document(json!({"_id": format!("id{i}"), "x": x, "Result": 1}))
            })
            .collect();
        let store = MemoryStore::with_collection("netsec", "phishing_data", docs);
        let stage = DataIngestion::new(
            &store,
            "netsec",
            IngestionSettings::default(),
            run.ingestion("phishing_data.csv"),
        );

        let artifact = stage.run(()).unwrap();
        let snapshot = Table::read_csv(&artifact.feature_store_file_path).unwrap();
        assert_eq!(snapshot.columns(), &["x".to_string(), "Result".to_string()]);
        assert_eq!(snapshot.missing_count(), 1);
        assert_eq!(Table::read_csv(&artifact.test_file_path).unwrap().n_rows(), 2);
        assert_eq!(Table::read_csv(&artifact.train_file_path).unwrap().n_rows(), 8);
    }

    #[test]
    fn exported_headers_follow_document_order() {
        let temp = tempdir().unwrap();
        let run = RunConfig::new(temp.path().join("artifacts"), temp.path().join("final"), "ts");
        let docs = (0..6)
            .map(|i| {
                document(json!({
                    "_id": format!("id{i}"),
                    "having_IP_Address": 1,
                    "URL_Length": -1,
                    "SSLfinal_State": i % 2,
                    "Result": if i % 2 == 0 { 1 } else { -1 },
                }))
            })
            .collect();
        let store = MemoryStore::with_collection("netsec", "phishing_data", docs);
        let stage = DataIngestion::new(
            &store,
            "netsec",
            IngestionSettings::default(),
            run.ingestion("phishing_data.csv"),
        );

        let artifact = stage.run(()).unwrap();
        let expected = "having_IP_Address,URL_Length,SSLfinal_State,Result";
        for path in [
            &artifact.feature_store_file_path,
            &artifact.train_file_path,
            &artifact.test_file_path,
        ] {
            let header = std::fs::read_to_string(path).unwrap();
            assert_eq!(header.lines().next().unwrap(), expected, "{}", path.display());
        }
    }

    #[test]
    fn empty_collection_is_an_ingestion_error() {
        let temp = tempdir().unwrap();
        let run = RunConfig::new(temp.path(), temp.path().join("final"), "ts");
        let store = MemoryStore::with_collection("netsec", "phishing_data", Vec::new());
        let stage = DataIngestion::new(
            &store,
            "netsec",
            IngestionSettings::default(),
            run.ingestion("phishing_data.csv"),
        );
        let err = stage.run(()).unwrap_err();
        assert_eq!(err.kind(), "ingestion");
        assert_eq!(err.tag(), "DataIngestion::export");
    }
}
