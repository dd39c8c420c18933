mod common;

use std::fs;

use chrono::Local;
use phishnet::config::RunConfig;
use phishnet::manifest::RunManifest;
use phishnet::prediction::{BatchPredictor, read_inputs};
use phishnet::settings::{PublisherSettings, StoreSettings};
use phishnet::store::{MemoryStore, connect};
use phishnet::{PipelineError, TrainingPipeline};
use tempfile::tempdir;

const TIMESTAMP: &str = "01_01_2025_00_00_00";

fn store_settings(uri: String) -> StoreSettings {
    StoreSettings {
        uri,
        database: common::DATABASE.to_string(),
    }
}

#[test]
fn end_to_end_run_produces_model_and_manifest() {
    let temp = tempdir().unwrap();
    let store = connect(&store_settings(common::seed_store(temp.path()))).unwrap();
    let settings = common::settings(temp.path());
    let run = RunConfig::new(&settings.artifact_dir, settings.final_model_dir.clone(), TIMESTAMP);

    let pipeline = TrainingPipeline::new(settings, run, store.as_ref(), common::DATABASE);
    let outcome = pipeline.run().expect("pipeline run");

    assert!(outcome.trainer.trained_model_file_path.is_file());
    assert!(outcome.trainer.final_model_file_path.is_file());
    assert!((0.0..=1.0).contains(&outcome.trainer.test_accuracy));
    assert_eq!(outcome.trainer.candidate_test_accuracy.len(), 2);
    assert!(outcome.artifact_root.ends_with(TIMESTAMP));
    assert_eq!(
        fs::read(&outcome.validation.valid_train_file_path).unwrap(),
        fs::read(&outcome.ingestion.train_file_path).unwrap()
    );
    assert!(temp.path().join("final_models/preprocessing.json").is_file());
    assert!(outcome.publish.is_none());

    let manifest: RunManifest =
        serde_yaml::from_str(&fs::read_to_string(&outcome.manifest_file).unwrap()).unwrap();
    assert_eq!(manifest.timestamp, TIMESTAMP);
    assert_eq!(manifest.model.name, outcome.trainer.best_model_name);
    assert!(
        manifest
            .artifacts
            .iter()
            .any(|entry| entry.path == outcome.trainer.trained_model_file_path)
    );

    let snapshot = pipeline.metrics().snapshot();
    for stage in ["data_ingestion", "data_validation", "data_transformation", "model_trainer"] {
        assert_eq!(snapshot.stages[stage].calls, 1, "{stage}");
    }
    assert_eq!(snapshot.validation_passes + snapshot.validation_failures, 1);
}

#[test]
fn trained_model_scores_new_rows() {
    let temp = tempdir().unwrap();
    let store = connect(&store_settings(common::seed_store(temp.path()))).unwrap();
    let settings = common::settings(temp.path());
    let final_dir = settings.final_model_dir.clone();
    let run = RunConfig::new(&settings.artifact_dir, final_dir.clone(), TIMESTAMP);
    TrainingPipeline::new(settings, run, store.as_ref(), common::DATABASE)
        .run()
        .expect("pipeline run");

    let input = common::write_prediction_input(&temp.path().join("incoming.csv"));
    let table = read_inputs(&[input]).unwrap();
    let predictor = BatchPredictor::load(&final_dir, "Result").unwrap();
    let predictions = MemoryStore::default();
    let outcome = predictor
        .run(
            &table,
            &temp.path().join("prediction_output"),
            &predictions,
            common::DATABASE,
            Local::now(),
        )
        .unwrap();

    assert_eq!(outcome.rows, 12);
    assert_eq!(
        predictions.collection_names(common::DATABASE),
        vec![outcome.collection.clone()]
    );
    let scored = phishnet::table::Table::read_csv(&outcome.output_file).unwrap();
    let labels = scored.column("Result").unwrap();
    assert!(labels.iter().all(|v| *v == 0.0 || *v == 1.0));
}

#[test]
fn enforced_validation_stops_before_transformation() {
    let temp = tempdir().unwrap();
    let store = connect(&store_settings(common::seed_store(temp.path()))).unwrap();
    let mut settings = common::settings(temp.path());
    fs::write(
        &settings.schema_path,
        common::SCHEMA.replace("numerical_columns:\n", "numerical_columns:\n  - URL_Length\n"),
    )
    .unwrap();
    settings.validation.enforce_validation = true;
    let run = RunConfig::new(&settings.artifact_dir, settings.final_model_dir.clone(), TIMESTAMP);
    let transformed = run.transformation().dir;

    let pipeline = TrainingPipeline::new(settings, run, store.as_ref(), common::DATABASE);
    let err = pipeline.run().unwrap_err();

    match &err {
        PipelineError::ValidationRejected { report, .. } => assert!(report.is_file()),
        other => panic!("expected ValidationRejected, got {other}"),
    }
    assert!(!transformed.exists());
    assert_eq!(pipeline.metrics().snapshot().validation_failures, 1);
}

#[test]
fn unenforced_validation_failure_still_trains() {
    let temp = tempdir().unwrap();
    let store = connect(&store_settings(common::seed_store(temp.path()))).unwrap();
    let settings = common::settings(temp.path());
    fs::write(
        &settings.schema_path,
        common::SCHEMA.replace("numerical_columns:\n", "numerical_columns:\n  - URL_Length\n"),
    )
    .unwrap();
    let run = RunConfig::new(&settings.artifact_dir, settings.final_model_dir.clone(), TIMESTAMP);

    let outcome = TrainingPipeline::new(settings, run, store.as_ref(), common::DATABASE)
        .run()
        .expect("pipeline run");
    assert!(!outcome.validation.status);
    assert!(outcome.validation.invalid_train_file_path.is_file());
    assert!(outcome.trainer.trained_model_file_path.is_file());
}

#[test]
fn file_publisher_mirrors_run_and_models() {
    let temp = tempdir().unwrap();
    let store = connect(&store_settings(common::seed_store(temp.path()))).unwrap();
    let mut settings = common::settings(temp.path());
    let remote = temp.path().join("remote");
    settings.publisher = Some(PublisherSettings {
        target: format!("file://{}", remote.display()),
    });
    let run = RunConfig::new(&settings.artifact_dir, settings.final_model_dir.clone(), TIMESTAMP);

    let outcome = TrainingPipeline::new(settings, run, store.as_ref(), common::DATABASE)
        .run()
        .expect("pipeline run");

    let publish = outcome.publish.expect("publish artifact");
    assert!(publish.model_url.ends_with(&format!("/models/{TIMESTAMP}/")));
    assert!(remote.join("models").join(TIMESTAMP).join("model.json").is_file());
    assert!(
        remote
            .join("artifacts")
            .join(TIMESTAMP)
            .join("run_manifest.yaml")
            .is_file()
    );
}

#[test]
fn skip_publish_leaves_remote_untouched() {
    let temp = tempdir().unwrap();
    let store = connect(&store_settings(common::seed_store(temp.path()))).unwrap();
    let mut settings = common::settings(temp.path());
    let remote = temp.path().join("remote");
    settings.publisher = Some(PublisherSettings {
        target: format!("file://{}", remote.display()),
    });
    let run = RunConfig::new(&settings.artifact_dir, settings.final_model_dir.clone(), TIMESTAMP);

    let outcome = TrainingPipeline::new(settings, run, store.as_ref(), common::DATABASE)
        .skip_publish(true)
        .run()
        .expect("pipeline run");
    assert!(outcome.publish.is_none());
    assert!(!remote.exists());
}

#[test]
fn unknown_candidate_parameter_fails_before_ingestion() {
    let temp = tempdir().unwrap();
    let store = connect(&store_settings(common::seed_store(temp.path()))).unwrap();
    let settings = common::settings(temp.path());
    fs::write(
        &settings.model_params_path,
        "models:\n  tree:\n    model: decision_tree\n    params:\n      depth: [2]\n",
    )
    .unwrap();
    let run = RunConfig::new(&settings.artifact_dir, settings.final_model_dir.clone(), TIMESTAMP);
    let artifact_root = run.artifact_root.clone();

    let err = TrainingPipeline::new(settings, run, store.as_ref(), common::DATABASE)
        .run()
        .unwrap_err();
    assert_eq!(err.kind(), "config");
    assert_eq!(err.tag(), "TrainingPipeline::validate_candidates");
    assert!(!artifact_root.exists());
}

#[test]
fn missing_collection_is_an_ingestion_error() {
    let temp = tempdir().unwrap();
    let store = connect(&store_settings(common::seed_store(temp.path()))).unwrap();
    let mut settings = common::settings(temp.path());
    settings.ingestion.collection = "absent".into();
    let run = RunConfig::new(&settings.artifact_dir, settings.final_model_dir.clone(), TIMESTAMP);

    let err = TrainingPipeline::new(settings, run, store.as_ref(), common::DATABASE)
        .run()
        .unwrap_err();
    assert_eq!(err.kind(), "ingestion");
    assert_eq!(err.tag(), "DataIngestion::export");
}
