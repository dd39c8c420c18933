//! Digest manifest written at the root of every completed run.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::artifact::{ClassificationMetrics, TrainerArtifact};
use crate::config::RunConfig;
use crate::ml::registry::ModelParameters;
use crate::settings::PipelineSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    pub pipeline_name: String,
    pub timestamp: String,
    pub generated_at: DateTime<Utc>,
    pub settings_sha256: String,
    pub model: ManifestModel,
    pub artifacts: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestModel {
    pub name: String,
    pub params: ModelParameters,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub train_metrics: ClassificationMetrics,
    pub test_metrics: ClassificationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

/// Hex SHA-256 of a file's contents and the number of bytes hashed.
pub fn compute_sha256(path: &Path) -> Result<(String, u64)> {
    let mut file =
        File::open(path).with_context(|| format!("Cannot hash {}", path.display()))?;
    let mut hasher = Sha256::new();
    let bytes = io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed reading {} while hashing", path.display()))?;
    Ok((hex_digest(hasher), bytes))
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn entry(path: &Path) -> Result<ManifestEntry> {
    let (sha256, bytes) = compute_sha256(path)?;
    Ok(ManifestEntry {
        path: path.to_path_buf(),
        sha256,
        bytes,
    })
}

impl RunManifest {
    /// Digest every file under the run root plus the production model files.
    pub fn build(
        run: &RunConfig,
        settings: &PipelineSettings,
        trainer: &TrainerArtifact,
    ) -> Result<Self> {
        let manifest_path = run.manifest_file();
        let mut artifacts = Vec::new();
        for item in WalkDir::new(&run.artifact_root).sort_by_file_name() {
            let item = item
                .with_context(|| format!("Failed to walk {}", run.artifact_root.display()))?;
            if item.file_type().is_file() && item.path() != manifest_path {
                artifacts.push(entry(item.path())?);
            }
        }
        let final_preprocessor = run.transformation().final_preprocessor_file;
        for path in [&final_preprocessor, &trainer.final_model_file_path] {
            if path.is_file() {
                artifacts.push(entry(path)?);
            }
        }

        let settings_yaml =
            serde_yaml::to_string(settings).context("Failed to serialize settings")?;
        Ok(Self {
            pipeline_name: settings.pipeline_name.clone(),
            timestamp: run.timestamp.clone(),
            generated_at: Utc::now(),
            settings_sha256: {
                let mut hasher = Sha256::new();
                hasher.update(settings_yaml.as_bytes());
                hex_digest(hasher)
            },
            model: ManifestModel {
                name: trainer.best_model_name.clone(),
                params: trainer.best_params.clone(),
                train_accuracy: trainer.train_accuracy,
                test_accuracy: trainer.test_accuracy,
                train_metrics: trainer.train_metrics,
                test_metrics: trainer.test_metrics,
            },
            artifacts,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create run manifest: {}", path.display()))?;
        serde_yaml::to_writer(file, self)
            .with_context(|| format!("Failed to write run manifest: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn metrics() -> ClassificationMetrics {
        ClassificationMetrics {
            f1_score: 0.5,
            precision_score: 0.5,
            recall_score: 0.5,
        }
    }

    #[test]
    fn sha256_of_known_content_reports_length() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();
        let (digest, bytes) = compute_sha256(&path).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(bytes, 3);
    }

    #[test]
    fn sha256_of_empty_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();
        let (digest, bytes) = compute_sha256(&path).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(bytes, 0);
    }

    #[test]
    fn hashing_missing_file_fails() {
        let temp = tempdir().unwrap();
        assert!(compute_sha256(&temp.path().join("absent")).is_err());
    }

    #[test]
    fn manifest_lists_run_files_and_final_model() {
        let temp = tempdir().unwrap();
        let run = RunConfig::new(temp.path().join("artifacts"), temp.path().join("final"), "ts");
        let trainer_paths = run.trainer();
        fs::create_dir_all(trainer_paths.trained_model_file.parent().unwrap()).unwrap();
        fs::write(&trainer_paths.trained_model_file, b"{}").unwrap();
        fs::create_dir_all(&run.final_model_dir).unwrap();
        fs::write(&trainer_paths.final_model_file, b"{}").unwrap();
        fs::write(run.manifest_file(), b"stale").unwrap();

        let trainer = TrainerArtifact {
            trained_model_file_path: trainer_paths.trained_model_file.clone(),
            final_model_file_path: trainer_paths.final_model_file.clone(),
            best_model_name: "forest".into(),
            best_params: ModelParameters::new(),
            train_accuracy: 1.0,
            test_accuracy: 0.9,
            train_metrics: metrics(),
            test_metrics: metrics(),
            candidate_test_accuracy: BTreeMap::new(),
        };
        let manifest = RunManifest::build(&run, &PipelineSettings::default(), &trainer).unwrap();
        manifest.write(&run.manifest_file()).unwrap();

        let paths: Vec<_> = manifest.artifacts.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![trainer_paths.trained_model_file, trainer_paths.final_model_file]
        );
        assert_eq!(manifest.model.name, "forest");
        assert_eq!(manifest.settings_sha256.len(), 64);
        assert!(manifest.artifacts.iter().all(|e| e.bytes == 2));

        let reread: RunManifest =
            serde_yaml::from_str(&fs::read_to_string(run.manifest_file()).unwrap()).unwrap();
        assert_eq!(reread.artifacts.len(), 2);
    }
}
