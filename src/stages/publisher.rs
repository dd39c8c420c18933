use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail, ensure};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::artifact::PublishArtifact;
use crate::config::PublisherPaths;
use crate::error::{PipelineError, StageResult};
use crate::stages::Stage;

/// One-way mirror of a local directory onto a remote location.
pub trait SyncBackend: Send + Sync {
    /// Returns the number of files transferred, when the backend knows it.
    fn sync(&self, local: &Path, remote: &str) -> Result<Option<usize>>;
}

/// `file://` targets: recursive copy, overwriting files that already exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileMirror;

impl SyncBackend for FileMirror {
    fn sync(&self, local: &Path, remote: &str) -> Result<Option<usize>> {
        let target = file_url_path(remote)?;
        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create directory: {}", target.display()))?;
        let mut copied = 0;
        for entry in WalkDir::new(local).min_depth(1) {
            let entry = entry.with_context(|| format!("Failed to walk {}", local.display()))?;
            let relative = entry.path().strip_prefix(local)?;
            let destination = target.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&destination).with_context(|| {
                    format!("Failed to create directory: {}", destination.display())
                })?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &destination).with_context(|| {
                    format!(
                        "Failed to copy {} to {}",
                        entry.path().display(),
                        destination.display()
                    )
                })?;
                copied += 1;
            }
        }
        Ok(Some(copied))
    }
}

/// `s3://` targets, delegated to `aws s3 sync`.
#[derive(Debug, Clone)]
pub struct AwsCliSync {
    program: String,
}

impl Default for AwsCliSync {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
        }
    }
}

impl AwsCliSync {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SyncBackend for AwsCliSync {
    fn sync(&self, local: &Path, remote: &str) -> Result<Option<usize>> {
        let output = Command::new(&self.program)
            .args(["s3", "sync"])
            .arg(local)
            .arg(remote)
            .output()
            .with_context(|| format!("Failed to launch `{} s3 sync`", self.program))?;
        if !output.status.success() {
            bail!(
                "`{} s3 sync` exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(None)
    }
}

fn scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

fn file_url_path(url: &str) -> Result<PathBuf> {
    let Some(path) = url.strip_prefix("file://") else {
        bail!("not a file:// URL: {url}");
    };
    ensure!(!path.is_empty(), "file:// URL has no path: {url}");
    Ok(PathBuf::from(path))
}

pub fn backend_for(url: &str) -> Result<Box<dyn SyncBackend>> {
    match scheme(url) {
        Some("file") => Ok(Box::new(FileMirror)),
        Some("s3") => Ok(Box::new(AwsCliSync::default())),
        Some(other) => bail!("Unsupported publish target scheme '{other}' in {url}"),
        None => bail!("Publish target must be a URL with a scheme, got '{url}'"),
    }
}

/// Mirrors the run's artifact tree and the production model directory.
pub struct ModelPublisher {
    paths: PublisherPaths,
    backend: Box<dyn SyncBackend>,
}

impl ModelPublisher {
    pub fn new(paths: PublisherPaths) -> Result<Self> {
        let backend = backend_for(&paths.remote_artifact_url)?;
        Ok(Self { paths, backend })
    }

    pub fn with_backend(paths: PublisherPaths, backend: Box<dyn SyncBackend>) -> Self {
        Self { paths, backend }
    }

    fn mirror(&self, local: &Path, remote: &str) -> Result<()> {
        ensure!(
            local.is_dir(),
            "Local directory does not exist: {}",
            local.display()
        );
        let copied = self.backend.sync(local, remote)?;
        debug!(local = %local.display(), remote, files = ?copied, "Directory mirrored");
        Ok(())
    }
}

impl Stage for ModelPublisher {
    type Input = ();
    type Output = PublishArtifact;

    fn name(&self) -> &'static str {
        "model_publisher"
    }

    fn run(&self, _input: ()) -> StageResult<PublishArtifact> {
        self.mirror(&self.paths.local_artifact_dir, &self.paths.remote_artifact_url)
            .map_err(PipelineError::publish("ModelPublisher::sync_artifacts"))?;
        self.mirror(&self.paths.local_model_dir, &self.paths.remote_model_url)
            .map_err(PipelineError::publish("ModelPublisher::sync_models"))?;
        info!(
            artifacts = self.paths.remote_artifact_url.as_str(),
            models = self.paths.remote_model_url.as_str(),
            "Run published"
        );
        Ok(PublishArtifact {
            artifact_url: self.paths.remote_artifact_url.clone(),
            model_url: self.paths.remote_model_url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::config::RunConfig;

    fn seed_run(root: &Path) -> RunConfig {
        let run = RunConfig::new(root.join("artifacts"), root.join("final"), "01_01_2025_00_00_00");
        let nested = run.artifact_root.join("model_trainer/trained_model");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("model.json"), b"{}").unwrap();
        fs::create_dir_all(&run.final_model_dir).unwrap();
        fs::write(run.final_model_dir.join("model.json"), b"{}").unwrap();
        run
    }

    #[test]
    fn file_target_mirrors_both_trees() {
        let temp = tempdir().unwrap();
        let run = seed_run(temp.path());
        let remote = format!("file://{}", temp.path().join("remote").display());
        let publisher = ModelPublisher::new(run.publisher(&remote)).unwrap();

        let artifact = publisher.run(()).unwrap();
        assert!(artifact.artifact_url.ends_with("/artifacts/01_01_2025_00_00_00/"));
        let remote_root = temp.path().join("remote");
        assert!(
            remote_root
                .join("artifacts/01_01_2025_00_00_00/model_trainer/trained_model/model.json")
                .is_file()
        );
        assert!(
            remote_root
                .join("models/01_01_2025_00_00_00/model.json")
                .is_file()
        );
    }

    #[test]
    fn missing_local_directory_is_a_publish_error() {
        let temp = tempdir().unwrap();
        let run = RunConfig::new(temp.path().join("artifacts"), temp.path().join("final"), "ts");
        let remote = format!("file://{}", temp.path().join("remote").display());
        let err = ModelPublisher::new(run.publisher(&remote))
            .unwrap()
            .run(())
            .unwrap_err();
        assert_eq!(err.kind(), "publish");
        assert_eq!(err.tag(), "ModelPublisher::sync_artifacts");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = backend_for("ftp://host/models").err().unwrap();
        assert!(err.to_string().contains("ftp"));
        assert!(backend_for("no-scheme").is_err());
        assert!(backend_for("s3://bucket").is_ok());
    }

    #[test]
    fn failing_sync_command_is_reported() {
        let temp = tempdir().unwrap();
        let run = seed_run(temp.path());
        let publisher = ModelPublisher::with_backend(
            run.publisher("s3://bucket"),
            Box::new(AwsCliSync::with_program("phishnet-no-such-binary")),
        );
        let err = publisher.run(()).unwrap_err();
        assert_eq!(err.kind(), "publish");
    }
}
