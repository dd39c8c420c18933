use std::path::PathBuf;

use thiserror::Error;

pub type StageResult<T> = std::result::Result<T, PipelineError>;

/// Errors that abort a pipeline run.
///
/// Every variant carries the `Component::operation` tag of the place that failed
/// and, where one exists, the underlying cause.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[{tag}] ingestion failed: {source:#}")]
    Ingestion {
        tag: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("[{tag}] validation failed: {source:#}")]
    Validation {
        tag: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Validation produced `status = false` while `enforce_validation` is enabled.
    #[error("[{tag}] data rejected by validation; see drift report at {}", report.display())]
    ValidationRejected { tag: &'static str, report: PathBuf },

    #[error("[{tag}] transformation failed: {source:#}")]
    Transformation {
        tag: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("[{tag}] training failed: {source:#}")]
    Training {
        tag: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("[{tag}] trained model was not persisted to {}", path.display())]
    Persistence { tag: &'static str, path: PathBuf },

    #[error("[{tag}] publish failed: {source:#}")]
    Publish {
        tag: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("[{tag}] configuration error: {source:#}")]
    Config {
        tag: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn ingestion(tag: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Ingestion { tag, source }
    }

    pub fn validation(tag: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Validation { tag, source }
    }

    pub fn transformation(tag: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Transformation { tag, source }
    }

    pub fn training(tag: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Training { tag, source }
    }

    pub fn publish(tag: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Publish { tag, source }
    }

    pub fn config(tag: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Config { tag, source }
    }

    /// Short stage name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ingestion { .. } => "ingestion",
            Self::Validation { .. } | Self::ValidationRejected { .. } => "validation",
            Self::Transformation { .. } => "transformation",
            Self::Training { .. } | Self::Persistence { .. } => "training",
            Self::Publish { .. } => "publish",
            Self::Config { .. } => "config",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ingestion { tag, .. }
            | Self::Validation { tag, .. }
            | Self::ValidationRejected { tag, .. }
            | Self::Transformation { tag, .. }
            | Self::Training { tag, .. }
            | Self::Persistence { tag, .. }
            | Self::Publish { tag, .. }
            | Self::Config { tag, .. } => tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn constructors_attach_tag_and_source() {
        let err = Err::<(), _>(anyhow!("connection refused"))
            .map_err(PipelineError::ingestion("DataIngestion::export"))
            .unwrap_err();
        assert_eq!(err.kind(), "ingestion");
        assert_eq!(err.tag(), "DataIngestion::export");
        let rendered = err.to_string();
        assert!(rendered.contains("DataIngestion::export"));
        assert!(rendered.contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn persistence_reports_missing_path() {
        let err = PipelineError::Persistence {
            tag: "ModelTrainer::persist",
            path: PathBuf::from("/tmp/model.json"),
        };
        assert_eq!(err.kind(), "training");
        assert!(err.to_string().contains("/tmp/model.json"));
    }
}
