//! Experiment-tracking sinks. Failures here are reported to the caller, which
//! logs them and carries on.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::ml::registry::ModelParameters;
use crate::settings::TrackingSettings;

pub trait ExperimentTracker: Send + Sync {
    fn record_run(&self, metrics: &BTreeMap<String, f64>, params: &ModelParameters) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl ExperimentTracker for NoopTracker {
    fn record_run(&self, _metrics: &BTreeMap<String, f64>, _params: &ModelParameters) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per recorded run.
#[derive(Debug, Clone)]
pub struct JsonlTracker {
    path: PathBuf,
}

#[derive(Serialize)]
struct TrackedRun<'a> {
    recorded_at: String,
    metrics: &'a BTreeMap<String, f64>,
    params: &'a ModelParameters,
}

impl JsonlTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExperimentTracker for JsonlTracker {
    fn record_run(&self, metrics: &BTreeMap<String, f64>, params: &ModelParameters) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let line = serde_json::to_string(&TrackedRun {
            recorded_at: Utc::now().to_rfc3339(),
            metrics,
            params,
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open tracking log: {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("Failed to append to tracking log: {}", self.path.display()))
    }
}

pub fn tracker_from_settings(settings: &TrackingSettings) -> Box<dyn ExperimentTracker> {
    match settings {
        TrackingSettings::None => Box::new(NoopTracker),
        TrackingSettings::Jsonl { path } => Box::new(JsonlTracker::new(path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn jsonl_tracker_appends_one_line_per_run() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("runs/tracking.jsonl");
        let tracker = tracker_from_settings(&TrackingSettings::Jsonl { path: path.clone() });

        let mut metrics = BTreeMap::new();
        metrics.insert("test_f1".to_string(), 0.9);
        let mut params = ModelParameters::new();
        params.insert("max_depth".into(), json!(3));
        tracker.record_run(&metrics, &params).unwrap();
        tracker.record_run(&metrics, &params).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["metrics"]["test_f1"], json!(0.9));
        assert_eq!(parsed["params"]["max_depth"], json!(3));
    }
}
