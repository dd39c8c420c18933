use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use ndarray::Array1;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ml::imputer::Preprocessor;
use crate::ml::models::Classifier;
use crate::table::Table;

/// Fitted preprocessor and classifier persisted as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositePredictor {
    preprocessor: Preprocessor,
    classifier: Classifier,
}

impl CompositePredictor {
    pub fn new(preprocessor: Preprocessor, classifier: Classifier) -> Result<Self> {
        let expected = preprocessor.feature_columns().len();
        ensure!(
            expected == 0 || expected == classifier.n_features(),
            "preprocessor produces {expected} feature(s) but classifier expects {}",
            classifier.n_features()
        );
        Ok(Self {
            preprocessor,
            classifier,
        })
    }

    /// Rebuild from the two files kept in the production model directory.
    pub fn from_files(preprocessor_path: &Path, model_path: &Path) -> Result<Self> {
        for path in [preprocessor_path, model_path] {
            ensure!(path.is_file(), "Model file not found at {}", path.display());
        }
        let preprocessor: Preprocessor = read_json(preprocessor_path)?;
        let classifier: Classifier = read_json(model_path)?;
        Self::new(preprocessor, classifier)
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn predict(&self, features: &Table) -> Result<Array1<f64>> {
        let transformed = self.preprocessor.transform(features)?;
        self.classifier.predict(transformed.view())
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&content)
        .with_context(|| format!("Failed to deserialize {}", path.display()))
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use tempfile::tempdir;

    use super::*;
    use crate::ml::imputer::build_transformer;
    use crate::ml::models::{DecisionTreeConfig, Estimator};
    use crate::settings::ImputerSettings;

    fn fitted() -> (Table, CompositePredictor) {
        let train = Table::new(
            vec!["a".into(), "b".into()],
            array![
                [0.0, 1.0],
                [1.0, f64::NAN],
                [2.0, 1.0],
                [8.0, 0.0],
                [9.0, 0.0],
                [10.0, f64::NAN]
            ],
        )
        .unwrap();
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut pre = build_transformer(&ImputerSettings::default()).unwrap();
        let x = pre.fit_transform(&train).unwrap();
        let model = DecisionTreeConfig::default()
            .fit(x.view(), y.view(), 0)
            .unwrap();
        (train, CompositePredictor::new(pre, model).unwrap())
    }

    #[test]
    fn composite_equals_transform_then_predict() {
        let (train, composite) = fitted();
        let manual = composite
            .classifier()
            .predict(composite.preprocessor().transform(&train).unwrap().view())
            .unwrap();
        assert_eq!(composite.predict(&train).unwrap(), manual);
    }

    #[test]
    fn reloads_from_split_files() {
        let (train, composite) = fitted();
        let temp = tempdir().unwrap();
        let pre_path = temp.path().join("final/preprocessing.json");
        let model_path = temp.path().join("final/model.json");
        write_json(&pre_path, composite.preprocessor()).unwrap();
        write_json(&model_path, composite.classifier()).unwrap();

        let restored = CompositePredictor::from_files(&pre_path, &model_path).unwrap();
        assert_eq!(
            restored.predict(&train).unwrap(),
            composite.predict(&train).unwrap()
        );
    }

    #[test]
    fn missing_model_file_is_reported() {
        let temp = tempdir().unwrap();
        let err = CompositePredictor::from_files(
            &temp.path().join("preprocessing.json"),
            &temp.path().join("model.json"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
