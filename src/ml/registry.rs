use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};

use crate::ml::models::{
    AdaBoostConfig, DecisionTreeConfig, Estimator, GradientBoostingConfig, KNeighborsConfig,
    LogisticRegressionConfig, ModelFamily, RandomForestConfig,
};
use crate::ml::search::expand_grid;
use crate::settings::HyperparameterFile;

/// One concrete hyperparameter assignment.
pub type ModelParameters = Map<String, Value>;

type EstimatorConstructor =
    Arc<dyn Fn(ModelParameters) -> Result<Box<dyn Estimator>> + Send + Sync>;

/// Explicit mapping from family id to estimator constructor.
#[derive(Clone)]
pub struct ModelRegistry {
    factories: HashMap<ModelFamily, EstimatorConstructor>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ModelFamily::LogisticRegression, |params| {
            Ok(Box::new(LogisticRegressionConfig::from_params(params)?))
        });
        registry.register(ModelFamily::KNeighbors, |params| {
            Ok(Box::new(KNeighborsConfig::from_params(params)?))
        });
        registry.register(ModelFamily::DecisionTree, |params| {
            Ok(Box::new(DecisionTreeConfig::from_params(params)?))
        });
        registry.register(ModelFamily::RandomForest, |params| {
            Ok(Box::new(RandomForestConfig::from_params(params)?))
        });
        registry.register(ModelFamily::AdaBoost, |params| {
            Ok(Box::new(AdaBoostConfig::from_params(params)?))
        });
        registry.register(ModelFamily::GradientBoosting, |params| {
            Ok(Box::new(GradientBoostingConfig::from_params(params)?))
        });
        registry
    }

    pub fn register<F>(&mut self, family: ModelFamily, constructor: F)
    where
        F: Fn(ModelParameters) -> Result<Box<dyn Estimator>> + Send + Sync + 'static,
    {
        self.factories.insert(family, Arc::new(constructor));
    }

    pub fn create(&self, family: ModelFamily, params: ModelParameters) -> Result<Box<dyn Estimator>> {
        let factory = self.factories.get(&family).ok_or_else(|| {
            anyhow!(
                "Model family '{}' is not registered. Available families: {}",
                family,
                self.known_families()
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;
        factory(params)
    }

    pub fn is_registered(&self, family: ModelFamily) -> bool {
        self.factories.contains_key(&family)
    }

    pub fn known_families(&self) -> Vec<ModelFamily> {
        let mut families: Vec<_> = self.factories.keys().copied().collect();
        families.sort();
        families
    }

    /// Construct every grid point of every candidate so that bad ids or
    /// parameters fail before any training starts.
    pub fn validate(&self, file: &HyperparameterFile) -> Result<usize> {
        let mut combinations = 0;
        for (name, candidate) in &file.models {
            let grid = expand_grid(&candidate.params);
            for params in grid {
                self.create(candidate.model, params.clone()).with_context(|| {
                    format!(
                        "Candidate '{name}' ({}) rejects parameters {}",
                        candidate.model,
                        Value::Object(params)
                    )
                })?;
                combinations += 1;
            }
        }
        Ok(combinations)
    }
}
