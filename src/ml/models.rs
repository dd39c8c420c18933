//! Candidate classifier families.
//!
//! Each family has an unfitted configuration implementing [`Estimator`] and a
//! fitted form stored inside [`Classifier`]. Labels are `{0, 1}`; a row is
//! predicted positive when its positive-class score exceeds one half.

use std::fmt;

use anyhow::{Result, anyhow, bail, ensure};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ml::imputer::NeighborWeights;
use crate::ml::registry::ModelParameters;
use crate::ml::tree::{Criterion, MaxFeatures, Tree, TreeParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    #[serde(alias = "LogisticRegression")]
    LogisticRegression,
    #[serde(alias = "KNeighborsClassifier", alias = "knn")]
    KNeighbors,
    #[serde(alias = "DecisionTreeClassifier")]
    DecisionTree,
    #[serde(alias = "RandomForestClassifier")]
    RandomForest,
    #[serde(alias = "AdaBoostClassifier")]
    AdaBoost,
    #[serde(alias = "GradientBoostingClassifier")]
    GradientBoosting,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 6] = [
        ModelFamily::LogisticRegression,
        ModelFamily::KNeighbors,
        ModelFamily::DecisionTree,
        ModelFamily::RandomForest,
        ModelFamily::AdaBoost,
        ModelFamily::GradientBoosting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LogisticRegression => "logistic_regression",
            Self::KNeighbors => "k_neighbors",
            Self::DecisionTree => "decision_tree",
            Self::RandomForest => "random_forest",
            Self::AdaBoost => "ada_boost",
            Self::GradientBoosting => "gradient_boosting",
        }
    }

    /// Parameters the family accepts in a hyperparameter grid.
    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            Self::LogisticRegression => &["C", "max_iter", "tol", "learning_rate"],
            Self::KNeighbors => &["n_neighbors", "weights", "p"],
            Self::DecisionTree => &TREE_PARAMS,
            Self::RandomForest => &[
                "n_estimators",
                "criterion",
                "max_depth",
                "min_samples_split",
                "min_samples_leaf",
                "max_features",
                "bootstrap",
            ],
            Self::AdaBoost => &["n_estimators", "learning_rate"],
            Self::GradientBoosting => &[
                "n_estimators",
                "learning_rate",
                "max_depth",
                "min_samples_split",
                "min_samples_leaf",
                "subsample",
            ],
        }
    }
}

const TREE_PARAMS: [&str; 5] = [
    "criterion",
    "max_depth",
    "min_samples_split",
    "min_samples_leaf",
    "max_features",
];

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unfitted model configuration.
pub trait Estimator: Send + Sync + fmt::Debug {
    fn family(&self) -> ModelFamily;
    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, seed: u64) -> Result<Classifier>;
}

/// A fitted model of any family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Classifier {
    LogisticRegression(LogisticModel),
    KNeighbors(NeighborsModel),
    DecisionTree(TreeModel),
    RandomForest(ForestModel),
    AdaBoost(AdaBoostModel),
    GradientBoosting(BoostedModel),
}

impl Classifier {
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::LogisticRegression(_) => ModelFamily::LogisticRegression,
            Self::KNeighbors(_) => ModelFamily::KNeighbors,
            Self::DecisionTree(_) => ModelFamily::DecisionTree,
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::AdaBoost(_) => ModelFamily::AdaBoost,
            Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Self::LogisticRegression(m) => m.coefficients.len(),
            Self::KNeighbors(m) => m.samples.ncols(),
            Self::DecisionTree(m) => m.tree.n_features(),
            Self::RandomForest(m) => m.n_features,
            Self::AdaBoost(m) => m.n_features,
            Self::GradientBoosting(m) => m.n_features,
        }
    }

    /// Positive-class score in `[0, 1]` for every row.
    pub fn score(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        ensure!(
            x.ncols() == self.n_features(),
            "{} model expects {} feature(s), received {}",
            self.family(),
            self.n_features(),
            x.ncols()
        );
        Ok(match self {
            Self::LogisticRegression(m) => m.score(x),
            Self::KNeighbors(m) => m.score(x),
            Self::DecisionTree(m) => m.tree.predict(x),
            Self::RandomForest(m) => m.score(x),
            Self::AdaBoost(m) => m.score(x),
            Self::GradientBoosting(m) => m.score(x),
        })
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        Ok(self.score(x)?.mapv(|p| if p > 0.5 { 1.0 } else { 0.0 }))
    }
}

fn check_training_data(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
    ensure!(x.nrows() > 0, "training data is empty");
    ensure!(
        x.nrows() == y.len(),
        "training data has {} row(s) but {} label(s)",
        x.nrows(),
        y.len()
    );
    ensure!(
        x.iter().all(|v| v.is_finite()),
        "training data contains missing or non-finite values"
    );
    if let Some(bad) = y.iter().find(|v| **v != 0.0 && **v != 1.0) {
        bail!("labels must be 0 or 1, found {bad}");
    }
    Ok(())
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

// ---------------------------------------------------------------------------
// Logistic regression

#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegressionConfig {
    /// Inverse L2 regularization strength.
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub learning_rate: f64,
}

impl Default for LogisticRegressionConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 200,
            tol: 1e-4,
            learning_rate: 0.5,
        }
    }
}

impl LogisticRegressionConfig {
    pub fn from_params(mut params: ModelParameters) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            c: take_f64(&mut params, "C")?.unwrap_or(defaults.c),
            max_iter: take_usize(&mut params, "max_iter")?.unwrap_or(defaults.max_iter),
            tol: take_f64(&mut params, "tol")?.unwrap_or(defaults.tol),
            learning_rate: take_f64(&mut params, "learning_rate")?
                .unwrap_or(defaults.learning_rate),
        };
        reject_unknown(&params, ModelFamily::LogisticRegression)?;
        ensure!(config.c > 0.0, "C must be positive");
        ensure!(config.learning_rate > 0.0, "learning_rate must be positive");
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    offset: Vec<f64>,
    scale: Vec<f64>,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl Estimator for LogisticRegressionConfig {
    fn family(&self) -> ModelFamily {
        ModelFamily::LogisticRegression
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, _seed: u64) -> Result<Classifier> {
        check_training_data(x, y)?;
        let n = x.nrows() as f64;
        let offset = x
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow!("cannot standardize empty training data"))?;
        let scale = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
        let z: Array2<f64> = (&x - &offset) / &scale;

        let mut w = Array1::<f64>::zeros(z.ncols());
        let mut b = 0.0;
        let penalty = 1.0 / (self.c * n);
        for _ in 0..self.max_iter {
            let residual = (z.dot(&w) + b).mapv(sigmoid) - y;
            let grad_w = z.t().dot(&residual) / n + &w * penalty;
            let grad_b = residual.sum() / n;
            w.scaled_add(-self.learning_rate, &grad_w);
            b -= self.learning_rate * grad_b;
            let largest = grad_w.iter().fold(grad_b.abs(), |acc, g| acc.max(g.abs()));
            if largest < self.tol {
                break;
            }
        }

        Ok(Classifier::LogisticRegression(LogisticModel {
            offset: offset.to_vec(),
            scale: scale.to_vec(),
            coefficients: w.to_vec(),
            intercept: b,
        }))
    }
}

impl LogisticModel {
    fn score(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        x.rows()
            .into_iter()
            .map(|row| {
                let logit = row
                    .iter()
                    .zip(&self.offset)
                    .zip(&self.scale)
                    .zip(&self.coefficients)
                    .map(|(((v, o), s), w)| (v - o) / s * w)
                    .sum::<f64>()
                    + self.intercept;
                sigmoid(logit)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// k-nearest neighbours

#[derive(Debug, Clone, PartialEq)]
pub struct KNeighborsConfig {
    pub n_neighbors: usize,
    pub weights: NeighborWeights,
    /// Minkowski power: 1 for manhattan, 2 for euclidean.
    pub p: u32,
}

impl Default for KNeighborsConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            weights: NeighborWeights::Uniform,
            p: 2,
        }
    }
}

impl KNeighborsConfig {
    pub fn from_params(mut params: ModelParameters) -> Result<Self> {
        let defaults = Self::default();
        let weights = match take_string(&mut params, "weights")? {
            None => defaults.weights,
            Some(raw) => match raw.as_str() {
                "uniform" => NeighborWeights::Uniform,
                "distance" => NeighborWeights::Distance,
                other => bail!("weights must be 'uniform' or 'distance', found '{other}'"),
            },
        };
        let config = Self {
            n_neighbors: take_usize(&mut params, "n_neighbors")?.unwrap_or(defaults.n_neighbors),
            weights,
            p: take_usize(&mut params, "p")?
                .map(|p| p as u32)
                .unwrap_or(defaults.p),
        };
        reject_unknown(&params, ModelFamily::KNeighbors)?;
        ensure!(config.n_neighbors >= 1, "n_neighbors must be at least 1");
        ensure!(matches!(config.p, 1 | 2), "p must be 1 or 2");
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborsModel {
    n_neighbors: usize,
    weights: NeighborWeights,
    p: u32,
    samples: Array2<f64>,
    labels: Array1<f64>,
}

impl Estimator for KNeighborsConfig {
    fn family(&self) -> ModelFamily {
        ModelFamily::KNeighbors
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, _seed: u64) -> Result<Classifier> {
        check_training_data(x, y)?;
        Ok(Classifier::KNeighbors(NeighborsModel {
            n_neighbors: self.n_neighbors,
            weights: self.weights,
            p: self.p,
            samples: x.to_owned(),
            labels: y.to_owned(),
        }))
    }
}

impl NeighborsModel {
    fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        let diffs = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs());
        if self.p == 1 {
            diffs.sum()
        } else {
            diffs.map(|d| d * d).sum::<f64>().sqrt()
        }
    }

    fn score(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let k = self.n_neighbors.min(self.samples.nrows());
        x.rows()
            .into_iter()
            .map(|row| {
                let mut nearest: Vec<(f64, usize)> = self
                    .samples
                    .rows()
                    .into_iter()
                    .enumerate()
                    .map(|(idx, sample)| (self.distance(row, sample), idx))
                    .collect();
                nearest.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                nearest.truncate(k);

                match self.weights {
                    NeighborWeights::Uniform => {
                        nearest.iter().map(|(_, i)| self.labels[*i]).sum::<f64>() / k as f64
                    }
                    NeighborWeights::Distance => {
                        let exact: Vec<f64> = nearest
                            .iter()
                            .filter(|(d, _)| *d == 0.0)
                            .map(|(_, i)| self.labels[*i])
                            .collect();
                        if !exact.is_empty() {
                            return exact.iter().sum::<f64>() / exact.len() as f64;
                        }
                        let (num, den) = nearest.iter().fold((0.0, 0.0), |(num, den), (d, i)| {
                            (num + self.labels[*i] / d, den + 1.0 / d)
                        });
                        num / den
                    }
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Decision tree

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecisionTreeConfig {
    pub tree: TreeParams,
}

impl DecisionTreeConfig {
    pub fn from_params(mut params: ModelParameters) -> Result<Self> {
        let tree = take_tree_params(&mut params, TreeParams::default())?;
        reject_unknown(&params, ModelFamily::DecisionTree)?;
        Ok(Self { tree })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    tree: Tree,
}

impl Estimator for DecisionTreeConfig {
    fn family(&self) -> ModelFamily {
        ModelFamily::DecisionTree
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, seed: u64) -> Result<Classifier> {
        check_training_data(x, y)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let tree = Tree::fit(x, y, None, &self.tree, &mut rng)?;
        Ok(Classifier::DecisionTree(TreeModel { tree }))
    }
}

// ---------------------------------------------------------------------------
// Random forest

#[derive(Debug, Clone, PartialEq)]
pub struct RandomForestConfig {
    pub n_estimators: usize,
    pub tree: TreeParams,
    pub bootstrap: bool,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams {
                max_features: MaxFeatures::Sqrt,
                ..TreeParams::default()
            },
            bootstrap: true,
        }
    }
}

impl RandomForestConfig {
    pub fn from_params(mut params: ModelParameters) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            n_estimators: take_usize(&mut params, "n_estimators")?
                .unwrap_or(defaults.n_estimators),
            tree: take_tree_params(&mut params, defaults.tree)?,
            bootstrap: take_bool(&mut params, "bootstrap")?.unwrap_or(defaults.bootstrap),
        };
        reject_unknown(&params, ModelFamily::RandomForest)?;
        ensure!(config.n_estimators >= 1, "n_estimators must be at least 1");
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    n_features: usize,
    trees: Vec<Tree>,
}

impl Estimator for RandomForestConfig {
    fn family(&self) -> ModelFamily {
        ModelFamily::RandomForest
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, seed: u64) -> Result<Classifier> {
        check_training_data(x, y)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = x.nrows();
        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let tree = if self.bootstrap {
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let xs = x.select(Axis(0), &rows);
                let ys = y.select(Axis(0), &rows);
                Tree::fit(xs.view(), ys.view(), None, &self.tree, &mut rng)?
            } else {
                Tree::fit(x, y, None, &self.tree, &mut rng)?
            };
            trees.push(tree);
        }
        Ok(Classifier::RandomForest(ForestModel {
            n_features: x.ncols(),
            trees,
        }))
    }
}

impl ForestModel {
    fn score(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut total = Array1::<f64>::zeros(x.nrows());
        for tree in &self.trees {
            total += &tree.predict(x);
        }
        total / self.trees.len().max(1) as f64
    }
}

// ---------------------------------------------------------------------------
// AdaBoost (SAMME over depth-one stumps)

#[derive(Debug, Clone, PartialEq)]
pub struct AdaBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
}

impl Default for AdaBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            learning_rate: 1.0,
        }
    }
}

impl AdaBoostConfig {
    pub fn from_params(mut params: ModelParameters) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            n_estimators: take_usize(&mut params, "n_estimators")?
                .unwrap_or(defaults.n_estimators),
            learning_rate: take_f64(&mut params, "learning_rate")?
                .unwrap_or(defaults.learning_rate),
        };
        reject_unknown(&params, ModelFamily::AdaBoost)?;
        ensure!(config.n_estimators >= 1, "n_estimators must be at least 1");
        ensure!(config.learning_rate > 0.0, "learning_rate must be positive");
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaBoostModel {
    n_features: usize,
    stumps: Vec<(f64, Tree)>,
}

impl Estimator for AdaBoostConfig {
    fn family(&self) -> ModelFamily {
        ModelFamily::AdaBoost
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, seed: u64) -> Result<Classifier> {
        check_training_data(x, y)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let stump = TreeParams {
            max_depth: Some(1),
            ..TreeParams::default()
        };
        let n = x.nrows();
        let mut weights = vec![1.0 / n as f64; n];
        let mut stumps = Vec::new();

        for _ in 0..self.n_estimators {
            let tree = Tree::fit(x, y, Some(&weights), &stump, &mut rng)?;
            let missed: Vec<bool> = tree
                .predict(x)
                .iter()
                .zip(y.iter())
                .map(|(p, t)| (*p > 0.5) != (*t == 1.0))
                .collect();
            let total: f64 = weights.iter().sum();
            let error = missed
                .iter()
                .zip(&weights)
                .filter(|(m, _)| **m)
                .map(|(_, w)| w)
                .sum::<f64>()
                / total;

            if error <= 0.0 {
                stumps.push((1.0, tree));
                break;
            }
            if error >= 0.5 {
                if stumps.is_empty() {
                    stumps.push((1.0, tree));
                }
                break;
            }
            let alpha = self.learning_rate * ((1.0 - error) / error).ln();
            for (w, m) in weights.iter_mut().zip(&missed) {
                if *m {
                    *w *= alpha.exp();
                }
            }
            let norm: f64 = weights.iter().sum();
            weights.iter_mut().for_each(|w| *w /= norm);
            stumps.push((alpha, tree));
        }

        Ok(Classifier::AdaBoost(AdaBoostModel {
            n_features: x.ncols(),
            stumps,
        }))
    }
}

impl AdaBoostModel {
    fn score(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let total_alpha: f64 = self.stumps.iter().map(|(a, _)| a).sum();
        let mut votes = Array1::<f64>::zeros(x.nrows());
        for (alpha, tree) in &self.stumps {
            votes += &tree
                .predict(x)
                .mapv(|p| if p > 0.5 { *alpha } else { -*alpha });
        }
        if total_alpha > 0.0 {
            votes.mapv(|v| 0.5 * (1.0 + v / total_alpha))
        } else {
            Array1::from_elem(x.nrows(), 0.5)
        }
    }
}

// ---------------------------------------------------------------------------
// Gradient boosting (log-loss, Newton leaf values)

#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub tree: TreeParams,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            subsample: 1.0,
            tree: TreeParams {
                criterion: Criterion::SquaredError,
                max_depth: Some(3),
                ..TreeParams::default()
            },
        }
    }
}

impl GradientBoostingConfig {
    pub fn from_params(mut params: ModelParameters) -> Result<Self> {
        let defaults = Self::default();
        let mut tree = defaults.tree;
        if let Some(depth) = take_optional_usize(&mut params, "max_depth")? {
            tree.max_depth = depth;
        }
        if let Some(split) = take_usize(&mut params, "min_samples_split")? {
            tree.min_samples_split = split;
        }
        if let Some(leaf) = take_usize(&mut params, "min_samples_leaf")? {
            tree.min_samples_leaf = leaf;
        }
        let config = Self {
            n_estimators: take_usize(&mut params, "n_estimators")?
                .unwrap_or(defaults.n_estimators),
            learning_rate: take_f64(&mut params, "learning_rate")?
                .unwrap_or(defaults.learning_rate),
            subsample: take_f64(&mut params, "subsample")?.unwrap_or(defaults.subsample),
            tree,
        };
        reject_unknown(&params, ModelFamily::GradientBoosting)?;
        ensure!(config.n_estimators >= 1, "n_estimators must be at least 1");
        ensure!(config.learning_rate > 0.0, "learning_rate must be positive");
        ensure!(
            config.subsample > 0.0 && config.subsample <= 1.0,
            "subsample must be in (0, 1]"
        );
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    n_features: usize,
    init: f64,
    learning_rate: f64,
    trees: Vec<Tree>,
}

impl Estimator for GradientBoostingConfig {
    fn family(&self) -> ModelFamily {
        ModelFamily::GradientBoosting
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, seed: u64) -> Result<Classifier> {
        check_training_data(x, y)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = x.nrows();
        let prior = (y.sum() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let init = (prior / (1.0 - prior)).ln();
        let mut raw = Array1::from_elem(n, init);
        let sample_size = ((self.subsample * n as f64).round() as usize).clamp(1, n);
        let mut trees = Vec::with_capacity(self.n_estimators);

        for _ in 0..self.n_estimators {
            let prob = raw.mapv(sigmoid);
            let hessian = prob.mapv(|p| (p * (1.0 - p)).max(1e-6));
            // Fitting r/h with weights h makes each leaf the Newton step Σr / Σh.
            let target = (&y - &prob) / &hessian;

            let rows: Vec<usize> = if sample_size < n {
                let mut rows = index::sample(&mut rng, n, sample_size).into_vec();
                rows.sort_unstable();
                rows
            } else {
                (0..n).collect()
            };
            let xs = x.select(Axis(0), &rows);
            let ts = target.select(Axis(0), &rows);
            let hs = hessian.select(Axis(0), &rows).to_vec();
            let tree = Tree::fit(xs.view(), ts.view(), Some(&hs), &self.tree, &mut rng)?;

            raw.scaled_add(self.learning_rate, &tree.predict(x));
            trees.push(tree);
        }

        Ok(Classifier::GradientBoosting(BoostedModel {
            n_features: x.ncols(),
            init,
            learning_rate: self.learning_rate,
            trees,
        }))
    }
}

impl BoostedModel {
    fn score(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut raw = Array1::from_elem(x.nrows(), self.init);
        for tree in &self.trees {
            raw.scaled_add(self.learning_rate, &tree.predict(x));
        }
        raw.mapv(sigmoid)
    }
}

// ---------------------------------------------------------------------------
// Parameter extraction

fn take_f64(params: &mut ModelParameters, key: &str) -> Result<Option<f64>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(num)) => num
            .as_f64()
            .map(Some)
            .ok_or_else(|| anyhow!("{key} must be a number")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{key} must be a number, found '{s}'")),
        Some(other) => bail!("{key} must be a number, found {other}"),
    }
}

fn take_usize(params: &mut ModelParameters, key: &str) -> Result<Option<usize>> {
    take_optional_usize(params, key).map(Option::flatten)
}

/// `Some(None)` when the key is present but `null`.
fn take_optional_usize(params: &mut ModelParameters, key: &str) -> Result<Option<Option<usize>>> {
    match params.remove(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::Number(num)) => num
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(|n| Some(Some(n)))
            .ok_or_else(|| anyhow!("{key} must be a non-negative integer, found {num}")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(|n| Some(Some(n)))
            .map_err(|_| anyhow!("{key} must be a non-negative integer, found '{s}'")),
        Some(other) => bail!("{key} must be a non-negative integer, found {other}"),
    }
}

fn take_string(params: &mut ModelParameters, key: &str) -> Result<Option<String>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => bail!("{key} must be a string, found {other}"),
    }
}

fn take_bool(params: &mut ModelParameters, key: &str) -> Result<Option<bool>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Ok(Some(true)),
            "false" | "no" => Ok(Some(false)),
            _ => bail!("{key} must be a boolean, found '{s}'"),
        },
        Some(other) => bail!("{key} must be a boolean, found {other}"),
    }
}

fn take_max_features(params: &mut ModelParameters) -> Result<Option<MaxFeatures>> {
    match params.remove("max_features") {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(MaxFeatures::All)),
        Some(Value::String(s)) => match s.as_str() {
            "sqrt" | "auto" => Ok(Some(MaxFeatures::Sqrt)),
            "log2" => Ok(Some(MaxFeatures::Log2)),
            other => bail!("max_features must be 'sqrt', 'log2', a count or a fraction, found '{other}'"),
        },
        Some(Value::Number(num)) => {
            if let Some(count) = num.as_u64() {
                Ok(Some(MaxFeatures::Count(count as usize)))
            } else {
                let fraction = num.as_f64().unwrap_or(0.0);
                ensure!(
                    fraction > 0.0 && fraction <= 1.0,
                    "max_features fraction must be in (0, 1], found {num}"
                );
                Ok(Some(MaxFeatures::Fraction(fraction)))
            }
        }
        Some(other) => bail!("max_features has unsupported value {other}"),
    }
}

fn take_tree_params(params: &mut ModelParameters, mut tree: TreeParams) -> Result<TreeParams> {
    if let Some(raw) = take_string(params, "criterion")? {
        tree.criterion = Criterion::parse(&raw)
            .filter(|c| *c != Criterion::SquaredError)
            .ok_or_else(|| anyhow!("criterion must be 'gini', 'entropy' or 'log_loss', found '{raw}'"))?;
    }
    if let Some(depth) = take_optional_usize(params, "max_depth")? {
        tree.max_depth = depth;
    }
    if let Some(split) = take_usize(params, "min_samples_split")? {
        ensure!(split >= 2, "min_samples_split must be at least 2");
        tree.min_samples_split = split;
    }
    if let Some(leaf) = take_usize(params, "min_samples_leaf")? {
        ensure!(leaf >= 1, "min_samples_leaf must be at least 1");
        tree.min_samples_leaf = leaf;
    }
    if let Some(max_features) = take_max_features(params)? {
        tree.max_features = max_features;
    }
    Ok(tree)
}

fn reject_unknown(params: &ModelParameters, family: ModelFamily) -> Result<()> {
    if params.is_empty() {
        return Ok(());
    }
    let unknown: Vec<&str> = params.keys().map(String::as_str).collect();
    bail!(
        "unknown parameter(s) for {family}: {}. Accepted: {}",
        unknown.join(", "),
        family.parameter_names().join(", ")
    )
}
