//! Binary CART trees shared by the tree-based model families.
//!
//! Targets are real-valued: classification trees are grown on `{0, 1}` labels
//! and their leaves hold the weighted fraction of positives.

use anyhow::{Result, ensure};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Gini,
    #[serde(alias = "log_loss")]
    Entropy,
    SquaredError,
}

impl Criterion {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gini" => Some(Self::Gini),
            "entropy" | "log_loss" => Some(Self::Entropy),
            "squared_error" | "mse" | "friedman_mse" => Some(Self::SquaredError),
            _ => None,
        }
    }

    /// Impurity of a node from its weight sum `w`, `Σ w·y` and `Σ w·y²`.
    fn impurity(self, w: f64, wy: f64, wy2: f64) -> f64 {
        if w <= 0.0 {
            return 0.0;
        }
        let mean = wy / w;
        match self {
            Self::Gini => 2.0 * mean * (1.0 - mean),
            Self::Entropy => {
                let p = mean.clamp(0.0, 1.0);
                -[p, 1.0 - p]
                    .iter()
                    .filter(|q| **q > 0.0)
                    .map(|q| q * q.log2())
                    .sum::<f64>()
            }
            Self::SquaredError => (wy2 / w - mean * mean).max(0.0),
        }
    }
}

/// How many features to consider at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Count(usize),
    Fraction(f64),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            Self::All => n_features,
            Self::Sqrt => (n_features as f64).sqrt() as usize,
            Self::Log2 => (n_features as f64).log2() as usize,
            Self::Count(n) => n,
            Self::Fraction(f) => (f * n_features as f64) as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    n_features: usize,
    root: Node,
}

impl Tree {
    /// Grow a tree on `x`/`y`; `weights` defaults to uniform when `None`.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        weights: Option<&[f64]>,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self> {
        ensure!(x.nrows() > 0, "cannot grow a tree on zero samples");
        ensure!(
            x.nrows() == y.len(),
            "feature rows ({}) and targets ({}) differ",
            x.nrows(),
            y.len()
        );
        let weights: Vec<f64> = match weights {
            Some(w) => {
                ensure!(w.len() == y.len(), "sample weights do not match targets");
                w.to_vec()
            }
            None => vec![1.0; y.len()],
        };
        let mut builder = Builder {
            x: x.view(),
            y: y.view(),
            weights: &weights,
            params,
            rng,
        };
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let root = builder.grow(indices, 0);
        Ok(Self {
            n_features: x.ncols(),
            root,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_row(row))
            .collect()
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

struct Builder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    weights: &'a [f64],
    params: &'a TreeParams,
    rng: &'a mut ChaCha8Rng,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl Builder<'_> {
    fn sums(&self, indices: &[usize]) -> (f64, f64, f64) {
        indices.iter().fold((0.0, 0.0, 0.0), |(w, wy, wy2), &i| {
            let (wi, yi) = (self.weights[i], self.y[i]);
            (w + wi, wy + wi * yi, wy2 + wi * yi * yi)
        })
    }

    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> Node {
        let (w, wy, wy2) = self.sums(&indices);
        let value = if w > 0.0 { wy / w } else { 0.0 };

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        let impurity = self.params.criterion.impurity(w, wy, wy2);
        if depth_reached
            || indices.len() < self.params.min_samples_split
            || indices.len() < 2 * self.params.min_samples_leaf
            || impurity <= MIN_GAIN
        {
            return Node::Leaf { value };
        }

        let Some(best) = self.best_split(&indices, (w, wy, wy2)) else {
            return Node::Leaf { value };
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x[[i, best.feature]] <= best.threshold);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.grow(left, depth + 1)),
            right: Box::new(self.grow(right, depth + 1)),
        }
    }

    fn best_split(&mut self, indices: &[usize], parent: (f64, f64, f64)) -> Option<BestSplit> {
        let n_features = self.x.ncols();
        let mut features: Vec<usize> = (0..n_features).collect();
        let k = self.params.max_features.resolve(n_features);
        if k < n_features {
            features.shuffle(&mut *self.rng);
        }

        let (pw, pwy, pwy2) = parent;
        let criterion = self.params.criterion;
        let parent_cost = pw * criterion.impurity(pw, pwy, pwy2);
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut best: Option<BestSplit> = None;
        let mut order = indices.to_vec();
        for (visited, feature) in features.into_iter().enumerate() {
            // Past the sampled features, keep looking only until some split is valid.
            if visited >= k && best.is_some() {
                break;
            }
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let (mut lw, mut lwy, mut lwy2) = (0.0, 0.0, 0.0);
            for pos in 0..order.len() - 1 {
                let i = order[pos];
                let (wi, yi) = (self.weights[i], self.y[i]);
                lw += wi;
                lwy += wi * yi;
                lwy2 += wi * yi * yi;

                let left_count = pos + 1;
                if left_count < min_leaf || order.len() - left_count < min_leaf {
                    continue;
                }
                let here = self.x[[i, feature]];
                let next = self.x[[order[pos + 1], feature]];
                if here == next {
                    continue;
                }

                let (rw, rwy, rwy2) = (pw - lw, pwy - lwy, pwy2 - lwy2);
                let cost = lw * criterion.impurity(lw, lwy, lwy2)
                    + rw * criterion.impurity(rw, rwy, rwy2);
                let gain = parent_cost - cost;
                if gain > MIN_GAIN && best.as_ref().is_none_or(|b| gain > b.gain) {
                    let mid = here + (next - here) / 2.0;
                    best = Some(BestSplit {
                        feature,
                        threshold: if mid < next { mid } else { here },
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::SeedableRng;

    use super::*;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(0)
    }

    #[test]
    fn separable_labels_are_learned_exactly() {
        let x = array![[0.0], [1.0], [2.0], [10.0], [11.0], [12.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let tree = Tree::fit(x.view(), y.view(), None, &TreeParams::default(), &mut rng()).unwrap();
        assert_eq!(tree.predict(x.view()), y);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.predict_row(array![6.5].view()), 1.0);
    }

    #[test]
    fn max_depth_zero_yields_weighted_mean_leaf() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 1.0, 1.0, 1.0];
        let params = TreeParams {
            max_depth: Some(0),
            ..TreeParams::default()
        };
        let tree = Tree::fit(x.view(), y.view(), None, &params, &mut rng()).unwrap();
        assert_eq!(tree.predict_row(array![0.0].view()), 0.75);
    }

    #[test]
    fn sample_weights_shift_leaf_values() {
        let x = array![[0.0], [0.0]];
        let y = array![0.0, 1.0];
        let tree = Tree::fit(
            x.view(),
            y.view(),
            Some(&[3.0, 1.0]),
            &TreeParams::default(),
            &mut rng(),
        )
        .unwrap();
        assert_eq!(tree.predict_row(array![0.0].view()), 0.25);
    }

    #[test]
    fn regression_criterion_fits_means() {
        let x = array![[0.0], [1.0], [5.0], [6.0]];
        let y = array![-1.0, -1.0, 2.0, 4.0];
        let params = TreeParams {
            criterion: Criterion::SquaredError,
            max_depth: Some(1),
            ..TreeParams::default()
        };
        let tree = Tree::fit(x.view(), y.view(), None, &params, &mut rng()).unwrap();
        assert_eq!(tree.predict_row(array![0.5].view()), -1.0);
        assert_eq!(tree.predict_row(array![5.5].view()), 3.0);
    }

    #[test]
    fn max_features_resolution_is_bounded() {
        assert_eq!(MaxFeatures::Sqrt.resolve(30), 5);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Count(100).resolve(4), 4);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(10), 5);
    }
}
