//! Nearest-neighbour imputation of missing feature values.

use anyhow::{Context, Result, bail, ensure};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::settings::ImputerSettings;
use crate::table::Table;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborWeights {
    #[default]
    Uniform,
    Distance,
}

/// Replaces each missing cell with the mean of that feature over the
/// `n_neighbors` closest fitted rows that have the feature present.
///
/// Distances use the NaN-aware euclidean metric: squared differences over the
/// coordinates present in both rows, scaled up by `n_features / n_present`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnImputer {
    n_neighbors: usize,
    weights: NeighborWeights,
    #[serde(default)]
    fitted: Option<FittedImputer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedImputer {
    #[serde(with = "nan_matrix")]
    reference: Array2<f64>,
    /// Fallback per column when no donor exists; `None` when the column was never observed.
    column_means: Vec<Option<f64>>,
}

impl KnnImputer {
    pub fn new(n_neighbors: usize, weights: NeighborWeights) -> Result<Self> {
        ensure!(n_neighbors >= 1, "n_neighbors must be at least 1");
        Ok(Self {
            n_neighbors,
            weights,
            fitted: None,
        })
    }

    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    pub fn weights(&self) -> NeighborWeights {
        self.weights
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<()> {
        ensure!(x.nrows() > 0, "cannot fit imputer on an empty matrix");
        let column_means = x
            .columns()
            .into_iter()
            .map(|column| {
                let present: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                (!present.is_empty()).then(|| present.iter().sum::<f64>() / present.len() as f64)
            })
            .collect();
        self.fitted = Some(FittedImputer {
            reference: x.to_owned(),
            column_means,
        });
        Ok(())
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let Some(fitted) = &self.fitted else {
            bail!("imputer must be fitted before transform");
        };
        let n_features = fitted.reference.ncols();
        ensure!(
            x.ncols() == n_features,
            "imputer was fitted on {n_features} feature(s) but received {}",
            x.ncols()
        );

        let mut out = x.to_owned();
        for (row_idx, row) in x.rows().into_iter().enumerate() {
            if !row.iter().any(|v| v.is_nan()) {
                continue;
            }
            let distances: Vec<Option<f64>> = fitted
                .reference
                .rows()
                .into_iter()
                .map(|candidate| nan_euclidean(row, candidate))
                .collect();

            for col in 0..n_features {
                if !row[col].is_nan() {
                    continue;
                }
                let mut donors: Vec<(f64, usize)> = distances
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, dist)| {
                        let dist = (*dist)?;
                        (!fitted.reference[[idx, col]].is_nan()).then_some((dist, idx))
                    })
                    .collect();
                donors.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                donors.truncate(self.n_neighbors);

                out[[row_idx, col]] = if donors.is_empty() {
                    fitted.column_means[col].unwrap_or(0.0)
                } else {
                    self.weighted_mean(&donors, |idx| fitted.reference[[idx, col]])
                };
            }
        }
        Ok(out)
    }

    fn weighted_mean(&self, donors: &[(f64, usize)], value: impl Fn(usize) -> f64) -> f64 {
        match self.weights {
            NeighborWeights::Uniform => {
                donors.iter().map(|(_, idx)| value(*idx)).sum::<f64>() / donors.len() as f64
            }
            NeighborWeights::Distance => {
                // Exact matches dominate any positive distance.
                let exact: Vec<usize> = donors
                    .iter()
                    .filter(|(d, _)| *d == 0.0)
                    .map(|(_, idx)| *idx)
                    .collect();
                if !exact.is_empty() {
                    return exact.iter().map(|idx| value(*idx)).sum::<f64>() / exact.len() as f64;
                }
                let (weighted, total) = donors.iter().fold((0.0, 0.0), |(acc, w), (d, idx)| {
                    (acc + value(*idx) / d, w + 1.0 / d)
                });
                weighted / total
            }
        }
    }
}

fn nan_euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Option<f64> {
    let mut present = 0usize;
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        if x.is_nan() || y.is_nan() {
            continue;
        }
        present += 1;
        sum += (x - y).powi(2);
    }
    if present == 0 {
        return None;
    }
    Some((a.len() as f64 / present as f64 * sum).sqrt())
}

/// Fitted feature transformer persisted alongside the model.
///
/// Remembers the feature column order it was fitted on so that tables with
/// reordered columns are aligned before imputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    #[serde(default)]
    feature_columns: Vec<String>,
    imputer: KnnImputer,
}

impl Preprocessor {
    pub fn new(imputer: KnnImputer) -> Self {
        Self {
            feature_columns: Vec::new(),
            imputer,
        }
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn imputer(&self) -> &KnnImputer {
        &self.imputer
    }

    pub fn fit(&mut self, features: &Table) -> Result<()> {
        self.imputer
            .fit(features.values().view())
            .context("Failed to fit preprocessor")?;
        self.feature_columns = features.columns().to_vec();
        Ok(())
    }

    pub fn transform(&self, features: &Table) -> Result<Array2<f64>> {
        let aligned = self.align(features)?;
        self.imputer
            .transform(aligned.view())
            .context("Failed to transform features")
    }

    pub fn fit_transform(&mut self, features: &Table) -> Result<Array2<f64>> {
        self.fit(features)?;
        self.transform(features)
    }

    fn align(&self, features: &Table) -> Result<Array2<f64>> {
        if self.feature_columns.is_empty() || features.columns() == self.feature_columns {
            return Ok(features.values().clone());
        }
        let mut indices = Vec::with_capacity(self.feature_columns.len());
        for name in &self.feature_columns {
            let idx = features
                .column_index(name)
                .with_context(|| format!("Input is missing feature column '{name}'"))?;
            indices.push(idx);
        }
        Ok(features.values().select(ndarray::Axis(1), &indices))
    }
}

/// Build the unfitted transformer described by `settings`.
pub fn build_transformer(settings: &ImputerSettings) -> Result<Preprocessor> {
    let imputer = KnnImputer::new(settings.n_neighbors, settings.weights)
        .context("Invalid imputer settings")?;
    Ok(Preprocessor::new(imputer))
}

/// JSON has no NaN, so missing cells are stored as `null`.
mod nan_matrix {
    use ndarray::Array2;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Stored {
        rows: usize,
        cols: usize,
        data: Vec<Option<f64>>,
    }

    pub fn serialize<S: Serializer>(matrix: &Array2<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        let (rows, cols) = matrix.dim();
        Stored {
            rows,
            cols,
            data: matrix
                .iter()
                .map(|v| (!v.is_nan()).then_some(*v))
                .collect(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Array2<f64>, D::Error> {
        let stored = Stored::deserialize(deserializer)?;
        let values = stored
            .data
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        Array2::from_shape_vec((stored.rows, stored.cols), values)
            .map_err(serde::de::Error::custom)
    }
}
