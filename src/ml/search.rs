//! Exhaustive hyperparameter search with stratified k-fold cross-validation.

use anyhow::{Context, Result, bail, ensure};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::ml::metrics;
use crate::ml::models::{Classifier, ModelFamily};
use crate::ml::registry::{ModelParameters, ModelRegistry};
use crate::settings::ParamGrid;

/// Cartesian product of the grid, keys in sorted order, last key varying fastest.
///
/// An empty grid yields one empty assignment; a key with no values yields none.
pub fn expand_grid(grid: &ParamGrid) -> Vec<ModelParameters> {
    let mut combinations = vec![ModelParameters::new()];
    for (key, values) in grid {
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for partial in &combinations {
            for value in values {
                let mut params = partial.clone();
                params.insert(key.clone(), value.clone());
                next.push(params);
            }
        }
        combinations = next;
    }
    combinations
}

/// Assign every row to one of `k` test folds, keeping class proportions.
pub fn stratified_folds(y: ArrayView1<'_, f64>, k: usize, seed: u64) -> Result<Vec<Vec<usize>>> {
    ensure!(k >= 2, "cross-validation needs at least 2 folds, got {k}");
    ensure!(
        y.len() >= k,
        "cannot split {} sample(s) into {k} folds",
        y.len()
    );

    let mut classes: Vec<f64> = y.iter().copied().collect();
    classes.sort_by(f64::total_cmp);
    classes.dedup();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut folds = vec![Vec::new(); k];
    let mut slot = 0usize;
    for class in classes {
        let mut members: Vec<usize> = y
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == class)
            .map(|(idx, _)| idx)
            .collect();
        members.shuffle(&mut rng);
        for idx in members {
            folds[slot % k].push(idx);
            slot += 1;
        }
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    Ok(folds)
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub best_params: ModelParameters,
    /// Mean F1 over the validation folds for `best_params`.
    pub cv_f1_score: f64,
    /// Refit on the full training data with `best_params`.
    pub model: Classifier,
    pub evaluated: usize,
}

/// Pick the grid point with the best mean cross-validated F1; the earliest
/// grid point wins ties.
pub fn grid_search(
    registry: &ModelRegistry,
    family: ModelFamily,
    grid: &ParamGrid,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    cv_folds: usize,
    seed: u64,
) -> Result<SearchResult> {
    let candidates = expand_grid(grid);
    if candidates.is_empty() {
        bail!("hyperparameter grid for {family} has a parameter with no values");
    }
    let folds = stratified_folds(y, cv_folds, seed)?;

    let mut best: Option<(ModelParameters, f64)> = None;
    for params in &candidates {
        let estimator = registry.create(family, params.clone())?;
        let mut total = 0.0;
        for (fold_idx, test_rows) in folds.iter().enumerate() {
            let train_rows = complement(test_rows, y.len());
            let model = estimator
                .fit(
                    x.select(Axis(0), &train_rows).view(),
                    y.select(Axis(0), &train_rows).view(),
                    seed,
                )
                .with_context(|| format!("{family} failed on fold {fold_idx}"))?;
            let predicted = model.predict(x.select(Axis(0), test_rows).view())?;
            total += metrics::f1(y.select(Axis(0), test_rows).view(), predicted.view());
        }
        let score = total / folds.len() as f64;
        debug!(
            family = family.as_str(),
            params = %(serde_json::Value::Object(params.clone())),
            cv_f1 = score,
            "Grid point evaluated"
        );
        if best.as_ref().is_none_or(|(_, current)| score > *current) {
            best = Some((params.clone(), score));
        }
    }

    let Some((best_params, cv_f1_score)) = best else {
        bail!("no grid point was evaluated for {family}");
    };
    let model = registry
        .create(family, best_params.clone())?
        .fit(x, y, seed)
        .with_context(|| format!("{family} failed to refit on the full training split"))?;

    Ok(SearchResult {
        best_params,
        cv_f1_score,
        model,
        evaluated: candidates.len(),
    })
}

fn complement(sorted: &[usize], n: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(n - sorted.len());
    let mut excluded = sorted.iter().peekable();
    for idx in 0..n {
        if excluded.peek() == Some(&&idx) {
            excluded.next();
        } else {
            out.push(idx);
        }
    }
    out
}
