//! Statistical and learning primitives consumed by the pipeline stages.

pub mod imputer;
pub mod metrics;
pub mod models;
pub mod predictor;
pub mod registry;
pub mod search;
pub mod stats;
pub mod tree;

/// Map a stored label onto `{0, 1}`: `-1` becomes `0`, everything else is kept.
pub fn binarize_label(value: f64) -> f64 {
    if value == -1.0 { 0.0 } else { value }
}
