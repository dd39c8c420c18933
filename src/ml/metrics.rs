//! Binary classification scores against the positive label `1`.
//!
//! An undefined ratio (zero denominator) scores `0.0`.

use ndarray::ArrayView1;

use crate::artifact::ClassificationMetrics;

pub const POSITIVE_LABEL: f64 = 1.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Confusion {
    true_positive: usize,
    false_positive: usize,
    false_negative: usize,
}

fn confusion(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> Confusion {
    let mut counts = Confusion::default();
    for (truth, pred) in y_true.iter().zip(y_pred.iter()) {
        match (*truth == POSITIVE_LABEL, *pred == POSITIVE_LABEL) {
            (true, true) => counts.true_positive += 1,
            (false, true) => counts.false_positive += 1,
            (true, false) => counts.false_negative += 1,
            (false, false) => {}
        }
    }
    counts
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

pub fn accuracy(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> f64 {
    let matches = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    ratio(matches, y_true.len())
}

pub fn precision(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> f64 {
    let c = confusion(y_true, y_pred);
    ratio(c.true_positive, c.true_positive + c.false_positive)
}

pub fn recall(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> f64 {
    let c = confusion(y_true, y_pred);
    ratio(c.true_positive, c.true_positive + c.false_negative)
}

pub fn f1(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> f64 {
    let c = confusion(y_true, y_pred);
    ratio(
        2 * c.true_positive,
        2 * c.true_positive + c.false_positive + c.false_negative,
    )
}

pub fn classification_metrics(
    y_true: ArrayView1<'_, f64>,
    y_pred: ArrayView1<'_, f64>,
) -> ClassificationMetrics {
    ClassificationMetrics {
        f1_score: f1(y_true, y_pred),
        precision_score: precision(y_true, y_pred),
        recall_score: recall(y_true, y_pred),
    }
}
