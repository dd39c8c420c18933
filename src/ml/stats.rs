//! Two-sample Kolmogorov–Smirnov test.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KsTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Largest `n * m` for which the exact null distribution is computed.
pub const EXACT_MAX_PRODUCT: usize = 10_000;

/// Compare two samples; NaN values are ignored.
///
/// Returns `None` when either sample is empty after dropping NaNs. Small samples
/// (`n * m <= EXACT_MAX_PRODUCT`) get the exact two-sided p-value; larger ones use
/// the asymptotic Kolmogorov distribution with Stephens' correction.
pub fn ks_2samp(a: &[f64], b: &[f64]) -> Option<KsTest> {
    let mut a: Vec<f64> = a.iter().copied().filter(|v| !v.is_nan()).collect();
    let mut b: Vec<f64> = b.iter().copied().filter(|v| !v.is_nan()).collect();
    if a.is_empty() || b.is_empty() {
        return None;
    }
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let statistic = max_cdf_distance(&a, &b);
    let p_value = if a.len() * b.len() <= EXACT_MAX_PRODUCT {
        exact_p_value(a.len(), b.len(), statistic)
    } else {
        asymptotic_p_value(a.len(), b.len(), statistic)
    };
    Some(KsTest {
        statistic,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

fn asymptotic_p_value(n: usize, m: usize, statistic: f64) -> f64 {
    let (n1, n2) = (n as f64, m as f64);
    let en = (n1 * n2 / (n1 + n2)).sqrt();
    kolmogorov_survival((en + 0.12 + 0.11 / en) * statistic)
}

/// `P(D >= statistic)` under H0, by walking the merge lattice of the two samples.
///
/// A merge order is a monotone path from `(0, 0)` to `(n, m)`; every order is
/// equally likely, so the path steps right with probability `remaining_a /
/// remaining`. The p-value is the mass of paths that touch `|i/n - j/m| >= D`.
fn exact_p_value(n: usize, m: usize, statistic: f64) -> f64 {
    // D is always a multiple of 1/(n*m); compare in integer units.
    let k = (statistic * (n * m) as f64).round() as i64;
    if k <= 0 {
        return 1.0;
    }
    let inside = |i: usize, j: usize| (i as i64 * m as i64 - j as i64 * n as i64).abs() < k;

    // row[j] holds the probability of reaching (i, j) without leaving the band.
    let mut row = vec![0.0f64; m + 1];
    for i in 0..=n {
        for j in 0..=m {
            let mut reach = if i == 0 && j == 0 { 1.0 } else { 0.0 };
            if i > 0 {
                let remaining_a = n - i + 1;
                reach += row[j] * remaining_a as f64 / (remaining_a + m - j) as f64;
            }
            if j > 0 {
                let remaining_b = m - j + 1;
                reach += row[j - 1] * remaining_b as f64 / (n - i + remaining_b) as f64;
            }
            row[j] = if inside(i, j) { reach } else { 0.0 };
        }
    }
    1.0 - row[m]
}

fn max_cdf_distance(a: &[f64], b: &[f64]) -> f64 {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let v = a[i].min(b[j]);
        while i < a.len() && a[i] <= v {
            i += 1;
        }
        while j < b.len() && b[j] <= v {
            j += 1;
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }
    d
}

/// `Q(λ) = 2 Σ (-1)^(j-1) exp(-2 j² λ²)`; returns 1 when the series does not converge.
fn kolmogorov_survival(lambda: f64) -> f64 {
    const EPS_TERM: f64 = 1e-3;
    const EPS_SUM: f64 = 1e-8;

    let a2 = -2.0 * lambda * lambda;
    let mut sign = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0;
    for j in 1..=100 {
        let j = j as f64;
        let term = sign * (a2 * j * j).exp();
        sum += term;
        if term.abs() <= EPS_TERM * previous || term.abs() <= EPS_SUM * sum {
            return sum;
        }
        sign = -sign;
        previous = term.abs();
    }
    1.0
}
