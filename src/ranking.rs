//! Threshold, ordering and probability helpers shared by both strategies.

use ndarray::prelude::*;

use crate::result::Scored;

/// Converts a probability fraction to a percentage rounded to two decimals.
pub fn to_percent(fraction: f32) -> f32 {
    ((f64::from(fraction) * 10_000.0).round() / 100.0) as f32
}

/// Whether a raw fraction is reportable under `threshold`. The bound is
/// inclusive, so a score exactly at the threshold is kept.
pub fn passes_threshold(fraction: f32, threshold: f32) -> bool {
    fraction >= threshold
}

/// Stable sort by descending confidence.
pub fn sort_descending<T: Scored>(items: &mut [T]) {
    items.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
}

/// Numerically stable softmax over one row of logits.
///
/// The maximum is subtracted before exponentiating, so large logits do not
/// overflow. A degenerate row (empty, or one whose exponentials do not sum to
/// a finite positive value) yields all zeros, which no threshold above zero
/// lets through.
pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    if logits.is_empty() {
        return Array1::zeros(0);
    }
    let max = logits.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    let exps = logits.mapv(|v| (v - max).exp());
    let sum = exps.sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Array1::zeros(logits.len());
    }
    exps / sum
}

/// Elementwise arithmetic mean of equally sized distributions.
pub fn mean_distribution(distributions: &[Array1<f32>]) -> Option<Array1<f32>> {
    let views: Vec<_> = distributions.iter().map(|d| d.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views).ok()?;
    stacked.mean_axis(Axis(0))
}

/// The `k` highest entries as `(index, probability)`, highest first.
/// Equal probabilities keep index order.
pub fn top_k(probabilities: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}
