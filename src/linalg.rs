use std::cmp::Ordering;

use ndarray::prelude::*;
use ndarray::{OwnedRepr, RemoveAxis};
use ndarray_linalg::SVD;
use ndarray_linalg::error::LinalgError;

use crate::config::Metric;

pub fn row_norms<D>(
    x: &ArrayBase<OwnedRepr<f64>, D>,
    squared: bool,
) -> ArrayBase<OwnedRepr<f64>, D::Smaller>
where
    D: Dimension + RemoveAxis,
{
    let prod: ArrayBase<OwnedRepr<f64>, D> = x * x;
    let sum: ArrayBase<OwnedRepr<f64>, D::Smaller> = prod.sum_axis(Axis(1));
    if !squared { sum.sqrt() } else { sum }
}

/// Scale every row to unit length; all-zero rows are left untouched.
// ndarray_linalg::norm::normalize divides by the norm unconditionally, which turns an
// all-zero row into NaN.
#[tracing::instrument(name = "Normalizing embeddings", level = "debug", skip(data))]
pub fn normalize_rows(mut data: Array2<f64>) -> Array2<f64> {
    let norms = row_norms(&data, false);
    for (mut row, &norm) in data.axis_iter_mut(Axis(0)).zip(norms.iter()) {
        if norm > 0.0 {
            row /= norm;
        }
    }
    data
}

/// Project column-centred `data` (n_samples, n_features) onto its first `n_components`
/// principal axes. Missing components (rank-deficient input) are zero columns.
#[tracing::instrument(name = "Performing PCA", level = "debug", skip(data))]
pub fn pca_reduce(data: &Array2<f64>, n_components: usize) -> Result<Array2<f64>, LinalgError> {
    let n_samples = data.nrows();
    let mut reduced = Array2::<f64>::zeros((n_samples, n_components));
    if n_samples == 0 || data.ncols() == 0 {
        return Ok(reduced);
    }

    let mean: Array1<f64> = data
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(data.ncols()));
    let centered: Array2<f64> = data - &mean;

    let (_, _, vt) = centered.svd(false, true)?;
    let Some(vt) = vt else {
        return Ok(reduced);
    };
    let available = n_components.min(vt.nrows()).min(n_samples);
    let components = vt.slice(s![0..available, ..]).t().to_owned(); // (n_features, available)
    let mut projected = centered.dot(&components); // (n_samples, available)

    // Fix the sign of each axis so repeated runs give the same orientation.
    for mut col in projected.axis_iter_mut(Axis(1)) {
        let pivot = col
            .iter()
            .copied()
            .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(Ordering::Equal))
            .unwrap_or(0.0);
        if pivot < 0.0 {
            col.mapv_inplace(|v| -v);
        }
    }

    reduced
        .slice_mut(s![.., 0..available])
        .assign(&projected);
    Ok(reduced)
}

/// Distances from row `i` of `data` to every row, under `metric`. `sq_norms` holds the
/// squared row norms and is only read for the Euclidean metric.
fn distances_from(
    data: &Array2<f64>,
    sq_norms: &Array1<f64>,
    i: usize,
    metric: Metric,
) -> Array1<f64> {
    let anchor = data.row(i);
    match metric {
        Metric::Euclidean => {
            let dots = data.dot(&anchor);
            let mut out = sq_norms + sq_norms[i] - 2.0 * dots;
            out.mapv_inplace(|d| if d > 0.0 { d.sqrt() } else { 0.0 });
            out
        }
        Metric::Manhattan => data
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .zip(anchor)
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
            })
            .collect(),
        Metric::Chebyshev => data
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .zip(anchor)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max)
            })
            .collect(),
    }
}

/// The `k` nearest other rows of every row as `(index, distance)`, closest first with
/// ties broken by index. Rows are processed one at a time so memory stays at O(n·k).
pub fn nearest_neighbors(
    data: &Array2<f64>,
    k: usize,
    metric: Metric,
) -> Vec<Vec<(usize, f64)>> {
    let n = data.nrows();
    if n < 2 || k == 0 {
        return vec![Vec::new(); n];
    }
    let k = k.min(n - 1);
    let sq_norms = row_norms(data, true);
    let by_distance = |a: &(usize, f64), b: &(usize, f64)| {
        a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0))
    };

    (0..n)
        .map(|i| {
            let row = distances_from(data, &sq_norms, i, metric);
            let mut others: Vec<(usize, f64)> = row
                .iter()
                .copied()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .collect();
            others.select_nth_unstable_by(k - 1, by_distance);
            others.truncate(k);
            others.sort_by(by_distance);
            others
        })
        .collect()
}

/// Distance from each sample to its k-th nearest other sample, sorted ascending.
pub fn k_distances(data: &Array2<f64>, k: usize, metric: Metric) -> Vec<f64> {
    let mut kd: Vec<f64> = nearest_neighbors(data, k, metric)
        .into_iter()
        .filter_map(|neighbours| neighbours.last().map(|&(_, d)| d))
        .collect();
    kd.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    kd
}

/// Find the value at the elbow of an ascending k-distance curve.
pub fn elbow_kneedle(kd: &[f64]) -> Option<f64> {
    let n = kd.len();
    match n {
        0 => return None,
        1 | 2 => return Some(kd[n - 1]),
        _ => {}
    }
    let (x1, y1) = (0.0, kd[0]);
    let (x2, y2) = ((n - 1) as f64, kd[n - 1]);

    let ab_x = x2 - x1;
    let ab_y = y2 - y1;
    let ab_norm = (ab_x * ab_x + ab_y * ab_y).sqrt();

    let mut max_dist = -f64::INFINITY;
    let mut max_i = 0;
    for (i, &py) in kd.iter().enumerate() {
        let px = i as f64;
        // cross product magnitude in 2D
        let cross = (px - x1) * ab_y - (py - y1) * ab_x;
        let dist = cross.abs() / ab_norm;
        if dist > max_dist {
            max_dist = dist;
            max_i = i;
        }
    }
    Some(kd[max_i])
}
