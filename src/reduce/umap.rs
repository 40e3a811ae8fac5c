use std::collections::BTreeMap;

use ndarray::prelude::*;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::{Rng, SeedableRng};
use tracing::{Span, debug, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::{Metric, ReduceOptions};
use crate::logging::bar_style;
use crate::reduce::{Reducer, stack};
use crate::{AppError, AppResult, linalg};

static NEGATIVE_SAMPLES: usize = 5;
static GRADIENT_CLIP: f64 = 4.0;
static INITIAL_ALPHA: f64 = 1.0;
static SPREAD: f64 = 1.0;
static INIT_EXTENT: f64 = 10.0;
static SIGMA_ITERATIONS: usize = 64;
static SIGMA_TOLERANCE: f64 = 1e-5;
static MIN_SIGMA_SCALE: f64 = 1e-3;

/// Manifold projection: a fuzzy k-nearest-neighbour graph laid out by stochastic
/// gradient descent in `n_components` dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct UmapReducer {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub n_components: usize,
    pub n_epochs: usize,
    pub seed: u64,
    pub progress: bool,
}

impl From<&ReduceOptions> for UmapReducer {
    fn from(options: &ReduceOptions) -> Self {
        Self {
            n_neighbors: options.n_neighbors,
            min_dist: options.min_dist,
            n_components: options.n_components,
            n_epochs: options.n_epochs,
            seed: options.seed,
            progress: false,
        }
    }
}

impl Default for UmapReducer {
    fn default() -> Self {
        Self::from(&ReduceOptions::default())
    }
}

/// Directed edge of the symmetric fuzzy graph.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Edge {
    head: usize,
    tail: usize,
    weight: f64,
}

impl UmapReducer {
    /// Show a progress bar over the optimisation epochs.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn optimize(
        &self,
        embedding: &mut Array2<f64>,
        edges: &[Edge],
        (a, b): (f64, f64),
        rng: &mut StdRng,
    ) {
        let n = embedding.nrows();
        let dim = embedding.ncols();
        let max_weight = edges.iter().map(|e| e.weight).fold(0.0, f64::max);
        // Heavier edges are sampled more often; an edge of weight w fires every
        // max_weight / w epochs.
        let epochs_per_sample: Vec<f64> = edges
            .iter()
            .map(|e| {
                if e.weight > 0.0 {
                    max_weight / e.weight
                } else {
                    f64::INFINITY
                }
            })
            .collect();
        let mut next_sample = epochs_per_sample.clone();

        let span = if self.progress {
            let span = info_span!("Optimising layout");
            span.pb_set_message("Laying out...");
            span.pb_set_finish_message("Layout complete");
            span.pb_set_length(self.n_epochs as u64);
            span.pb_set_style(&bar_style());
            span
        } else {
            Span::none()
        };
        let _enter = span.enter();

        for epoch in 0..self.n_epochs {
            let alpha = INITIAL_ALPHA * (1.0 - epoch as f64 / self.n_epochs as f64);
            for (e, edge) in edges.iter().enumerate() {
                if next_sample[e] > epoch as f64 {
                    continue;
                }
                let (i, j) = (edge.head, edge.tail);

                let d2 = squared_distance(embedding, i, j);
                let coeff = if d2 > 0.0 {
                    -2.0 * a * b * d2.powf(b - 1.0) / (1.0 + a * d2.powf(b))
                } else {
                    0.0
                };
                for c in 0..dim {
                    let g = clip(coeff * (embedding[[i, c]] - embedding[[j, c]]));
                    embedding[[i, c]] += g * alpha;
                    embedding[[j, c]] -= g * alpha;
                }

                for _ in 0..NEGATIVE_SAMPLES {
                    let k = rng.random_range(0..n);
                    if k == i {
                        continue;
                    }
                    let d2 = squared_distance(embedding, i, k);
                    let coeff = if d2 > 0.0 {
                        2.0 * b / ((0.001 + d2) * (1.0 + a * d2.powf(b)))
                    } else {
                        0.0
                    };
                    for c in 0..dim {
                        let g = if coeff > 0.0 {
                            clip(coeff * (embedding[[i, c]] - embedding[[k, c]]))
                        } else {
                            GRADIENT_CLIP
                        };
                        embedding[[i, c]] += g * alpha;
                    }
                }

                next_sample[e] += epochs_per_sample[e];
            }
            span.pb_inc(1);
        }
    }
}

impl Reducer for UmapReducer {
    #[tracing::instrument(name = "Projecting with UMAP", level = "info", skip(self, vectors))]
    fn fit_transform(&self, vectors: &[Vec<f32>]) -> AppResult<Array2<f64>> {
        let data = stack(vectors)?;
        if self.n_components == 0 {
            return Err(AppError::Reduction("n_components must be at least 1".into()));
        }
        if !self.min_dist.is_finite() || self.min_dist < 0.0 {
            return Err(AppError::Reduction(format!(
                "min_dist must be a non-negative number, got {}",
                self.min_dist
            )));
        }

        let n = data.nrows();
        if n == 1 {
            return Ok(Array2::zeros((1, self.n_components)));
        }
        let k = self.n_neighbors.clamp(1, n - 1);
        debug!("Building fuzzy graph over {} points with k = {}", n, k);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let edges = fuzzy_graph(&data, k);
        let curve = fit_curve(SPREAD, self.min_dist);
        debug!("Fitted curve parameters a = {:.4}, b = {:.4}", curve.0, curve.1);

        let mut embedding = initial_layout(&data, self.n_components, &mut rng)?;
        self.optimize(&mut embedding, &edges, curve, &mut rng);

        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Reduction(
                "layout diverged to non-finite coordinates".into(),
            ));
        }
        Ok(embedding)
    }
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn squared_distance(embedding: &Array2<f64>, i: usize, j: usize) -> f64 {
    embedding
        .row(i)
        .iter()
        .zip(embedding.row(j))
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

fn membership(distance: f64, rho: f64, sigma: f64) -> f64 {
    let excess = (distance - rho).max(0.0);
    if excess == 0.0 {
        1.0
    } else if sigma > 0.0 {
        (-excess / sigma).exp()
    } else {
        0.0
    }
}

/// Binary-search the bandwidth at which a point's neighbour memberships sum to `target`.
fn calibrate_sigma(distances: &[f64], rho: f64, target: f64) -> f64 {
    let (mut lo, mut hi, mut mid) = (0.0, f64::INFINITY, 1.0);
    for _ in 0..SIGMA_ITERATIONS {
        let total: f64 = distances.iter().map(|&d| membership(d, rho, mid)).sum();
        if (total - target).abs() < SIGMA_TOLERANCE {
            break;
        }
        if total > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() {
                mid * 2.0
            } else {
                (lo + hi) / 2.0
            };
        }
    }
    let mean = distances.iter().sum::<f64>() / distances.len().max(1) as f64;
    mid.max(MIN_SIGMA_SCALE * mean)
}

/// k-nearest-neighbour memberships, symmetrised with the probabilistic t-conorm
/// `w_ij + w_ji - w_ij * w_ji`. Both directions of every edge are returned.
fn fuzzy_graph(data: &Array2<f64>, k: usize) -> Vec<Edge> {
    let target = (k as f64).log2();

    let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (i, nearest) in linalg::nearest_neighbors(data, k, Metric::Euclidean)
        .into_iter()
        .enumerate()
    {
        let (order, neighbours): (Vec<usize>, Vec<f64>) = nearest.into_iter().unzip();
        let rho = neighbours.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);
        let sigma = calibrate_sigma(&neighbours, rho, target);
        for (&j, &d) in order.iter().zip(&neighbours) {
            let w = membership(d, rho, sigma);
            if w > 0.0 {
                directed.insert((i, j), w);
            }
        }
    }

    let mut edges = Vec::with_capacity(directed.len() * 2);
    for (&(i, j), &w) in &directed {
        let back = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let weight = w + back - w * back;
        edges.push(Edge {
            head: i,
            tail: j,
            weight,
        });
        if back == 0.0 {
            edges.push(Edge {
                head: j,
                tail: i,
                weight,
            });
        }
    }
    edges
}

/// Jittered PCA projection, min-max scaled to `[0, INIT_EXTENT]` per axis.
fn initial_layout(
    data: &Array2<f64>,
    n_components: usize,
    rng: &mut StdRng,
) -> AppResult<Array2<f64>> {
    let mut init = linalg::pca_reduce(data, n_components)
        .map_err(|e| AppError::Reduction(format!("PCA initialisation failed: {e}")))?;
    init.mapv_inplace(|v| v + rng.random_range(-1e-4..1e-4));
    for mut col in init.axis_iter_mut(Axis(1)) {
        let (min, max) = col
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        if range > 0.0 {
            col.mapv_inplace(|v| (v - min) / range * INIT_EXTENT);
        } else {
            col.fill(INIT_EXTENT / 2.0);
        }
    }
    Ok(init)
}

/// Fit `a`, `b` so that `1 / (1 + a * d^(2b))` best matches a curve that is flat at 1
/// up to `min_dist` and then decays as `exp(-(d - min_dist) / spread)`.
pub fn fit_curve(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| 3.0 * spread * i as f64 / 299.0).collect();
    let targets: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();
    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&targets)
            .map(|(&x, &t)| {
                let y = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (y - t) * (y - t)
            })
            .sum()
    };
    let best_a = |b: f64| golden_section(|log_a| sse(log_a.exp(), b), -6.0, 6.0).exp();
    let b = golden_section(|b| sse(best_a(b), b), 0.1, 3.0);
    (best_a(b), b)
}

fn golden_section<F: Fn(f64) -> f64>(f: F, mut lo: f64, mut hi: f64) -> f64 {
    let ratio = (5.0_f64.sqrt() - 1.0) / 2.0;
    let mut c = hi - ratio * (hi - lo);
    let mut d = lo + ratio * (hi - lo);
    let (mut fc, mut fd) = (f(c), f(d));
    for _ in 0..80 {
        if fc < fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - ratio * (hi - lo);
            fc = f(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + ratio * (hi - lo);
            fd = f(d);
        }
    }
    (lo + hi) / 2.0
}
