use hdbscan::{DistanceMetric, Hdbscan, HdbscanHyperParams, NnAlgorithm};
use ndarray::prelude::*;
use tracing::debug;

use crate::config::{Epsilon, Metric, TopicOptions};
use crate::topics::traits::Clusterer;
use crate::{AppError, AppResult, linalg};

/// Density-based clusterer; unclustered rows become outliers.
#[derive(Debug, Clone)]
pub struct HdbscanClusterer {
    pub min_cluster_size: usize,
    pub min_samples: Option<usize>,
    pub epsilon: Epsilon,
    pub metric: Metric,
}

impl From<&TopicOptions> for HdbscanClusterer {
    fn from(options: &TopicOptions) -> Self {
        Self {
            min_cluster_size: options.min_cluster_size,
            min_samples: options.min_samples,
            epsilon: options.epsilon,
            metric: options.metric,
        }
    }
}

impl From<Metric> for DistanceMetric {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::Euclidean => DistanceMetric::Euclidean,
            Metric::Manhattan => DistanceMetric::Manhattan,
            Metric::Chebyshev => DistanceMetric::Chebyshev,
        }
    }
}

impl HdbscanClusterer {
    /// Cluster-selection epsilon to use for `data`.
    pub fn resolve_epsilon(&self, data: &Array2<f64>) -> f64 {
        match self.epsilon {
            Epsilon::Fixed(eps) => eps,
            Epsilon::Auto => {
                let k = self.min_samples.unwrap_or(self.min_cluster_size);
                let kd = linalg::k_distances(data, k, self.metric);
                let eps = linalg::elbow_kneedle(&kd).unwrap_or(0.0);
                debug!("Chose epsilon {} from the k={} distance elbow", eps, k);
                eps
            }
        }
    }
}

impl Clusterer for HdbscanClusterer {
    #[tracing::instrument(name = "Clustering embeddings", level = "info", skip(self, embeddings))]
    fn cluster(&self, embeddings: &Array2<f64>) -> AppResult<Vec<i32>> {
        let n = embeddings.nrows();
        if n == 0 {
            return Err(AppError::Clustering("there are no documents to cluster".into()));
        }
        if n < self.min_cluster_size {
            return Err(AppError::Clustering(format!(
                "{n} documents is fewer than the minimum cluster size of {}",
                self.min_cluster_size
            )));
        }
        if embeddings.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Clustering("embeddings contain non-finite values".into()));
        }

        // Core distances need a k-th neighbour that exists.
        let min_samples = self
            .min_samples
            .unwrap_or(self.min_cluster_size)
            .clamp(1, n.saturating_sub(1).max(1));
        let params = HdbscanHyperParams::builder()
            .min_cluster_size(self.min_cluster_size)
            .min_samples(min_samples)
            .epsilon(self.resolve_epsilon(embeddings))
            .dist_metric(self.metric.into())
            .nn_algorithm(NnAlgorithm::Auto)
            .build();
        let data = embeddings
            .axis_iter(Axis(0))
            .map(|row| row.to_vec())
            .collect::<Vec<Vec<f64>>>();
        let labels = Hdbscan::new(&data, params)
            .cluster()
            .map_err(|e| AppError::Clustering(format!("{e:?}")))?;
        debug!(
            "HDBSCAN assigned {} of {} documents to topics",
            labels.iter().filter(|&&l| l >= 0).count(),
            n
        );
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_groups() -> Array2<f64> {
        array![
            [1.0, 0.0, 0.01],
            [1.0, 0.01, 0.0],
            [1.0, -0.01, 0.0],
            [1.0, 0.0, -0.01],
            [0.0, 1.0, 0.01],
            [0.01, 1.0, 0.0],
            [-0.01, 1.0, 0.0],
            [0.0, 1.0, -0.01],
        ]
    }

    fn clusterer(min_cluster_size: usize) -> HdbscanClusterer {
        HdbscanClusterer::from(&TopicOptions {
            min_cluster_size,
            ..Default::default()
        })
    }

    #[test]
    fn separates_two_groups() {
        let labels = clusterer(3).cluster(&two_groups()).unwrap();
        assert_eq!(labels.len(), 8);
        assert!(labels[..4].iter().all(|&l| l == labels[0]));
        assert!(labels[4..].iter().all(|&l| l == labels[4]));
        assert!(labels[0] >= 0 && labels[4] >= 0);
        assert_ne!(labels[0], labels[4]);
    }

    #[test]
    fn empty_input_is_clustering_error() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            clusterer(2).cluster(&empty),
            Err(AppError::Clustering(_))
        ));
    }

    #[test]
    fn too_few_documents_is_clustering_error() {
        let data = array![[0.0, 1.0], [1.0, 0.0]];
        assert!(matches!(
            clusterer(5).cluster(&data),
            Err(AppError::Clustering(_))
        ));
    }

    #[test]
    fn auto_epsilon_comes_from_k_distances() {
        let c = HdbscanClusterer {
            epsilon: Epsilon::Auto,
            ..clusterer(3)
        };
        let eps = c.resolve_epsilon(&two_groups());
        assert!(eps > 0.0 && eps < 2.0);
        assert_eq!(clusterer(3).resolve_epsilon(&two_groups()), 0.0);
    }

    #[test]
    fn auto_epsilon_uses_the_clustering_metric() {
        let data = array![
            [0.0, 0.0],
            [1.0, 1.0],
            [2.0, 2.0],
            [3.0, 3.0],
            [10.0, 10.0]
        ];
        let with_metric = |metric| HdbscanClusterer {
            epsilon: Epsilon::Auto,
            metric,
            ..clusterer(2)
        };
        let chebyshev = with_metric(Metric::Chebyshev).resolve_epsilon(&data);
        let euclidean = with_metric(Metric::Euclidean).resolve_epsilon(&data);
        let manhattan = with_metric(Metric::Manhattan).resolve_epsilon(&data);
        assert!(chebyshev > 0.0);
        assert!((euclidean - chebyshev * 2f64.sqrt()).abs() < 1e-9);
        assert!((manhattan - chebyshev * 2.0).abs() < 1e-9);
    }
}
