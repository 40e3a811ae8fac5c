mod density;
pub mod traits;

use std::collections::BTreeMap;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TopicOptions;
use crate::embed::{Embedder, embed_all};
use crate::{AppError, AppResult, convert, linalg};

pub use density::HdbscanClusterer;
pub use traits::{Clusterer, OUTLIER};

/// Topic id and membership probability per document, in input order.
///
/// Ids are opaque run-local labels; [`OUTLIER`] marks unclustered documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicAssignments {
    pub topics: Vec<i32>,
    pub probabilities: Vec<f64>,
}

impl TopicAssignments {
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Number of documents per topic id.
    pub fn sizes(&self) -> BTreeMap<i32, usize> {
        let mut sizes = BTreeMap::new();
        for &t in &self.topics {
            *sizes.entry(t).or_insert(0) += 1;
        }
        sizes
    }
}

/// Embeds texts with the backend it was built with, then assigns topics.
pub struct TopicRunner<E, C = HdbscanClusterer> {
    embedder: E,
    clusterer: C,
    reduce_components: usize,
    batch_size: usize,
}

impl<E: Embedder> TopicRunner<E, HdbscanClusterer> {
    pub fn new(embedder: E, options: &TopicOptions) -> Self {
        Self::with_clusterer(embedder, HdbscanClusterer::from(options), options)
    }
}

impl<E: Embedder, C: Clusterer> TopicRunner<E, C> {
    pub fn with_clusterer(embedder: E, clusterer: C, options: &TopicOptions) -> Self {
        Self {
            embedder,
            clusterer,
            reduce_components: options.reduce_components.max(1),
            batch_size: 32,
        }
    }

    /// Batch size used when this runner embeds texts itself.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Embed `texts` and assign each a topic.
    #[tracing::instrument(name = "Assigning topics", level = "info", skip(self, texts))]
    pub fn fit_transform(&self, texts: &[String]) -> AppResult<TopicAssignments> {
        if texts.is_empty() {
            return Err(AppError::Clustering("there are no documents to cluster".into()));
        }
        let embeddings = embed_all(&self.embedder, texts, self.batch_size, false)?;
        self.fit_transform_embeddings(&embeddings)
    }

    /// Assign topics to vectors that were already embedded by the same backend.
    #[tracing::instrument(
        name = "Assigning topics from embeddings",
        level = "info",
        skip(self, embeddings)
    )]
    pub fn fit_transform_embeddings(&self, embeddings: &[Vec<f32>]) -> AppResult<TopicAssignments> {
        let raw = convert::embeddings_to_ndarray(embeddings)
            .map_err(|e| AppError::Clustering(e.to_string()))?;
        let normalized = linalg::normalize_rows(raw);

        let reduced = if normalized.ncols() > self.reduce_components {
            linalg::pca_reduce(&normalized, self.reduce_components)
                .map_err(|e| AppError::Clustering(format!("PCA failed: {e}")))?
        } else {
            normalized
        };
        debug!("Clustering on embeddings of shape {:?}", reduced.dim());

        let topics = self.clusterer.cluster(&reduced)?;
        if topics.len() != reduced.nrows() {
            return Err(AppError::Clustering(format!(
                "clusterer returned {} labels for {} documents",
                topics.len(),
                reduced.nrows()
            )));
        }
        let probabilities = membership_probabilities(&reduced, &topics);

        let assignments = TopicAssignments {
            topics,
            probabilities,
        };
        let sizes = assignments.sizes();
        info!(
            "Found {} topics ({} outliers)",
            sizes.keys().filter(|&&t| t != OUTLIER).count(),
            sizes.get(&OUTLIER).copied().unwrap_or(0)
        );
        Ok(assignments)
    }
}

/// Gaussian membership `exp(-d² / 2σ²)` of each row to its cluster centroid, where σ
/// is the cluster's mean centroid distance. Outliers get 0.
pub fn membership_probabilities(data: &Array2<f64>, labels: &[i32]) -> Vec<f64> {
    let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        if label != OUTLIER {
            members.entry(label).or_default().push(i);
        }
    }

    let mut probabilities = vec![0.0; labels.len()];
    for indices in members.values() {
        let rows = data.select(Axis(0), indices);
        let centroid = rows
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.ncols()));
        let distances: Vec<f64> = rows
            .axis_iter(Axis(0))
            .map(|row| (&row - &centroid).mapv(|v| v * v).sum().sqrt())
            .collect();
        let sigma = distances.iter().sum::<f64>() / distances.len() as f64;
        for (&i, &d) in indices.iter().zip(&distances) {
            probabilities[i] = if sigma > 0.0 {
                (-(d * d) / (2.0 * sigma * sigma)).exp().clamp(0.0, 1.0)
            } else {
                1.0
            };
        }
    }
    probabilities
}
