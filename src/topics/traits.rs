use ndarray::Array2;

use crate::AppResult;

/// Label assigned to documents that belong to no topic.
pub const OUTLIER: i32 = -1;

/// Trait for clustering vector embeddings.
pub trait Clusterer: Send + Sync {
    /// Cluster the rows of `embeddings` (n_samples, n_features).
    /// Returns one label per row; [`OUTLIER`] marks unclustered rows.
    fn cluster(&self, embeddings: &Array2<f64>) -> AppResult<Vec<i32>>;
}
