use ndarray::Array2;

use crate::reduce::{Reducer, stack};
use crate::{AppError, AppResult, linalg};

/// Linear projection onto the leading principal axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcaReducer {
    pub n_components: usize,
}

impl PcaReducer {
    pub fn new(n_components: usize) -> Self {
        Self { n_components }
    }
}

impl Reducer for PcaReducer {
    #[tracing::instrument(name = "Projecting with PCA", level = "info", skip(self, vectors))]
    fn fit_transform(&self, vectors: &[Vec<f32>]) -> AppResult<Array2<f64>> {
        let data = stack(vectors)?;
        linalg::pca_reduce(&data, self.n_components)
            .map_err(|e| AppError::Reduction(format!("PCA failed: {e}")))
    }
}
