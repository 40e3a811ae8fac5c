mod pca;
mod umap;

use ndarray::Array2;

use crate::config::{ReduceMethod, ReduceOptions};
use crate::{AppError, AppResult, convert};

pub use pca::PcaReducer;
pub use umap::{UmapReducer, fit_curve};

/// Trait for projecting embeddings into a low-dimensional space.
pub trait Reducer: Send + Sync {
    /// Project `vectors` (one per document) to an `(n_samples, n_components)` matrix whose
    /// row `i` corresponds to `vectors[i]`.
    fn fit_transform(&self, vectors: &[Vec<f32>]) -> AppResult<Array2<f64>>;
}

impl<T: Reducer + ?Sized> Reducer for Box<T> {
    fn fit_transform(&self, vectors: &[Vec<f32>]) -> AppResult<Array2<f64>> {
        (**self).fit_transform(vectors)
    }
}

/// Build the reducer selected by `options.method`.
pub fn from_options(options: &ReduceOptions, progress: bool) -> Box<dyn Reducer> {
    match options.method {
        ReduceMethod::Umap => Box::new(UmapReducer::from(options).with_progress(progress)),
        ReduceMethod::Pca => Box::new(PcaReducer::new(options.n_components)),
    }
}

/// Stack `vectors` into a matrix, rejecting empty or ragged input.
pub(crate) fn stack(vectors: &[Vec<f32>]) -> AppResult<Array2<f64>> {
    convert::embeddings_to_ndarray(vectors).map_err(|e| AppError::Reduction(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_options_honours_method() {
        let vectors = vec![vec![0.0, 1.0, 2.0], vec![1.0, 0.0, 2.0], vec![2.0, 2.0, 0.0]];
        for method in [ReduceMethod::Pca, ReduceMethod::Umap] {
            let reducer = from_options(
                &ReduceOptions {
                    method,
                    n_epochs: 20,
                    ..Default::default()
                },
                false,
            );
            let out = reducer.fit_transform(&vectors).unwrap();
            assert_eq!(out.dim(), (3, 2));
        }
    }

    #[test]
    fn empty_and_ragged_input_are_reduction_errors() {
        let reducer = from_options(&ReduceOptions::default(), false);
        assert!(matches!(
            reducer.fit_transform(&[]),
            Err(AppError::Reduction(_))
        ));
        assert!(matches!(
            reducer.fit_transform(&[vec![1.0, 2.0], vec![1.0]]),
            Err(AppError::Reduction(_))
        ));
    }
}
