use ndarray::prelude::*;
use thiserror::Error;
use tracing::trace;

/// Why a set of vectors cannot be stacked into a matrix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("no vectors were given")]
    Empty,
    #[error("vectors have zero length")]
    ZeroWidth,
    #[error("vector {row} has {got} components, expected {expected}")]
    Ragged { row: usize, expected: usize, got: usize },
}

/// Stack equal-length `f32` vectors into an `(n_samples, n_features)` `f64` matrix.
pub fn embeddings_to_ndarray(embs: &[Vec<f32>]) -> Result<Array2<f64>, StackError> {
    let Some(first) = embs.first() else {
        return Err(StackError::Empty);
    };
    let cols = first.len();
    if cols == 0 {
        return Err(StackError::ZeroWidth);
    }
    if let Some((row, v)) = embs.iter().enumerate().find(|(_, v)| v.len() != cols) {
        return Err(StackError::Ragged {
            row,
            expected: cols,
            got: v.len(),
        });
    }
    let mut arr: Array2<f64> = Array2::<f64>::zeros((embs.len(), cols));
    trace!("Initialized ndarray with shape: {:?}", arr.dim());
    for (mut row, emb) in arr.axis_iter_mut(Axis(0)).zip(embs) {
        for (val, &x) in row.iter_mut().zip(emb) {
            *val = x as f64;
        }
    }
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn converts_embeddings_to_f64_ndarray() {
        let embs = vec![vec![1.0_f32, 2.5_f32], vec![3.75_f32, -4.0_f32]];

        let arr = embeddings_to_ndarray(&embs).unwrap();

        assert_eq!(arr.dim(), (2, 2));
        let expected = array![[1.0_f64, 2.5_f64], [3.75_f64, -4.0_f64]];
        assert_eq!(arr, expected);
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(embeddings_to_ndarray(&[]), Err(StackError::Empty));
        assert_eq!(
            embeddings_to_ndarray(&[vec![], vec![]]),
            Err(StackError::ZeroWidth)
        );
    }

    #[test]
    fn rejects_ragged_rows() {
        let embs = vec![vec![1.0], vec![1.0], vec![1.0, 2.0]];
        let err = embeddings_to_ndarray(&embs).unwrap_err();
        assert_eq!(
            err,
            StackError::Ragged {
                row: 2,
                expected: 1,
                got: 2
            }
        );
        assert_eq!(err.to_string(), "vector 2 has 2 components, expected 1");
    }
}
