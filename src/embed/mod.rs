pub mod bert;

use std::sync::Arc;

use tracing::{Span, debug, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::logging::bar_style;
use crate::{AppError, AppResult};

/// Lazy, order-preserving sequence of embedding batches.
pub type EmbeddingBatches<'a> = Box<dyn Iterator<Item = AppResult<Vec<Vec<f32>>>> + 'a>;

/// Trait for converting text into vector embeddings.
pub trait Embedder: Send + Sync {
    /// Encode `texts` in batches of `batch_size`. Flattening the batches yields one
    /// vector per input text, in input order.
    fn encode<'a>(&'a self, texts: &'a [String], batch_size: usize)
    -> AppResult<EmbeddingBatches<'a>>;
}

impl<T: Embedder + ?Sized> Embedder for &T {
    fn encode<'a>(
        &'a self,
        texts: &'a [String],
        batch_size: usize,
    ) -> AppResult<EmbeddingBatches<'a>> {
        (**self).encode(texts, batch_size)
    }
}

impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn encode<'a>(
        &'a self,
        texts: &'a [String],
        batch_size: usize,
    ) -> AppResult<EmbeddingBatches<'a>> {
        (**self).encode(texts, batch_size)
    }
}

/// Drain every batch into one vector per text, checking count and dimensionality.
#[tracing::instrument(name = "Embedding documents", level = "info", skip(embedder, texts))]
pub fn embed_all<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[String],
    batch_size: usize,
    verbose: bool,
) -> AppResult<Vec<Vec<f32>>> {
    if batch_size == 0 {
        return Err(AppError::Inference("batch size must be greater than 0".into()));
    }

    let span = if verbose {
        let span = info_span!("Running embeddings");
        span.pb_set_message("Embedding...");
        span.pb_set_finish_message("Embedding complete");
        span.pb_set_length(texts.len() as u64);
        span.pb_set_style(&bar_style());
        span
    } else {
        Span::none()
    };
    let _enter = span.enter();

    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in embedder.encode(texts, batch_size)? {
        let batch = batch?;
        span.pb_inc(batch.len() as u64);
        embeddings.extend(batch);
    }

    if embeddings.len() != texts.len() {
        return Err(AppError::Inference(format!(
            "backend returned {} vectors for {} texts",
            embeddings.len(),
            texts.len()
        )));
    }
    if let Some(first) = embeddings.first() {
        let dim = first.len();
        if dim == 0 {
            return Err(AppError::Inference("backend returned empty vectors".into()));
        }
        if let Some(i) = embeddings.iter().position(|v| v.len() != dim) {
            return Err(AppError::Inference(format!(
                "vector {i} has {} components, expected {dim}",
                embeddings[i].len()
            )));
        }
        debug!("Embedded {} texts into {} dimensions", embeddings.len(), dim);
    }
    Ok(embeddings)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic bag-of-characters embedder for tests.
    ///
    /// Texts sharing vocabulary land close together, so clustering on its output
    /// behaves like clustering on real sentence vectors.
    pub struct HashEmbedder {
        pub dim: usize,
    }

    impl HashEmbedder {
        pub fn vector(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; self.dim];
            for word in text.split_whitespace() {
                let h = word
                    .bytes()
                    .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
                v[h as usize % self.dim] += 1.0;
            }
            v
        }
    }

    impl Embedder for HashEmbedder {
        fn encode<'a>(
            &'a self,
            texts: &'a [String],
            batch_size: usize,
        ) -> AppResult<EmbeddingBatches<'a>> {
            Ok(Box::new(
                texts
                    .chunks(batch_size)
                    .map(|chunk| Ok(chunk.iter().map(|t| self.vector(t)).collect())),
            ))
        }
    }

    /// Embedder that returns whatever it is told to, for contract tests.
    pub struct ScriptedEmbedder {
        pub batches: Vec<Vec<Vec<f32>>>,
    }

    impl Embedder for ScriptedEmbedder {
        fn encode<'a>(
            &'a self,
            _texts: &'a [String],
            _batch_size: usize,
        ) -> AppResult<EmbeddingBatches<'a>> {
            Ok(Box::new(self.batches.iter().cloned().map(Ok)))
        }
    }
}
