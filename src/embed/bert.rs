use topic_atlas_local_embedder::{BertEmbedder as LocalBertEmbedder, DeviceKind, EmbedderOptions};

use crate::config::EmbedOptions;
use crate::embed::{Embedder, EmbeddingBatches};
use crate::{AppError, AppResult};

/// Embedding backend backed by a local candle BERT encoder.
#[derive(Clone, Debug)]
pub struct BertEmbedder {
    inner: LocalBertEmbedder,
}

impl BertEmbedder {
    /// Resolve `options.model` (local directory or Hugging Face id) onto `device`.
    #[tracing::instrument(name = "Loading embedding model", level = "info", skip(options))]
    pub async fn load(options: &EmbedOptions, device: DeviceKind) -> AppResult<Self> {
        let inner = LocalBertEmbedder::load(
            &options.model,
            device,
            EmbedderOptions {
                prefix: options.prefix.clone(),
                normalize: options.normalize,
                cache: options.cache,
            },
        )
        .await
        .map_err(|e| AppError::ModelLoad(format!("{}: {}", options.model, e)))?;
        Ok(Self { inner })
    }

    pub fn device(&self) -> DeviceKind {
        self.inner.device_kind()
    }
}

impl Embedder for BertEmbedder {
    fn encode<'a>(
        &'a self,
        texts: &'a [String],
        batch_size: usize,
    ) -> AppResult<EmbeddingBatches<'a>> {
        let batches = self
            .inner
            .encode(texts, batch_size)
            .map_err(|e| AppError::Inference(e.to_string()))?;
        Ok(Box::new(batches.map(|batch| {
            batch.map_err(|e| AppError::Inference(e.to_string()))
        })))
    }
}
