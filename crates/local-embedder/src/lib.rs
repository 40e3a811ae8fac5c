mod cache;
mod device;

use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use futures::StreamExt;
use serde::Deserialize;
use tokenizers::tokenizer::Tokenizer;
use tokenizers::{PaddingParams, PaddingStrategy, TruncationParams};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

pub use cache::EmbeddingCache;
pub use device::DeviceKind;

#[derive(thiserror::Error, Debug)]
pub enum EmbedderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),
    #[error("Int parse error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Header value error: {0}")]
    HeaderValue(#[from] reqwest::header::ToStrError),
    #[error("Batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("Model produced {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("{0}")]
    Dir(#[from] topic_atlas_dirs::DirError),
}

// Tokenizer error mapping
impl From<Box<dyn std::error::Error + Send + Sync>> for EmbedderError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Tokenizer(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EmbedderError>;

/// Files a BERT checkpoint directory must contain.
pub const MODEL_FILES: [&str; 3] = ["config.json", "model.safetensors", "tokenizer.json"];

/// Behaviour knobs applied around the raw encoder.
#[derive(Debug, Clone)]
pub struct EmbedderOptions {
    /// Prepended to every text before tokenizing (e5 models expect `query: `).
    pub prefix: String,
    /// L2-normalise pooled vectors.
    pub normalize: bool,
    /// Read and write the on-disk embedding cache.
    pub cache: bool,
}

impl Default for EmbedderOptions {
    fn default() -> Self {
        Self {
            prefix: "query: ".to_string(),
            normalize: true,
            cache: true,
        }
    }
}

#[derive(Deserialize)]
struct ModelLimits {
    #[serde(default = "default_max_positions")]
    max_position_embeddings: usize,
}

fn default_max_positions() -> usize {
    512
}

fn progress_style(template: &str, fallback: ProgressStyle) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or(fallback)
}

/// Wrapper around a BERT encoder that mean-pools hidden states into sentence vectors.
#[derive(Clone)]
pub struct BertEmbedder {
    model_id: String,
    device: Device,
    device_kind: DeviceKind,
    model: Arc<BertModel>,
    tokenizer: Arc<Tokenizer>,
    cache: Option<EmbeddingCache>,
    options: EmbedderOptions,
}

impl std::fmt::Debug for BertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEmbedder")
            .field("model_id", &self.model_id)
            .field("device", &self.device_kind)
            .field("options", &self.options)
            .finish()
    }
}

impl BertEmbedder {
    /// Load from a local checkpoint directory when `reference` names one,
    /// otherwise treat it as a Hugging Face repo id.
    pub async fn load<S: AsRef<str> + std::fmt::Debug>(
        reference: S,
        device_kind: DeviceKind,
        options: EmbedderOptions,
    ) -> Result<Self> {
        let local = Path::new(reference.as_ref());
        if local.is_dir() {
            info!("Using local model directory {:?}", local);
            Self::new_from_dir(local, reference.as_ref(), device_kind, options)
        } else {
            Self::new_from_pretrained(reference, device_kind, options).await
        }
    }

    #[tracing::instrument(name = "Downloading embedding model from Hugging Face", level = "info")]
    pub async fn new_from_pretrained<S: AsRef<str> + std::fmt::Debug>(
        model_name: S,
        device_kind: DeviceKind,
        options: EmbedderOptions,
    ) -> Result<Self> {
        let cache_dir = topic_atlas_dirs::DirType::Cache.ensure_dir_async().await?;
        let model_dir = cache_dir
            .join("huggingface")
            .join("transformers")
            .join(model_name.as_ref().replace('/', "_"));
        tokio::fs::create_dir_all(&model_dir).await?;

        let base_url = format!(
            "https://huggingface.co/{}/resolve/main/",
            model_name.as_ref()
        );

        let client = reqwest::ClientBuilder::new()
            .user_agent(concat!("topic-atlas-embedder/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .referer(true)
            .retry(reqwest::retry::for_host("huggingface.co").max_retries_per_request(3))
            .build()?;

        for file in MODEL_FILES {
            let file_path = model_dir.join(file);
            if !file_path.exists() {
                download_file(&client, &format!("{}{}", base_url, file), &file_path).await?;
            }
        }

        Self::new_from_dir(model_dir, model_name.as_ref(), device_kind, options)
    }

    #[tracing::instrument(
        name = "Loading embedding model from directory",
        level = "info",
        skip(model_dir, options)
    )]
    pub fn new_from_dir<P: AsRef<Path>>(
        model_dir: P,
        model_id: &str,
        device_kind: DeviceKind,
        options: EmbedderOptions,
    ) -> Result<Self> {
        let model_dir = model_dir.as_ref();

        let config_bytes = std::fs::read(model_dir.join("config.json"))?;
        let config: BertConfig = serde_json::from_slice(&config_bytes)?;
        let limits: ModelLimits = serde_json::from_slice(&config_bytes)?;

        let mut tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer.with_truncation(Some(TruncationParams {
            max_length: limits.max_position_embeddings,
            ..Default::default()
        }))?;

        let device = device_kind.open()?;
        debug!("Opened {} device for inference", device_kind);

        let weights_data = std::fs::read(model_dir.join("model.safetensors"))?;
        let vb = VarBuilder::from_slice_safetensors(&weights_data, DType::F32, &device)?;
        let model = BertModel::load(vb, &config)?;

        let cache = if options.cache {
            let root = topic_atlas_dirs::DirType::Cache.ensure_dir()?;
            Some(EmbeddingCache::open(root, model_id)?)
        } else {
            None
        };

        Ok(Self {
            model_id: model_id.to_string(),
            device,
            device_kind,
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            cache,
            options,
        })
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.device_kind
    }

    /// Lazily encode `texts`, yielding one `Vec` of vectors per batch of `batch_size`.
    pub fn encode<'a>(
        &'a self,
        texts: &'a [String],
        batch_size: usize,
    ) -> Result<EmbeddingBatches<'a>> {
        if batch_size == 0 {
            return Err(EmbedderError::ZeroBatchSize);
        }
        Ok(EmbeddingBatches {
            embedder: self,
            texts,
            batch_size,
            cursor: 0,
        })
    }

    /// Encode one batch, serving cached vectors and running the model on the rest.
    pub fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| format!("{}{}", self.options.prefix, t.trim()))
            .collect();

        let mut pooled: Vec<Option<Vec<f32>>> = vec![None; prepared.len()];
        let mut misses = Vec::new();
        for (i, text) in prepared.iter().enumerate() {
            match self.cache.as_ref().map(|c| c.get(text)).transpose()?.flatten() {
                Some(vec) => pooled[i] = Some(vec),
                None => misses.push(i),
            }
        }

        if !misses.is_empty() {
            let inputs: Vec<&str> = misses.iter().map(|&i| prepared[i].as_str()).collect();
            let computed = self.forward_mean_pooled(&inputs)?;
            if computed.len() != inputs.len() {
                return Err(EmbedderError::CountMismatch {
                    expected: inputs.len(),
                    got: computed.len(),
                });
            }
            for (&i, vec) in misses.iter().zip(computed) {
                if let Some(cache) = &self.cache {
                    cache.put(&prepared[i], &vec)?;
                }
                pooled[i] = Some(vec);
            }
        }

        Ok(pooled
            .into_iter()
            .flatten()
            .map(|v| if self.options.normalize { l2_normalize(v) } else { v })
            .collect())
    }

    fn forward_mean_pooled(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let encodings = self.tokenizer.encode_batch(inputs.to_vec(), true)?;
        let batch = encodings.len();
        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut type_ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            ids.extend_from_slice(encoding.get_ids());
            type_ids.extend_from_slice(encoding.get_type_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let input_ids = Tensor::from_vec(ids, (batch, seq_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(type_ids, (batch, seq_len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask, (batch, seq_len), &self.device)?;

        // outputs = (batch, seq_len, hidden)
        let outputs = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Padding positions must not contribute to the mean.
        let weights = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = outputs.broadcast_mul(&weights)?.sum(1)?;
        let counts = weights.sum(1)?.clamp(1e-9f32, f32::MAX)?;
        let mean = summed.broadcast_div(&counts)?;

        Ok(mean.to_vec2::<f32>()?)
    }
}

fn l2_normalize(v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.into_iter().map(|x| x / norm).collect()
    } else {
        v
    }
}

/// Stream a remote file to `dest`, writing through a `.part` file.
async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let partial = dest.with_extension("part");
    let mut open_file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&partial)
        .await?;
    let resp = client.get(url).send().await?.error_for_status()?;

    let header_span = info_span!("Downloading model file", url = %url);
    header_span.pb_set_message("Downloading...");
    header_span.pb_set_finish_message("Download complete");

    if let Some(content_length) = resp.headers().get(reqwest::header::CONTENT_LENGTH) {
        let file_size: u64 = content_length.to_str()?.parse()?;
        debug!("Expected file size: {} bytes", file_size);
        header_span.pb_set_style(&progress_style(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ProgressStyle::default_bar(),
        ));
        header_span.pb_set_length(file_size);
    } else {
        warn!("Content-Length header not found.");
        header_span.pb_set_style(&progress_style(
            "{msg} {spinner}",
            ProgressStyle::default_spinner(),
        ));
    }
    let _enter = header_span.enter();

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        open_file.write_all(&chunk).await?;
        header_span.pb_inc(chunk.len() as u64);
    }
    open_file.flush().await?;
    open_file.sync_all().await?;
    open_file.shutdown().await?;
    tokio::fs::rename(&partial, dest).await?;
    Ok(())
}

/// Lazy, order-preserving iterator over encoded batches.
pub struct EmbeddingBatches<'a> {
    embedder: &'a BertEmbedder,
    texts: &'a [String],
    batch_size: usize,
    cursor: usize,
}

impl Iterator for EmbeddingBatches<'_> {
    type Item = Result<Vec<Vec<f32>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.texts.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.texts.len());
        let batch = &self.texts[self.cursor..end];
        self.cursor = end;
        Some(self.embedder.embed_batch_blocking(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_scales_to_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn model_limits_default_when_missing() {
        let limits: ModelLimits = serde_json::from_str("{}").unwrap();
        assert_eq!(limits.max_position_embeddings, 512);
        let limits: ModelLimits =
            serde_json::from_str(r#"{"max_position_embeddings": 256}"#).unwrap();
        assert_eq!(limits.max_position_embeddings, 256);
    }

    #[test]
    fn default_options_use_e5_prefix() {
        let options = EmbedderOptions::default();
        assert_eq!(options.prefix, "query: ");
        assert!(options.normalize);
        assert!(options.cache);
    }
}
