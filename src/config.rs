use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{ArgAction, Args, ValueEnum};
use serde::{Deserialize, Serialize};
use topic_atlas_dirs::DirType;
use topic_atlas_local_embedder::DeviceKind;
use tracing::debug;

use crate::{AppError, AppResult};

/// Multilingual BERT-architecture sentence encoder used when no model is given.
pub const DEFAULT_MODEL: &str = "intfloat/multilingual-e5-small";

/// Device request: `auto` probes the runtime, anything else bypasses the probe.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    Auto,
    Cuda,
    Metal,
    Cpu,
}

impl DeviceChoice {
    pub fn resolve(self) -> DeviceKind {
        match self {
            DeviceChoice::Auto => DeviceKind::probe(),
            DeviceChoice::Cuda => DeviceKind::Cuda,
            DeviceChoice::Metal => DeviceKind::Metal,
            DeviceChoice::Cpu => DeviceKind::Cpu,
        }
    }
}

/// Options for the embedding backend.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedOptions {
    /// Local model directory or Hugging Face repo id
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Number of texts sent to the model per inference call
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Hide the embedding progress bar
    #[arg(
        id = "progress",
        long = "no-progress",
        default_value_t = true,
        action = ArgAction::SetFalse
    )]
    pub verbose: bool,

    /// Compute device for inference
    #[arg(long, value_enum, default_value_t = DeviceChoice::Auto)]
    pub device: DeviceChoice,

    /// Text prepended to every document before tokenizing
    #[arg(long, default_value = "query: ")]
    pub prefix: String,

    /// Keep raw mean-pooled vectors instead of unit-normalizing them
    #[arg(long = "no-normalize", default_value_t = true, action = ArgAction::SetFalse)]
    pub normalize: bool,

    /// Skip the on-disk embedding cache
    #[arg(long = "no-cache", default_value_t = true, action = ArgAction::SetFalse)]
    pub cache: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            batch_size: 32,
            verbose: true,
            device: DeviceChoice::Auto,
            prefix: "query: ".to_string(),
            normalize: true,
            cache: true,
        }
    }
}

/// Distance used by HDBSCAN.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Euclidean,
    Manhattan,
    Chebyshev,
}

/// Cluster selection epsilon: a fixed value, or `auto` to take the k-distance elbow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EpsilonRepr", into = "EpsilonRepr")]
pub enum Epsilon {
    Fixed(f64),
    Auto,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EpsilonRepr {
    Number(f64),
    Text(String),
}

impl TryFrom<EpsilonRepr> for Epsilon {
    type Error = String;

    fn try_from(value: EpsilonRepr) -> Result<Self, Self::Error> {
        match value {
            EpsilonRepr::Number(v) => Epsilon::from_str(&v.to_string()),
            EpsilonRepr::Text(s) => Epsilon::from_str(&s),
        }
    }
}

impl From<Epsilon> for EpsilonRepr {
    fn from(value: Epsilon) -> Self {
        match value {
            Epsilon::Fixed(v) => EpsilonRepr::Number(v),
            Epsilon::Auto => EpsilonRepr::Text("auto".to_string()),
        }
    }
}

impl FromStr for Epsilon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Epsilon::Auto);
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(Epsilon::Fixed(v)),
            _ => Err(format!(
                "expected `auto` or a non-negative number, got `{s}`"
            )),
        }
    }
}

impl Display for Epsilon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Epsilon::Fixed(v) => write!(f, "{}", v),
            Epsilon::Auto => write!(f, "auto"),
        }
    }
}

/// Options for the topic clustering runner.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicOptions {
    /// Smallest group of documents that forms a topic
    #[arg(long, default_value_t = 10)]
    pub min_cluster_size: usize,

    /// Neighbourhood size for core distances (defaults to the minimum cluster size)
    #[arg(long)]
    pub min_samples: Option<usize>,

    /// Cluster selection epsilon, or `auto`
    #[arg(long, default_value_t = Epsilon::Fixed(0.0))]
    pub epsilon: Epsilon,

    /// Distance metric used while clustering
    #[arg(long, value_enum, default_value_t = Metric::Euclidean)]
    pub metric: Metric,

    /// Dimensions kept by PCA before clustering
    #[arg(long = "cluster-dims", default_value_t = 5)]
    pub reduce_components: usize,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            min_cluster_size: 10,
            min_samples: None,
            epsilon: Epsilon::Fixed(0.0),
            metric: Metric::Euclidean,
            reduce_components: 5,
        }
    }
}

/// Algorithm used to project embeddings onto the plane.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceMethod {
    Umap,
    Pca,
}

/// Options for the dimensionality reducer.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceOptions {
    /// Projection algorithm
    #[arg(long = "reducer", value_enum, default_value_t = ReduceMethod::Umap)]
    pub method: ReduceMethod,

    /// Neighbourhood size for the fuzzy graph
    #[arg(long, default_value_t = 15)]
    pub n_neighbors: usize,

    /// Minimum distance between projected points
    #[arg(long, default_value_t = 0.1)]
    pub min_dist: f64,

    /// Output dimensionality; the chart requires 2
    #[arg(long, default_value_t = 2)]
    pub n_components: usize,

    /// Optimisation epochs
    #[arg(long, default_value_t = 200)]
    pub n_epochs: usize,

    /// Seed for the layout optimiser
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            method: ReduceMethod::Umap,
            n_neighbors: 15,
            min_dist: 0.1,
            n_components: 2,
            n_epochs: 200,
            seed: 42,
        }
    }
}

/// The three option bundles, as read from a JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub embed: EmbedOptions,
    pub topics: TopicOptions,
    pub reduce: ReduceOptions,
}

impl PipelineConfig {
    /// `config.json` inside the application config directory.
    pub fn default_path() -> AppResult<PathBuf> {
        Ok(DirType::Config.file("config.json")?)
    }

    pub fn from_json_slice(bytes: &[u8]) -> AppResult<Self> {
        let de = &mut serde_json::Deserializer::from_slice(bytes);
        let config: Self = serde_path_to_error::deserialize(de)
            .map_err(|e| AppError::Config(format!("{} at `{}`", e.inner(), e.path())))?;
        config.validate()?;
        Ok(config)
    }

    #[tracing::instrument(name = "Reading configuration", level = "debug")]
    pub async fn from_file<P: AsRef<Path> + std::fmt::Debug>(path: P) -> AppResult<Self> {
        let bytes = match tokio::fs::read(path.as_ref()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(path.as_ref().to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let config = Self::from_json_slice(&bytes)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.embed.batch_size == 0 {
            return Err(AppError::Config("embed.batch_size must be greater than 0".into()));
        }
        if self.topics.min_cluster_size < 2 {
            return Err(AppError::Config(
                "topics.min_cluster_size must be at least 2".into(),
            ));
        }
        if self.topics.min_samples == Some(0) {
            return Err(AppError::Config("topics.min_samples must be at least 1".into()));
        }
        if self.topics.reduce_components == 0 {
            return Err(AppError::Config("topics.reduce_components must be at least 1".into()));
        }
        if self.reduce.n_neighbors == 0 {
            return Err(AppError::Config("reduce.n_neighbors must be at least 1".into()));
        }
        if self.reduce.n_components == 0 {
            return Err(AppError::Config("reduce.n_components must be at least 1".into()));
        }
        if !(self.reduce.min_dist.is_finite() && self.reduce.min_dist >= 0.0) {
            return Err(AppError::Config("reduce.min_dist must be a non-negative number".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = PipelineConfig::from_json_slice(b"{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn partial_bundles_keep_other_defaults() {
        let raw = br#"{"embed": {"batch_size": 8, "device": "cpu"}, "topics": {"epsilon": "auto"}, "reduce": {"method": "pca"}}"#;
        let config = PipelineConfig::from_json_slice(raw).unwrap();
        assert_eq!(config.embed.batch_size, 8);
        assert_eq!(config.embed.device, DeviceChoice::Cpu);
        assert_eq!(config.embed.model, DEFAULT_MODEL);
        assert_eq!(config.topics.epsilon, Epsilon::Auto);
        assert_eq!(config.topics.min_cluster_size, 10);
        assert_eq!(config.reduce.method, ReduceMethod::Pca);
        assert_eq!(config.reduce.n_neighbors, 15);
    }

    #[test]
    fn numeric_epsilon_is_accepted() {
        let config = PipelineConfig::from_json_slice(br#"{"topics": {"epsilon": 0.25}}"#).unwrap();
        assert_eq!(config.topics.epsilon, Epsilon::Fixed(0.25));
    }

    #[test]
    fn errors_report_json_path() {
        let err = PipelineConfig::from_json_slice(br#"{"reduce": {"n_epochs": "many"}}"#)
            .unwrap_err();
        match err {
            AppError::Config(msg) => assert!(msg.contains("reduce.n_epochs"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_bundle_is_rejected() {
        assert!(PipelineConfig::from_json_slice(br#"{"plot": {}}"#).is_err());
    }

    #[test]
    fn zero_batch_size_fails_validation() {
        let err = PipelineConfig::from_json_slice(br#"{"embed": {"batch_size": 0}}"#).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn epsilon_parsing() {
        assert_eq!("auto".parse::<Epsilon>().unwrap(), Epsilon::Auto);
        assert_eq!("AUTO".parse::<Epsilon>().unwrap(), Epsilon::Auto);
        assert_eq!("0.5".parse::<Epsilon>().unwrap(), Epsilon::Fixed(0.5));
        assert!("-1".parse::<Epsilon>().is_err());
        assert!("wide".parse::<Epsilon>().is_err());
        assert_eq!(Epsilon::Fixed(0.0).to_string(), "0");
    }

    #[test]
    fn explicit_device_bypasses_probe() {
        assert_eq!(DeviceChoice::Cpu.resolve(), DeviceKind::Cpu);
        assert_eq!(DeviceChoice::Metal.resolve(), DeviceKind::Metal);
        assert_eq!(DeviceChoice::Auto.resolve(), DeviceKind::probe());
    }
}
