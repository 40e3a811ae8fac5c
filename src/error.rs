use std::path::PathBuf;

use thiserror::Error;

/// Unified application error type; every pipeline stage fails fast with one of these.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Input file not found: {0}")]
    NotFound(PathBuf),
    #[error("Input is not valid JSON. {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Key `{0}` is not present at the top level of the input")]
    Key(String),
    #[error("Document collection does not have the expected shape. {0}")]
    Schema(String),
    #[error("Unable to load the embedding model. {0}")]
    ModelLoad(String),
    #[error("Embedding inference failed. {0}")]
    Inference(String),
    #[error("Topic clustering failed. {0}")]
    Clustering(String),
    #[error("Dimensionality reduction failed. {0}")]
    Reduction(String),
    #[error("Cannot render a chart from an empty table")]
    EmptyTable,
    #[error("Column shapes do not line up. {0}")]
    ShapeMismatch(String),
    #[error("Invalid configuration. {0}")]
    Config(String),
    #[error("Errored while handling a file. {0}")]
    Io(#[from] std::io::Error),
    #[error("Runtime error. {0}")]
    TokioJoin(#[from] tokio::task::JoinError),
    #[error("Directory not found error. {0}")]
    Dir(#[from] topic_atlas_dirs::DirError),
}

/// Convenience alias for results that bubble `AppError`.
pub type AppResult<T> = Result<T, AppError>;
