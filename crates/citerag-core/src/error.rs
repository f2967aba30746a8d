use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("{0} is not initialized; build or load it first")]
    NotInitialized(String),

    #[error("Pipeline not ready; ingest documents or load indexes first")]
    NotReady,

    #[error("Duplicate chunk id in one build: {0}")]
    DuplicateChunkId(String),

    #[error("{stage} collaborator failed: {message}")]
    Collaborator { stage: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a failure reported by an external engine (model, vector DB, LLM).
    pub fn collaborator(stage: &'static str, err: anyhow::Error) -> Self {
        Error::Collaborator { stage, message: format!("{err:#}") }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
