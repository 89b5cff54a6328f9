use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("extraction failed for {file}: {reason}")]
    Extraction { file: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("index write failed: {0}")]
    IndexWrite(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

impl IngestError {
    pub fn extraction(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("store request failed: {0}")]
    Request(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
