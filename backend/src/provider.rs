use crate::types::{CompletionRequest, CompletionResponse, ModelInfo};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Authentication failed")]
    Authentication,

    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl BackendError {
    /// Whether a retry with backoff can reasonably be expected to succeed.
    ///
    /// Throttling, service outages, and network-level failures are transient.
    /// Auth failures and malformed requests fail identically on every attempt
    /// and must go straight to the local fallback.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::RateLimit | BackendError::ServiceUnavailable { .. } => true,
            BackendError::Network(e) => e.is_timeout() || e.is_connect(),
            BackendError::Unknown { .. } => true,
            BackendError::Serialization(_)
            | BackendError::ModelNotFound { .. }
            | BackendError::InvalidConfig { .. }
            | BackendError::Authentication
            | BackendError::MalformedRequest { .. } => false,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn invoke(&self, request: CompletionRequest) -> BackendResult<CompletionResponse>;

    async fn health_check(&self) -> BackendResult<()>;

    fn backend_name(&self) -> &'static str;

    fn model_info(&self) -> Option<ModelInfo> {
        None
    }
}
