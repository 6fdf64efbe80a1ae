use crate::config::BackendConfig;
use crate::provider::{AnalysisBackend, BackendError, BackendResult};
use crate::types::{CompletionRequest, CompletionResponse, ModelInfo, Usage};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

#[derive(Serialize)]
struct ApiCompletionRequest {
    model: String,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ApiCompletionResponse {
    completion: String,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

/// HTTP client for a completion-style analysis backend.
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        config
            .validate()
            .map_err(|msg| BackendError::InvalidConfig { message: msg })?;

        let base_url = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Unknown {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            base_url,
            config,
        })
    }

    pub fn with_default_config() -> BackendResult<Self> {
        Self::new(BackendConfig::default())
    }

    /// Options left unset on the request fall back to the configured
    /// defaults.
    fn build_request_body(&self, request: &CompletionRequest) -> ApiCompletionRequest {
        ApiCompletionRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.config.default_max_tokens),
            temperature: request
                .temperature
                .unwrap_or(self.config.default_temperature),
        }
    }

    fn parse_response(response: ApiCompletionResponse) -> CompletionResponse {
        let usage = response.usage.map(|u| {
            let prompt_tokens = u.prompt_tokens.unwrap_or(0) as u32;
            let completion_tokens = u.completion_tokens.unwrap_or(0) as u32;
            Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }
        });

        CompletionResponse {
            text: response.completion,
            usage,
        }
    }

    fn classify_status(status: StatusCode, body: String, model: &str) -> BackendError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimit,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Authentication,
            StatusCode::BAD_REQUEST => BackendError::MalformedRequest { message: body },
            StatusCode::NOT_FOUND => BackendError::ModelNotFound {
                model: model.to_string(),
            },
            s if s.is_server_error() => BackendError::ServiceUnavailable {
                message: format!("Backend returned {}: {}", s, body),
            },
            s => BackendError::Unknown {
                message: format!("Backend returned {}: {}", s, body),
            },
        }
    }

    fn classify_send_error(e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::ServiceUnavailable {
                message: "Request timeout".to_string(),
            }
        } else if e.is_connect() {
            BackendError::ServiceUnavailable {
                message: "Cannot connect to analysis backend".to_string(),
            }
        } else {
            BackendError::Network(e)
        }
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn invoke(&self, request: CompletionRequest) -> BackendResult<CompletionResponse> {
        debug!("Starting completion request with model: {}", request.model);

        let body = self.build_request_body(&request);
        let url = format!("{}v1/complete", self.base_url);

        let http_response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        let status = http_response.status();
        if !status.is_success() {
            let error_text = http_response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, error_text, &request.model));
        }

        let api_response: ApiCompletionResponse =
            http_response.json().await.map_err(BackendError::Network)?;

        info!("Completion request finished successfully");

        Ok(Self::parse_response(api_response))
    }

    async fn health_check(&self) -> BackendResult<()> {
        debug!("Performing backend health check");

        let url = format!("{}v1/health", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        let status = response.status();
        if status.is_success() {
            info!("Backend health check passed");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            let err = Self::classify_status(status, body, &self.config.model_id);
            error!("Backend health check failed: {}", err);
            Err(err)
        }
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }

    fn model_info(&self) -> Option<ModelInfo> {
        Some(ModelInfo {
            name: self.config.model_id.clone(),
            context_length: None,
        })
    }
}
