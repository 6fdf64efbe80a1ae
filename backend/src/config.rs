use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the remote analysis backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub model_id: String,
    pub timeout: Duration,
    pub default_max_tokens: u32,
    pub default_temperature: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            model_id: "radar-analysis-v1".to_string(),
            timeout: Duration::from_secs(30),
            default_max_tokens: 4096,
            default_temperature: 0.0,
        }
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("Base URL must start with http:// or https://".to_string());
        }

        if self.model_id.is_empty() {
            return Err("Model ID cannot be empty".to_string());
        }

        if self.default_max_tokens == 0 {
            return Err("Max tokens must be greater than 0".to_string());
        }

        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err("Temperature must be between 0.0 and 2.0".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BackendConfig::default();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.model_id, "radar-analysis-v1");
        assert_eq!(config.default_max_tokens, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BackendConfig::new()
            .with_base_url("https://api.example.com")
            .with_model_id("claude-3-sonnet")
            .with_max_tokens(8192)
            .with_temperature(0.5)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.model_id, "claude-3-sonnet");
        assert_eq!(config.default_max_tokens, 8192);
        assert_eq!(config.default_temperature, 0.5);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BackendConfig::default();

        config.base_url = "".to_string();
        assert!(config.validate().is_err());

        config.base_url = "invalid-url".to_string();
        assert!(config.validate().is_err());

        config.base_url = "http://localhost:8080".to_string();
        config.model_id = "".to_string();
        assert!(config.validate().is_err());

        config.model_id = "m".to_string();
        config.default_max_tokens = 0;
        assert!(config.validate().is_err());

        config.default_max_tokens = 4096;
        config.default_temperature = 3.0;
        assert!(config.validate().is_err());

        config.default_temperature = 0.0;
        config.timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());
    }
}
