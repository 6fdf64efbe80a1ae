//! Configuration loading and validation.
//!
//! Settings come from an optional TOML file, are overridden by `RADAR_*`
//! environment variables, and are validated before the pipeline starts.
//! Invalid configuration is the one error class that aborts a run outright.

use crate::analyzer::{AnalyzerConfig, RetryPolicy};
use crate::executor::{CommandTemplate, ExecutorConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    pub root: PathBuf,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub parallel_jobs: usize,
    pub timeout_seconds: u64,
    pub collect_coverage: bool,
    pub coverage_target: Option<f64>,
    /// Total coverable lines in the project, when known from an external
    /// source. Enables the aggregate coverage percentage in the report.
    pub coverable_lines: Option<u64>,
    pub command: CommandTemplate,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include_patterns: vec!["test_*.py".to_string()],
            exclude_patterns: vec!["__pycache__".to_string(), ".pytest_cache".to_string()],
            parallel_jobs: 2,
            timeout_seconds: 300,
            collect_coverage: false,
            coverage_target: Some(95.0),
            coverable_lines: None,
            command: CommandTemplate::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub model_id: String,
    pub timeout_seconds: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_factor: f64,
    pub max_concurrent_requests: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            model_id: "radar-analysis-v1".to_string(),
            timeout_seconds: 30,
            max_tokens: 4096,
            temperature: 0.0,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
            jitter_factor: 0.2,
            max_concurrent_requests: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RadarConfig {
    pub test: TestSettings,
    pub backend: BackendSettings,
    pub log_level: Option<String>,
}

impl RadarConfig {
    /// Load configuration from a TOML file, then apply environment
    /// overrides. A `None` path means defaults plus environment only.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound {
                        path: path.to_path_buf(),
                    });
                }
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(jobs) = env_parse::<usize>("RADAR_PARALLEL_JOBS") {
            self.test.parallel_jobs = jobs;
        }
        if let Some(timeout) = env_parse::<u64>("RADAR_TIMEOUT_SECONDS") {
            self.test.timeout_seconds = timeout;
        }
        if let Some(target) = env_parse::<f64>("RADAR_COVERAGE_TARGET") {
            self.test.coverage_target = Some(target);
        }
        if let Ok(url) = std::env::var("RADAR_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Ok(model) = std::env::var("RADAR_MODEL_ID") {
            self.backend.model_id = model;
        }
        if let Ok(level) = std::env::var("RADAR_LOG_LEVEL") {
            self.log_level = Some(level);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.test.parallel_jobs == 0 {
            return Err(ConfigError::Invalid {
                message: "parallel_jobs must be greater than 0".to_string(),
            });
        }
        if self.test.timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "timeout_seconds must be greater than 0".to_string(),
            });
        }
        if self.test.include_patterns.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one include pattern is required".to_string(),
            });
        }
        if let Some(target) = self.test.coverage_target {
            if !(0.0..=100.0).contains(&target) {
                return Err(ConfigError::Invalid {
                    message: "coverage_target must be between 0 and 100".to_string(),
                });
            }
        }
        if self.backend.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }
        if self.backend.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid {
                message: "max_concurrent_requests must be greater than 0".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(ConfigError::Invalid {
                message: "temperature must be between 0.0 and 2.0".to_string(),
            });
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            parallel_jobs: self.test.parallel_jobs,
            timeout: Duration::from_secs(self.test.timeout_seconds),
            collect_coverage: self.test.collect_coverage,
            command: self.test.command.clone(),
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            model_id: self.backend.model_id.clone(),
            max_tokens: self.backend.max_tokens,
            temperature: self.backend.temperature,
            max_concurrent_requests: self.backend.max_concurrent_requests,
            retry: RetryPolicy {
                max_attempts: self.backend.max_attempts,
                base_delay: Duration::from_millis(self.backend.backoff_base_ms),
                max_delay: Duration::from_millis(self.backend.backoff_max_ms),
                jitter_factor: self.backend.jitter_factor,
            },
        }
    }

    pub fn backend_config(&self) -> backend::BackendConfig {
        backend::BackendConfig::new()
            .with_base_url(self.backend.base_url.clone())
            .with_model_id(self.backend.model_id.clone())
            .with_timeout(Duration::from_secs(self.backend.timeout_seconds))
            .with_max_tokens(self.backend.max_tokens)
            .with_temperature(self.backend.temperature)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RadarConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.test.parallel_jobs, 2);
        assert_eq!(config.test.include_patterns, vec!["test_*.py"]);
        assert_eq!(config.backend.max_attempts, 3);
    }

    #[test]
    fn test_validation_rejects_zero_parallelism() {
        let mut config = RadarConfig::default();
        config.test.parallel_jobs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_bad_coverage_target() {
        let mut config = RadarConfig::default();
        config.test.coverage_target = Some(150.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = RadarConfig::load(Some(Path::new("/nonexistent/radar.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radar.toml");
        std::fs::write(
            &path,
            r#"
[test]
root = "tests"
parallel_jobs = 4
timeout_seconds = 60
collect_coverage = true
coverage_target = 80.0

[backend]
base_url = "http://analysis.internal:9090"
model_id = "claude-3-sonnet"
max_attempts = 5
"#,
        )
        .unwrap();

        let config = RadarConfig::load(Some(&path)).unwrap();
        assert_eq!(config.test.root, PathBuf::from("tests"));
        assert_eq!(config.test.parallel_jobs, 4);
        assert!(config.test.collect_coverage);
        assert_eq!(config.backend.base_url, "http://analysis.internal:9090");
        assert_eq!(config.backend.max_attempts, 5);
        // Unspecified fields keep defaults.
        assert_eq!(config.backend.max_tokens, 4096);
        assert_eq!(config.test.include_patterns, vec!["test_*.py"]);
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radar.toml");
        std::fs::write(&path, "this is not toml [").unwrap();
        assert!(matches!(
            RadarConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_derived_configs() {
        let mut config = RadarConfig::default();
        config.test.parallel_jobs = 8;
        config.backend.backoff_base_ms = 250;

        let executor = config.executor_config();
        assert_eq!(executor.parallel_jobs, 8);
        assert_eq!(executor.timeout, Duration::from_secs(300));

        let analyzer = config.analyzer_config();
        assert_eq!(analyzer.retry.base_delay, Duration::from_millis(250));
        assert_eq!(analyzer.model_id, "radar-analysis-v1");

        let backend_config = config.backend_config();
        assert!(backend_config.validate().is_ok());
    }
}
