//! Dual-path test analysis.
//!
//! Each unit is analyzed by the remote backend when possible: transient
//! failures are retried with exponential backoff and jitter, permanent
//! failures drop straight to the local heuristic fallback. Every unit ends
//! up with exactly one `AnalysisResult` no matter what the backend does.

use crate::executor::{cancelled, ExecutionResult};
use crate::fallback;
use crate::scanner::TestUnit;
use backend::{AnalysisBackend, CompletionRequest};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, warn};

const REMOTE_CONFIDENCE: f32 = 0.8;
const FALLBACK_CONFIDENCE: f32 = 0.4;

const OUTPUT_EXCERPT_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Remote,
    LocalFallback,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One discrete analysis observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub message: String,
    pub suggested_code: Option<String>,
}

impl Finding {
    pub fn new(
        category: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            severity,
            message: message.into(),
            suggested_code: None,
        }
    }

    pub fn with_suggested_code(mut self, code: impl Into<String>) -> Self {
        self.suggested_code = Some(code.into());
        self
    }
}

/// Analysis outcome for one unit. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub unit_id: String,
    pub source: AnalysisSource,
    pub findings: Vec<Finding>,
    pub confidence: f32,
}

impl AnalysisResult {
    /// Degraded placeholder used when both analysis paths fail. The unit is
    /// still represented in the report, never silently omitted.
    pub fn unavailable(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            source: AnalysisSource::LocalFallback,
            findings: vec![Finding::new(
                "analysis_unavailable",
                Severity::Warning,
                "Neither remote nor local analysis could be completed for this unit",
            )],
            confidence: 0.0,
        }
    }
}

/// Backoff schedule, carried as a plain value so retries are testable
/// without real network delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff capped at `max_delay`, with jitter so a batch of
    /// throttled units does not retry in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2_u32.saturating_pow(attempt));
        let delay = exponential.min(self.max_delay);

        if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.0..=self.jitter_factor);
            let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
            delay + Duration::from_millis(jitter_ms)
        } else {
            delay
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_concurrent_requests: usize,
    pub retry: RetryPolicy,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            model_id: "radar-analysis-v1".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            max_concurrent_requests: 4,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Analyzer {
    backend: Arc<dyn AnalysisBackend>,
    config: AnalyzerConfig,
    semaphore: Arc<Semaphore>,
}

impl Analyzer {
    pub fn new(backend: Arc<dyn AnalysisBackend>, config: AnalyzerConfig) -> Self {
        let permits = config.max_concurrent_requests.max(1);
        Self {
            backend,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    fn build_prompt(unit: &TestUnit, result: &ExecutionResult, source: &str) -> String {
        let excerpt = |s: &str| -> String {
            if s.len() > OUTPUT_EXCERPT_LIMIT {
                // Byte-boundary safe truncation.
                let mut end = OUTPUT_EXCERPT_LIMIT;
                while !s.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}\n[truncated]", &s[..end])
            } else {
                s.to_string()
            }
        };

        format!(
            "Please analyze this test and its execution result.\n\n\
             Test Information:\n\
             - ID: {}\n\
             - File: {}\n\
             - Case: {}\n\n\
             Test Result:\n\
             - Status: {:?}\n\
             - Duration: {:.2}s\n\n\
             Test Source:\n```python\n{}\n```\n\n\
             Execution Output:\n```\n{}\n```\n\n\
             Error Output:\n```\n{}\n```\n\n\
             Respond in sections:\n\n\
             Issues:\n- ...\n\n\
             Suggestions:\n- ...\n\n\
             Code Fixes:\n```python\n# original\n```\n```python\n# suggested\n```\n\n\
             Coverage Gaps:\n- ...\n",
            unit.id,
            unit.file_path.display(),
            unit.case_name.as_deref().unwrap_or("<file>"),
            result.status,
            result.duration.as_secs_f64(),
            excerpt(source),
            excerpt(&result.stdout),
            excerpt(&result.stderr),
        )
    }

    /// Analyze one unit. Infallible at the pipeline boundary: remote errors
    /// degrade to the fallback, and a fallback panic degrades to the
    /// `analysis_unavailable` placeholder. Cancellation aborts the remote
    /// path; the local fallback still runs since it is fast and offline.
    pub async fn analyze(
        &self,
        unit: &TestUnit,
        result: &ExecutionResult,
        cancel: &watch::Receiver<bool>,
    ) -> AnalysisResult {
        let source = match tokio::fs::read_to_string(&unit.file_path).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Failed to read test source {}: {}", unit.file_path.display(), e);
                String::new()
            }
        };

        if let Some(findings) = self.attempt_remote(unit, result, &source, cancel).await {
            return AnalysisResult {
                unit_id: unit.id.clone(),
                source: AnalysisSource::Remote,
                findings,
                confidence: REMOTE_CONFIDENCE,
            };
        }

        debug!("Using local fallback analysis for {}", unit.id);
        let fallback_findings = std::panic::catch_unwind(AssertUnwindSafe(|| {
            fallback::analyze_source(&source, result)
        }));

        match fallback_findings {
            Ok(findings) => AnalysisResult {
                unit_id: unit.id.clone(),
                source: AnalysisSource::LocalFallback,
                findings,
                confidence: FALLBACK_CONFIDENCE,
            },
            Err(_) => {
                error!("Local fallback analysis failed for {}", unit.id);
                AnalysisResult::unavailable(&unit.id)
            }
        }
    }

    /// Remote path of the per-unit state machine. Returns `None` when the
    /// analyzer should fall back locally.
    async fn attempt_remote(
        &self,
        unit: &TestUnit,
        result: &ExecutionResult,
        source: &str,
        cancel: &watch::Receiver<bool>,
    ) -> Option<Vec<Finding>> {
        let prompt = Self::build_prompt(unit, result, source);
        let request = CompletionRequest::new(&self.config.model_id, prompt)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;
        let mut parse_retry_used = false;
        let mut cancel = cancel.clone();

        loop {
            if *cancel.borrow() {
                debug!("Cancellation requested, skipping remote analysis for {}", unit.id);
                return None;
            }

            let response = {
                let _permit = match self.semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };
                tokio::select! {
                    response = self.backend.invoke(request.clone()) => response,
                    _ = cancelled(&mut cancel) => {
                        debug!("Cancellation aborted in-flight remote call for {}", unit.id);
                        return None;
                    }
                }
            };

            match response {
                Ok(response) => match parse_findings(&response.text) {
                    Some(findings) => {
                        debug!("Remote analysis succeeded for {}", unit.id);
                        return Some(findings);
                    }
                    None if !parse_retry_used => {
                        // Unparseable response: treated as one transient
                        // failure before falling back.
                        warn!("Unparseable backend response for {}, retrying once", unit.id);
                        parse_retry_used = true;
                        let delay = self.config.retry.delay_for(attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancelled(&mut cancel) => return None,
                        }
                        attempt += 1;
                    }
                    None => {
                        warn!("Backend response for {} unparseable after retry", unit.id);
                        return None;
                    }
                },
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    debug!(
                        "Transient backend failure for {} (attempt {}), retrying in {:?}: {}",
                        unit.id,
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(&mut cancel) => return None,
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Remote analysis failed for {}: {}", unit.id, e);
                    return None;
                }
            }
        }
    }
}

/// Parse a sectioned backend response into findings.
///
/// Returns `None` when no recognized section header appears, which the
/// analyzer treats as a parse failure.
pub fn parse_findings(response: &str) -> Option<Vec<Finding>> {
    #[derive(PartialEq)]
    enum Section {
        None,
        Issues,
        Suggestions,
        Fixes,
        CoverageGaps,
    }

    let mut section = Section::None;
    let mut recognized = false;
    let mut findings = Vec::new();

    let mut in_fence = false;
    let mut fence_buf = String::new();
    let mut fence_blocks: Vec<String> = Vec::new();

    for line in response.lines() {
        let trimmed = line.trim();

        if section == Section::Fixes {
            if trimmed.starts_with("```") {
                if in_fence {
                    fence_blocks.push(fence_buf.trim().to_string());
                    fence_buf.clear();
                }
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                fence_buf.push_str(line);
                fence_buf.push('\n');
                continue;
            }
        }

        match trimmed {
            "Issues:" => {
                section = Section::Issues;
                recognized = true;
                continue;
            }
            "Suggestions:" => {
                section = Section::Suggestions;
                recognized = true;
                continue;
            }
            "Code Fixes:" => {
                section = Section::Fixes;
                recognized = true;
                continue;
            }
            "Coverage Gaps:" => {
                section = Section::CoverageGaps;
                recognized = true;
                continue;
            }
            _ => {}
        }

        let bullet = match trimmed.strip_prefix("- ") {
            Some(rest) if !rest.is_empty() => rest,
            _ => continue,
        };

        match section {
            Section::Issues => {
                findings.push(Finding::new("issue", Severity::Warning, bullet));
            }
            Section::Suggestions => {
                findings.push(Finding::new("suggestion", Severity::Info, bullet));
            }
            Section::CoverageGaps => {
                findings.push(Finding::new("coverage-gap", Severity::Info, bullet));
            }
            Section::None | Section::Fixes => {}
        }
    }

    // Fenced blocks pair up as (original, suggested).
    for pair in fence_blocks.chunks(2) {
        if let [original, suggested] = pair {
            findings.push(
                Finding::new(
                    "code-fix",
                    Severity::Info,
                    format!("Suggested replacement for: {}", first_line(original)),
                )
                .with_suggested_code(suggested.clone()),
            );
        }
    }

    if recognized {
        Some(findings)
    } else {
        None
    }
}

fn first_line(block: &str) -> &str {
    block.lines().next().unwrap_or_default()
}
