pub mod analyzer;
pub mod config;
pub mod executor;
pub mod fallback;
pub mod pipeline;
pub mod reporter;
pub mod scanner;

pub use analyzer::{
    AnalysisResult, AnalysisSource, Analyzer, AnalyzerConfig, Finding, RetryPolicy, Severity,
};
pub use config::{BackendSettings, ConfigError, RadarConfig, TestSettings};
pub use executor::{
    CommandTemplate, CoverageLine, ExecutionError, ExecutionResult, ExecutionStatus,
    Executor, ExecutorConfig,
};
pub use pipeline::{run_analysis, run_pipeline, PipelineError};
pub use reporter::{build_report, CoverageSummary, Report, ReportEntry, RunSummary};
pub use scanner::{scan, ScanError, TestUnit};
