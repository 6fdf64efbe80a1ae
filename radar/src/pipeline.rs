//! Pipeline driver.
//!
//! Wires scanner, executor, analyzer, and reporter together. Each unit flows
//! through execute → analyze independently, so a slow backend never blocks
//! other units' execution, and a cancelled run still yields a best-effort
//! report from whatever completed.

use crate::analyzer::{AnalysisResult, Analyzer};
use crate::config::{ConfigError, RadarConfig};
use crate::executor::{coverage_reducer, ExecutionError, ExecutionResult, Executor};
use crate::reporter::{self, Report};
use crate::scanner::{self, ScanError};
use backend::AnalysisBackend;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Run the full discovery → execution → analysis → report pipeline.
///
/// Unit-level failures are contained and represented as data in the report;
/// only configuration and scan errors surface as hard failures here.
pub async fn run_pipeline(
    config: &RadarConfig,
    analysis_backend: Arc<dyn AnalysisBackend>,
    cancel: watch::Receiver<bool>,
) -> Result<Report, PipelineError> {
    config.validate()?;

    let units = scanner::scan(
        &config.test.root,
        &config.test.include_patterns,
        &config.test.exclude_patterns,
    )?;
    if units.is_empty() {
        warn!(
            "No test units matched under {} (patterns: {:?})",
            config.test.root.display(),
            config.test.include_patterns
        );
    } else {
        info!("Discovered {} test units", units.len());
    }

    let executor = Executor::new(config.executor_config())?;
    let analyzer = Arc::new(Analyzer::new(analysis_backend, config.analyzer_config()));

    let (coverage_tx, aggregator) = coverage_reducer();

    let mut tasks = JoinSet::new();
    for unit in &units {
        let executor = executor.clone();
        let analyzer = Arc::clone(&analyzer);
        let unit = unit.clone();
        let tx = coverage_tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let execution = executor.run_unit(&unit, Some(&tx), &cancel).await;
            let analysis = analyzer.analyze(&unit, &execution, &cancel).await;
            (execution, analysis)
        });
    }
    drop(coverage_tx);

    let (execution_results, analysis_results) = collect_unit_results(units.len(), tasks).await;
    let run_coverage = aggregator.await.unwrap_or_default();

    let report = reporter::build_report(
        &units,
        execution_results,
        analysis_results,
        &run_coverage,
        config.test.coverable_lines,
        config.test.coverage_target,
    );

    info!(
        "Pipeline complete: {} units, pass rate {:.1}%, {} findings",
        report.summary.total_units,
        report.summary.pass_rate * 100.0,
        report.summary.total_findings
    );

    Ok(report)
}

/// Analyze discovered units without executing them.
///
/// Every unit gets a skipped, zero-duration execution placeholder; the
/// analyzer still runs its full remote-then-fallback path against the test
/// source. No subprocesses are spawned and no coverage is collected.
pub async fn run_analysis(
    config: &RadarConfig,
    analysis_backend: Arc<dyn AnalysisBackend>,
    cancel: watch::Receiver<bool>,
) -> Result<Report, PipelineError> {
    config.validate()?;

    let units = scanner::scan(
        &config.test.root,
        &config.test.include_patterns,
        &config.test.exclude_patterns,
    )?;
    info!("Analyzing {} test units without execution", units.len());

    let analyzer = Arc::new(Analyzer::new(analysis_backend, config.analyzer_config()));

    let mut tasks = JoinSet::new();
    for unit in &units {
        let analyzer = Arc::clone(&analyzer);
        let unit = unit.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let execution = ExecutionResult::not_executed(&unit.id);
            let analysis = analyzer.analyze(&unit, &execution, &cancel).await;
            (execution, analysis)
        });
    }

    let (execution_results, analysis_results) = collect_unit_results(units.len(), tasks).await;

    Ok(reporter::build_report(
        &units,
        execution_results,
        analysis_results,
        &BTreeSet::new(),
        None,
        None,
    ))
}

async fn collect_unit_results(
    capacity: usize,
    mut tasks: JoinSet<(ExecutionResult, AnalysisResult)>,
) -> (
    HashMap<String, ExecutionResult>,
    HashMap<String, AnalysisResult>,
) {
    let mut execution_results = HashMap::with_capacity(capacity);
    let mut analysis_results = HashMap::with_capacity(capacity);

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((execution, analysis)) => {
                execution_results.insert(execution.unit_id.clone(), execution);
                analysis_results.insert(analysis.unit_id.clone(), analysis);
            }
            // The reporter fills placeholder results for any unit a panicked
            // task failed to deliver.
            Err(e) => warn!("Unit pipeline task panicked: {}", e),
        }
    }

    (execution_results, analysis_results)
}
