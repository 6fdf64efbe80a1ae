//! End-to-end pipeline tests against a real temp directory tree and a
//! scripted analysis backend.

use async_trait::async_trait;
use backend::{
    AnalysisBackend, BackendError, BackendResult, CompletionRequest, CompletionResponse,
};
use radar::analyzer::AnalysisSource;
use radar::config::RadarConfig;
use radar::executor::{CommandTemplate, ExecutionStatus};
use radar::pipeline::{run_analysis, run_pipeline};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const GOOD_RESPONSE: &str = "Issues:\n- Assertion only covers the happy path\n\nSuggestions:\n- Parametrize over edge cases\n";

/// Backend that always returns the same scripted outcome and counts calls.
struct StaticBackend {
    calls: AtomicU32,
    outcome: fn() -> BackendResult<String>,
}

impl StaticBackend {
    fn new(outcome: fn() -> BackendResult<String>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            outcome,
        })
    }
}

#[async_trait]
impl AnalysisBackend for StaticBackend {
    async fn invoke(&self, _request: CompletionRequest) -> BackendResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.outcome)().map(|text| CompletionResponse { text, usage: None })
    }

    async fn health_check(&self) -> BackendResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "static"
    }
}

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

fn base_config(root: &Path, script: &str) -> RadarConfig {
    let mut config = RadarConfig::default();
    config.test.root = root.to_path_buf();
    config.test.command = CommandTemplate {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    };
    config.backend.max_attempts = 3;
    config.backend.backoff_base_ms = 1;
    config.backend.backoff_max_ms = 4;
    config.backend.jitter_factor = 0.0;
    config
}

fn no_cancel() -> watch::Receiver<bool> {
    // A closed channel never signals cancellation.
    let (_tx, rx) = watch::channel(false);
    rx
}

#[tokio::test]
async fn full_pipeline_with_remote_analysis_and_coverage() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "test_alpha.py",
        "def test_adds():\n    assert 1 + 1 == 2\n",
    );
    write(
        dir.path(),
        "test_beta.py",
        "def test_subtracts():\n    assert 2 - 1 == 1\n",
    );

    let mut config = base_config(
        dir.path(),
        "echo COVERAGE:src/app.py:1; echo COVERAGE:src/app.py:2; exit 0",
    );
    config.test.collect_coverage = true;
    config.test.coverable_lines = Some(4);
    config.test.coverage_target = Some(50.0);

    let backend = StaticBackend::new(|| Ok(GOOD_RESPONSE.to_string()));
    let report = run_pipeline(&config, backend.clone(), no_cancel())
        .await
        .unwrap();

    // One entry per discovered unit, ordered by id.
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.entries[0].unit.id, "test_alpha.py::test_adds");
    assert_eq!(report.entries[1].unit.id, "test_beta.py::test_subtracts");

    for entry in &report.entries {
        assert_eq!(entry.execution.status, ExecutionStatus::Passed);
        assert_eq!(entry.analysis.source, AnalysisSource::Remote);
        assert_eq!(entry.unit.id, entry.execution.unit_id);
        assert_eq!(entry.unit.id, entry.analysis.unit_id);
        assert!(!entry.analysis.findings.is_empty());
    }

    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.summary.passed, 2);
    assert!((report.summary.pass_rate - 1.0).abs() < 1e-9);

    // Both units reported identical lines; the union must not double count.
    assert_eq!(report.summary.coverage.lines_covered, 2);
    assert!((report.summary.coverage.percent.unwrap() - 50.0).abs() < 1e-9);
    assert_eq!(report.summary.coverage.meets_target, Some(true));
}

#[tokio::test]
async fn throttled_backend_degrades_every_unit_to_local_fallback() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "test_widget.py",
        "def test_widget():\n    value = compute()\n    print(value)\n",
    );

    let config = base_config(dir.path(), "exit 0");
    let backend = StaticBackend::new(|| Err(BackendError::RateLimit));
    let report = run_pipeline(&config, backend.clone(), no_cancel())
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.execution.status, ExecutionStatus::Passed);
    assert_eq!(entry.analysis.source, AnalysisSource::LocalFallback);
    // Bounded retries before degrading.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

    // The heuristic pass flags the assertion-free test body.
    assert!(entry
        .analysis
        .findings
        .iter()
        .any(|f| f.category == "missing-assertion"));
}

#[tokio::test]
async fn failing_tests_are_report_data_not_pipeline_errors() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "test_broken.py",
        "def test_broken():\n    assert False\n",
    );

    let config = base_config(dir.path(), "exit 1");
    let backend = StaticBackend::new(|| Err(BackendError::Authentication));
    let report = run_pipeline(&config, backend.clone(), no_cancel())
        .await
        .unwrap();

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.pass_rate, 0.0);
    // Permanent backend failure: one call, no retries, fallback analysis.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        report.entries[0].analysis.source,
        AnalysisSource::LocalFallback
    );
}

#[tokio::test]
async fn cancellation_yields_best_effort_report() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "test_slow_a.py",
        "def test_slow_a():\n    assert True\n",
    );
    write(
        dir.path(),
        "test_slow_b.py",
        "def test_slow_b():\n    assert True\n",
    );

    let mut config = base_config(dir.path(), "sleep 30");
    config.test.parallel_jobs = 1;
    config.test.timeout_seconds = 60;

    let backend = StaticBackend::new(|| Err(BackendError::Authentication));
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let pipeline = tokio::spawn({
        let config = config.clone();
        async move { run_pipeline(&config, backend, cancel_rx).await }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel_tx.send(true).unwrap();

    let report = pipeline.await.unwrap().unwrap();

    // Every discovered unit still appears, with terminal statuses.
    assert_eq!(report.entries.len(), 2);
    for entry in &report.entries {
        assert!(matches!(
            entry.execution.status,
            ExecutionStatus::Errored | ExecutionStatus::Skipped
        ));
    }
    // With one worker, at most one unit was in flight; the rest were skipped.
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.errored, 1);
}

#[tokio::test]
async fn analysis_only_run_uses_placeholder_executions() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "test_widget.py",
        "def test_widget():\n    value = compute()\n    print(value)\n",
    );
    write(
        dir.path(),
        "test_checked.py",
        "def test_checked():\n    assert compute() == 3\n",
    );

    // The command would fail if anything were executed.
    let config = base_config(dir.path(), "exit 42");
    let backend = StaticBackend::new(|| Err(BackendError::Authentication));
    let report = run_analysis(&config, backend, no_cancel()).await.unwrap();

    assert_eq!(report.entries.len(), 2);
    for entry in &report.entries {
        // Nothing ran: skipped placeholders with zero duration, no coverage.
        assert_eq!(entry.execution.status, ExecutionStatus::Skipped);
        assert_eq!(entry.execution.duration, Duration::ZERO);
        assert_eq!(entry.analysis.source, AnalysisSource::LocalFallback);
    }
    assert_eq!(report.summary.coverage.lines_covered, 0);

    // Source heuristics still apply to the unexecuted tests.
    let widget = &report.entries[1];
    assert_eq!(widget.unit.id, "test_widget.py::test_widget");
    assert!(widget
        .analysis
        .findings
        .iter()
        .any(|f| f.category == "missing-assertion"));
}

#[tokio::test]
async fn empty_tree_produces_empty_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path(), "exit 0");
    let backend = StaticBackend::new(|| Ok(GOOD_RESPONSE.to_string()));

    let report = run_pipeline(&config, backend, no_cancel()).await.unwrap();
    assert!(report.entries.is_empty());
    assert_eq!(report.summary.total_units, 0);
    assert_eq!(report.summary.pass_rate, 0.0);
}
