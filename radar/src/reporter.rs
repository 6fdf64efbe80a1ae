//! Report assembly.
//!
//! Pure aggregation of scanner, executor, and analyzer output into the
//! terminal `Report` artifact handed to external renderers. No I/O; given
//! identical inputs the produced summary is byte-identical when serialized.

use crate::analyzer::{AnalysisResult, Severity};
use crate::executor::{CoverageLine, ExecutionResult, ExecutionStatus};
use crate::scanner::TestUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Everything known about one test unit after the pipeline finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub unit: TestUnit,
    pub execution: ExecutionResult,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageSummary {
    pub lines_covered: usize,
    pub coverable_lines: Option<u64>,
    pub percent: Option<f64>,
    pub target_percent: Option<f64>,
    /// Annotation only; falling short of the target never fails the run.
    pub meets_target: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub total_units: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub pass_rate: f64,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub coverage: CoverageSummary,
    pub total_findings: usize,
    pub findings_by_severity: BTreeMap<Severity, usize>,
}

/// The terminal pipeline artifact. External renderers serialize this to
/// Markdown/HTML/JSON; the pipeline itself only defines the structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub entries: Vec<ReportEntry>,
}

fn missing_execution(unit_id: &str) -> ExecutionResult {
    ExecutionResult {
        unit_id: unit_id.to_string(),
        status: ExecutionStatus::Errored,
        duration: Duration::ZERO,
        stdout: String::new(),
        stderr: String::new(),
        covered_lines: None,
        error_message: Some("no execution result recorded for this unit".to_string()),
    }
}

/// Assemble the run report.
///
/// Every discovered unit appears exactly once with exactly one execution
/// result and one analysis result; gaps are filled with errored/unavailable
/// placeholders rather than omitted.
pub fn build_report(
    units: &[TestUnit],
    mut execution_results: HashMap<String, ExecutionResult>,
    mut analysis_results: HashMap<String, AnalysisResult>,
    run_coverage: &BTreeSet<CoverageLine>,
    coverable_lines: Option<u64>,
    coverage_target: Option<f64>,
) -> Report {
    let mut entries: Vec<ReportEntry> = units
        .iter()
        .map(|unit| {
            let execution = execution_results
                .remove(&unit.id)
                .unwrap_or_else(|| missing_execution(&unit.id));
            let analysis = analysis_results
                .remove(&unit.id)
                .unwrap_or_else(|| AnalysisResult::unavailable(&unit.id));
            ReportEntry {
                unit: unit.clone(),
                execution,
                analysis,
            }
        })
        .collect();
    entries.sort_by(|a, b| a.unit.id.cmp(&b.unit.id));

    let count = |status: ExecutionStatus| {
        entries
            .iter()
            .filter(|e| e.execution.status == status)
            .count()
    };
    let passed = count(ExecutionStatus::Passed);
    let failed = count(ExecutionStatus::Failed);
    let errored = count(ExecutionStatus::Errored);
    let timed_out = count(ExecutionStatus::TimedOut);
    let skipped = count(ExecutionStatus::Skipped);
    let total_units = entries.len();

    let countable = total_units.saturating_sub(skipped);
    let pass_rate = if countable > 0 {
        passed as f64 / countable as f64
    } else {
        0.0
    };

    let total_duration: Duration = entries.iter().map(|e| e.execution.duration).sum();
    let average_duration = if total_units > 0 {
        total_duration / total_units as u32
    } else {
        Duration::ZERO
    };

    let lines_covered = run_coverage.len();
    let percent = coverable_lines.and_then(|total| {
        if total == 0 {
            None
        } else {
            Some(lines_covered as f64 / total as f64 * 100.0)
        }
    });
    let meets_target = match (percent, coverage_target) {
        (Some(p), Some(t)) => Some(p >= t),
        _ => None,
    };

    let mut findings_by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    let mut total_findings = 0;
    for entry in &entries {
        for finding in &entry.analysis.findings {
            *findings_by_severity.entry(finding.severity).or_insert(0) += 1;
            total_findings += 1;
        }
    }

    Report {
        generated_at: Utc::now(),
        summary: RunSummary {
            total_units,
            passed,
            failed,
            errored,
            timed_out,
            skipped,
            pass_rate,
            total_duration,
            average_duration,
            coverage: CoverageSummary {
                lines_covered,
                coverable_lines,
                percent,
                target_percent: coverage_target,
                meets_target,
            },
            total_findings,
            findings_by_severity,
        },
        entries,
    }
}
