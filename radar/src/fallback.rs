//! Local heuristic analysis.
//!
//! Deterministic, offline battery of pattern checks used whenever the remote
//! backend is unavailable. Every unit gets findings from this path even under
//! a total backend outage.

use crate::analyzer::{Finding, Severity};
use crate::executor::{ExecutionResult, ExecutionStatus};
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

const SLOW_TEST_THRESHOLD: Duration = Duration::from_secs(2);

struct Patterns {
    assertion: Regex,
    bare_except: Regex,
    unseeded_random: Regex,
    seed_call: Regex,
    wall_clock: Regex,
    sleep_call: Regex,
    def_boundary: Regex,
    def_with_params: Regex,
    parametrize: Regex,
}

impl Patterns {
    fn new() -> Self {
        Self {
            assertion: Regex::new(r"\bassert\b|\bself\.assert\w+\(|pytest\.raises")
                .expect("static regex must compile"),
            bare_except: Regex::new(r"(?m)^\s*except(\s+Exception)?\s*:")
                .expect("static regex must compile"),
            unseeded_random: Regex::new(r"\brandom\.(random|randint|choice|shuffle|uniform)\(")
                .expect("static regex must compile"),
            seed_call: Regex::new(r"\brandom\.seed\(|\bseed\s*=")
                .expect("static regex must compile"),
            wall_clock: Regex::new(r"\btime\.time\(|\bdatetime\.(now|today|utcnow)\(")
                .expect("static regex must compile"),
            sleep_call: Regex::new(r"\btime\.sleep\(").expect("static regex must compile"),
            def_boundary: Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(test_\w+)\s*\(")
                .expect("static regex must compile"),
            def_with_params: Regex::new(r"(?m)^\s*(?:async\s+)?def\s+test_\w+\s*\(\s*([^)]+)\)")
                .expect("static regex must compile"),
            parametrize: Regex::new(r"\bparametrize\b").expect("static regex must compile"),
        }
    }
}

/// Tests that accept input parameters but are never parametrized usually run
/// with a single hand-picked value and miss boundary inputs.
fn takes_unvaried_inputs(patterns: &Patterns, source: &str) -> bool {
    if patterns.parametrize.is_match(source) {
        return false;
    }
    patterns.def_with_params.captures_iter(source).any(|caps| {
        caps.get(1).is_some_and(|params| {
            params
                .as_str()
                .split(',')
                .map(str::trim)
                .any(|p| !p.is_empty() && p != "self")
        })
    })
}

/// Find test functions whose bodies are identical after whitespace
/// normalization. Copy-pasted tests usually indicate a missing parametrization.
fn duplicate_bodies(patterns: &Patterns, source: &str) -> Vec<(String, String)> {
    let mut boundaries: Vec<(String, usize)> = patterns
        .def_boundary
        .captures_iter(source)
        .filter_map(|caps| {
            let m = caps.get(1)?;
            Some((m.as_str().to_string(), m.start()))
        })
        .collect();
    boundaries.sort_by_key(|(_, offset)| *offset);

    let mut seen: HashMap<String, String> = HashMap::new();
    let mut duplicates = Vec::new();

    for (i, (name, start)) in boundaries.iter().enumerate() {
        let end = boundaries
            .get(i + 1)
            .map(|(_, next)| *next)
            .unwrap_or(source.len());
        let body: String = source[*start..end]
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if body.is_empty() {
            continue;
        }
        match seen.get(&body) {
            Some(original) => duplicates.push((original.clone(), name.clone())),
            None => {
                seen.insert(body, name.clone());
            }
        }
    }

    duplicates
}

/// Run the heuristic battery over a unit's source and execution result.
///
/// Pure and deterministic given identical inputs; never fails.
pub fn analyze_source(source: &str, result: &ExecutionResult) -> Vec<Finding> {
    let patterns = Patterns::new();
    let mut findings = Vec::new();

    if !patterns.assertion.is_match(source) {
        findings.push(Finding::new(
            "missing-assertion",
            Severity::Warning,
            "Test source contains no assertion statements",
        ));
    }

    if patterns.bare_except.is_match(source) {
        findings.push(Finding::new(
            "bare-except",
            Severity::Warning,
            "Catch-all exception handler can hide real failures",
        ));
    }

    if patterns.unseeded_random.is_match(source) && !patterns.seed_call.is_match(source) {
        findings.push(Finding::new(
            "non-deterministic",
            Severity::Warning,
            "Random values used without a fixed seed",
        ));
    }

    if patterns.wall_clock.is_match(source) {
        findings.push(Finding::new(
            "non-deterministic",
            Severity::Warning,
            "Wall-clock reads make the test time-dependent",
        ));
    }

    if patterns.sleep_call.is_match(source) {
        findings.push(Finding::new(
            "slow-test",
            Severity::Info,
            "Sleep calls slow the suite and often mask race conditions",
        ));
    }

    if takes_unvaried_inputs(&patterns, source) {
        findings.push(Finding::new(
            "missing-edge-cases",
            Severity::Info,
            "Test takes input parameters but is not parametrized over edge-case values",
        ));
    }

    for (original, duplicate) in duplicate_bodies(&patterns, source) {
        findings.push(Finding::new(
            "duplicate-body",
            Severity::Info,
            format!("{} duplicates the body of {}", duplicate, original),
        ));
    }

    if result.status == ExecutionStatus::Errored {
        findings.push(Finding::new(
            "execution-error",
            Severity::Error,
            result
                .error_message
                .clone()
                .unwrap_or_else(|| "Test failed with an error".to_string()),
        ));
    }

    if result.status == ExecutionStatus::TimedOut {
        findings.push(Finding::new(
            "execution-timeout",
            Severity::Error,
            "Test exceeded its execution timeout",
        ));
    }

    if result.duration > SLOW_TEST_THRESHOLD {
        findings.push(Finding::new(
            "slow-test",
            Severity::Info,
            format!(
                "Execution took {:.2}s, above the {:.0}s threshold",
                result.duration.as_secs_f64(),
                SLOW_TEST_THRESHOLD.as_secs_f64()
            ),
        ));
    }

    if result.covered_lines.is_none() {
        findings.push(Finding::new(
            "no-coverage",
            Severity::Info,
            "No coverage information available for this unit",
        ));
    }

    if result.stdout.to_lowercase().contains("warning") {
        findings.push(Finding::new(
            "test-warnings",
            Severity::Info,
            "Test generated warnings during execution",
        ));
    }

    if result.stderr.to_lowercase().contains("deprecation") {
        findings.push(Finding::new(
            "deprecated-usage",
            Severity::Info,
            "Test relies on deprecated functionality",
        ));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn passed_result() -> ExecutionResult {
        ExecutionResult {
            unit_id: "test_x.py::test_a".to_string(),
            status: ExecutionStatus::Passed,
            duration: Duration::from_millis(50),
            stdout: String::new(),
            stderr: String::new(),
            covered_lines: Some(BTreeSet::new()),
            error_message: None,
        }
    }

    fn categories(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.category.as_str()).collect()
    }

    #[test]
    fn test_missing_assertion_detected() {
        let source = "def test_noop():\n    value = compute()\n    print(value)\n";
        let findings = analyze_source(source, &passed_result());
        assert!(categories(&findings).contains(&"missing-assertion"));
    }

    #[test]
    fn test_assertion_present_not_flagged() {
        let source = "def test_ok():\n    assert compute() == 3\n";
        let findings = analyze_source(source, &passed_result());
        assert!(!categories(&findings).contains(&"missing-assertion"));
    }

    #[test]
    fn test_unittest_assertions_count() {
        let source = "def test_ok(self):\n    self.assertEqual(compute(), 3)\n";
        let findings = analyze_source(source, &passed_result());
        assert!(!categories(&findings).contains(&"missing-assertion"));
    }

    #[test]
    fn test_bare_except_detected() {
        let source =
            "def test_risky():\n    try:\n        assert run()\n    except:\n        pass\n";
        let findings = analyze_source(source, &passed_result());
        assert!(categories(&findings).contains(&"bare-except"));
    }

    #[test]
    fn test_unseeded_random_detected() {
        let source = "import random\n\ndef test_rand():\n    assert random.randint(0, 10) >= 0\n";
        let findings = analyze_source(source, &passed_result());
        assert!(categories(&findings).contains(&"non-deterministic"));
    }

    #[test]
    fn test_seeded_random_not_flagged() {
        let source = "import random\n\ndef test_rand():\n    random.seed(42)\n    assert random.randint(0, 10) >= 0\n";
        let findings = analyze_source(source, &passed_result());
        assert!(!categories(&findings).contains(&"non-deterministic"));
    }

    #[test]
    fn test_wall_clock_detected() {
        let source = "import time\n\ndef test_now():\n    assert time.time() > 0\n";
        let findings = analyze_source(source, &passed_result());
        assert!(categories(&findings).contains(&"non-deterministic"));
    }

    #[test]
    fn test_duplicate_bodies_detected() {
        let source = "def test_a():\n    x = setup()\n    assert x == 1\n\ndef test_b():\n    x = setup()\n    assert x == 1\n";
        let findings = analyze_source(source, &passed_result());
        let dup = findings
            .iter()
            .find(|f| f.category == "duplicate-body")
            .unwrap();
        assert!(dup.message.contains("test_b"));
        assert!(dup.message.contains("test_a"));
    }

    #[test]
    fn test_unvaried_inputs_detected() {
        let source = "def test_divide(value):\n    assert divide(value, 2) == value / 2\n";
        let findings = analyze_source(source, &passed_result());
        assert!(categories(&findings).contains(&"missing-edge-cases"));
    }

    #[test]
    fn test_parametrized_inputs_not_flagged() {
        let source = "@pytest.mark.parametrize(\"value\", [0, 1, -1])\ndef test_divide(value):\n    assert divide(value, 2) == value / 2\n";
        let findings = analyze_source(source, &passed_result());
        assert!(!categories(&findings).contains(&"missing-edge-cases"));
    }

    #[test]
    fn test_execution_error_surfaces() {
        let mut result = passed_result();
        result.status = ExecutionStatus::Errored;
        result.error_message = Some("failed to spawn python3".to_string());

        let findings = analyze_source("def test_a():\n    assert True\n", &result);
        let finding = findings
            .iter()
            .find(|f| f.category == "execution-error")
            .unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.message.contains("failed to spawn"));
    }

    #[test]
    fn test_slow_execution_flagged() {
        let mut result = passed_result();
        result.duration = Duration::from_secs(5);
        let findings = analyze_source("def test_a():\n    assert True\n", &result);
        assert!(categories(&findings).contains(&"slow-test"));
    }

    #[test]
    fn test_missing_coverage_flagged() {
        let mut result = passed_result();
        result.covered_lines = None;
        let findings = analyze_source("def test_a():\n    assert True\n", &result);
        assert!(categories(&findings).contains(&"no-coverage"));
    }

    #[test]
    fn test_deterministic_given_same_inputs() {
        let source = "def test_a():\n    time.sleep(1)\n";
        let result = passed_result();
        let first = analyze_source(source, &result);
        let second = analyze_source(source, &result);
        assert_eq!(first.len(), second.len());
        assert_eq!(categories(&first), categories(&second));
    }
}
