//! Test discovery.
//!
//! Walks a source tree, applies glob include/exclude patterns, and produces
//! the ordered set of discovered test units. Python files are additionally
//! split into one unit per `def test_*` case when cases can be extracted.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan root does not exist or is not a directory: {path}")]
    RootNotFound { path: PathBuf },

    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("I/O error while scanning {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One discoverable, independently executable test: a file, or a single
/// case within a file. Immutable once created by a scan pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TestUnit {
    pub id: String,
    pub file_path: PathBuf,
    pub case_name: Option<String>,
    pub line_number: Option<usize>,
    pub matched_pattern: String,
}

impl TestUnit {
    fn file_level(rel_path: &Path, file_path: PathBuf, pattern: &str) -> Self {
        Self {
            id: rel_path.display().to_string(),
            file_path,
            case_name: None,
            line_number: None,
            matched_pattern: pattern.to_string(),
        }
    }

    fn case_level(
        rel_path: &Path,
        file_path: PathBuf,
        pattern: &str,
        case: &str,
        line: usize,
    ) -> Self {
        Self {
            id: format!("{}::{}", rel_path.display(), case),
            file_path,
            case_name: Some(case.to_string()),
            line_number: Some(line),
            matched_pattern: pattern.to_string(),
        }
    }
}

struct CompiledPattern {
    raw: String,
    pattern: Pattern,
}

fn compile_patterns(raw: &[String]) -> Result<Vec<CompiledPattern>, ScanError> {
    raw.iter()
        .map(|p| {
            Pattern::new(p)
                .map(|pattern| CompiledPattern {
                    raw: p.clone(),
                    pattern,
                })
                .map_err(|source| ScanError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
        })
        .collect()
}

/// Patterns without a path separator match any single path component
/// (so `test_*.py` finds nested files and `__pycache__` excludes whole
/// directories); patterns with a separator match the path relative to root.
fn pattern_matches(compiled: &CompiledPattern, rel: &Path) -> bool {
    if compiled.raw.contains('/') {
        compiled.pattern.matches_path(rel)
    } else {
        rel.components()
            .any(|c| compiled.pattern.matches(&c.as_os_str().to_string_lossy()))
    }
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ScanError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| ScanError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| ScanError::Io {
            path: path.clone(),
            source,
        })?;
        if file_type.is_dir() {
            walk_files(&path, out)?;
        } else if file_type.is_symlink() && path.is_dir() {
            // Never follow directory symlinks; a cycle would multiply every
            // test underneath it.
            debug!("Skipping symlinked directory {}", path.display());
        } else {
            out.push(path);
        }
    }

    Ok(())
}

/// Extract `def test_*` case names with their 1-based line numbers.
fn extract_cases(source: &str) -> Vec<(String, usize)> {
    let case_re = Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(test_\w+)\s*\(")
        .expect("static regex must compile");

    case_re
        .captures_iter(source)
        .filter_map(|caps| {
            let m = caps.get(1)?;
            let line = source[..m.start()].matches('\n').count() + 1;
            Some((m.as_str().to_string(), line))
        })
        .collect()
}

/// Discover test units under `root`.
///
/// Each call is independent; nothing is cached between scans. Exclude
/// patterns take precedence over include patterns. Zero matches is a
/// legitimate outcome and returns an empty vector.
pub fn scan(
    root: &Path,
    include_patterns: &[String],
    exclude_patterns: &[String],
) -> Result<Vec<TestUnit>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::RootNotFound {
            path: root.to_path_buf(),
        });
    }

    let includes = compile_patterns(include_patterns)?;
    let excludes = compile_patterns(exclude_patterns)?;

    let mut files = Vec::new();
    walk_files(root, &mut files)?;
    files.sort();

    let mut units = Vec::new();
    for path in files {
        let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let matched = match includes.iter().find(|p| pattern_matches(p, &rel)) {
            Some(p) => p.raw.clone(),
            None => continue,
        };

        if excludes.iter().any(|p| pattern_matches(p, &rel)) {
            debug!("Excluding {} from scan", rel.display());
            continue;
        }

        if path.extension().is_some_and(|ext| ext == "py") {
            match std::fs::read_to_string(&path) {
                Ok(source) => {
                    let cases = extract_cases(&source);
                    if cases.is_empty() {
                        units.push(TestUnit::file_level(&rel, path.clone(), &matched));
                    } else {
                        for (case, line) in cases {
                            units.push(TestUnit::case_level(
                                &rel,
                                path.clone(),
                                &matched,
                                &case,
                                line,
                            ));
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to read {} for case extraction: {}", path.display(), e);
                    units.push(TestUnit::file_level(&rel, path.clone(), &matched));
                }
            }
        } else {
            units.push(TestUnit::file_level(&rel, path.clone(), &matched));
        }
    }

    debug!("Scan of {} discovered {} units", root.display(), units.len());
    Ok(units)
}
