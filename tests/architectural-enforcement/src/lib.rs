//! Architectural Enforcement Integration Tests
//!
//! Source scans that enforce how the stance crates are written:
//! - No blocking sleeps, and async sleeps only where a delay is the point
//! - No blocking sockets in library code
//! - No `unwrap()`/`expect()` in library code
//!
//! This library only holds the scanning helpers; the checks live in
//! `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// One forbidden construct found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the construct
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace directory relative to this crate's manifest
#[must_use]
pub fn workspace_dir(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(relative)
}

/// Every `.rs` file under `dir`
///
/// # Panics
///
/// Panics if `dir` does not exist, so a moved crate cannot make a scan pass
/// vacuously.
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    assert!(dir.is_dir(), "scan root {} does not exist", dir.display());

    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Production lines of a source file as `(line_number, code)`
///
/// Stops at the first `#[cfg(test)]`, which by convention opens the unit
/// test module at the bottom of a file. Comment lines and trailing comments
/// are dropped.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter_map(|(idx, line)| {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                return None;
            }
            let code = line.split("//").next().unwrap_or(line);
            Some((idx + 1, code))
        })
        .collect()
}

/// Scan production code under `dir` for lines matching `is_violation`
///
/// `is_violation` receives the file path and the code part of the line.
pub fn scan<F>(dir: &Path, mut is_violation: F) -> Vec<Violation>
where
    F: FnMut(&Path, &str) -> bool,
{
    let mut violations = Vec::new();
    for path in rust_files(dir) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if is_violation(&path, code) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Fail with every violation listed
///
/// # Panics
///
/// Panics if `violations` is not empty.
pub fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// note\nfn b() {} // trailing\n#[cfg(test)]\nmod tests {}\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn a() {}"), (3, "fn b() {} ")]);
    }

    #[test]
    fn test_workspace_dir_points_at_core() {
        assert!(workspace_dir("stance/core/src").join("lib.rs").exists());
    }
}
