//! Built-in formatters: pytest, go test, jest, generic, passthrough.
//!
//! Framework formatters keep running failure lists and outcome counts so a
//! summary can name what broke without re-reading the scrollback. The
//! generic formatter only highlights likely error lines; passthrough does
//! nothing at all.

use super::{Formatter, TestCounts, TestReport};

const RED: &str = "\u{1b}[31m";
const RESET: &str = "\u{1b}[0m";

/// Prefixes that mark a line as an error in generic output.
const ERROR_PREFIXES: [&str; 8] = [
    "error:", "error ", "fatal:", "fatal ", "panic:", "exception:", "fail:", "failed:",
];

/// Returns `true` when a generic output line should be highlighted as an
/// error: a known prefix (case-insensitive), a literal uppercase `ERROR`
/// anywhere, or a leading `FAILED`.
#[must_use]
pub fn is_error_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    let lowered = trimmed.to_lowercase();
    if ERROR_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        return true;
    }
    if line.contains("ERROR") {
        return true;
    }
    trimmed.starts_with("FAILED")
}

/// Formatter that passes lines through and highlights likely errors.
#[derive(Debug, Default)]
pub struct GenericFormatter {
    color: bool,
}

impl GenericFormatter {
    /// Creates a generic formatter; `color` enables ANSI highlighting.
    #[must_use]
    pub const fn new(color: bool) -> Self {
        Self { color }
    }
}

impl Formatter for GenericFormatter {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn process_line(&mut self, line: &str) -> String {
        if self.color && is_error_line(line) {
            format!("{RED}{line}{RESET}")
        } else {
            line.to_owned()
        }
    }

    fn summary(&self, exit_code: i32) -> String {
        if exit_code == 0 {
            String::new()
        } else {
            format!("command failed with exit code {exit_code}")
        }
    }
}

/// Formatter that changes nothing and emits no summary.
#[derive(Debug, Default)]
pub struct PassthroughFormatter;

impl Formatter for PassthroughFormatter {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn process_line(&mut self, line: &str) -> String {
        line.to_owned()
    }

    fn summary(&self, _exit_code: i32) -> String {
        String::new()
    }
}

/// Formatter for pytest output.
#[derive(Debug, Default)]
pub struct PytestFormatter {
    counts: TestCounts,
    failures: Vec<String>,
}

impl PytestFormatter {
    /// Creates a pytest formatter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detection score for pytest given the command and early output.
    #[must_use]
    pub fn detect(command: &str, raw_output: &str) -> u8 {
        if command.contains("pytest") {
            return 90;
        }
        if raw_output.contains("test session starts") {
            return 80;
        }
        if raw_output.contains("rootdir:") && raw_output.contains("collected") {
            return 60;
        }
        0
    }
}

impl Formatter for PytestFormatter {
    fn name(&self) -> &'static str {
        "pytest"
    }

    fn process_line(&mut self, line: &str) -> String {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("FAILED ") {
            let identifier = rest.split_whitespace().next().unwrap_or(rest);
            self.failures.push(identifier.to_owned());
            self.counts.failed += 1;
        } else if let Some(rest) = trimmed.strip_prefix("ERROR ") {
            let identifier = rest.split_whitespace().next().unwrap_or(rest);
            self.failures.push(identifier.to_owned());
            self.counts.errors += 1;
        } else if trimmed.ends_with(" PASSED") || trimmed.contains(" PASSED ") {
            self.counts.passed += 1;
        } else if trimmed.ends_with(" SKIPPED") || trimmed.contains(" SKIPPED ") {
            self.counts.skipped += 1;
        }
        line.to_owned()
    }

    fn summary(&self, exit_code: i32) -> String {
        let counts = self.counts;
        if exit_code == 0 && counts.failed == 0 && counts.errors == 0 {
            return String::new();
        }
        let mut parts = vec![format!("{} failed", counts.failed)];
        if counts.errors > 0 {
            parts.push(format!("{} errored", counts.errors));
        }
        if counts.passed > 0 {
            parts.push(format!("{} passed", counts.passed));
        }
        format!("pytest: {}", parts.join(", "))
    }

    fn test_report(&self) -> Option<&dyn TestReport> {
        Some(self)
    }
}

impl TestReport for PytestFormatter {
    fn test_failures(&self) -> Vec<String> {
        self.failures.clone()
    }

    fn test_counts(&self) -> TestCounts {
        self.counts
    }
}

/// Formatter for `go test` output.
#[derive(Debug, Default)]
pub struct GoTestFormatter {
    counts: TestCounts,
    failures: Vec<String>,
}

impl GoTestFormatter {
    /// Creates a go test formatter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detection score for `go test` given the command and early output.
    #[must_use]
    pub fn detect(command: &str, raw_output: &str) -> u8 {
        if command.contains("go test") {
            return 90;
        }
        if raw_output.contains("--- PASS:") || raw_output.contains("--- FAIL:") {
            return 80;
        }
        if raw_output.lines().any(|line| line.starts_with("ok  ")) {
            return 55;
        }
        0
    }
}

impl Formatter for GoTestFormatter {
    fn name(&self) -> &'static str {
        "go test"
    }

    fn process_line(&mut self, line: &str) -> String {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("--- FAIL: ") {
            let identifier = rest.split_whitespace().next().unwrap_or(rest);
            self.failures.push(identifier.to_owned());
            self.counts.failed += 1;
        } else if trimmed.starts_with("--- PASS: ") {
            self.counts.passed += 1;
        } else if trimmed.starts_with("--- SKIP: ") {
            self.counts.skipped += 1;
        }
        line.to_owned()
    }

    fn summary(&self, exit_code: i32) -> String {
        if exit_code == 0 {
            return String::new();
        }
        if self.failures.is_empty() {
            format!("go test failed with exit code {exit_code}")
        } else {
            format!(
                "go test: {} failed ({})",
                self.counts.failed,
                self.failures.join(", ")
            )
        }
    }

    fn test_report(&self) -> Option<&dyn TestReport> {
        Some(self)
    }
}

impl TestReport for GoTestFormatter {
    fn test_failures(&self) -> Vec<String> {
        self.failures.clone()
    }

    fn test_counts(&self) -> TestCounts {
        self.counts
    }
}

/// Formatter for jest output.
#[derive(Debug, Default)]
pub struct JestFormatter {
    counts: TestCounts,
    failures: Vec<String>,
}

impl JestFormatter {
    /// Creates a jest formatter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detection score for jest given the command and early output.
    #[must_use]
    pub fn detect(command: &str, raw_output: &str) -> u8 {
        if command.contains("jest") {
            return 90;
        }
        if raw_output.contains("Test Suites:") {
            return 80;
        }
        if raw_output.contains("PASS ") && raw_output.contains(".test.") {
            return 55;
        }
        0
    }
}

impl Formatter for JestFormatter {
    fn name(&self) -> &'static str {
        "jest"
    }

    fn process_line(&mut self, line: &str) -> String {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("FAIL ") {
            let identifier = rest.split_whitespace().next().unwrap_or(rest);
            self.failures.push(identifier.to_owned());
            self.counts.failed += 1;
        } else if trimmed.starts_with("PASS ") {
            self.counts.passed += 1;
        } else if trimmed.starts_with("✓") {
            self.counts.passed += 1;
        } else if trimmed.starts_with("✕") {
            self.counts.failed += 1;
        }
        line.to_owned()
    }

    fn summary(&self, exit_code: i32) -> String {
        if exit_code == 0 {
            return String::new();
        }
        if self.failures.is_empty() {
            format!("jest failed with exit code {exit_code}")
        } else {
            format!("jest: failing suites: {}", self.failures.join(", "))
        }
    }

    fn test_report(&self) -> Option<&dyn TestReport> {
        Some(self)
    }
}

impl TestReport for JestFormatter {
    fn test_failures(&self) -> Vec<String> {
        self.failures.clone()
    }

    fn test_counts(&self) -> TestCounts {
        self.counts
    }
}
