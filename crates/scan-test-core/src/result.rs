//! Test results and the run report.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scanner::ScannerId;

/// Outcome of one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pass,
    Fail,
    Error,
    /// The remote run, or the wait for it, ran out of time.
    Timeout,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "pass",
            TestStatus::Fail => "fail",
            TestStatus::Error => "error",
            TestStatus::Timeout => "timeout",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }

    fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✅",
            TestStatus::Fail => "❌",
            TestStatus::Error => "❗",
            TestStatus::Timeout => "⏱️",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one completed remote test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    /// Wall-clock duration of the remote run in seconds.
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_url: Option<String>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, status: TestStatus, duration_secs: f64) -> Self {
        Self {
            name: name.into(),
            status,
            duration_secs,
            message: None,
            run_url: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_run_url(mut self, url: impl Into<String>) -> Self {
        self.run_url = Some(url.into());
        self
    }
}

/// All results gathered for one scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerResult {
    pub scanner_id: ScannerId,
    pub results: Vec<TestResult>,
}

/// One flattened line of the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub scanner: String,
    pub name: String,
    pub status: TestStatus,
    pub duration: f64,
    pub message: Option<String>,
    pub run_url: Option<String>,
}

/// Summary of a whole run, printed as JSON on stdout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub results: Vec<ReportEntry>,
}

impl RunReport {
    pub fn from_scanner_results(scanner_results: &[ScannerResult]) -> Self {
        let results: Vec<ReportEntry> = scanner_results
            .iter()
            .flat_map(|sr| {
                sr.results.iter().map(move |r| ReportEntry {
                    scanner: sr.scanner_id.to_string(),
                    name: r.name.clone(),
                    status: r.status,
                    duration: r.duration_secs,
                    message: r.message.clone(),
                    run_url: r.run_url.clone(),
                })
            })
            .collect();

        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();

        Self {
            total: results.len(),
            passed: count(TestStatus::Pass),
            failed: count(TestStatus::Fail),
            errors: count(TestStatus::Error),
            timeouts: count(TestStatus::Timeout),
            results,
        }
    }

    /// Whether any result is a failure, error or timeout.
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.status.is_success())
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// Human-readable summary lines.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.results.len() * 2 + 1);
        lines.push(format!(
            "Test results: {} total, {} passed, {} failed, {} errors, {} timeouts",
            self.total, self.passed, self.failed, self.errors, self.timeouts
        ));
        for r in &self.results {
            lines.push(format!(
                "{} {} [{}]: {} ({:.2}s)",
                r.status.symbol(),
                r.scanner,
                r.name,
                r.status,
                r.duration
            ));
            if let Some(url) = &r.run_url {
                lines.push(format!("  Run URL: {url}"));
            }
            if let Some(message) = &r.message {
                lines.push(format!("  Message: {message}"));
            }
        }
        lines
    }
}
