//! Scenario outcomes and run summaries

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Scenario;

/// Scenario execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl ScenarioStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ScenarioStatus::Pass => "✓",
            ScenarioStatus::Fail => "✗",
            ScenarioStatus::Skip => "○",
            ScenarioStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScenarioStatus::Pass)
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioStatus::Pass => write!(f, "PASS"),
            ScenarioStatus::Fail => write!(f, "FAIL"),
            ScenarioStatus::Skip => write!(f, "SKIP"),
            ScenarioStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of a single scenario
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    pub message: Option<String>,
    /// Cleanup steps that failed after the scenario body finished
    #[serde(default)]
    pub cleanup_failures: usize,
}

impl ScenarioResult {
    fn with_status(
        scenario: Scenario,
        status: ScenarioStatus,
        duration_ms: u64,
        message: Option<String>,
    ) -> Self {
        Self {
            scenario,
            status,
            duration_ms,
            message,
            cleanup_failures: 0,
        }
    }

    pub fn pass(scenario: Scenario, duration_ms: u64) -> Self {
        Self::with_status(scenario, ScenarioStatus::Pass, duration_ms, None)
    }

    pub fn fail(scenario: Scenario, duration_ms: u64, message: impl Into<String>) -> Self {
        Self::with_status(
            scenario,
            ScenarioStatus::Fail,
            duration_ms,
            Some(message.into()),
        )
    }

    pub fn skip(scenario: Scenario, reason: impl Into<String>) -> Self {
        Self::with_status(scenario, ScenarioStatus::Skip, 0, Some(reason.into()))
    }

    pub fn error(scenario: Scenario, duration_ms: u64, error: impl Into<String>) -> Self {
        Self::with_status(
            scenario,
            ScenarioStatus::Error,
            duration_ms,
            Some(error.into()),
        )
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_cleanup_failures(mut self, failures: usize) -> Self {
        self.cleanup_failures = failures;
        self
    }
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.scenario,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        if self.cleanup_failures > 0 {
            write!(f, " ({} cleanup failures)", self.cleanup_failures)?;
        }
        Ok(())
    }
}

/// Summary of one run against a cluster
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub namespace: String,
    pub storage_class: Option<String>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl RunSummary {
    pub fn new(
        namespace: impl Into<String>,
        storage_class: Option<String>,
        results: Vec<ScenarioResult>,
    ) -> Self {
        let count = |status: ScenarioStatus| results.iter().filter(|r| r.status == status).count();
        let passed = count(ScenarioStatus::Pass);
        let failed = count(ScenarioStatus::Fail);
        let skipped = count(ScenarioStatus::Skip);
        let errors = count(ScenarioStatus::Error);
        let total_duration_ms = results.iter().map(|r| r.duration_ms).sum();

        Self {
            namespace: namespace.into(),
            storage_class,
            total: results.len(),
            passed,
            failed,
            skipped,
            errors,
            total_duration_ms,
            results,
        }
    }

    /// Pass rate over the scenarios that actually ran
    pub fn pass_rate(&self) -> f64 {
        let ran = self.total - self.skipped;
        if ran == 0 {
            0.0
        } else {
            (self.passed as f64 / ran as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Storage scenarios - namespace {} ({})",
            self.namespace,
            self.storage_class.as_deref().unwrap_or("default storage class")
        )?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}",
            self.total, self.passed, self.failed, self.skipped, self.errors
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_creation() {
        let result = ScenarioResult::pass(Scenario::BlankDisk, 100);
        assert!(result.status.is_success());
        assert_eq!(result.duration_ms, 100);
        assert!(result.message.is_none());

        let skipped = ScenarioResult::skip(Scenario::HppDaemonSet, "no HPP storage class");
        assert_eq!(skipped.status, ScenarioStatus::Skip);
        assert_eq!(skipped.duration_ms, 0);
    }

    #[test]
    fn test_run_summary() {
        let results = vec![
            ScenarioResult::pass(Scenario::HttpImport, 100),
            ScenarioResult::fail(Scenario::EmptyUrl, 50, "expected 422"),
            ScenarioResult::skip(Scenario::HppCustomResource, "no HPP"),
            ScenarioResult::error(Scenario::MemoryDump, 10, "connection refused"),
        ];

        let summary = RunSummary::new("storage-tests", None, results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.total_duration_ms, 160);
        assert!((summary.pass_rate() - 33.3).abs() < 0.1);
        assert!(!summary.is_all_passed());
    }

    #[test]
    fn test_skips_do_not_fail_a_run() {
        let summary = RunSummary::new(
            "ns",
            Some("hostpath-csi-basic".to_string()),
            vec![
                ScenarioResult::pass(Scenario::BlankDisk, 1),
                ScenarioResult::skip(Scenario::HppAppLabels, "no CNV version"),
            ],
        );
        assert!(summary.is_all_passed());
        assert_eq!(summary.pass_rate(), 100.0);
    }

    #[test]
    fn test_display_mentions_cleanup_failures() {
        let result = ScenarioResult::pass(Scenario::BlankDisk, 5).with_cleanup_failures(2);
        let line = result.to_string();
        assert!(line.starts_with("✓ Scenario 11: Blank Disk"));
        assert!(line.contains("2 cleanup failures"));
    }
}
