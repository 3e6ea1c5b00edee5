//! Report Data Structures

use chrono::{DateTime, Utc};
use fallout_checkers::CheckResult;
use serde::{Deserialize, Serialize};

/// Current report schema version.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Final outcome of a workload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every checker and artifact checker reported valid
    Passed,
    /// At least one checker reported invalid, or the workload failed to load
    Failed,
    /// The run was aborted before completion (treated as a failure)
    Aborted,
}

impl Verdict {
    /// Whether the run passed.
    pub fn is_pass(self) -> bool {
        self == Verdict::Passed
    }
}

/// Summary of one finished workload run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    /// Schema version number
    pub schema_version: u32,
    /// Identity of the test run
    pub test_run_id: String,
    /// Final verdict
    pub verdict: Verdict,
    /// One entry per configured checker, in name order
    pub checker_results: Vec<CheckResult>,
    /// One entry per configured artifact checker, in name order
    pub artifact_checker_results: Vec<CheckResult>,
    /// Operations recorded in the history
    pub operation_count: usize,
    /// Wall-clock duration of the workload in nanoseconds
    pub duration_ns: u64,
    /// When the workload started
    pub started_at: DateTime<Utc>,
}

impl TestReport {
    /// All check results, history checkers first.
    pub fn all_check_results(&self) -> impl Iterator<Item = &CheckResult> {
        self.checker_results
            .iter()
            .chain(self.artifact_checker_results.iter())
    }

    /// Number of checks that reported invalid.
    pub fn invalid_count(&self) -> usize {
        self.all_check_results().filter(|r| !r.valid).count()
    }
}
