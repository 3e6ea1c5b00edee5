//! Human-Readable Report Formatting

use crate::{TestReport, Verdict};
use std::fmt::Write;

fn format_duration_ns(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.2}s", ns as f64 / 1e9)
    } else if ns >= 1_000_000 {
        format!("{:.2}ms", ns as f64 / 1e6)
    } else if ns >= 1_000 {
        format!("{:.2}us", ns as f64 / 1e3)
    } else {
        format!("{ns}ns")
    }
}

/// Render a terminal-friendly summary of a test run.
pub fn format_human_report(report: &TestReport) -> String {
    let mut out = String::new();

    let verdict = match report.verdict {
        Verdict::Passed => "PASSED",
        Verdict::Failed => "FAILED",
        Verdict::Aborted => "ABORTED",
    };

    let _ = writeln!(out, "test run {} - {}", report.test_run_id, verdict);
    let _ = writeln!(
        out,
        "  {} operations in {}",
        report.operation_count,
        format_duration_ns(report.duration_ns)
    );

    if !report.checker_results.is_empty() {
        let _ = writeln!(out, "  checkers:");
        for result in &report.checker_results {
            let mark = if result.valid { "ok " } else { "FAIL" };
            let _ = writeln!(out, "    [{mark}] {}: {}", result.name, result.message);
        }
    }

    if !report.artifact_checker_results.is_empty() {
        let _ = writeln!(out, "  artifact checkers:");
        for result in &report.artifact_checker_results {
            let mark = if result.valid { "ok " } else { "FAIL" };
            let _ = writeln!(out, "    [{mark}] {}: {}", result.name, result.message);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::REPORT_SCHEMA_VERSION;
    use chrono::Utc;
    use fallout_checkers::{CheckResult, CheckerKind};

    #[test]
    fn test_human_report_lists_checkers() {
        let report = TestReport {
            schema_version: REPORT_SCHEMA_VERSION,
            test_run_id: "run-3".to_string(),
            verdict: Verdict::Failed,
            checker_results: vec![CheckResult {
                name: "nofail".to_string(),
                kind: CheckerKind::Checker,
                valid: false,
                message: "2 fail/error operations".to_string(),
            }],
            artifact_checker_results: Vec::new(),
            operation_count: 5,
            duration_ns: 25_000_000,
            started_at: Utc::now(),
        };

        let text = format_human_report(&report);
        assert!(text.contains("FAILED"));
        assert!(text.contains("[FAIL] nofail"));
        assert!(text.contains("25.00ms"));
    }

    #[test]
    fn test_duration_formatting() {
        assert_eq!(format_duration_ns(500), "500ns");
        assert_eq!(format_duration_ns(1_500), "1.50us");
        assert_eq!(format_duration_ns(2_500_000), "2.50ms");
        assert_eq!(format_duration_ns(3_000_000_000), "3.00s");
    }
}
