//! JSON Report Generation

use crate::TestReport;

/// Serialize a report to pretty-printed JSON.
pub fn generate_json_report(report: &TestReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Verdict, REPORT_SCHEMA_VERSION};
    use chrono::Utc;

    #[test]
    fn test_json_report_round_trips() {
        let report = TestReport {
            schema_version: REPORT_SCHEMA_VERSION,
            test_run_id: "run-7".to_string(),
            verdict: Verdict::Failed,
            checker_results: Vec::new(),
            artifact_checker_results: Vec::new(),
            operation_count: 42,
            duration_ns: 7_000,
            started_at: Utc::now(),
        };

        let json = generate_json_report(&report).unwrap();
        let parsed: TestReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.verdict, Verdict::Failed);
        assert_eq!(parsed.operation_count, 42);
        assert!(json.contains("\"verdict\": \"failed\""));
    }
}
