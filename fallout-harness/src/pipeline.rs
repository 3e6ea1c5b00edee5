//! Checker Pipeline
//!
//! Applies every configured checker to the frozen history, then every
//! artifact checker to the artifact root. No short-circuiting: all checkers
//! run so every diagnostic is surfaced; the verdict is the AND.

use crate::workload::Workload;
use fallout_checkers::{CheckResult, CheckerKind};
use fallout_core::Operation;
use rayon::prelude::*;
use std::path::Path;
use tracing::info;

/// Run the in-memory checkers over the frozen history. Checkers are pure
/// functions, so they run in parallel; results come back in configuration
/// order.
pub fn run_checkers(workload: &Workload, history: &[Operation]) -> Vec<CheckResult> {
    let results: Vec<CheckResult> = workload
        .checkers
        .par_iter()
        .map(|instance| {
            match instance.checker.check(history, &instance.properties) {
                Ok(outcome) => CheckResult {
                    name: instance.name.clone(),
                    kind: CheckerKind::Checker,
                    valid: outcome.is_valid(),
                    message: outcome.message,
                },
                Err(e) => CheckResult {
                    name: instance.name.clone(),
                    kind: CheckerKind::Checker,
                    valid: false,
                    message: format!("checker failed to run: {e}"),
                },
            }
        })
        .collect();

    for result in &results {
        info!(
            checker = %result.name,
            valid = result.valid,
            "checker result: {}",
            result.message
        );
    }
    results
}

/// Run the artifact checkers over the artifact root. With artifact checkers
/// configured but no root, each reports invalid rather than silently passing.
pub fn run_artifact_checkers(
    workload: &Workload,
    artifact_root: Option<&Path>,
) -> Vec<CheckResult> {
    workload
        .artifact_checkers
        .iter()
        .map(|instance| {
            let outcome = match artifact_root {
                None => CheckResult {
                    name: instance.name.clone(),
                    kind: CheckerKind::ArtifactChecker,
                    valid: false,
                    message: "no artifact root configured".to_string(),
                },
                Some(root) => match instance.checker.check(root, &instance.properties) {
                    Ok(outcome) => CheckResult {
                        name: instance.name.clone(),
                        kind: CheckerKind::ArtifactChecker,
                        valid: outcome.is_valid(),
                        message: outcome.message,
                    },
                    Err(e) => CheckResult {
                        name: instance.name.clone(),
                        kind: CheckerKind::ArtifactChecker,
                        valid: false,
                        message: format!("artifact checker failed to run: {e}"),
                    },
                },
            };
            info!(
                artifact_checker = %outcome.name,
                valid = outcome.valid,
                "artifact checker result: {}",
                outcome.message
            );
            outcome
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{ArtifactCheckerInstance, CheckerInstance};
    use fallout_checkers::{ArtifactPresentChecker, NofailChecker, RegexChecker};
    use fallout_core::{MediaType, OpType, PropertyGroup};
    use serde_json::json;

    fn op(op_type: OpType, value: serde_json::Value) -> Operation {
        Operation {
            op_type,
            time_ns: 0,
            media_type: MediaType::PlainText,
            value,
            process: "p".to_string(),
            module: "m".to_string(),
        }
    }

    fn workload_with_checkers(checkers: Vec<CheckerInstance>) -> Workload {
        Workload {
            phases: Vec::new(),
            phase_timeout: None,
            checkers,
            artifact_checkers: Vec::new(),
        }
    }

    #[test]
    fn test_all_checkers_run_even_after_a_failure() {
        let workload = workload_with_checkers(vec![
            CheckerInstance {
                name: "failing".to_string(),
                checker: Box::new(NofailChecker),
                properties: PropertyGroup::new(),
            },
            CheckerInstance {
                name: "matching".to_string(),
                checker: Box::new(RegexChecker),
                properties: PropertyGroup::new().with("pattern", json!("hello")),
            },
        ]);

        let history = vec![
            op(OpType::Error, json!("boom")),
            op(OpType::Ok, json!("hello")),
        ];
        let results = run_checkers(&workload, &history);

        // No short-circuit: both diagnostics are present.
        assert_eq!(results.len(), 2);
        assert!(!results[0].valid);
        assert!(results[1].valid);
    }

    #[test]
    fn test_checker_error_becomes_invalid_result() {
        let workload = workload_with_checkers(vec![CheckerInstance {
            name: "broken".to_string(),
            checker: Box::new(RegexChecker),
            properties: PropertyGroup::new(), // missing 'pattern'
        }]);

        let results = run_checkers(&workload, &[]);
        assert_eq!(results.len(), 1);
        assert!(!results[0].valid);
        assert!(results[0].message.contains("failed to run"));
    }

    #[test]
    fn test_artifact_checkers_without_root_are_invalid() {
        let workload = Workload {
            phases: Vec::new(),
            phase_timeout: None,
            checkers: Vec::new(),
            artifact_checkers: vec![ArtifactCheckerInstance {
                name: "histograms".to_string(),
                checker: Box::new(ArtifactPresentChecker),
                properties: PropertyGroup::new().with("pattern", json!(r"\.hdr$")),
            }],
        };

        let results = run_artifact_checkers(&workload, None);
        assert_eq!(results.len(), 1);
        assert!(!results[0].valid);
        assert!(results[0].message.contains("no artifact root"));
    }

    #[test]
    fn test_artifact_checkers_run_against_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("latency.hdr"), "histogram").unwrap();

        let workload = Workload {
            phases: Vec::new(),
            phase_timeout: None,
            checkers: Vec::new(),
            artifact_checkers: vec![ArtifactCheckerInstance {
                name: "histograms".to_string(),
                checker: Box::new(ArtifactPresentChecker),
                properties: PropertyGroup::new().with("pattern", json!(r"\.hdr$")),
            }],
        };

        let results = run_artifact_checkers(&workload, Some(dir.path()));
        assert_eq!(results.len(), 1);
        assert!(results[0].valid);
    }
}
