#![warn(missing_docs)]
//! Fallout Report - Verdicts and Reporting
//!
//! The workload runner distills a finished run into a [`TestReport`]:
//! the pass/fail/aborted verdict, per-checker diagnostics, and history
//! statistics. Output formats:
//! - JSON (machine-readable)
//! - Human-readable terminal summary

mod human;
mod json;
mod report;

pub use human::format_human_report;
pub use json::generate_json_report;
pub use report::{TestReport, Verdict, REPORT_SCHEMA_VERSION};
