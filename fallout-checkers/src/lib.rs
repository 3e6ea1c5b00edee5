#![warn(missing_docs)]
//! Fallout Checkers - History Validation
//!
//! Checkers are pure functions over a frozen history: given the ordered
//! operation log and a property group, each returns valid or invalid plus a
//! diagnostic message. Artifact checkers inspect files modules left on disk
//! after the run. The overall verdict is the AND across all of them; every
//! checker always runs so every diagnostic is surfaced.

mod artifact;
mod builtin;

pub use artifact::{ArtifactPresentChecker, ArtifactRegexChecker};
pub use builtin::{CountChecker, NofailChecker, RegexChecker};

use fallout_core::{Operation, PropertyError, PropertyGroup, PropertySpec};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while evaluating a checker. The pipeline converts these to
/// invalid results so a misconfigured checker still surfaces a diagnostic.
#[derive(Debug, Error)]
pub enum CheckerError {
    /// A property access or validation failed.
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// A regex property failed to compile.
    #[error("invalid regex '{pattern}': {source}")]
    BadRegex {
        /// The offending pattern
        pattern: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },

    /// A `types` entry is not an operation type.
    #[error("'{0}' is not an operation type")]
    InvalidOpType(String),

    /// Reading artifacts failed.
    #[error("artifact read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Validity of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// The history satisfies the checker's property
    Valid,
    /// It does not
    Invalid,
}

/// What a checker returns: validity plus a diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Validity
    pub status: CheckStatus,
    /// Human-readable diagnostic
    pub message: String,
}

impl CheckOutcome {
    /// A valid outcome.
    pub fn valid(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Valid,
            message: message.into(),
        }
    }

    /// An invalid outcome.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Invalid,
            message: message.into(),
        }
    }

    /// Whether the outcome is valid.
    pub fn is_valid(&self) -> bool {
        self.status == CheckStatus::Valid
    }
}

/// Which pipeline stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckerKind {
    /// In-process checker over the history
    Checker,
    /// Post-hoc checker over on-disk artifacts
    ArtifactChecker,
}

/// A named check result, as it appears in the test report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// The checker's configured name from the workload
    pub name: String,
    /// Which pipeline stage produced it
    pub kind: CheckerKind,
    /// Whether the check passed
    pub valid: bool,
    /// Diagnostic message
    pub message: String,
}

/// A checker over the frozen in-memory history.
///
/// Implementations must be pure: the outcome is a function of the history and
/// properties alone, so re-running a checker over the same frozen history
/// yields the same verdict.
pub trait Checker: Send + Sync {
    /// Properties this checker accepts, for load-time validation.
    fn property_specs(&self) -> Vec<PropertySpec> {
        Vec::new()
    }

    /// Evaluate the history.
    fn check(
        &self,
        history: &[Operation],
        props: &PropertyGroup,
    ) -> Result<CheckOutcome, CheckerError>;
}

/// A post-run checker over artifacts modules wrote to disk.
pub trait ArtifactChecker: Send + Sync {
    /// Properties this checker accepts, for load-time validation.
    fn property_specs(&self) -> Vec<PropertySpec> {
        Vec::new()
    }

    /// Inspect the artifact tree rooted at `artifact_root`.
    fn check(
        &self,
        artifact_root: &Path,
        props: &PropertyGroup,
    ) -> Result<CheckOutcome, CheckerError>;
}

/// Registers a checker implementation under its short name.
pub struct CheckerRegistration {
    /// Short name used in workload YAML (`checker: <short_name>`)
    pub short_name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Constructs a fresh checker
    pub factory: fn() -> Box<dyn Checker>,
}

/// Registers an artifact checker implementation under its short name.
pub struct ArtifactCheckerRegistration {
    /// Short name used in workload YAML (`artifact_checker: <short_name>`)
    pub short_name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Constructs a fresh artifact checker
    pub factory: fn() -> Box<dyn ArtifactChecker>,
}

inventory::collect!(CheckerRegistration);
inventory::collect!(ArtifactCheckerRegistration);
