//! Built-in Artifact Checkers
//!
//! Artifact checkers run after the in-memory checkers and inspect files
//! modules produced under the workload's artifact root (e.g. HDR histogram
//! dumps, log bundles).

use crate::{ArtifactChecker, ArtifactCheckerRegistration, CheckOutcome, CheckerError};
use fallout_core::{PropertyGroup, PropertySpec};
use regex::Regex;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

fn compile(pattern: &str) -> Result<Regex, CheckerError> {
    Regex::new(pattern).map_err(|source| CheckerError::BadRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Collect every regular file under `root`, depth-first.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, CheckerError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn file_name_matches(path: &Path, re: &Regex) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| re.is_match(n))
        .unwrap_or(false)
}

/// At least `min` files whose names match `pattern` must exist under the
/// artifact root.
pub struct ArtifactPresentChecker;

impl ArtifactChecker for ArtifactPresentChecker {
    fn property_specs(&self) -> Vec<PropertySpec> {
        vec![
            PropertySpec::required("pattern", "Regex matched against artifact file names"),
            PropertySpec::optional("min", "Minimum number of matching files", json!(1)),
        ]
    }

    fn check(
        &self,
        artifact_root: &Path,
        props: &PropertyGroup,
    ) -> Result<CheckOutcome, CheckerError> {
        let pattern = props.expect_str("pattern")?;
        let re = compile(pattern)?;
        let min = props.get_u64("min").unwrap_or(1);

        let matching = collect_files(artifact_root)?
            .iter()
            .filter(|path| file_name_matches(path, &re))
            .count() as u64;

        if matching >= min {
            Ok(CheckOutcome::valid(format!(
                "{matching} artifact(s) matching '{pattern}'"
            )))
        } else {
            Ok(CheckOutcome::invalid(format!(
                "expected at least {min} artifact(s) matching '{pattern}', found {matching}"
            )))
        }
    }
}

inventory::submit! {
    ArtifactCheckerRegistration {
        short_name: "artifact_present",
        description: "Checks that artifact files matching a name pattern exist",
        factory: || Box::new(ArtifactPresentChecker),
    }
}

/// The concatenated contents of artifact files (optionally filtered by file
/// name) must match a regex.
pub struct ArtifactRegexChecker;

impl ArtifactChecker for ArtifactRegexChecker {
    fn property_specs(&self) -> Vec<PropertySpec> {
        vec![
            PropertySpec::required("pattern", "Regex matched against artifact file contents"),
            PropertySpec::optional(
                "file_pattern",
                "Regex selecting which artifact files to read",
                json!(".*"),
            ),
        ]
    }

    fn check(
        &self,
        artifact_root: &Path,
        props: &PropertyGroup,
    ) -> Result<CheckOutcome, CheckerError> {
        let pattern = props.expect_str("pattern")?;
        let re = compile(pattern)?;
        let file_pattern = props.get_str("file_pattern").unwrap_or(".*");
        let file_re = compile(file_pattern)?;

        let mut contents = String::new();
        let mut read = 0usize;
        for path in collect_files(artifact_root)? {
            if !file_name_matches(&path, &file_re) {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(text) => {
                    contents.push_str(&text);
                    read += 1;
                }
                Err(e) => {
                    // Binary artifacts are skipped, not fatal.
                    warn!(path = %path.display(), "skipping unreadable artifact: {e}");
                }
            }
        }

        if re.is_match(&contents) {
            Ok(CheckOutcome::valid(format!(
                "'{pattern}' matched across {read} artifact file(s)"
            )))
        } else {
            Ok(CheckOutcome::invalid(format!(
                "'{pattern}' did not match across {read} artifact file(s)"
            )))
        }
    }
}

inventory::submit! {
    ArtifactCheckerRegistration {
        short_name: "artifact_regex",
        description: "Matches a regex against the contents of artifact files",
        factory: || Box::new(ArtifactRegexChecker),
    }
}
