//! Engine Configuration
//!
//! Defaults the runner falls back to when the workload spec leaves a knob
//! unset. There is deliberately no default phase timeout: a manual
//! run-to-end module is allowed to take as long as it decides to.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// On-disk shape of the engine configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEngineConfig {
    phase_timeout: Option<String>,
    artifact_root: Option<PathBuf>,
}

/// Runner-level configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Upper bound on one phase's wall-clock time. Workers still running at
    /// the deadline are recorded as errors and abandoned (never killed).
    /// `None` means no timeout.
    pub phase_timeout: Option<Duration>,
    /// Directory artifact checkers read from. `None` makes configured
    /// artifact checkers report invalid rather than silently pass.
    pub artifact_root: Option<PathBuf>,
}

impl EngineConfig {
    /// Builder-style phase timeout.
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = Some(timeout);
        self
    }

    /// Builder-style artifact root.
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = Some(root.into());
        self
    }

    /// Load configuration from a YAML file with optional `phase_timeout`
    /// (duration string) and `artifact_root` keys.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let raw: RawEngineConfig = serde_yaml::from_str(&content)?;
        let phase_timeout = raw
            .phase_timeout
            .as_deref()
            .map(fallout_core::parse_duration_ns)
            .transpose()?
            .map(Duration::from_nanos);
        Ok(Self {
            phase_timeout,
            artifact_root: raw.artifact_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_timeout() {
        let config = EngineConfig::default();
        assert!(config.phase_timeout.is_none());
        assert!(config.artifact_root.is_none());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_phase_timeout(Duration::from_secs(30))
            .with_artifact_root("/tmp/artifacts");
        assert_eq!(config.phase_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.artifact_root, Some(PathBuf::from("/tmp/artifacts")));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fallout.yaml");
        std::fs::write(&path, "phase_timeout: 45s\nartifact_root: /var/artifacts\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.phase_timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.artifact_root, Some(PathBuf::from("/var/artifacts")));
    }

    #[test]
    fn test_load_rejects_bad_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fallout.yaml");
        std::fs::write(&path, "phase_timeout: whenever\n").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
