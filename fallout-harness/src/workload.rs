//! Workload Definitions
//!
//! Two layers: the serde shapes of the workload YAML (what users write), and
//! the executable tree the registry resolves them into (what the scheduler
//! runs). A phase is a mapping of instance names to either a module spec or a
//! nested list of sub-phase groups; top-level phases and sub-phase groups run
//! sequentially, the children of one phase concurrently.

use crate::registry::LoadError;
use fallout_checkers::{ArtifactChecker, Checker};
use fallout_core::{ModuleInstance, PropertyGroup};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The `workload:` subtree of a test definition, as written in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadSpec {
    /// Top-level phases, run strictly sequentially.
    pub phases: Vec<PhaseSpec>,
    /// Optional per-phase timeout as a duration string (e.g. "30s").
    #[serde(default)]
    pub phase_timeout: Option<String>,
    /// History checkers, keyed by their configured name.
    #[serde(default)]
    pub checkers: BTreeMap<String, CheckerSpec>,
    /// Artifact checkers, keyed by their configured name.
    #[serde(default)]
    pub artifact_checkers: BTreeMap<String, ArtifactCheckerSpec>,
}

/// One phase: a mapping of instance names to children that run concurrently.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct PhaseSpec {
    /// The phase's direct children.
    pub children: BTreeMap<String, ChildSpec>,
}

/// A phase child: either a module or a nested sequence of sub-phase groups.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChildSpec {
    /// Nested sub-phase groups, run sequentially by this child.
    SubPhases(Vec<PhaseSpec>),
    /// A module instance.
    Module(ModuleSpec),
}

/// A module instance specification.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    /// Registered short name of the implementation.
    pub module: String,
    /// Raw property values.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_yaml::Value>,
}

/// A checker specification.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckerSpec {
    /// Registered short name of the checker.
    pub checker: String,
    /// Raw property values.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_yaml::Value>,
}

/// An artifact checker specification.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactCheckerSpec {
    /// Registered short name of the artifact checker.
    pub artifact_checker: String,
    /// Raw property values.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_yaml::Value>,
}

impl WorkloadSpec {
    /// Parse from YAML. Accepts either a bare workload mapping or a full test
    /// definition with a `workload:` key (other top-level keys, such as
    /// `ensemble:`, belong to external collaborators and are ignored here).
    pub fn from_yaml(yaml: &str) -> Result<Self, LoadError> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let workload = match value.get("workload") {
            Some(subtree) => subtree.clone(),
            None => value,
        };
        Ok(serde_yaml::from_value(workload)?)
    }

    /// The phase timeout, parsed, if configured.
    pub fn phase_timeout(&self) -> Result<Option<Duration>, LoadError> {
        match &self.phase_timeout {
            None => Ok(None),
            Some(s) => {
                let ns = fallout_core::parse_duration_ns(s).map_err(LoadError::PhaseTimeout)?;
                Ok(Some(Duration::from_nanos(ns)))
            }
        }
    }
}

/// Convert a YAML value to the JSON value model used by [`PropertyGroup`].
pub fn yaml_to_json(value: &serde_yaml::Value) -> serde_json::Value {
    match value {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            }
        }
        serde_yaml::Value::String(s) => serde_json::Value::String(s.clone()),
        serde_yaml::Value::Sequence(items) => {
            serde_json::Value::Array(items.iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let key = k
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| yaml_to_json(k).to_string());
                    (key, yaml_to_json(v))
                })
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Build a [`PropertyGroup`] from raw YAML property values.
pub fn properties_from_yaml(raw: &BTreeMap<String, serde_yaml::Value>) -> PropertyGroup {
    PropertyGroup::from_pairs(raw.iter().map(|(k, v)| (k.clone(), yaml_to_json(v))))
}

/// A resolved phase child.
#[derive(Clone)]
pub enum PhaseChild {
    /// A module instance, shared with the worker thread that runs it.
    Module(Arc<Mutex<ModuleInstance>>),
    /// Nested sub-phase groups.
    SubPhases(Arc<Vec<Phase>>),
}

impl std::fmt::Debug for PhaseChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseChild::Module(_) => f.write_str("Module(..)"),
            PhaseChild::SubPhases(phases) => {
                f.debug_tuple("SubPhases").field(&phases.len()).finish()
            }
        }
    }
}

/// A resolved phase: named children that run concurrently.
#[derive(Clone, Debug)]
pub struct Phase {
    /// Diagnostic name ("phase-1", "subphasesA-2", ...).
    pub name: String,
    /// The direct children, in definition order.
    pub children: Vec<(String, PhaseChild)>,
}

/// A configured checker ready to run.
pub struct CheckerInstance {
    /// Configured name from the workload.
    pub name: String,
    /// The implementation.
    pub checker: Box<dyn Checker>,
    /// Validated properties.
    pub properties: PropertyGroup,
}

impl std::fmt::Debug for CheckerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerInstance")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .finish()
    }
}

/// A configured artifact checker ready to run.
pub struct ArtifactCheckerInstance {
    /// Configured name from the workload.
    pub name: String,
    /// The implementation.
    pub checker: Box<dyn ArtifactChecker>,
    /// Validated properties.
    pub properties: PropertyGroup,
}

impl std::fmt::Debug for ArtifactCheckerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCheckerInstance")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .finish()
    }
}

/// A fully resolved workload, ready for the runner.
#[derive(Debug)]
pub struct Workload {
    /// Top-level phases, run sequentially.
    pub phases: Vec<Phase>,
    /// Per-phase timeout; `None` means no timeout.
    pub phase_timeout: Option<Duration>,
    /// History checkers, in name order.
    pub checkers: Vec<CheckerInstance>,
    /// Artifact checkers, in name order.
    pub artifact_checkers: Vec<ArtifactCheckerInstance>,
}

impl Workload {
    /// Every module instance in the tree, depth-first.
    pub fn module_instances(&self) -> Vec<Arc<Mutex<ModuleInstance>>> {
        fn walk(phases: &[Phase], out: &mut Vec<Arc<Mutex<ModuleInstance>>>) {
            for phase in phases {
                for (_, child) in &phase.children {
                    match child {
                        PhaseChild::Module(instance) => out.push(instance.clone()),
                        PhaseChild::SubPhases(nested) => walk(nested, out),
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.phases, &mut out);
        out
    }
}
