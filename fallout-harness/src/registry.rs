//! Component Registry
//!
//! Resolves the short names in a workload spec to registered implementations
//! and validates each property group before anything runs. Every failure here
//! is a fatal load error: no history is recorded and the workload fails.
//!
//! Implementations register themselves with `inventory::submit!` at their
//! definition sites; [`ComponentRegistry::discover`] indexes the submissions
//! at program start.

use crate::workload::{
    properties_from_yaml, ArtifactCheckerInstance, CheckerInstance, ChildSpec, ModuleSpec, Phase,
    PhaseChild, PhaseSpec, Workload, WorkloadSpec,
};
use fallout_checkers::{ArtifactCheckerRegistration, CheckerRegistration};
use fallout_core::{
    validate_properties, Ensemble, InvalidLifetime, Lifetime, LifetimeChoice, ModuleInstance,
    ModuleRegistration, PropertyError, Provider,
};
use fxhash::{FxHashMap, FxHashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Fatal errors raised while loading a workload, before any phase runs.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No module is registered under this short name.
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    /// No checker is registered under this short name.
    #[error("unknown checker '{0}'")]
    UnknownChecker(String),

    /// No artifact checker is registered under this short name.
    #[error("unknown artifact checker '{0}'")]
    UnknownArtifactChecker(String),

    /// Two children share an instance name.
    #[error("duplicate instance name '{0}'")]
    DuplicateInstanceName(String),

    /// A property group failed validation.
    #[error("invalid properties for '{instance}': {source}")]
    Property {
        /// The offending instance or checker name
        instance: String,
        /// The underlying validation failure
        #[source]
        source: PropertyError,
    },

    /// A module requires a provider no ensemble group supplies.
    #[error("module '{instance}' requires provider '{provider}', which no ensemble group supplies")]
    MissingProvider {
        /// The offending instance name
        instance: String,
        /// The missing provider
        provider: Provider,
    },

    /// The `lifetime` property did not resolve.
    #[error("invalid lifetime for '{instance}': {source}")]
    Lifetime {
        /// The offending instance name
        instance: String,
        /// The underlying parse failure
        #[source]
        source: InvalidLifetime,
    },

    /// The workload YAML did not parse.
    #[error("workload definition error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The `phase_timeout` value did not parse.
    #[error("invalid phase_timeout: {0}")]
    PhaseTimeout(#[source] PropertyError),
}

/// Index of every registered module, checker and artifact checker.
pub struct ComponentRegistry {
    modules: FxHashMap<&'static str, &'static ModuleRegistration>,
    checkers: FxHashMap<&'static str, &'static CheckerRegistration>,
    artifact_checkers: FxHashMap<&'static str, &'static ArtifactCheckerRegistration>,
}

impl ComponentRegistry {
    /// Index all inventory submissions.
    pub fn discover() -> Self {
        let modules: FxHashMap<_, _> = inventory::iter::<ModuleRegistration>
            .into_iter()
            .map(|reg| (reg.short_name, reg))
            .collect();
        let checkers: FxHashMap<_, _> = inventory::iter::<CheckerRegistration>
            .into_iter()
            .map(|reg| (reg.short_name, reg))
            .collect();
        let artifact_checkers: FxHashMap<_, _> = inventory::iter::<ArtifactCheckerRegistration>
            .into_iter()
            .map(|reg| (reg.short_name, reg))
            .collect();

        debug!(
            modules = modules.len(),
            checkers = checkers.len(),
            artifact_checkers = artifact_checkers.len(),
            "component registry discovered"
        );

        Self {
            modules,
            checkers,
            artifact_checkers,
        }
    }

    /// Look up a module registration.
    pub fn module(&self, short_name: &str) -> Result<&'static ModuleRegistration, LoadError> {
        self.modules
            .get(short_name)
            .copied()
            .ok_or_else(|| LoadError::UnknownModule(short_name.to_string()))
    }

    /// Look up a checker registration.
    pub fn checker(&self, short_name: &str) -> Result<&'static CheckerRegistration, LoadError> {
        self.checkers
            .get(short_name)
            .copied()
            .ok_or_else(|| LoadError::UnknownChecker(short_name.to_string()))
    }

    /// Look up an artifact checker registration.
    pub fn artifact_checker(
        &self,
        short_name: &str,
    ) -> Result<&'static ArtifactCheckerRegistration, LoadError> {
        self.artifact_checkers
            .get(short_name)
            .copied()
            .ok_or_else(|| LoadError::UnknownArtifactChecker(short_name.to_string()))
    }

    /// Registered module names, sorted, for diagnostics.
    pub fn module_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.modules.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Resolve a parsed workload spec into an executable [`Workload`].
pub fn load_workload(
    spec: &WorkloadSpec,
    registry: &ComponentRegistry,
    ensemble: &Ensemble,
) -> Result<Workload, LoadError> {
    let mut seen_names = FxHashSet::default();
    let available_providers = ensemble.available_providers();

    let phases = spec
        .phases
        .iter()
        .enumerate()
        .map(|(i, phase_spec)| {
            load_phase(
                format!("phase-{}", i + 1),
                phase_spec,
                registry,
                &available_providers,
                &mut seen_names,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut checkers = Vec::new();
    for (name, checker_spec) in &spec.checkers {
        let reg = registry.checker(&checker_spec.checker)?;
        let checker = (reg.factory)();
        let properties = validate_properties(
            &checker.property_specs(),
            &properties_from_yaml(&checker_spec.properties),
        )
        .map_err(|source| LoadError::Property {
            instance: name.clone(),
            source,
        })?;
        checkers.push(CheckerInstance {
            name: name.clone(),
            checker,
            properties,
        });
    }

    let mut artifact_checkers = Vec::new();
    for (name, checker_spec) in &spec.artifact_checkers {
        let reg = registry.artifact_checker(&checker_spec.artifact_checker)?;
        let checker = (reg.factory)();
        let properties = validate_properties(
            &checker.property_specs(),
            &properties_from_yaml(&checker_spec.properties),
        )
        .map_err(|source| LoadError::Property {
            instance: name.clone(),
            source,
        })?;
        artifact_checkers.push(ArtifactCheckerInstance {
            name: name.clone(),
            checker,
            properties,
        });
    }

    Ok(Workload {
        phases,
        phase_timeout: spec.phase_timeout()?,
        checkers,
        artifact_checkers,
    })
}

fn load_phase(
    name: String,
    spec: &PhaseSpec,
    registry: &ComponentRegistry,
    available_providers: &FxHashSet<Provider>,
    seen_names: &mut FxHashSet<String>,
) -> Result<Phase, LoadError> {
    let mut children = Vec::new();

    for (instance_name, child_spec) in &spec.children {
        if !seen_names.insert(instance_name.clone()) {
            return Err(LoadError::DuplicateInstanceName(instance_name.clone()));
        }

        let child = match child_spec {
            ChildSpec::Module(module_spec) => PhaseChild::Module(Arc::new(Mutex::new(
                build_module_instance(instance_name, module_spec, registry, available_providers)?,
            ))),
            ChildSpec::SubPhases(groups) => {
                let nested = groups
                    .iter()
                    .enumerate()
                    .map(|(j, group)| {
                        load_phase(
                            format!("{instance_name}-{}", j + 1),
                            group,
                            registry,
                            available_providers,
                            seen_names,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                PhaseChild::SubPhases(Arc::new(nested))
            }
        };
        children.push((instance_name.clone(), child));
    }

    Ok(Phase { name, children })
}

fn build_module_instance(
    instance_name: &str,
    spec: &ModuleSpec,
    registry: &ComponentRegistry,
    available_providers: &FxHashSet<Provider>,
) -> Result<ModuleInstance, LoadError> {
    let reg = registry.module(&spec.module)?;
    let module = (reg.factory)();

    for provider in module.required_providers() {
        if !available_providers.contains(&provider) {
            return Err(LoadError::MissingProvider {
                instance: instance_name.to_string(),
                provider,
            });
        }
    }

    let choice = module.lifetime_choice();
    let mut specs = module.property_specs();
    if let Some(lifetime_spec) = choice.property_spec() {
        specs.push(lifetime_spec);
    }

    let properties = validate_properties(&specs, &properties_from_yaml(&spec.properties)).map_err(
        |source| LoadError::Property {
            instance: instance_name.to_string(),
            source,
        },
    )?;

    let lifetime = match choice {
        LifetimeChoice::Fixed { lifetime, .. } => lifetime,
        LifetimeChoice::Selectable { default, .. } => match properties.get_str("lifetime") {
            Some(value) => {
                Lifetime::lazy_value_of(value).map_err(|source| LoadError::Lifetime {
                    instance: instance_name.to_string(),
                    source,
                })?
            }
            None => default,
        },
    };

    debug!(
        instance = instance_name,
        module = reg.short_name,
        lifetime = lifetime.as_property_value(),
        "module instance loaded"
    );

    Ok(ModuleInstance::new(
        reg.short_name,
        instance_name,
        module,
        properties,
        lifetime,
        choice.method(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ComponentRegistry {
        ComponentRegistry::discover()
    }

    #[test]
    fn test_discover_finds_builtins() {
        let registry = registry();
        assert!(registry.module("sleep").is_ok());
        assert!(registry.module("text").is_ok());
        assert!(registry.checker("nofail").is_ok());
        assert!(registry.checker("regex").is_ok());
        assert!(registry.checker("count").is_ok());
        assert!(registry.artifact_checker("artifact_present").is_ok());
    }

    #[test]
    fn test_unknown_module_is_a_load_error() {
        let spec = WorkloadSpec::from_yaml(
            r#"
phases:
  - mystery:
      module: does_not_exist
"#,
        )
        .unwrap();

        let err = load_workload(&spec, &registry(), &Ensemble::local("t")).unwrap_err();
        assert!(matches!(err, LoadError::UnknownModule(name) if name == "does_not_exist"));
    }

    #[test]
    fn test_unknown_checker_is_a_load_error() {
        let spec = WorkloadSpec::from_yaml(
            r#"
phases: []
checkers:
  check:
    checker: does_not_exist
"#,
        )
        .unwrap();

        let err = load_workload(&spec, &registry(), &Ensemble::local("t")).unwrap_err();
        assert!(matches!(err, LoadError::UnknownChecker(name) if name == "does_not_exist"));
    }

    #[test]
    fn test_duplicate_instance_names_rejected_across_phases() {
        let spec = WorkloadSpec::from_yaml(
            r#"
phases:
  - snooze:
      module: sleep
  - snooze:
      module: sleep
"#,
        )
        .unwrap();

        let err = load_workload(&spec, &registry(), &Ensemble::local("t")).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateInstanceName(name) if name == "snooze"));
    }

    #[test]
    fn test_missing_required_property_is_a_load_error() {
        let spec = WorkloadSpec::from_yaml(
            r#"
phases:
  - silent:
      module: text
"#,
        )
        .unwrap();

        let err = load_workload(&spec, &registry(), &Ensemble::local("t")).unwrap_err();
        assert!(matches!(err, LoadError::Property { instance, .. } if instance == "silent"));
    }

    #[test]
    fn test_lifetime_property_resolves_abbreviations() {
        let spec = WorkloadSpec::from_yaml(
            r#"
phases:
  - bg:
      module: sleep
      properties:
        duration: 5ms
        lifetime: phase
"#,
        )
        .unwrap();

        let workload = load_workload(&spec, &registry(), &Ensemble::local("t")).unwrap();
        let instances = workload.module_instances();
        assert_eq!(instances.len(), 1);
        let instance = instances[0].lock().unwrap();
        assert_eq!(instance.lifetime(), Lifetime::RunToEndOfPhase);
    }

    #[test]
    fn test_bad_lifetime_is_a_load_error() {
        let spec = WorkloadSpec::from_yaml(
            r#"
phases:
  - bg:
      module: sleep
      properties:
        lifetime: forever
"#,
        )
        .unwrap();

        let err = load_workload(&spec, &registry(), &Ensemble::local("t")).unwrap_err();
        assert!(matches!(err, LoadError::Lifetime { instance, .. } if instance == "bg"));
    }

    #[test]
    fn test_nested_workload_loads() {
        let spec = WorkloadSpec::from_yaml(
            r#"
phases:
  - outer:
      - a:
          module: text
          properties: { text: a }
      - b:
          module: text
          properties: { text: b }
    solo:
      module: sleep
      properties: { duration: 1ms }
"#,
        )
        .unwrap();

        let workload = load_workload(&spec, &registry(), &Ensemble::local("t")).unwrap();
        assert_eq!(workload.phases.len(), 1);
        assert_eq!(workload.module_instances().len(), 3);
    }
}
