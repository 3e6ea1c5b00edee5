//! Workload Runner
//!
//! Sequences the top-level phases of a resolved workload, owns the run-wide
//! state (clock origin, active history, timer wheel, abort signal), places
//! global setup/teardown, and hands the frozen history to the checker
//! pipeline to produce the verdict.

use crate::abort::AbortSignal;
use crate::config::EngineConfig;
use crate::pipeline::{run_artifact_checkers, run_checkers};
use crate::scheduler::{PhaseScheduler, RunShared};
use crate::workload::Workload;
use chrono::Utc;
use fallout_core::{
    ActiveHistories, Ensemble, History, ModuleContext, Operation, TimerWheel, WorkloadClock,
};
use fallout_report::{TestReport, Verdict, REPORT_SCHEMA_VERSION};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Everything a finished run produces: the report and the frozen history.
#[derive(Debug)]
pub struct RunResult {
    /// Verdict and per-checker diagnostics.
    pub report: TestReport,
    /// The frozen, totally-ordered history.
    pub history: Vec<Operation>,
}

/// Executes workloads against one ensemble.
pub struct WorkloadRunner {
    ensemble: Arc<Ensemble>,
    config: EngineConfig,
    abort: AbortSignal,
}

impl WorkloadRunner {
    /// Create a runner. The abort signal is live from construction, so a
    /// controller can wire it up before the run starts.
    pub fn new(ensemble: Ensemble, config: EngineConfig) -> Self {
        Self {
            ensemble: Arc::new(ensemble),
            config,
            abort: AbortSignal::new(),
        }
    }

    /// The run's abort signal. Setting it requests cooperative shutdown.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Execute the workload to completion and evaluate the checkers.
    pub fn execute(&self, workload: Workload) -> RunResult {
        let started_at = Utc::now();
        let clock = WorkloadClock::start_now();

        let history = Arc::new(History::new());
        let sinks = Arc::new(ActiveHistories::new());
        sinks.add(history.clone());

        let shared = Arc::new(RunShared {
            ensemble: self.ensemble.clone(),
            clock,
            sinks: sinks.clone(),
            timer: Arc::new(TimerWheel::new()),
            abort: self.abort.clone(),
            phase_timeout: workload.phase_timeout.or(self.config.phase_timeout),
            abandoned: Mutex::new(Vec::new()),
        });

        info!(
            test_run_id = %self.ensemble.test_run_id(),
            phases = workload.phases.len(),
            "workload starting"
        );

        let instances = workload.module_instances();

        // Global-placement setup runs once, before the first phase.
        for instance_arc in &instances {
            let mut instance = instance_arc.lock().unwrap_or_else(|e| e.into_inner());
            instance.set_aborted_check(self.abort.as_check());
            if instance.use_global_setup_teardown() {
                let ctx = self.context_for(&instance, &shared);
                instance.global_setup(&ctx);
            }
        }

        PhaseScheduler::new(shared.clone()).run_phases(&workload.phases);

        // Global-placement teardown runs once, after the last phase. A hung
        // worker may still hold its instance; skip rather than block.
        for instance_arc in &instances {
            match instance_arc.try_lock() {
                Ok(mut instance) => {
                    if instance.use_global_setup_teardown() {
                        let ctx = self.context_for(&instance, &shared);
                        instance.global_teardown(&ctx);
                    }
                }
                Err(_) => warn!("skipping teardown of module still held by an abandoned worker"),
            }
        }

        // Best-effort join of workers abandoned by phase timeouts.
        let abandoned = std::mem::take(
            &mut *shared.abandoned.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for handle in abandoned {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(
                    worker = handle.thread().name().unwrap_or("<unnamed>"),
                    "leaving hung worker behind at shutdown"
                );
            }
        }

        let frozen = history.freeze();
        let duration_ns = clock.now_ns();

        let checker_results = run_checkers(&workload, &frozen);
        let artifact_checker_results =
            run_artifact_checkers(&workload, self.config.artifact_root.as_deref());

        let all_valid = checker_results
            .iter()
            .chain(artifact_checker_results.iter())
            .all(|r| r.valid);

        let verdict = if self.abort.is_set() {
            Verdict::Aborted
        } else if all_valid {
            Verdict::Passed
        } else {
            Verdict::Failed
        };

        info!(
            test_run_id = %self.ensemble.test_run_id(),
            ?verdict,
            operations = frozen.len(),
            "workload finished"
        );

        RunResult {
            report: TestReport {
                schema_version: REPORT_SCHEMA_VERSION,
                test_run_id: self.ensemble.test_run_id().to_string(),
                verdict,
                checker_results,
                artifact_checker_results,
                operation_count: frozen.len(),
                duration_ns,
                started_at,
            },
            history: frozen,
        }
    }

    fn context_for(
        &self,
        instance: &fallout_core::ModuleInstance,
        shared: &RunShared,
    ) -> ModuleContext {
        let emitter = instance.make_emitter(shared.clock, shared.sinks.clone());
        ModuleContext::new(
            self.ensemble.clone(),
            instance.properties(),
            emitter,
            shared.timer.clone(),
        )
        .with_aborted_check(instance.aborted_check())
    }
}

/// Convenience entry point: parse, resolve and execute a workload YAML
/// against the given ensemble. Load failures are fatal; no history is
/// recorded for them.
pub fn run_workload_yaml(
    yaml: &str,
    ensemble: Ensemble,
    config: EngineConfig,
) -> Result<RunResult, crate::registry::LoadError> {
    let registry = crate::registry::ComponentRegistry::discover();
    let spec = crate::workload::WorkloadSpec::from_yaml(yaml)?;
    let workload = crate::registry::load_workload(&spec, &registry, &ensemble)?;
    Ok(WorkloadRunner::new(ensemble, config).execute(workload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_workload_passes() {
        let result = run_workload_yaml("phases: []", Ensemble::local("t"), EngineConfig::default())
            .unwrap();
        assert_eq!(result.report.verdict, Verdict::Passed);
        assert_eq!(result.report.operation_count, 0);
        assert!(result.history.is_empty());
    }

    #[test]
    fn test_single_sleep_workload() {
        let result = run_workload_yaml(
            r#"
phases:
  - snooze:
      module: sleep
      properties:
        duration: 5ms
checkers:
  clean:
    checker: nofail
"#,
            Ensemble::local("t"),
            EngineConfig::default(),
        )
        .unwrap();

        assert_eq!(result.report.verdict, Verdict::Passed);
        assert_eq!(result.report.checker_results.len(), 1);
        assert!(result.report.checker_results[0].valid);
        // invoke marker, one ok, end marker
        assert_eq!(result.history.len(), 3);
    }

    #[test]
    fn test_load_error_precedes_any_history() {
        let err = run_workload_yaml(
            r#"
phases:
  - ghost:
      module: not_registered
"#,
            Ensemble::local("t"),
            EngineConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown module"));
    }
}
