//! Phase Scheduler
//!
//! Runs the children of one phase concurrently, one worker thread per child,
//! and returns only when every child has returned (or the phase timeout
//! abandons the stragglers).
//!
//! Lifetime rules enforced here:
//! - Every RUN_ONCE child's completion decrements the phase's shared
//!   countdown latch, registered before launch.
//! - Every RUN_TO_END_OF_PHASE child receives a handle to that latch as
//!   `unfinished_run_once_modules`; the invoke protocol in `fallout-core`
//!   re-runs AUTOMATIC modules until it opens.
//! - A nested sub-phase list is opaque to its parent: one child that
//!   completes when its own scheduler returns. Its children count only its
//!   own latch.
//!
//! Cancellation is cooperative. A worker still running at the phase deadline
//! is recorded as an error and abandoned, never killed; the runner joins
//! abandoned workers best-effort at shutdown.

use crate::abort::AbortSignal;
use crate::workload::{Phase, PhaseChild};
use fallout_core::{
    ActiveHistories, CountdownLatch, Ensemble, MediaType, ModuleContext, OpType, Operation,
    TimerWheel, WorkloadClock,
};
use fxhash::FxHashMap;
use serde_json::Value;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// State shared by the runner and every scheduler level of one workload run.
pub(crate) struct RunShared {
    pub ensemble: Arc<Ensemble>,
    pub clock: WorkloadClock,
    pub sinks: Arc<ActiveHistories>,
    pub timer: Arc<TimerWheel>,
    pub abort: AbortSignal,
    pub phase_timeout: Option<Duration>,
    /// Workers abandoned by phase timeouts, joined best-effort at shutdown.
    pub abandoned: Mutex<Vec<JoinHandle<()>>>,
}

impl RunShared {
    /// Record an engine-originated operation for a child that has no live
    /// emitter (timeouts, spawn failures).
    fn record_engine_error(&self, process: &str, module: &str, message: String) {
        let op = Operation {
            op_type: OpType::Error,
            time_ns: self.clock.now_ns(),
            media_type: MediaType::PlainText,
            value: Value::String(message),
            process: process.to_string(),
            module: module.to_string(),
        };
        if let Err(e) = self.sinks.broadcast(op) {
            warn!(process, "dropped engine error operation: {e}");
        }
    }
}

struct PendingChild {
    name: String,
    module_label: String,
    handle: JoinHandle<()>,
}

/// Runs phases against the shared run state. Nested sub-phases recurse into a
/// fresh scheduler over the same state.
pub(crate) struct PhaseScheduler {
    shared: Arc<RunShared>,
}

impl PhaseScheduler {
    pub fn new(shared: Arc<RunShared>) -> Self {
        Self { shared }
    }

    /// Run a sequence of phases strictly in order. Once the abort signal is
    /// set, no further phase launches.
    pub fn run_phases(&self, phases: &[Phase]) {
        for phase in phases {
            if self.shared.abort.is_set() {
                warn!(phase = %phase.name, "abort requested; not launching further phases");
                break;
            }
            self.run_phase(phase);
        }
    }

    /// Run one phase: classify, launch every child concurrently, await all.
    fn run_phase(&self, phase: &Phase) {
        let run_once_count = phase
            .children
            .iter()
            .filter(|(_, child)| match child {
                PhaseChild::Module(instance) => !instance
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .runs_to_end_of_phase(),
                PhaseChild::SubPhases(_) => false,
            })
            .count();

        info!(
            phase = %phase.name,
            children = phase.children.len(),
            run_once = run_once_count,
            "phase starting"
        );

        let unfinished_run_once = Arc::new(CountdownLatch::new(run_once_count));
        let (done_tx, done_rx) = mpsc::channel::<usize>();
        let mut pending: FxHashMap<usize, PendingChild> = FxHashMap::default();

        for (idx, (child_name, child)) in phase.children.iter().enumerate() {
            match child {
                PhaseChild::Module(instance_arc) => {
                    self.launch_module(
                        idx,
                        child_name,
                        instance_arc,
                        &unfinished_run_once,
                        &done_tx,
                        &mut pending,
                    );
                }
                PhaseChild::SubPhases(nested) => {
                    self.launch_sub_phases(idx, child_name, nested, &done_tx, &mut pending);
                }
            }
        }
        drop(done_tx);

        self.await_children(phase, done_rx, pending);
        info!(phase = %phase.name, "phase complete");
    }

    fn launch_module(
        &self,
        idx: usize,
        child_name: &str,
        instance_arc: &Arc<Mutex<fallout_core::ModuleInstance>>,
        unfinished_run_once: &Arc<CountdownLatch>,
        done_tx: &mpsc::Sender<usize>,
        pending: &mut FxHashMap<usize, PendingChild>,
    ) {
        let (ctx, module_label, runs_to_end) = {
            let mut instance = instance_arc.lock().unwrap_or_else(|e| e.into_inner());
            let runs_to_end = instance.runs_to_end_of_phase();

            if !runs_to_end {
                let latch = unfinished_run_once.clone();
                instance.add_completion_callback(move || latch.count_down());
            }
            instance.set_aborted_check(self.shared.abort.as_check());

            let emitter = instance.make_emitter(self.shared.clock, self.shared.sinks.clone());
            let ctx = ModuleContext::new(
                self.shared.ensemble.clone(),
                instance.properties(),
                emitter,
                self.shared.timer.clone(),
            )
            .with_aborted_check(instance.aborted_check())
            .with_unfinished_run_once(runs_to_end.then(|| unfinished_run_once.clone()));

            (ctx, instance.module_name().to_string(), runs_to_end)
        };

        let instance_arc = instance_arc.clone();
        let ensemble = self.shared.ensemble.clone();
        let done = done_tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("fallout-{child_name}"))
            .spawn(move || {
                let _logger = ensemble.controller_group().logger().entered();
                instance_arc
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .invoke(&ctx);
                let _ = done.send(idx);
            });

        match spawned {
            Ok(handle) => {
                pending.insert(
                    idx,
                    PendingChild {
                        name: child_name.to_string(),
                        module_label,
                        handle,
                    },
                );
            }
            Err(e) => {
                error!(instance = child_name, "failed to spawn module worker: {e}");
                self.shared.record_engine_error(
                    child_name,
                    &module_label,
                    format!("failed to spawn worker: {e}"),
                );
                // The completion callback will never fire for this child.
                if !runs_to_end {
                    unfinished_run_once.count_down();
                }
            }
        }
    }

    fn launch_sub_phases(
        &self,
        idx: usize,
        child_name: &str,
        nested: &Arc<Vec<Phase>>,
        done_tx: &mpsc::Sender<usize>,
        pending: &mut FxHashMap<usize, PendingChild>,
    ) {
        let nested = nested.clone();
        let scheduler = PhaseScheduler::new(self.shared.clone());
        let done = done_tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("fallout-{child_name}"))
            .spawn(move || {
                scheduler.run_phases(&nested);
                let _ = done.send(idx);
            });

        match spawned {
            Ok(handle) => {
                pending.insert(
                    idx,
                    PendingChild {
                        name: child_name.to_string(),
                        module_label: "phase".to_string(),
                        handle,
                    },
                );
            }
            Err(e) => {
                error!(instance = child_name, "failed to spawn sub-phase worker: {e}");
                self.shared.record_engine_error(
                    child_name,
                    "phase",
                    format!("failed to spawn worker: {e}"),
                );
            }
        }
    }

    /// Wait for every launched child, honoring the phase timeout. Stragglers
    /// are recorded as errors and abandoned.
    fn await_children(
        &self,
        phase: &Phase,
        done_rx: mpsc::Receiver<usize>,
        mut pending: FxHashMap<usize, PendingChild>,
    ) {
        let deadline = self.shared.phase_timeout.map(|t| Instant::now() + t);

        while !pending.is_empty() {
            let received = match deadline {
                None => done_rx.recv().ok(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        None
                    } else {
                        match done_rx.recv_timeout(remaining) {
                            Ok(idx) => Some(idx),
                            Err(RecvTimeoutError::Timeout) => None,
                            Err(RecvTimeoutError::Disconnected) => None,
                        }
                    }
                }
            };

            match received {
                Some(idx) => {
                    if let Some(child) = pending.remove(&idx) {
                        let _ = child.handle.join();
                    }
                }
                None => {
                    self.abandon_stragglers(phase, pending);
                    return;
                }
            }
        }
    }

    fn abandon_stragglers(&self, phase: &Phase, pending: FxHashMap<usize, PendingChild>) {
        let timeout = self
            .shared
            .phase_timeout
            .unwrap_or(Duration::ZERO);
        let mut abandoned = self
            .shared
            .abandoned
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for (_, child) in pending {
            error!(
                phase = %phase.name,
                instance = %child.name,
                "module did not complete within the phase timeout; abandoning worker"
            );
            self.shared.record_engine_error(
                &child.name,
                &child.module_label,
                format!(
                    "timeout: did not complete within the phase timeout of {:.3}s",
                    timeout.as_secs_f64()
                ),
            );
            abandoned.push(child.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fallout_core::{
        History, Lifetime, Module, ModuleError, ModuleInstance, PropertyGroup, RunToEndMethod,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct QuickModule {
        naps: Duration,
        runs: Arc<AtomicUsize>,
    }

    impl Module for QuickModule {
        fn run(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
            self.runs.fetch_add(1, Ordering::AcqRel);
            std::thread::sleep(self.naps);
            ctx.emit_marker(OpType::Ok)?;
            Ok(())
        }
    }

    struct StuckModule;

    impl Module for StuckModule {
        fn run(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
            ctx.emit_marker(OpType::Ok)?;
            std::thread::sleep(Duration::from_secs(60));
            Ok(())
        }
    }

    fn shared(phase_timeout: Option<Duration>) -> (Arc<RunShared>, Arc<History>) {
        let history = Arc::new(History::new());
        let sinks = Arc::new(ActiveHistories::new());
        sinks.add(history.clone());
        let shared = Arc::new(RunShared {
            ensemble: Arc::new(Ensemble::local("scheduler-test")),
            clock: WorkloadClock::start_now(),
            sinks,
            timer: Arc::new(TimerWheel::new()),
            abort: AbortSignal::new(),
            phase_timeout,
            abandoned: Mutex::new(Vec::new()),
        });
        (shared, history)
    }

    fn module_child(
        name: &str,
        module: impl Module + 'static,
        lifetime: Lifetime,
    ) -> (String, PhaseChild, Arc<Mutex<ModuleInstance>>) {
        let instance = Arc::new(Mutex::new(ModuleInstance::new(
            "quick",
            name,
            Box::new(module),
            PropertyGroup::new(),
            lifetime,
            RunToEndMethod::Automatic,
        )));
        (name.to_string(), PhaseChild::Module(instance.clone()), instance)
    }

    #[test]
    fn test_run_to_end_outlives_run_once_siblings() {
        let (shared, _history) = shared(None);

        let once_runs = Arc::new(AtomicUsize::new(0));
        let bg_runs = Arc::new(AtomicUsize::new(0));

        let (n1, c1, once_instance) = module_child(
            "once",
            QuickModule {
                naps: Duration::from_millis(25),
                runs: once_runs.clone(),
            },
            Lifetime::RunOnce,
        );
        let (n2, c2, _bg_instance) = module_child(
            "bg",
            QuickModule {
                naps: Duration::from_millis(5),
                runs: bg_runs.clone(),
            },
            Lifetime::RunToEndOfPhase,
        );

        let phase = Phase {
            name: "p".to_string(),
            children: vec![(n1, c1), (n2, c2)],
        };
        PhaseScheduler::new(shared).run_phases(&[phase]);

        assert_eq!(once_runs.load(Ordering::Acquire), 1);
        // ~25ms of run-once over ~5ms naps: several background iterations.
        let bg = bg_runs.load(Ordering::Acquire);
        assert!(bg >= 2, "expected repeated runs, got {bg}");
        assert!(once_instance.lock().unwrap().state().is_complete());
    }

    struct FailingSetupModule;

    impl Module for FailingSetupModule {
        fn use_global_setup_teardown(&self) -> bool {
            true
        }

        fn setup(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
            Err(ModuleError::msg("setup exploded"))
        }

        fn run(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
            ctx.emit_marker(OpType::Ok)?;
            Ok(())
        }
    }

    #[test]
    fn test_phase_completes_with_failed_setup_module_completed() {
        let (shared, history) = shared(None);

        let (n1, c1, failing) =
            module_child("broken", FailingSetupModule, Lifetime::RunOnce);
        // Global placement: the runner runs setup before the first phase.
        {
            let mut instance = failing.lock().unwrap();
            let emitter = instance.make_emitter(shared.clock, shared.sinks.clone());
            let ctx = ModuleContext::new(
                shared.ensemble.clone(),
                instance.properties(),
                emitter,
                shared.timer.clone(),
            );
            instance.global_setup(&ctx);
        }

        let bg_runs = Arc::new(AtomicUsize::new(0));
        let (n2, c2, _bg) = module_child(
            "bg",
            QuickModule {
                naps: Duration::from_millis(1),
                runs: bg_runs.clone(),
            },
            Lifetime::RunToEndOfPhase,
        );

        let phase = Phase {
            name: "p".to_string(),
            children: vec![(n1, c1), (n2, c2)],
        };
        PhaseScheduler::new(shared).run_phases(&[phase]);

        // The phase completed: the run-once latch was counted down despite
        // the setup failure, so the background sibling was released.
        assert!(bg_runs.load(Ordering::Acquire) >= 1);
        assert_eq!(
            failing.lock().unwrap().state(),
            fallout_core::ModuleState::Completed
        );

        let ops = history.snapshot();
        assert!(ops
            .iter()
            .any(|op| op.process == "broken"
                && op.op_type == OpType::Error
                && op.value_str() == Some("setup exploded")));
        // run never happened for the broken module
        assert!(!ops
            .iter()
            .any(|op| op.process == "broken" && op.op_type == OpType::Ok));
    }

    #[test]
    fn test_only_run_to_end_children_run_exactly_once() {
        let (shared, _history) = shared(None);

        let runs = Arc::new(AtomicUsize::new(0));
        let (n, c, _instance) = module_child(
            "bg",
            QuickModule {
                naps: Duration::from_millis(1),
                runs: runs.clone(),
            },
            Lifetime::RunToEndOfPhase,
        );

        let phase = Phase {
            name: "p".to_string(),
            children: vec![(n, c)],
        };
        // The latch starts at zero, so the phase completes immediately after
        // a single run.
        PhaseScheduler::new(shared).run_phases(&[phase]);
        assert_eq!(runs.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_phase_timeout_abandons_stuck_workers() {
        let (shared, history) = shared(Some(Duration::from_millis(50)));

        let runs = Arc::new(AtomicUsize::new(0));
        let (n1, c1, _i1) = module_child("stuck", StuckModule, Lifetime::RunOnce);
        let (n2, c2, _i2) = module_child(
            "fine",
            QuickModule {
                naps: Duration::from_millis(1),
                runs: runs.clone(),
            },
            Lifetime::RunOnce,
        );

        let phase = Phase {
            name: "p".to_string(),
            children: vec![(n1, c1), (n2, c2)],
        };
        let scheduler_shared = shared.clone();
        let start = Instant::now();
        PhaseScheduler::new(scheduler_shared).run_phases(&[phase]);
        assert!(start.elapsed() < Duration::from_secs(10));

        let ops = history.snapshot();
        let timeout_errors: Vec<_> = ops
            .iter()
            .filter(|op| {
                op.op_type == OpType::Error
                    && op.value_str().map(|v| v.starts_with("timeout:")).unwrap_or(false)
            })
            .collect();
        assert_eq!(timeout_errors.len(), 1);
        assert_eq!(timeout_errors[0].process, "stuck");
        assert_eq!(shared.abandoned.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_abort_stops_later_phases() {
        let (shared, _history) = shared(None);
        shared.abort.set();

        let runs = Arc::new(AtomicUsize::new(0));
        let (n, c, _instance) = module_child(
            "never",
            QuickModule {
                naps: Duration::from_millis(1),
                runs: runs.clone(),
            },
            Lifetime::RunOnce,
        );

        let phase = Phase {
            name: "p".to_string(),
            children: vec![(n, c)],
        };
        PhaseScheduler::new(shared).run_phases(&[phase]);
        assert_eq!(runs.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_nested_sub_phases_run_sequentially() {
        let (shared, history) = shared(None);

        let mk = |name: &str| {
            let (n, c, _i) = module_child(
                name,
                QuickModule {
                    naps: Duration::from_millis(5),
                    runs: Arc::new(AtomicUsize::new(0)),
                },
                Lifetime::RunOnce,
            );
            (n, c)
        };

        let inner = vec![
            Phase {
                name: "inner-1".to_string(),
                children: vec![mk("first")],
            },
            Phase {
                name: "inner-2".to_string(),
                children: vec![mk("second")],
            },
        ];
        let phase = Phase {
            name: "outer".to_string(),
            children: vec![("nested".to_string(), PhaseChild::SubPhases(Arc::new(inner)))],
        };

        PhaseScheduler::new(shared).run_phases(&[phase]);

        let ops = history.snapshot();
        let order: Vec<&str> = ops
            .iter()
            .filter(|op| op.op_type == OpType::End)
            .map(|op| op.process.as_str())
            .collect();
        assert_eq!(order, vec!["first", "second"]);
    }
}
