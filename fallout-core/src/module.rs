//! Module Contract and State Machine
//!
//! Modules are the unit of work in a workload. User code implements the
//! [`Module`] trait (`setup`/`run`/`teardown` plus validation metadata); the
//! engine wraps each instance in a [`ModuleInstance`] that owns the state
//! machine, the emit protocol, lifecycle markers and completion callbacks.
//!
//! Failures escaping module code - an `Err` return or a panic - are caught
//! here and recorded as `error` operations; they never abort sibling modules.

use crate::clock::WorkloadClock;
use crate::ensemble::{Ensemble, Product, Provider};
use crate::history::{ActiveHistories, HistoryError};
use crate::latch::CountdownLatch;
use crate::operation::{MediaType, OpType, OpValue, Operation};
use crate::property::{PropertyError, PropertyGroup, PropertySpec};
use crate::timer::TimerWheel;
use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Payload prefix of the engine's start-of-run marker.
/// Don't change these without considering their use in timestamp placeholders.
pub const START_EVENT_PREFIX: &str = "Start: ";
/// Payload prefix of the engine's end-of-run marker.
pub const END_EVENT_PREFIX: &str = "End: ";

/// Message of the synthetic error recorded when a run-once module's `run`
/// returns without emitting anything.
pub const NO_OPERATIONS_EMITTED: &str = "No Operations were emitted during run";

/// How long a module runs within its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// The module runs once
    RunOnce,
    /// The module runs until every [`Lifetime::RunOnce`] sibling in its phase
    /// has completed; see [`RunToEndMethod`] for how
    RunToEndOfPhase,
}

/// Raised when a string does not resolve to a [`Lifetime`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid Lifetime")]
pub struct InvalidLifetime(pub String);

impl Lifetime {
    const fn const_name(self) -> &'static str {
        match self {
            Lifetime::RunOnce => "RUN_ONCE",
            Lifetime::RunToEndOfPhase => "RUN_TO_END_OF_PHASE",
        }
    }

    /// The value as it appears in workload YAML.
    pub fn as_property_value(self) -> &'static str {
        match self {
            Lifetime::RunOnce => "run_once",
            Lifetime::RunToEndOfPhase => "run_to_end_of_phase",
        }
    }

    /// Lazy version of value-of that returns the first lifetime whose
    /// constant name ends with `s` (case-insensitive), so `"once"` and
    /// `"phase"` work as abbreviations.
    pub fn lazy_value_of(s: &str) -> Result<Lifetime, InvalidLifetime> {
        let suffix = s.to_uppercase();
        [Lifetime::RunOnce, Lifetime::RunToEndOfPhase]
            .into_iter()
            .find(|lifetime| lifetime.const_name().ends_with(&suffix))
            .ok_or_else(|| InvalidLifetime(s.to_string()))
    }
}

/// How `run` behaves when the lifetime is [`Lifetime::RunToEndOfPhase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunToEndMethod {
    /// `run` is called once; the module is responsible for polling
    /// `unfinished_run_once_modules` (or any other criterion) and returning
    /// when appropriate
    Manual,
    /// `run` is called repeatedly until `unfinished_run_once_modules` is zero
    Automatic,
}

/// How a module's lifetime is determined: hard-coded by the implementation,
/// or user-selectable through the `lifetime` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeChoice {
    /// Lifetime is fixed by the module implementation.
    Fixed {
        /// The hard-coded lifetime
        lifetime: Lifetime,
        /// Loop behavior when run-to-end
        method: RunToEndMethod,
    },
    /// Lifetime is settable in workload YAML via the `lifetime` property.
    Selectable {
        /// Default when the property is absent
        default: Lifetime,
        /// Loop behavior when run-to-end
        method: RunToEndMethod,
    },
}

impl LifetimeChoice {
    /// The common case: user-selectable, defaulting to run-once, automatic.
    pub fn run_once() -> Self {
        LifetimeChoice::Selectable {
            default: Lifetime::RunOnce,
            method: RunToEndMethod::Automatic,
        }
    }

    /// Hard-coded run-to-end-of-phase with the given method.
    pub fn fixed_run_to_end(method: RunToEndMethod) -> Self {
        LifetimeChoice::Fixed {
            lifetime: Lifetime::RunToEndOfPhase,
            method,
        }
    }

    /// The run-to-end method, whichever variant this is.
    pub fn method(self) -> RunToEndMethod {
        match self {
            LifetimeChoice::Fixed { method, .. } | LifetimeChoice::Selectable { method, .. } => {
                method
            }
        }
    }

    /// The `lifetime` property spec, present only for selectable lifetimes.
    pub fn property_spec(self) -> Option<PropertySpec> {
        match self {
            LifetimeChoice::Fixed { .. } => None,
            LifetimeChoice::Selectable { default, .. } => Some(PropertySpec::optional(
                "lifetime",
                "Whether the module should be run_once, in which case it will run once and \
                 exit, or whether it should run_to_end_of_phase, in which case it will run \
                 until all other modules in the phase are complete. You can abbreviate \
                 'run_once' and 'run_to_end_of_phase' to 'once' and 'phase'",
                Value::String(default.as_property_value().to_string()),
            )),
        }
    }
}

/// Lifecycle states of a module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Constructed, not yet set up
    Created,
    /// `setup` succeeded
    SetupOk,
    /// `setup` failed; `run` will be skipped
    SetupFailed,
    /// Inside `run`
    Running,
    /// `run` has exited and the end marker has been recorded
    Completed,
    /// `teardown` has run
    TornDown,
}

impl ModuleState {
    /// Whether the instance has finished its run lifecycle. [`TornDown`]
    /// lies beyond [`Completed`] in the state chain.
    ///
    /// [`TornDown`]: ModuleState::TornDown
    /// [`Completed`]: ModuleState::Completed
    pub fn is_complete(self) -> bool {
        matches!(self, ModuleState::Completed | ModuleState::TornDown)
    }
}

/// Errors a module's `setup`/`run`/`teardown` may return. The engine records
/// them as `error` operations; they are never rethrown at siblings.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Free-form failure
    #[error("{0}")]
    Failed(String),

    /// An emit was rejected by the engine
    #[error(transparent)]
    Emit(#[from] EmitError),

    /// A property access failed
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ModuleError {
    /// Free-form failure message.
    pub fn msg(message: impl Into<String>) -> Self {
        ModuleError::Failed(message.into())
    }
}

/// Protocol violations of the emit contract.
#[derive(Debug, Error)]
pub enum EmitError {
    /// Emit was called while the module was not in its run method.
    #[error("module '{0}' tried to emit outside of its run method")]
    NotRunning(String),

    /// The history store rejected the append.
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Cooperative abort probe injected by the engine before `run`.
pub type AbortedCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Extract a printable message from a panic payload.
pub fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Records operations on behalf of one module instance. Cheap to clone;
/// clones share the running flag and emitted counter, so a module may hand
/// clones to threads it spawns inside `run` (emissions stay serialized by the
/// history store).
#[derive(Clone)]
pub struct Emitter {
    instance: Arc<str>,
    module: Arc<str>,
    clock: WorkloadClock,
    sinks: Arc<ActiveHistories>,
    running: Arc<AtomicBool>,
    emitted: Arc<AtomicU64>,
}

impl Emitter {
    fn make_operation(&self, op_type: OpType, media_type: MediaType, value: OpValue) -> Operation {
        Operation {
            op_type,
            time_ns: self.clock.now_ns(),
            media_type,
            value,
            process: self.instance.to_string(),
            module: self.module.to_string(),
        }
    }

    fn log_emit(&self, op_type: OpType, value: &OpValue) {
        if op_type == OpType::Error {
            error!(instance = %self.instance, "emit {op_type} - {value}");
        } else {
            info!(instance = %self.instance, "emit {op_type} - {value}");
        }
    }

    /// Record an operation from module code. Rejected (and recorded as a
    /// protocol-violation `error`) outside the module's run method.
    pub fn emit(
        &self,
        op_type: OpType,
        media_type: MediaType,
        value: OpValue,
    ) -> Result<(), EmitError> {
        if !self.running.load(Ordering::Acquire) {
            let violation = EmitError::NotRunning(self.instance.to_string());
            self.engine_emit(
                OpType::Error,
                MediaType::PlainText,
                Value::String(violation.to_string()),
            );
            return Err(violation);
        }

        self.emitted.fetch_add(1, Ordering::AcqRel);
        self.log_emit(op_type, &value);
        self.sinks
            .broadcast(self.make_operation(op_type, media_type, value))?;
        Ok(())
    }

    /// Record an engine-originated operation (lifecycle markers, caught
    /// failures, timeouts). Not subject to the running check and not counted
    /// against the module's emitted total.
    pub fn engine_emit(&self, op_type: OpType, media_type: MediaType, value: OpValue) {
        self.log_emit(op_type, &value);
        if let Err(e) = self
            .sinks
            .broadcast(self.make_operation(op_type, media_type, value))
        {
            warn!(instance = %self.instance, "dropped engine operation: {e}");
        }
    }

    /// Operations emitted by module code during the current run.
    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Acquire)
    }
}

/// Everything a module may touch while running: the ensemble, its validated
/// properties, the emit API, the shared timer, the abort probe and (for
/// run-to-end modules) the unfinished-run-once latch.
///
/// Clones share all underlying state, so a context can be moved into threads
/// a module spawns inside `run`.
#[derive(Clone)]
pub struct ModuleContext {
    ensemble: Arc<Ensemble>,
    properties: Arc<PropertyGroup>,
    emitter: Emitter,
    timer: Arc<TimerWheel>,
    aborted_check: Option<AbortedCheck>,
    unfinished_run_once: Option<Arc<CountdownLatch>>,
}

impl ModuleContext {
    /// Build a context. The engine calls this; module code receives it.
    pub fn new(
        ensemble: Arc<Ensemble>,
        properties: Arc<PropertyGroup>,
        emitter: Emitter,
        timer: Arc<TimerWheel>,
    ) -> Self {
        Self {
            ensemble,
            properties,
            emitter,
            timer,
            aborted_check: None,
            unfinished_run_once: None,
        }
    }

    /// Attach the cooperative abort probe.
    pub fn with_aborted_check(mut self, check: Option<AbortedCheck>) -> Self {
        self.aborted_check = check;
        self
    }

    /// Attach the phase's unfinished-run-once latch.
    pub fn with_unfinished_run_once(mut self, latch: Option<Arc<CountdownLatch>>) -> Self {
        self.unfinished_run_once = latch;
        self
    }

    /// The provisioned ensemble. Read-only from the module's perspective.
    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    /// The instance's validated properties.
    pub fn properties(&self) -> &PropertyGroup {
        &self.properties
    }

    /// The shared timer wheel.
    pub fn timer(&self) -> &TimerWheel {
        &self.timer
    }

    /// Identity of the running test.
    pub fn test_run_id(&self) -> &str {
        self.ensemble.test_run_id()
    }

    /// The emit API, for handing to threads a module spawns.
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Whether an abort has been requested. Modules should consult this at
    /// least once per iteration of their inner loops and return early.
    pub fn is_aborted(&self) -> bool {
        let aborted = self
            .aborted_check
            .as_ref()
            .map(|check| check())
            .unwrap_or(false);
        if aborted {
            warn!(
                instance = %self.emitter.instance,
                "module returns early for aborted test run"
            );
        }
        aborted
    }

    /// The phase's unfinished-run-once latch, for manual run-to-end modules.
    pub fn unfinished_run_once_modules(&self) -> Option<&Arc<CountdownLatch>> {
        self.unfinished_run_once.as_ref()
    }

    /// Emit an `info` operation with a plain-text message.
    pub fn emit_info(&self, message: impl Into<String>) -> Result<(), EmitError> {
        self.emitter
            .emit(OpType::Info, MediaType::PlainText, Value::String(message.into()))
    }

    /// Emit an `ok` operation with a plain-text message.
    pub fn emit_ok(&self, message: impl Into<String>) -> Result<(), EmitError> {
        self.emitter
            .emit(OpType::Ok, MediaType::PlainText, Value::String(message.into()))
    }

    /// Emit a `fail` operation with a plain-text message.
    pub fn emit_fail(&self, message: impl Into<String>) -> Result<(), EmitError> {
        self.emitter
            .emit(OpType::Fail, MediaType::PlainText, Value::String(message.into()))
    }

    /// Emit an `error` operation with a plain-text message.
    pub fn emit_error(&self, message: impl Into<String>) -> Result<(), EmitError> {
        self.emitter
            .emit(OpType::Error, MediaType::PlainText, Value::String(message.into()))
    }

    /// Emit an `invoke` operation with a plain-text message.
    pub fn emit_invoke(&self, message: impl Into<String>) -> Result<(), EmitError> {
        self.emitter
            .emit(OpType::Invoke, MediaType::PlainText, Value::String(message.into()))
    }

    /// Emit a payload-less operation of the given type.
    pub fn emit_marker(&self, op_type: OpType) -> Result<(), EmitError> {
        self.emitter.emit(op_type, MediaType::OctetStream, Value::Null)
    }

    /// Emit an operation with an explicit payload and default media type.
    pub fn emit(&self, op_type: OpType, value: OpValue) -> Result<(), EmitError> {
        self.emitter.emit(op_type, MediaType::OctetStream, value)
    }
}

/// The contract module implementations fulfill.
pub trait Module: Send {
    /// How this module's lifetime is determined.
    fn lifetime_choice(&self) -> LifetimeChoice {
        LifetimeChoice::run_once()
    }

    /// Properties this module accepts, for load-time validation.
    fn property_specs(&self) -> Vec<PropertySpec> {
        Vec::new()
    }

    /// Providers this module requires. Checked against the ensemble at load.
    fn required_providers(&self) -> FxHashSet<Provider> {
        FxHashSet::default()
    }

    /// Products this module is known to support. Metadata only.
    fn supported_products(&self) -> Vec<Product> {
        Product::everything()
    }

    /// When true, `setup`/`teardown` run once at workload start/end; when
    /// false, they run immediately before/after each `run` (required for
    /// modules invoked repeatedly).
    fn use_global_setup_teardown(&self) -> bool {
        false
    }

    /// Optional setup hook. Must be idempotent.
    fn setup(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// The main work. Must emit at least one operation, or the engine
    /// synthesizes an error. Should consult [`ModuleContext::is_aborted`]
    /// and return early when it fires.
    fn run(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError>;

    /// Optional teardown hook.
    fn teardown(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }
}

type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Engine-side wrapper around one configured module: state machine, emit
/// bookkeeping, lifetime resolution and completion callbacks. Owned by
/// exactly one phase; does not outlive it.
pub struct ModuleInstance {
    module_name: String,
    instance_name: String,
    module: Box<dyn Module>,
    properties: Arc<PropertyGroup>,
    lifetime: Lifetime,
    method: RunToEndMethod,
    state: ModuleState,
    setup_succeeded: bool,
    running: Arc<AtomicBool>,
    emitted: Arc<AtomicU64>,
    aborted_check: Option<AbortedCheck>,
    completion_callbacks: Vec<CompletionCallback>,
}

impl ModuleInstance {
    /// Wrap a constructed module with its resolved configuration.
    pub fn new(
        module_name: impl Into<String>,
        instance_name: impl Into<String>,
        module: Box<dyn Module>,
        properties: PropertyGroup,
        lifetime: Lifetime,
        method: RunToEndMethod,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            instance_name: instance_name.into(),
            module,
            properties: Arc::new(properties),
            lifetime,
            method,
            state: ModuleState::Created,
            setup_succeeded: true,
            running: Arc::new(AtomicBool::new(false)),
            emitted: Arc::new(AtomicU64::new(0)),
            aborted_check: None,
            completion_callbacks: Vec::new(),
        }
    }

    /// Short name of the module implementation.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Unique instance name within the test run.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Resolved lifetime.
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Run-to-end method.
    pub fn run_to_end_method(&self) -> RunToEndMethod {
        self.method
    }

    /// Whether this instance runs to end of phase.
    pub fn runs_to_end_of_phase(&self) -> bool {
        self.lifetime == Lifetime::RunToEndOfPhase
    }

    /// The instance's validated properties.
    pub fn properties(&self) -> Arc<PropertyGroup> {
        self.properties.clone()
    }

    /// Setup/teardown placement declared by the implementation.
    pub fn use_global_setup_teardown(&self) -> bool {
        self.module.use_global_setup_teardown()
    }

    /// Inject the cooperative abort probe. Idempotent: registering a probe
    /// twice simply replaces it.
    pub fn set_aborted_check(&mut self, check: AbortedCheck) {
        self.aborted_check = Some(check);
    }

    /// Remove the abort probe. Idempotent.
    pub fn clear_aborted_check(&mut self) {
        self.aborted_check = None;
    }

    /// The currently registered abort probe, if any.
    pub fn aborted_check(&self) -> Option<AbortedCheck> {
        self.aborted_check.clone()
    }

    /// Register a callback to fire when this instance completes its run.
    /// The phase scheduler uses this to count down run-once completions.
    pub fn add_completion_callback(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.completion_callbacks.push(Box::new(callback));
    }

    /// Build the emitter for this instance against the given clock and
    /// history set. Shares the running flag and emitted counter with the
    /// instance, so the invoke protocol governs every clone.
    pub fn make_emitter(&self, clock: WorkloadClock, sinks: Arc<ActiveHistories>) -> Emitter {
        Emitter {
            instance: Arc::from(self.instance_name.as_str()),
            module: Arc::from(self.module_name.as_str()),
            clock,
            sinks,
            running: self.running.clone(),
            emitted: self.emitted.clone(),
        }
    }

    fn setup_safely(&mut self, ctx: &ModuleContext) -> bool {
        let ok = self.hook_safely(ctx, "setup", |module, ctx| module.setup(ctx));
        self.state = if ok {
            ModuleState::SetupOk
        } else {
            ModuleState::SetupFailed
        };
        ok
    }

    fn teardown_safely(&mut self, ctx: &ModuleContext) -> bool {
        self.hook_safely(ctx, "teardown", |module, ctx| module.teardown(ctx))
    }

    fn hook_safely(
        &mut self,
        ctx: &ModuleContext,
        stage: &str,
        hook: impl FnOnce(&mut Box<dyn Module>, &ModuleContext) -> Result<(), ModuleError>,
    ) -> bool {
        let outcome = catch_unwind(AssertUnwindSafe(|| hook(&mut self.module, ctx)));
        let failure = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic),
        };
        error!(instance = %self.instance_name, "exception in module {stage}: {failure}");
        ctx.emitter()
            .engine_emit(OpType::Error, MediaType::PlainText, Value::String(failure));
        false
    }

    /// Run `setup` at workload start, for global-placement modules.
    pub fn global_setup(&mut self, ctx: &ModuleContext) {
        self.setup_succeeded = self.setup_safely(ctx);
    }

    /// Run `teardown` at workload end, for global-placement modules.
    pub fn global_teardown(&mut self, ctx: &ModuleContext) {
        self.teardown_safely(ctx);
        self.state = ModuleState::TornDown;
    }

    /// Execute the full invoke protocol on the calling thread: local setup,
    /// start marker, the lifetime-appropriate run loop, local teardown, end
    /// marker, and completion callbacks. Failures are recorded, not thrown.
    pub fn invoke(&mut self, ctx: &ModuleContext) {
        let global = self.module.use_global_setup_teardown();
        if !global {
            self.setup_succeeded = self.setup_safely(ctx);
        }

        // Marker payloads stay null so value-oriented checkers see only what
        // modules emitted; the start/end event text goes to the log.
        info!("{START_EVENT_PREFIX}{}", self.instance_name);
        ctx.emitter()
            .engine_emit(OpType::Invoke, MediaType::OctetStream, Value::Null);
        self.running.store(true, Ordering::Release);

        if self.setup_succeeded {
            self.state = ModuleState::Running;
            self.run_to_completion(ctx);
        }

        if !global {
            self.teardown_safely(ctx);
        }

        info!("{END_EVENT_PREFIX}{}", self.instance_name);
        ctx.emitter()
            .engine_emit(OpType::End, MediaType::OctetStream, Value::Null);
        self.running.store(false, Ordering::Release);
        self.emitted.store(0, Ordering::Release);

        // The lifecycle has ended even when setup failed: phase completion
        // accounting must see this instance as done. Local-placement
        // teardown has already run; global placement stays Completed until
        // the workload-end teardown.
        self.state = if global {
            ModuleState::Completed
        } else {
            ModuleState::TornDown
        };

        for callback in self.completion_callbacks.drain(..) {
            callback();
        }
    }

    fn run_to_completion(&mut self, ctx: &ModuleContext) {
        match self.lifetime {
            Lifetime::RunOnce => {
                self.run_caught(ctx);
                if self.emitted.load(Ordering::Acquire) == 0 {
                    let _ = ctx.emit_error(NO_OPERATIONS_EMITTED);
                }
            }
            Lifetime::RunToEndOfPhase => {
                let latch = ctx.unfinished_run_once_modules().cloned();
                loop {
                    if !self.run_caught(ctx) {
                        // A failure ends the loop without the defensive wait.
                        return;
                    }
                    let unfinished = latch.as_ref().map(|l| l.count()).unwrap_or(0);
                    if self.method != RunToEndMethod::Automatic || unfinished == 0 {
                        break;
                    }
                }
                // Barrier in case an AUTOMATIC body returned before the last
                // run-once sibling finished.
                if let Some(latch) = latch {
                    latch.wait();
                }
            }
        }
    }

    fn run_caught(&mut self, ctx: &ModuleContext) -> bool {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.module.run(ctx)));
        let failure = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic),
        };
        error!(instance = %self.instance_name, "exception in module run: {failure}");
        let _ = ctx.emitter().emit(
            OpType::Error,
            MediaType::PlainText,
            Value::String(failure),
        );
        false
    }
}
