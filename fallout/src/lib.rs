//! # Fallout
//!
//! A distributed-systems test harness: provision an ensemble of machines,
//! drive a workload of concurrent modules against it, and evaluate the
//! resulting operation history with checkers.
//!
//! This crate is the workload execution engine. Provisioning, service
//! configuration and the service frontend live with external collaborators;
//! the engine consumes a resolved [`Ensemble`] and a workload definition and
//! produces a totally-ordered history plus a pass/fail verdict.
//!
//! ## Quick Start
//!
//! ```ignore
//! use fallout::prelude::*;
//!
//! let yaml = r#"
//! phases:
//!   - load:
//!       module: sleep
//!       properties: { duration: 100ms, lifetime: phase }
//!     probe:
//!       module: text
//!       properties: { text: "checkpoint" }
//! checkers:
//!   clean:
//!     checker: nofail
//! "#;
//!
//! let result = run_workload_yaml(yaml, Ensemble::local("demo"), EngineConfig::default())?;
//! assert!(result.report.verdict.is_pass());
//! ```
//!
//! ## Writing a module
//!
//! Implement [`Module`] and register it:
//!
//! ```ignore
//! use fallout::prelude::*;
//!
//! struct PingModule;
//!
//! impl Module for PingModule {
//!     fn run(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
//!         ctx.emit_ok("pong")?;
//!         Ok(())
//!     }
//! }
//!
//! fallout::internal::inventory::submit! {
//!     ModuleRegistration {
//!         short_name: "ping",
//!         description: "Emits a single pong",
//!         prefix: "fallout.module.ping.",
//!         factory: || Box::new(PingModule),
//!     }
//! }
//! ```

// Re-export core types
pub use fallout_core::{
    panic_message, AbortedCheck, ActiveHistories, CountdownLatch, EmitError, Emitter, Ensemble,
    History, HistoryError, InvalidLifetime, Lifetime, LifetimeChoice, MediaType, Module,
    ModuleContext, ModuleError, ModuleInstance, ModuleRegistration, ModuleState, Node, NodeGroup,
    OpType, OpValue, Operation, Product, Provider, PropertyError, PropertyGroup, PropertySpec,
    RunToEndMethod, TimerWheel, WorkloadClock, END_EVENT_PREFIX, NO_OPERATIONS_EMITTED,
    START_EVENT_PREFIX,
};

// Re-export checker types and built-ins
pub use fallout_checkers::{
    ArtifactChecker, ArtifactCheckerRegistration, ArtifactPresentChecker, ArtifactRegexChecker,
    CheckOutcome, CheckResult, CheckStatus, Checker, CheckerError, CheckerKind,
    CheckerRegistration, CountChecker, NofailChecker, RegexChecker,
};

// Re-export harness types
pub use fallout_harness::{
    load_workload, run_workload_yaml, AbortSignal, ComponentRegistry, EngineConfig, LoadError,
    Phase, PhaseChild, RunResult, Workload, WorkloadRunner, WorkloadSpec,
};

// Re-export report types
pub use fallout_report::{
    format_human_report, generate_json_report, TestReport, Verdict, REPORT_SCHEMA_VERSION,
};

/// Internal re-exports for registration macros
#[doc(hidden)]
pub mod internal {
    pub use inventory;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        run_workload_yaml, EngineConfig, Ensemble, Lifetime, LifetimeChoice, Module, ModuleContext,
        ModuleError, ModuleRegistration, OpType, PropertyGroup, PropertySpec, RunToEndMethod,
        Verdict, WorkloadRunner,
    };
}
