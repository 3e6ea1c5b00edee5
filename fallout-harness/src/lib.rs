#![warn(missing_docs)]
//! Fallout Harness - Workload Execution Engine
//!
//! Takes a parsed workload tree and a resolved ensemble, runs the phased
//! module schedule, and evaluates the resulting history with checkers.
//!
//! ## Pipeline Overview
//!
//! ```text
//! WorkloadSpec (YAML)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  registry   │  Resolve module/checker names, validate properties
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │   runner    │  Clock origin, active history, phase sequencing
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │  scheduler  │  One worker per child, lifetime rules, nested phases
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │  pipeline   │  Checkers + artifact checkers over the frozen history
//! └──────┬──────┘
//!        │
//!        ▼
//!    TestReport (verdict, diagnostics)
//! ```

mod abort;
mod config;
mod modules;
mod pipeline;
mod registry;
mod runner;
mod scheduler;
mod workload;

pub use abort::AbortSignal;
pub use config::EngineConfig;
pub use modules::{SleepModule, TextModule};
pub use pipeline::{run_artifact_checkers, run_checkers};
pub use registry::{load_workload, ComponentRegistry, LoadError};
pub use runner::{run_workload_yaml, RunResult, WorkloadRunner};
pub use workload::{
    properties_from_yaml, yaml_to_json, ArtifactCheckerInstance, ArtifactCheckerSpec,
    CheckerInstance, CheckerSpec, ChildSpec, ModuleSpec, Phase, PhaseChild, PhaseSpec, Workload,
    WorkloadSpec,
};
