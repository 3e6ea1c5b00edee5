#![warn(missing_docs)]
//! Fallout Core - Workload Engine Primitives
//!
//! This crate provides the building blocks of the workload execution engine:
//! - [`Operation`] / [`History`]: the totally-ordered event log
//! - [`Module`] / [`ModuleInstance`]: the unit-of-work contract and its
//!   engine-side state machine
//! - [`PropertySpec`] / [`PropertyGroup`]: load-time validation metadata
//! - [`Ensemble`]: the resolved machine groups a workload runs against
//! - [`WorkloadClock`], [`CountdownLatch`], [`TimerWheel`]: shared runtime
//!   machinery

mod clock;
mod ensemble;
mod history;
mod latch;
mod module;
mod operation;
mod property;
mod timer;

pub use clock::WorkloadClock;
pub use ensemble::{Ensemble, Node, NodeGroup, Product, Provider};
pub use history::{ActiveHistories, History, HistoryError};
pub use latch::CountdownLatch;
pub use module::{
    panic_message, AbortedCheck, EmitError, Emitter, InvalidLifetime, Lifetime, LifetimeChoice,
    Module, ModuleContext, ModuleError, ModuleInstance, ModuleState, RunToEndMethod,
    END_EVENT_PREFIX, NO_OPERATIONS_EMITTED, START_EVENT_PREFIX,
};
pub use operation::{MediaType, OpType, OpValue, Operation};
pub use property::{
    parse_duration_ns, validate_properties, PropertyError, PropertyGroup, PropertySpec,
};
pub use timer::TimerWheel;

/// Registers a module implementation under its short name. Submitted with
/// `inventory::submit!` at definition sites; the component registry indexes
/// all submissions at load time.
pub struct ModuleRegistration {
    /// Short name used in workload YAML (`module: <short_name>`)
    pub short_name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Property prefix for namespaced configuration
    pub prefix: &'static str,
    /// Constructs a fresh, unconfigured module
    pub factory: fn() -> Box<dyn Module>,
}

inventory::collect!(ModuleRegistration);
