//! Sleep Module
//!
//! Naps for `duration`, then emits one `ok`. With `lifetime:
//! run_to_end_of_phase` the engine re-invokes it until the phase's run-once
//! modules finish, making it a simple repeating background load.

use fallout_core::{
    Module, ModuleContext, ModuleError, ModuleRegistration, OpType, PropertySpec,
};
use serde_json::json;
use std::time::Duration;

/// Max single nap before re-checking the abort flag.
const ABORT_POLL: Duration = Duration::from_millis(1);

/// Sleeps for a configurable duration each run.
pub struct SleepModule;

impl Module for SleepModule {
    fn property_specs(&self) -> Vec<PropertySpec> {
        vec![PropertySpec::optional(
            "duration",
            "How long to sleep each run (e.g. 25ms, 5s)",
            json!("1s"),
        )]
    }

    fn run(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let total_ns = ctx
            .properties()
            .get_duration_ns("duration")?
            .unwrap_or(1_000_000_000);
        let mut remaining = Duration::from_nanos(total_ns);

        while !remaining.is_zero() {
            if ctx.is_aborted() {
                ctx.emit_info("sleep aborted")?;
                return Ok(());
            }
            let nap = remaining.min(ABORT_POLL);
            std::thread::sleep(nap);
            remaining -= nap;
        }

        ctx.emit_marker(OpType::Ok)?;
        Ok(())
    }
}

inventory::submit! {
    ModuleRegistration {
        short_name: "sleep",
        description: "Sleeps for a configurable duration, emitting one ok per nap",
        prefix: "fallout.module.sleep.",
        factory: || Box::new(SleepModule),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fallout_core::{
        ActiveHistories, Ensemble, History, Lifetime, ModuleInstance, PropertyGroup,
        RunToEndMethod, TimerWheel, WorkloadClock,
    };
    use std::sync::Arc;

    fn run_sleep(properties: PropertyGroup) -> Vec<fallout_core::Operation> {
        let mut instance = ModuleInstance::new(
            "sleep",
            "sleep0",
            Box::new(SleepModule),
            properties,
            Lifetime::RunOnce,
            RunToEndMethod::Automatic,
        );
        let history = Arc::new(History::new());
        let sinks = Arc::new(ActiveHistories::new());
        sinks.add(history.clone());
        let emitter = instance.make_emitter(WorkloadClock::start_now(), sinks);
        let ctx = fallout_core::ModuleContext::new(
            Arc::new(Ensemble::local("t")),
            instance.properties(),
            emitter,
            Arc::new(TimerWheel::new()),
        );
        instance.invoke(&ctx);
        history.snapshot()
    }

    #[test]
    fn test_sleep_emits_one_ok() {
        let ops = run_sleep(PropertyGroup::new().with("duration", json!("5ms")));
        let oks = ops.iter().filter(|o| o.op_type == OpType::Ok).count();
        assert_eq!(oks, 1);
    }

    #[test]
    fn test_bad_duration_is_recorded_as_error() {
        let ops = run_sleep(PropertyGroup::new().with("duration", json!("eventually")));
        assert!(ops.iter().any(|o| o.op_type == OpType::Error));
    }
}
