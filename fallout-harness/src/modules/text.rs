//! Text Module
//!
//! Emits a configured string as one `ok` operation. Mostly useful for
//! ordering probes in tests: pair it with the `regex` checker to assert that
//! phases interleaved the way the workload intended.

use fallout_core::{Module, ModuleContext, ModuleError, ModuleRegistration, PropertySpec};

/// Emits a configured string once per run.
pub struct TextModule;

impl Module for TextModule {
    fn property_specs(&self) -> Vec<PropertySpec> {
        vec![PropertySpec::required("text", "The string to emit")]
    }

    fn run(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let text = ctx.properties().expect_str("text")?.to_string();
        ctx.emit_ok(text)?;
        Ok(())
    }
}

inventory::submit! {
    ModuleRegistration {
        short_name: "text",
        description: "Emits a configured string as a single ok operation",
        prefix: "fallout.module.text.",
        factory: || Box::new(TextModule),
    }
}
