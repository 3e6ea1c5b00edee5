//! Built-in Modules
//!
//! Small general-purpose modules registered out of the box:
//! - `sleep`: naps for a configurable duration, emitting one `ok` per nap
//! - `text`: emits a configured string once

mod sleep;
mod text;

pub use sleep::SleepModule;
pub use text::TextModule;
