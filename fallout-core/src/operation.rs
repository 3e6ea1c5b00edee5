//! Operation Records
//!
//! An [`Operation`] is one immutable record in a test's history: something a
//! module (or the engine, for lifecycle markers) observed or did, stamped with
//! the time since the workload clock origin.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of event an operation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Work was started (also used for the engine's start-of-run marker)
    Invoke,
    /// Work completed successfully
    Ok,
    /// Work completed unsuccessfully but in a well-defined way
    Fail,
    /// Informational event
    Info,
    /// An error the module (or engine) could not recover from
    Error,
    /// Engine marker: the module's run has exited
    End,
}

impl OpType {
    /// Whether this operation type counts against the `nofail` checker.
    pub fn is_failure(self) -> bool {
        matches!(self, OpType::Fail | OpType::Error)
    }

    /// Canonical lowercase name, as it appears in workload YAML and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Invoke => "invoke",
            OpType::Ok => "ok",
            OpType::Fail => "fail",
            OpType::Info => "info",
            OpType::Error => "error",
            OpType::End => "end",
        }
    }

    /// Parse a lowercase operation type name.
    pub fn parse(s: &str) -> Option<OpType> {
        match s.to_lowercase().as_str() {
            "invoke" => Some(OpType::Invoke),
            "ok" => Some(OpType::Ok),
            "fail" => Some(OpType::Fail),
            "info" => Some(OpType::Info),
            "error" => Some(OpType::Error),
            "end" => Some(OpType::End),
            _ => None,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media type of an operation's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MediaType {
    /// UTF-8 text
    PlainText,
    /// Structured JSON
    Json,
    /// Opaque bytes / unspecified
    #[default]
    OctetStream,
}

/// Opaque operation payload. `Value::Null` marks a payload-less operation
/// (e.g. the engine's `end` marker emitted with no message).
pub type OpValue = serde_json::Value;

/// One record in a test history. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Operation type
    #[serde(rename = "type")]
    pub op_type: OpType,
    /// Nanoseconds since the workload clock origin, assigned by the emitter
    /// before append. Append order, not this field, is the authoritative
    /// sequence.
    pub time_ns: u64,
    /// Media type of `value`
    pub media_type: MediaType,
    /// Opaque payload
    pub value: OpValue,
    /// Instance name of the emitting module
    #[serde(rename = "process_id")]
    pub process: String,
    /// Short name of the emitting module's implementation
    #[serde(rename = "module_name")]
    pub module: String,
}

impl Operation {
    /// The payload as a string slice, if it is one.
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}
