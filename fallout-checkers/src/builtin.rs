//! Built-in History Checkers
//!
//! - `nofail`: invalid iff any operation is `fail` or `error`
//! - `regex`: concatenated string payloads must match a pattern
//! - `count`: operations matching a process/type filter must fall in a range

use crate::{CheckOutcome, Checker, CheckerError, CheckerRegistration};
use fallout_core::{OpType, Operation, PropertyGroup, PropertySpec};
use fxhash::FxHashSet;
use regex::Regex;
use serde_json::{json, Value};

fn compile(pattern: &str) -> Result<Regex, CheckerError> {
    Regex::new(pattern).map_err(|source| CheckerError::BadRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Read a property that may be a single string or a list of strings.
/// Absent means "match everything".
fn string_set(
    props: &PropertyGroup,
    name: &str,
) -> Result<Option<FxHashSet<String>>, CheckerError> {
    match props.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(FxHashSet::from_iter([s.clone()]))),
        Some(Value::Array(items)) => {
            let mut set = FxHashSet::default();
            for item in items {
                match item.as_str() {
                    Some(s) => {
                        set.insert(s.to_string());
                    }
                    None => {
                        return Err(CheckerError::Property(
                            fallout_core::PropertyError::WrongType {
                                name: name.to_string(),
                                expected: "string or list of strings",
                            },
                        ))
                    }
                }
            }
            Ok(Some(set))
        }
        Some(_) => Err(CheckerError::Property(
            fallout_core::PropertyError::WrongType {
                name: name.to_string(),
                expected: "string or list of strings",
            },
        )),
    }
}

/// Invalid iff any operation in the history has type `fail` or `error`.
pub struct NofailChecker;

impl Checker for NofailChecker {
    fn check(
        &self,
        history: &[Operation],
        _props: &PropertyGroup,
    ) -> Result<CheckOutcome, CheckerError> {
        let failures: Vec<&Operation> = history
            .iter()
            .filter(|op| op.op_type.is_failure())
            .collect();

        if failures.is_empty() {
            Ok(CheckOutcome::valid("no fail or error operations"))
        } else {
            let first = failures[0];
            Ok(CheckOutcome::invalid(format!(
                "{} fail/error operations (first: {} from '{}': {})",
                failures.len(),
                first.op_type,
                first.process,
                first.value
            )))
        }
    }
}

inventory::submit! {
    CheckerRegistration {
        short_name: "nofail",
        description: "Checks that no operation in the history failed or errored",
        factory: || Box::new(NofailChecker),
    }
}

/// Concatenates all string payloads in history order and matches the result
/// against a regex. Invalid iff there is no match.
pub struct RegexChecker;

impl Checker for RegexChecker {
    fn property_specs(&self) -> Vec<PropertySpec> {
        vec![PropertySpec::required(
            "pattern",
            "Regex matched against the concatenation of all string operation values",
        )]
    }

    fn check(
        &self,
        history: &[Operation],
        props: &PropertyGroup,
    ) -> Result<CheckOutcome, CheckerError> {
        let pattern = props.expect_str("pattern")?;
        let re = compile(pattern)?;

        let concatenated: String = history
            .iter()
            .filter_map(Operation::value_str)
            .collect();

        if re.is_match(&concatenated) {
            Ok(CheckOutcome::valid(format!("'{pattern}' matched")))
        } else {
            Ok(CheckOutcome::invalid(format!(
                "'{pattern}' did not match concatenated values ({} chars)",
                concatenated.len()
            )))
        }
    }
}

inventory::submit! {
    CheckerRegistration {
        short_name: "regex",
        description: "Matches a regex against the concatenated string values of the history",
        factory: || Box::new(RegexChecker),
    }
}

/// Counts operations matching a `processes`/`types` filter and asserts
/// `min <= count <= max`.
pub struct CountChecker;

impl Checker for CountChecker {
    fn property_specs(&self) -> Vec<PropertySpec> {
        vec![
            PropertySpec::optional(
                "processes",
                "Instance name(s) to count; all processes when absent",
                Value::Null,
            ),
            PropertySpec::optional(
                "types",
                "Operation type(s) to count; all types when absent",
                Value::Null,
            ),
            PropertySpec::optional("min", "Minimum matching operations", json!(0)),
            PropertySpec::optional("max", "Maximum matching operations", Value::Null),
        ]
    }

    fn check(
        &self,
        history: &[Operation],
        props: &PropertyGroup,
    ) -> Result<CheckOutcome, CheckerError> {
        let processes = string_set(props, "processes")?;
        let types = match string_set(props, "types")? {
            None => None,
            Some(names) => {
                let mut parsed = FxHashSet::default();
                for name in names {
                    let op_type = OpType::parse(&name)
                        .ok_or_else(|| CheckerError::InvalidOpType(name.clone()))?;
                    parsed.insert(op_type);
                }
                Some(parsed)
            }
        };
        let min = props.get_u64("min").unwrap_or(0);
        let max = props.get_u64("max").unwrap_or(u64::MAX);

        let count = history
            .iter()
            .filter(|op| {
                processes
                    .as_ref()
                    .map(|set| set.contains(&op.process))
                    .unwrap_or(true)
                    && types
                        .as_ref()
                        .map(|set| set.contains(&op.op_type))
                        .unwrap_or(true)
            })
            .count() as u64;

        if min <= count && count <= max {
            Ok(CheckOutcome::valid(format!(
                "{count} matching operations within [{min}, {max}]"
            )))
        } else {
            Ok(CheckOutcome::invalid(format!(
                "{count} matching operations outside [{min}, {max}]"
            )))
        }
    }
}

inventory::submit! {
    CheckerRegistration {
        short_name: "count",
        description: "Asserts the number of matching operations falls in a range",
        factory: || Box::new(CountChecker),
    }
}
