//! Property Specs and Groups
//!
//! Modules and checkers declare the properties they accept as a list of
//! [`PropertySpec`]s; the registry validates a user-supplied [`PropertyGroup`]
//! against those specs (required fields, defaults, validation patterns,
//! enumerated options) before an instance is constructed.

use fxhash::FxHashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from property validation and typed access.
#[derive(Debug, Error)]
pub enum PropertyError {
    /// A required property was not supplied and has no default.
    #[error("missing required property '{0}'")]
    MissingRequired(String),

    /// A property value did not match its validation pattern.
    #[error("property '{name}' value '{value}' does not match pattern '{pattern}'")]
    PatternMismatch {
        /// Property name
        name: String,
        /// Offending value, rendered as a string
        value: String,
        /// The validation pattern
        pattern: String,
    },

    /// A property value was not one of the enumerated options.
    #[error("property '{name}' value '{value}' is not one of the allowed options")]
    NotAnOption {
        /// Property name
        name: String,
        /// Offending value
        value: String,
    },

    /// A spec carried a validation pattern that is not a valid regex.
    #[error("property '{name}' has an invalid validation pattern: {source}")]
    BadPattern {
        /// Property name
        name: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },

    /// A property value had the wrong type for the requested accessor.
    #[error("property '{name}' has the wrong type (expected {expected})")]
    WrongType {
        /// Property name
        name: String,
        /// What the accessor expected
        expected: &'static str,
    },

    /// A duration string could not be parsed.
    #[error("invalid duration '{0}' (expected e.g. \"25ms\", \"5s\", \"2m\")")]
    InvalidDuration(String),
}

/// Parse a duration string (e.g. "25ms", "5s", "2m") to nanoseconds.
/// A bare number is taken as seconds.
pub fn parse_duration_ns(s: &str) -> Result<u64, PropertyError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(PropertyError::InvalidDuration(s.to_string()));
    }

    let (num_part, unit_part) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| s.split_at(i))
        .unwrap_or((s, "s"));

    let value: f64 = num_part
        .parse()
        .map_err(|_| PropertyError::InvalidDuration(s.to_string()))?;

    let multiplier: u64 = match unit_part.to_lowercase().as_str() {
        "ns" => 1,
        "us" => 1_000,
        "ms" => 1_000_000,
        "s" | "" => 1_000_000_000,
        "m" | "min" => 60_000_000_000,
        _ => return Err(PropertyError::InvalidDuration(s.to_string())),
    };

    Ok((value * multiplier as f64) as u64)
}

/// Declares one property a component accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Property name (the YAML key)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Whether the property must be supplied (after defaulting)
    pub required: bool,
    /// Default applied when the property is absent
    pub default: Option<Value>,
    /// Validation regex applied to the string form of the value
    pub pattern: Option<String>,
    /// If non-empty, the value must be one of these
    pub options: Vec<Value>,
}

impl PropertySpec {
    /// A required property with no default.
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            default: None,
            pattern: None,
            options: Vec::new(),
        }
    }

    /// An optional property with a default value.
    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            default: Some(default),
            pattern: None,
            options: Vec::new(),
        }
    }

    /// Attach a validation regex.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Restrict the value to an enumerated set.
    pub fn with_options(mut self, options: impl IntoIterator<Item = Value>) -> Self {
        self.options = options.into_iter().collect();
        self
    }
}

/// A bag of named property values, as parsed from workload YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyGroup {
    values: FxHashMap<String, Value>,
}

impl PropertyGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a group from key/value pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    /// Insert a value, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Raw value lookup.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether a value is present.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// String accessor.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Unsigned integer accessor.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.values.get(name).and_then(Value::as_u64)
    }

    /// Boolean accessor.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    /// String accessor that fails when absent.
    pub fn expect_str(&self, name: &str) -> Result<&str, PropertyError> {
        match self.values.get(name) {
            None => Err(PropertyError::MissingRequired(name.to_string())),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(PropertyError::WrongType {
                name: name.to_string(),
                expected: "string",
            }),
        }
    }

    /// Duration accessor: parses a string value ("25ms") or takes a number as
    /// whole seconds. Returns nanoseconds.
    pub fn get_duration_ns(&self, name: &str) -> Result<Option<u64>, PropertyError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => parse_duration_ns(s).map(Some),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|secs| Some(secs.saturating_mul(1_000_000_000)))
                .ok_or_else(|| PropertyError::WrongType {
                    name: name.to_string(),
                    expected: "duration string or whole seconds",
                }),
            Some(_) => Err(PropertyError::WrongType {
                name: name.to_string(),
                expected: "duration string or whole seconds",
            }),
        }
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

fn value_as_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validate `group` against `specs`: apply defaults, then check required
/// presence, validation patterns and enumerated options. Returns the group
/// with defaults applied.
pub fn validate_properties(
    specs: &[PropertySpec],
    group: &PropertyGroup,
) -> Result<PropertyGroup, PropertyError> {
    let mut resolved = group.clone();

    for spec in specs {
        if !resolved.contains(&spec.name) {
            if let Some(default) = &spec.default {
                resolved.insert(spec.name.clone(), default.clone());
            } else if spec.required {
                return Err(PropertyError::MissingRequired(spec.name.clone()));
            } else {
                continue;
            }
        }

        let value = resolved
            .get(&spec.name)
            .cloned()
            .unwrap_or(Value::Null);
        let value_str = value_as_display_string(&value);

        if let Some(pattern) = &spec.pattern {
            let re = Regex::new(pattern).map_err(|source| PropertyError::BadPattern {
                name: spec.name.clone(),
                source,
            })?;
            if !re.is_match(&value_str) {
                return Err(PropertyError::PatternMismatch {
                    name: spec.name.clone(),
                    value: value_str,
                    pattern: pattern.clone(),
                });
            }
        }

        if !spec.options.is_empty() && !spec.options.contains(&value) {
            return Err(PropertyError::NotAnOption {
                name: spec.name.clone(),
                value: value_str,
            });
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration_ns() {
        assert_eq!(parse_duration_ns("25ms").unwrap(), 25_000_000);
        assert_eq!(parse_duration_ns("5s").unwrap(), 5_000_000_000);
        assert_eq!(parse_duration_ns("100us").unwrap(), 100_000);
        assert_eq!(parse_duration_ns("1000ns").unwrap(), 1000);
        assert_eq!(parse_duration_ns("2m").unwrap(), 120_000_000_000);
        assert_eq!(parse_duration_ns("1.5s").unwrap(), 1_500_000_000);
        assert_eq!(parse_duration_ns("3").unwrap(), 3_000_000_000);
        assert!(parse_duration_ns("").is_err());
        assert!(parse_duration_ns("5 fortnights").is_err());
    }

    #[test]
    fn test_defaults_are_applied() {
        let specs = vec![PropertySpec::optional("duration", "how long", json!("1s"))];
        let resolved = validate_properties(&specs, &PropertyGroup::new()).unwrap();
        assert_eq!(resolved.get_str("duration"), Some("1s"));
    }

    #[test]
    fn test_missing_required_property() {
        let specs = vec![PropertySpec::required("text", "what to emit")];
        let err = validate_properties(&specs, &PropertyGroup::new()).unwrap_err();
        assert!(matches!(err, PropertyError::MissingRequired(name) if name == "text"));
    }

    #[test]
    fn test_pattern_validation() {
        let specs = vec![
            PropertySpec::required("duration", "how long").with_pattern(r"^\d+(\.\d+)?(ns|us|ms|s|m)$"),
        ];

        let good = PropertyGroup::new().with("duration", json!("25ms"));
        assert!(validate_properties(&specs, &good).is_ok());

        let bad = PropertyGroup::new().with("duration", json!("soon"));
        assert!(matches!(
            validate_properties(&specs, &bad),
            Err(PropertyError::PatternMismatch { .. })
        ));
    }

    #[test]
    fn test_option_validation() {
        let specs = vec![PropertySpec::optional("mode", "emit mode", json!("quiet"))
            .with_options([json!("quiet"), json!("loud")])];

        let good = PropertyGroup::new().with("mode", json!("loud"));
        assert!(validate_properties(&specs, &good).is_ok());

        let bad = PropertyGroup::new().with("mode", json!("deafening"));
        assert!(matches!(
            validate_properties(&specs, &bad),
            Err(PropertyError::NotAnOption { .. })
        ));
    }

    #[test]
    fn test_unknown_properties_pass_through() {
        let specs = vec![PropertySpec::optional("known", "known", json!(1))];
        let group = PropertyGroup::new().with("extra", json!("kept"));
        let resolved = validate_properties(&specs, &group).unwrap();
        assert_eq!(resolved.get_str("extra"), Some("kept"));
        assert_eq!(resolved.get_u64("known"), Some(1));
    }

    #[test]
    fn test_duration_accessor() {
        let group = PropertyGroup::new()
            .with("fast", json!("25ms"))
            .with("whole", json!(2));
        assert_eq!(group.get_duration_ns("fast").unwrap(), Some(25_000_000));
        assert_eq!(group.get_duration_ns("whole").unwrap(), Some(2_000_000_000));
        assert_eq!(group.get_duration_ns("absent").unwrap(), None);
    }
}
