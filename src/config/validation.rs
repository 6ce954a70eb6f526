//! Structural validation of execution responses.
//!
//! Rules come from the `responses.validation` subtree:
//!
//! ```json
//! {
//!   "required_fields": ["summary", "status"],
//!   "allowed_values": { "status": ["completed", "failed", "partial"] },
//!   "field_types": { "summary": "string" }
//! }
//! ```
//!
//! Field names may be dotted paths into nested objects.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path;

/// JSON type expected for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl FieldType {
    /// Get the type of a JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Boolean,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
            Value::Null => Self::Null,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        };
        write!(f, "{}", name)
    }
}

/// Structural rules for execution responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseRules {
    /// Fields that must be present
    pub required_fields: Vec<String>,

    /// Allowed values per field
    pub allowed_values: BTreeMap<String, Vec<Value>>,

    /// Expected JSON type per field
    pub field_types: BTreeMap<String, FieldType>,
}

impl ResponseRules {
    /// Parse rules from a configuration value.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())
    }

    /// Require a field.
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    /// Restrict a field to a set of values.
    pub fn allow(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.allowed_values.insert(field.into(), values);
        self
    }

    /// Check a response against these rules.
    ///
    /// Malformed input is reported as a violation, never as an error.
    pub fn validate(&self, response: &Value) -> ValidationResult {
        let mut result = ValidationResult::ok();

        if !response.is_object() {
            result.add(Violation::NotAnObject { found: FieldType::of(response) });
            return result;
        }

        for field in &self.required_fields {
            if resolve(response, field).is_none() {
                result.add(Violation::MissingField { field: field.clone() });
            }
        }

        for (field, expected) in &self.field_types {
            if let Some(value) = resolve(response, field) {
                let found = FieldType::of(value);
                if found != *expected {
                    result.add(Violation::WrongType {
                        field: field.clone(),
                        expected: *expected,
                        found,
                    });
                }
            }
        }

        for (field, allowed) in &self.allowed_values {
            if let Some(value) = resolve(response, field) {
                if !allowed.contains(value) {
                    result.add(Violation::DisallowedValue {
                        field: field.clone(),
                        value: value.clone(),
                        allowed: allowed.clone(),
                    });
                }
            }
        }

        result
    }
}

fn resolve<'a>(response: &'a Value, field: &str) -> Option<&'a Value> {
    let segments = path::parse(field).ok()?;
    path::lookup(response, &segments)
}

/// A single violated rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    /// The response is not a JSON object
    NotAnObject { found: FieldType },

    /// A required field is absent
    MissingField { field: String },

    /// A field has the wrong JSON type
    WrongType { field: String, expected: FieldType, found: FieldType },

    /// A field holds a value outside its allowed set
    DisallowedValue { field: String, value: Value, allowed: Vec<Value> },

    /// The configured rules themselves could not be read
    InvalidRules { message: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject { found } => write!(f, "response must be an object, got {}", found),
            Self::MissingField { field } => write!(f, "missing required field '{}'", field),
            Self::WrongType { field, expected, found } => {
                write!(f, "field '{}' must be {}, got {}", field, expected, found)
            }
            Self::DisallowedValue { field, value, .. } => {
                write!(f, "field '{}' has disallowed value {}", field, value)
            }
            Self::InvalidRules { message } => write!(f, "validation rules are invalid: {}", message),
        }
    }
}

/// Verdict of a response validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether every rule passed
    pub valid: bool,

    /// Rules that were violated
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    /// Create a passing result.
    pub fn ok() -> Self {
        Self { valid: true, violations: Vec::new() }
    }

    /// Record a violation.
    pub fn add(&mut self, violation: Violation) {
        self.valid = false;
        self.violations.push(violation);
    }

    /// Names of required fields that were missing.
    pub fn missing_fields(&self) -> Vec<&str> {
        self.violations
            .iter()
            .filter_map(|v| match v {
                Violation::MissingField { field } => Some(field.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Human-readable descriptions of every violation.
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}
