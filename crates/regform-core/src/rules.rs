use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::input::FormInput;

/// Custom synchronous predicate. Receives the whole snapshot and the name of
/// the field being checked.
pub type Predicate = Arc<dyn Fn(&FormInput, &str) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Sync,
    Async,
}

/// What a rule checks.
#[derive(Clone)]
pub enum Check {
    /// Rejects absent, null, empty and whitespace-only values.
    Required,
    /// Inclusive numeric bounds. Non-numeric values fail.
    Range { min: f64, max: f64 },
    /// Equal to the value of `other` in the same snapshot.
    Matches { other: String },
    /// The value exists according to the remote existence checker.
    Exists,
    Custom(Predicate),
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Required => f.write_str("Required"),
            Check::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            Check::Matches { other } => f.debug_struct("Matches").field("other", other).finish(),
            Check::Exists => f.write_str("Exists"),
            Check::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A single rule bound to a field. Immutable once the schema is built.
#[derive(Debug, Clone)]
pub struct FieldRule {
    field: String,
    check: Check,
    message: String,
}

impl FieldRule {
    pub fn new(field: impl Into<String>, check: Check, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            check,
            message: message.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn check(&self) -> &Check {
        &self.check
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> RuleKind {
        match self.check {
            Check::Exists => RuleKind::Async,
            _ => RuleKind::Sync,
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self.check, Check::Required)
    }

    /// Field referenced by a cross-field rule.
    pub fn reference(&self) -> Option<&str> {
        match &self.check {
            Check::Matches { other } => Some(other),
            _ => None,
        }
    }

    /// Evaluate a synchronous rule against `input`. Returns `None` only for
    /// [`Check::Exists`], which the pipeline resolves through the checker.
    pub fn evaluate_sync(&self, input: &FormInput) -> Option<bool> {
        let passed = match &self.check {
            Check::Required => !input.is_blank(&self.field),
            Check::Range { min, max } => input
                .number(&self.field)
                .map(|n| n >= *min && n <= *max)
                .unwrap_or(false),
            Check::Matches { other } => match input.get(&self.field) {
                None | Some(Value::Null) => true,
                Some(value) => input.get(other) == Some(value),
            },
            Check::Custom(predicate) => predicate(input, &self.field),
            Check::Exists => return None,
        };
        Some(passed)
    }
}
