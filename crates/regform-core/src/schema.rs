use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;
use crate::input::FormInput;
use crate::rules::{Check, FieldRule, Predicate};

/// Which variant of a schema is active.
///
/// `Required` applies every rule set. `Partial` skips the rule set of any
/// field that is absent (missing or null) from the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    #[default]
    Required,
    Partial,
}

impl SchemaMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaMode::Required => "required",
            SchemaMode::Partial => "partial",
        }
    }
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "required" | "strict" => Ok(SchemaMode::Required),
            "partial" | "optional" => Ok(SchemaMode::Partial),
            other => Err(format!("unknown schema mode '{}'", other)),
        }
    }
}

/// Outcome of a record-level refinement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refinement {
    Pass,
    Fail(String),
    /// The refinement reached no verdict. Never blocks submission.
    Undecided,
}

pub type RefinementFn = Arc<dyn Fn(&FormInput) -> Refinement + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    rules: Vec<FieldRule>,
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rules in evaluation order; required checks come first.
    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    fn is_numeric(&self) -> bool {
        self.rules
            .iter()
            .any(|rule| matches!(rule.check(), Check::Range { .. }))
    }
}

/// Ordered field name → ordered rules. Built once through [`SchemaBuilder`]
/// and never mutated afterwards.
#[derive(Clone)]
pub struct Schema {
    mode: SchemaMode,
    fields: Vec<FieldSpec>,
    refinement: Option<RefinementFn>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("mode", &self.mode)
            .field("fields", &self.fields)
            .field("refinement", &self.refinement.is_some())
            .finish()
    }
}

impl Schema {
    pub fn builder(mode: SchemaMode) -> SchemaBuilder {
        SchemaBuilder {
            mode,
            fields: Vec::new(),
            refinement: None,
        }
    }

    pub fn mode(&self) -> SchemaMode {
        self.mode
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(FieldSpec::name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    pub fn rules(&self, name: &str) -> Result<&[FieldRule], SchemaError> {
        self.field(name)
            .map(FieldSpec::rules)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))
    }

    /// Fields whose rules read `name`, i.e. that must be re-evaluated when
    /// `name` changes.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|spec| spec.rules.iter().any(|rule| rule.reference() == Some(name)))
            .map(FieldSpec::name)
            .collect()
    }

    /// Copy of `input` with numeric strings and integral floats of numeric
    /// fields normalized to JSON numbers. Other values pass through untouched.
    pub fn cast(&self, input: &FormInput) -> FormInput {
        let mut out = input.clone();
        for spec in self.fields.iter().filter(|spec| spec.is_numeric()) {
            match input.get(&spec.name) {
                Some(Value::String(_)) => {}
                Some(Value::Number(n)) if n.is_f64() => {}
                _ => continue,
            }
            if let Some(number) = input.number(&spec.name) {
                out.set(&spec.name, number_value(number));
            }
        }
        out
    }

    pub fn refine(&self, input: &FormInput) -> Refinement {
        match &self.refinement {
            Some(refinement) => refinement(input),
            None => Refinement::Pass,
        }
    }
}

fn number_value(number: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if number.fract() == 0.0 && number.abs() < MAX_EXACT {
        Value::from(number as i64)
    } else {
        Value::from(number)
    }
}

/// Collects the rules of one field, in declaration order.
pub struct FieldRules {
    name: String,
    rules: Vec<FieldRule>,
}

impl FieldRules {
    fn push(mut self, check: Check, message: impl Into<String>) -> Self {
        self.rules
            .push(FieldRule::new(self.name.clone(), check, message));
        self
    }

    pub fn required(self, message: impl Into<String>) -> Self {
        self.push(Check::Required, message)
    }

    pub fn range(self, min: f64, max: f64, message: impl Into<String>) -> Self {
        self.push(Check::Range { min, max }, message)
    }

    pub fn matches(self, other: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(
            Check::Matches {
                other: other.into(),
            },
            message,
        )
    }

    pub fn exists(self, message: impl Into<String>) -> Self {
        self.push(Check::Exists, message)
    }

    pub fn custom<F>(self, message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&FormInput, &str) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate = Arc::new(predicate);
        self.push(Check::Custom(predicate), message)
    }
}

pub struct SchemaBuilder {
    mode: SchemaMode,
    fields: Vec<FieldRules>,
    refinement: Option<RefinementFn>,
}

impl SchemaBuilder {
    pub fn field<F>(mut self, name: impl Into<String>, rules: F) -> Self
    where
        F: FnOnce(FieldRules) -> FieldRules,
    {
        let name = name.into();
        self.fields.push(rules(FieldRules {
            name,
            rules: Vec::new(),
        }));
        self
    }

    pub fn refine<F>(mut self, refinement: F) -> Self
    where
        F: Fn(&FormInput) -> Refinement + Send + Sync + 'static,
    {
        self.refinement = Some(Arc::new(refinement));
        self
    }

    /// Validate the definition and freeze it.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(SchemaError::EmptyFieldName);
            }
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            if field.rules.is_empty() {
                return Err(SchemaError::NoRules(field.name.clone()));
            }
        }

        for field in &self.fields {
            for rule in &field.rules {
                match rule.check() {
                    Check::Matches { other } if other == &field.name => {
                        return Err(SchemaError::SelfReference(field.name.clone()));
                    }
                    Check::Matches { other } if !names.contains(other.as_str()) => {
                        return Err(SchemaError::UnknownReference {
                            field: field.name.clone(),
                            other: other.clone(),
                        });
                    }
                    Check::Range { min, max }
                        if !min.is_finite() || !max.is_finite() || min > max =>
                    {
                        return Err(SchemaError::InvalidRange {
                            field: field.name.clone(),
                            min: *min,
                            max: *max,
                        });
                    }
                    _ => {}
                }
            }
        }

        let fields = self
            .fields
            .into_iter()
            .map(|field| {
                let (mut rules, rest): (Vec<_>, Vec<_>) =
                    field.rules.into_iter().partition(FieldRule::is_required);
                rules.extend(rest);
                FieldSpec {
                    name: field.name,
                    rules,
                }
            })
            .collect();

        Ok(Schema {
            mode: self.mode,
            fields,
            refinement: self.refinement,
        })
    }
}
