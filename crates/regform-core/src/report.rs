use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-field verdict handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Results of one full evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub fields: BTreeMap<String, ValidationResult>,
    /// Record-level failures that belong to no single field.
    pub form_errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.form_errors.is_empty() && self.fields.values().all(ValidationResult::is_valid)
    }

    pub fn field(&self, name: &str) -> Option<&ValidationResult> {
        self.fields.get(name)
    }

    pub fn errors(&self) -> ErrorMap {
        ErrorMap {
            fields: self
                .fields
                .iter()
                .filter(|(_, result)| !result.valid)
                .map(|(name, result)| (name.clone(), result.message.clone().unwrap_or_default()))
                .collect(),
            form: self.form_errors.clone(),
        }
    }
}

/// Aggregated failures passed to the "rejected" handler on submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorMap {
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub form: Vec<String>,
}

impl ErrorMap {
    pub fn form_error(message: impl Into<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            form: vec![message.into()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.form.is_empty()
    }
}
