/// Configuration mistakes in a schema definition.
///
/// These are raised by [`crate::SchemaBuilder::build`] and by lookups of
/// field names the schema does not declare. Field-level validation failures
/// are never reported through this type.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("field name must not be empty")]
    EmptyFieldName,
    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),
    #[error("field `{0}` has no rules")]
    NoRules(String),
    #[error("field `{field}` references unknown field `{other}`")]
    UnknownReference { field: String, other: String },
    #[error("field `{0}` cannot reference itself")]
    SelfReference(String),
    #[error("field `{field}` has an invalid range [{min}, {max}]")]
    InvalidRange { field: String, min: f64, max: f64 },
    #[error("unknown field `{0}`")]
    UnknownField(String),
}

/// Transport failures of an existence lookup.
///
/// The checker normalizes every variant to "does not exist"; the type only
/// exists so transports can report what happened for logging.
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("invalid lookup url: {0}")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status: {0}")]
    Status(u16),
}
