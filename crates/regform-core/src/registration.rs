//! The registration form: five fields, one of them checked remotely.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::schema::{Refinement, Schema, SchemaMode};

pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const CONFIRM_PASSWORD: &str = "confirmPassword";
pub const AGE: &str = "age";
pub const POKEMON_FAVORITE: &str = "pokemonFavorite";

pub const MSG_REQUIRED: &str = "required";
pub const MSG_PASSWORD_MISMATCH: &str = "passwords do not match";
pub const MSG_NOT_FOUND: &str = "pokemon not found";

pub const DEFAULT_MIN_AGE: u32 = 20;
pub const DEFAULT_MAX_AGE: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationLimits {
    pub min_age: u32,
    pub max_age: u32,
}

impl Default for RegistrationLimits {
    fn default() -> Self {
        Self {
            min_age: DEFAULT_MIN_AGE,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

/// Build the registration schema for `mode`.
///
/// Both variants declare the same fields and rules. The partial variant also
/// carries a record-level refinement that only observes the record and never
/// reaches a verdict.
pub fn registration_schema(
    mode: SchemaMode,
    limits: &RegistrationLimits,
) -> Result<Schema, SchemaError> {
    let age_message = format!(
        "age must be between {} and {}",
        limits.min_age, limits.max_age
    );
    let builder = Schema::builder(mode)
        .field(USERNAME, |f| f.required(MSG_REQUIRED))
        .field(PASSWORD, |f| f.required(MSG_REQUIRED))
        .field(CONFIRM_PASSWORD, |f| {
            f.required(MSG_REQUIRED)
                .matches(PASSWORD, MSG_PASSWORD_MISMATCH)
        })
        .field(AGE, |f| {
            f.required(MSG_REQUIRED).range(
                f64::from(limits.min_age),
                f64::from(limits.max_age),
                age_message,
            )
        })
        .field(POKEMON_FAVORITE, |f| f.required(MSG_REQUIRED).exists(MSG_NOT_FOUND));

    let builder = match mode {
        SchemaMode::Required => builder,
        SchemaMode::Partial => builder.refine(|input| {
            tracing::debug!(fields = ?input.names().collect::<Vec<_>>(), "partial record");
            Refinement::Undecided
        }),
    };
    builder.build()
}

/// Record handed to the accepted handler under the required schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub age: u32,
    pub pokemon_favorite: String,
}

/// Record handed to the accepted handler under the partial schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRegistration {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub confirm_password: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub pokemon_favorite: Option<String>,
}
