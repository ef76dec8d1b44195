//! Asynchronous validation engine for the registration form.
//!
//! The engine evaluates a [`Schema`] of per-field rules against snapshots of
//! raw input. One rule kind needs a remote existence check; those checks go
//! through a [`RemoteExistenceChecker`] that memoizes results in a
//! [`LookupCache`] and collapses concurrent checks of the same value into a
//! single request.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use regform_core::{EngineConfig, FormInput, Registration};
//!
//! let pipeline = EngineConfig::default().build_pipeline()?;
//! let input = FormInput::new()
//!     .with("username", "ash")
//!     .with("password", "p")
//!     .with("confirmPassword", "p")
//!     .with("age", 30)
//!     .with("pokemonFavorite", "pikachu");
//! let report = pipeline.validate(&input).await;
//! assert!(report.is_valid());
//! let accepted = pipeline.submit::<Registration>(&input).await.is_accepted();
//! # let _ = accepted;
//! # Ok(())
//! # }
//! ```

mod checker;
mod config;
mod error;
mod input;
mod lookup_cache;
mod pipeline;
pub mod registration;
mod report;
mod rules;
mod schema;
pub mod session;
mod singleflight;

pub use checker::{ExistenceLookup, HttpLookup, RemoteExistenceChecker, DEFAULT_LOOKUP_URL};
pub use config::{
    config_schema_json, load_config, parse_config, EngineConfig, LookupConfig, SchemaConfig,
    ENV_LOOKUP_URL, ENV_SCHEMA_MODE,
};
pub use error::{LookupError, SchemaError};
pub use input::FormInput;
pub use lookup_cache::{Flight, FlightTicket, LookupCache, LookupCacheStats};
pub use pipeline::{Submission, ValidationPipeline};
pub use registration::{
    registration_schema, PartialRegistration, Registration, RegistrationLimits,
};
pub use report::{ErrorMap, ValidationReport, ValidationResult};
pub use rules::{Check, FieldRule, Predicate, RuleKind};
pub use schema::{
    FieldRules, FieldSpec, Refinement, RefinementFn, Schema, SchemaBuilder, SchemaMode,
};
pub use session::{ApplyOutcome, FieldStates, FieldUpdate, FormSession, ValidationToken};
pub use singleflight::FlightWaiter;
