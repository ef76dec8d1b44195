use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::checker::{HttpLookup, RemoteExistenceChecker, DEFAULT_LOOKUP_URL};
use crate::lookup_cache::LookupCache;
use crate::pipeline::ValidationPipeline;
use crate::registration::{
    registration_schema, RegistrationLimits, DEFAULT_MAX_AGE, DEFAULT_MIN_AGE,
};
use crate::schema::SchemaMode;

pub const ENV_LOOKUP_URL: &str = "REGFORM_LOOKUP_URL";
pub const ENV_SCHEMA_MODE: &str = "REGFORM_SCHEMA_MODE";

fn default_lookup_url() -> String {
    DEFAULT_LOOKUP_URL.to_string()
}

fn default_min_age() -> u32 {
    DEFAULT_MIN_AGE
}

fn default_max_age() -> u32 {
    DEFAULT_MAX_AGE
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct LookupConfig {
    /// Base URL of the existence endpoint; the candidate value is appended
    /// as the last path segment.
    #[serde(default = "default_lookup_url")]
    pub base_url: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url: default_lookup_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SchemaConfig {
    /// "required" (default) or "partial".
    #[serde(default)]
    pub mode: SchemaMode,
    /// Inclusive lower age bound.
    #[serde(default = "default_min_age")]
    pub min_age: u32,
    /// Inclusive upper age bound.
    #[serde(default = "default_max_age")]
    pub max_age: u32,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            mode: SchemaMode::default(),
            min_age: DEFAULT_MIN_AGE,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EngineConfig {
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema_value = config_schema_json();
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration file.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(EngineConfig);
    serde_json::to_value(&schema).expect("schema json")
}

/// Parse and validate a TOML configuration document.
pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: EngineConfig = toml::from_str(content)?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config {}", path.display()))
}

impl EngineConfig {
    /// Apply `REGFORM_*` environment overrides. Unparseable values are
    /// logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(ENV_LOOKUP_URL) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.lookup.base_url = trimmed.to_string();
            }
        }
        if let Ok(raw) = std::env::var(ENV_SCHEMA_MODE) {
            match raw.parse::<SchemaMode>() {
                Ok(mode) => self.schema.mode = mode,
                Err(err) => {
                    tracing::warn!(
                        "invalid {} '{}' ({}); keeping {}",
                        ENV_SCHEMA_MODE,
                        raw,
                        err,
                        self.schema.mode
                    );
                }
            }
        }
    }

    pub fn limits(&self) -> RegistrationLimits {
        RegistrationLimits {
            min_age: self.schema.min_age,
            max_age: self.schema.max_age,
        }
    }

    /// Wire a pipeline with a fresh session cache and the HTTP transport.
    pub fn build_pipeline(&self) -> Result<ValidationPipeline> {
        let schema = registration_schema(self.schema.mode, &self.limits())
            .context("building registration schema")?;
        let lookup = HttpLookup::new(&self.lookup.base_url).context("configuring lookup")?;
        let checker = RemoteExistenceChecker::new(Arc::new(LookupCache::new()), Arc::new(lookup));
        Ok(ValidationPipeline::new(Arc::new(schema), checker))
    }
}
