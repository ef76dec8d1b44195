use std::sync::Arc;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::checker::RemoteExistenceChecker;
use crate::error::SchemaError;
use crate::input::FormInput;
use crate::report::{ErrorMap, ValidationReport, ValidationResult};
use crate::rules::FieldRule;
use crate::schema::{FieldSpec, Refinement, Schema, SchemaMode};

/// Runs a [`Schema`] against input snapshots.
///
/// Fields of one pass are evaluated concurrently on the calling task; within
/// a field, rules run in order and the first failure wins. Field-level
/// failures are reported in the result, never as errors.
#[derive(Clone)]
pub struct ValidationPipeline {
    schema: Arc<Schema>,
    checker: RemoteExistenceChecker,
}

impl ValidationPipeline {
    pub fn new(schema: Arc<Schema>, checker: RemoteExistenceChecker) -> Self {
        Self { schema, checker }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn checker(&self) -> &RemoteExistenceChecker {
        &self.checker
    }

    pub async fn validate(&self, input: &FormInput) -> ValidationReport {
        let snapshot = input.clone();
        let passes = self.schema.fields().iter().map(|spec| {
            let snapshot = &snapshot;
            async move {
                let result = self.evaluate(spec, snapshot).await;
                (spec.name().to_string(), result)
            }
        });
        let mut report = ValidationReport {
            fields: join_all(passes).await.into_iter().collect(),
            form_errors: Vec::new(),
        };

        match self.schema.refine(&snapshot) {
            Refinement::Pass => {}
            Refinement::Fail(message) => report.form_errors.push(message),
            Refinement::Undecided => {
                tracing::debug!(mode = %self.schema.mode(), "record refinement undecided; not blocking");
            }
        }
        report
    }

    /// Evaluate one field against `input` with `value` substituted for it.
    pub async fn validate_field(
        &self,
        name: &str,
        value: Value,
        input: &FormInput,
    ) -> Result<ValidationResult, SchemaError> {
        let mut snapshot = input.clone();
        snapshot.set(name, value);
        self.evaluate_snapshot(name, &snapshot).await
    }

    /// Evaluate one field against a snapshot that already holds its value.
    pub async fn evaluate_snapshot(
        &self,
        name: &str,
        snapshot: &FormInput,
    ) -> Result<ValidationResult, SchemaError> {
        let spec = self
            .schema
            .field(name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))?;
        Ok(self.evaluate(spec, snapshot).await)
    }

    /// Full pass followed by typed extraction of the record.
    ///
    /// Numeric fields are cast before extraction. A record that passes every
    /// rule but cannot be read as `T` is rejected with a form-level error.
    pub async fn submit<T: DeserializeOwned>(&self, input: &FormInput) -> Submission<T> {
        let snapshot = input.clone();
        let report = self.validate(&snapshot).await;
        if !report.is_valid() {
            return Submission::Rejected(report.errors());
        }
        let cast = self.schema.cast(&snapshot);
        match serde_json::from_value::<T>(cast.into_value()) {
            Ok(record) => Submission::Accepted(record),
            Err(err) => {
                tracing::warn!(error = %err, "validated record does not fit the target type");
                Submission::Rejected(ErrorMap::form_error(format!(
                    "record does not match the expected shape: {}",
                    err
                )))
            }
        }
    }

    async fn evaluate(&self, spec: &FieldSpec, input: &FormInput) -> ValidationResult {
        if self.schema.mode() == SchemaMode::Partial && input.is_absent(spec.name()) {
            return ValidationResult::valid();
        }
        for rule in spec.rules() {
            let passed = match rule.evaluate_sync(input) {
                Some(passed) => passed,
                None => self.field_exists(rule, input).await,
            };
            if !passed {
                return ValidationResult::invalid(rule.message());
            }
        }
        ValidationResult::valid()
    }

    /// Remote half of [`Check::Exists`](crate::rules::Check::Exists), the only
    /// rule `evaluate_sync` defers.
    async fn field_exists(&self, rule: &FieldRule, input: &FormInput) -> bool {
        match input.text(rule.field()) {
            Some(value) => self.checker.check_exists(&value).await,
            None => false,
        }
    }
}

/// Result of a submit trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
    Accepted(T),
    Rejected(ErrorMap),
}

impl<T> Submission<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted(_))
    }

    /// Hand the outcome to the matching external handler.
    pub fn dispatch<R>(
        self,
        accepted: impl FnOnce(T) -> R,
        rejected: impl FnOnce(ErrorMap) -> R,
    ) -> R {
        match self {
            Submission::Accepted(record) => accepted(record),
            Submission::Rejected(errors) => rejected(errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::checker::test_support::ScriptedLookup;
    use crate::lookup_cache::LookupCache;
    use crate::registration::{
        registration_schema, PartialRegistration, Registration, RegistrationLimits, AGE,
        CONFIRM_PASSWORD, MSG_NOT_FOUND, MSG_PASSWORD_MISMATCH, MSG_REQUIRED, PASSWORD,
        POKEMON_FAVORITE, USERNAME,
    };

    fn pipeline(mode: SchemaMode, lookup: Arc<ScriptedLookup>) -> ValidationPipeline {
        let schema = registration_schema(mode, &RegistrationLimits::default()).expect("schema");
        let checker = RemoteExistenceChecker::new(Arc::new(LookupCache::new()), lookup);
        ValidationPipeline::new(Arc::new(schema), checker)
    }

    fn complete_input() -> FormInput {
        FormInput::from_value(json!({
            "username": "a",
            "password": "p",
            "confirmPassword": "p",
            "age": 30,
            "pokemonFavorite": "pikachu",
        }))
        .expect("object")
    }

    #[tokio::test]
    async fn integral_float_age_is_accepted_as_integer() {
        let pipeline = pipeline(
            SchemaMode::Required,
            Arc::new(ScriptedLookup::knowing(&["pikachu"])),
        );
        let input = complete_input().with(AGE, 30.0);
        assert!(pipeline.validate(&input).await.is_valid());
        let record = pipeline
            .submit::<Registration>(&input)
            .await
            .dispatch(Some, |errors| panic!("{:?}", errors))
            .expect("accepted");
        assert_eq!(record.age, 30);
    }

    #[tokio::test]
    async fn numeric_confirmation_does_not_match_text_password() {
        let pipeline = pipeline(
            SchemaMode::Required,
            Arc::new(ScriptedLookup::knowing(&["pikachu"])),
        );
        let input = complete_input()
            .with(PASSWORD, "1")
            .with(CONFIRM_PASSWORD, 1);
        match pipeline.submit::<Registration>(&input).await {
            Submission::Rejected(errors) => {
                assert_eq!(errors.fields[CONFIRM_PASSWORD], MSG_PASSWORD_MISMATCH);
                assert!(errors.form.is_empty());
            }
            Submission::Accepted(record) => panic!("accepted {:?}", record),
        }
    }

    #[tokio::test]
    async fn complete_record_is_accepted() {
        let lookup = Arc::new(ScriptedLookup::knowing(&["pikachu"]));
        let pipeline = pipeline(SchemaMode::Required, lookup.clone());
        let report = pipeline.validate(&complete_input()).await;
        assert!(report.is_valid(), "{:?}", report);
        assert_eq!(report.fields.len(), 5);

        let mut accepted = None;
        pipeline
            .submit::<Registration>(&complete_input())
            .await
            .dispatch(|record| accepted = Some(record), |errors| panic!("{:?}", errors));
        let record = accepted.expect("accepted");
        assert_eq!(record.username, "a");
        assert_eq!(record.age, 30);
        assert_eq!(record.pokemon_favorite, "pikachu");
        // the submit pass reuses the cached lookup
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_pokemon_fails_only_that_field() {
        let lookup = Arc::new(ScriptedLookup::knowing(&["pikachu"]).failing_on("glitch"));
        let pipeline = pipeline(SchemaMode::Required, lookup);

        for value in ["agumon", "glitch"] {
            let input = complete_input().with(POKEMON_FAVORITE, value);
            let report = pipeline.validate(&input).await;
            assert!(!report.is_valid());
            let errors = report.errors();
            assert_eq!(errors.fields.len(), 1, "{value}");
            assert_eq!(errors.fields[POKEMON_FAVORITE], MSG_NOT_FOUND);

            let submission = pipeline.submit::<Registration>(&input).await;
            let rejected = submission.dispatch(|_| None, Some).expect("rejected");
            assert_eq!(rejected.fields.keys().collect::<Vec<_>>(), vec![POKEMON_FAVORITE]);
        }
    }

    #[tokio::test]
    async fn required_rejects_blank_forms_of_absence() {
        let lookup = Arc::new(ScriptedLookup::knowing(&["pikachu"]));
        let pipeline = pipeline(SchemaMode::Required, lookup.clone());

        let mut absent = complete_input();
        absent.remove(USERNAME);
        for input in [
            complete_input().with(USERNAME, ""),
            complete_input().with(USERNAME, "   "),
            complete_input().with(USERNAME, Value::Null),
            absent,
        ] {
            let result = pipeline
                .evaluate_snapshot(USERNAME, &input)
                .await
                .expect("known field");
            assert_eq!(result, ValidationResult::invalid(MSG_REQUIRED));
        }

        let blank_pokemon = complete_input().with(POKEMON_FAVORITE, " ");
        let result = pipeline
            .evaluate_snapshot(POKEMON_FAVORITE, &blank_pokemon)
            .await
            .expect("known field");
        assert_eq!(result, ValidationResult::invalid(MSG_REQUIRED));
        assert_eq!(lookup.calls(), 0, "required short-circuits the remote check");
    }

    #[tokio::test]
    async fn age_bounds_are_inclusive() {
        let pipeline = pipeline(SchemaMode::Required, Arc::new(ScriptedLookup::default()));
        let input = complete_input();
        for (age, valid) in [(20, true), (60, true), (19, false), (61, false)] {
            let result = pipeline
                .validate_field(AGE, json!(age), &input)
                .await
                .expect("known field");
            assert_eq!(result.valid, valid, "age {age}");
        }
        let typed = pipeline
            .validate_field(AGE, json!("45"), &input)
            .await
            .expect("known field");
        assert!(typed.valid);
    }

    #[tokio::test]
    async fn confirmation_follows_current_password() {
        let pipeline = pipeline(SchemaMode::Required, Arc::new(ScriptedLookup::default()));
        let input = complete_input();
        let matching = pipeline
            .evaluate_snapshot(CONFIRM_PASSWORD, &input)
            .await
            .expect("known field");
        assert!(matching.valid);

        let changed = input.clone().with(PASSWORD, "new-secret");
        let stale = pipeline
            .evaluate_snapshot(CONFIRM_PASSWORD, &changed)
            .await
            .expect("known field");
        assert_eq!(stale, ValidationResult::invalid(MSG_PASSWORD_MISMATCH));
    }

    #[tokio::test]
    async fn unknown_field_is_a_schema_error() {
        let pipeline = pipeline(SchemaMode::Required, Arc::new(ScriptedLookup::default()));
        let err = pipeline
            .validate_field("email", json!("a@b.c"), &FormInput::new())
            .await
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("email".into()));
    }

    #[tokio::test]
    async fn partial_schema_skips_absent_fields() {
        let lookup = Arc::new(ScriptedLookup::knowing(&["pikachu"]));
        let required = pipeline(SchemaMode::Required, lookup.clone());
        let partial = pipeline(SchemaMode::Partial, lookup.clone());
        let input = FormInput::new().with(USERNAME, "ash");

        let strict = required.validate(&input).await;
        assert!(!strict.is_valid());
        assert_eq!(strict.errors().fields.len(), 4);

        let lenient = partial.validate(&input).await;
        assert!(lenient.is_valid(), "{:?}", lenient);
        assert!(lenient.form_errors.is_empty(), "undecided refinement never blocks");

        // present but empty still runs the rule set
        let empty = input.clone().with(PASSWORD, "");
        let report = partial.validate(&empty).await;
        assert_eq!(report.errors().fields[PASSWORD], MSG_REQUIRED);
        assert_eq!(lookup.calls(), 0);

        let submission = partial.submit::<PartialRegistration>(&input).await;
        let record = submission
            .dispatch(Some, |errors| panic!("{:?}", errors))
            .expect("accepted");
        assert_eq!(record.username.as_deref(), Some("ash"));
        assert_eq!(record.age, None);
    }

    #[tokio::test]
    async fn slow_remote_check_does_not_hold_back_sync_fields() {
        let gate = Arc::new(Notify::new());
        let lookup = Arc::new(
            ScriptedLookup::knowing(&["slowpoke"])
                .gated("slowpoke", gate.clone())
                .with_delay(Duration::from_millis(1)),
        );
        let pipeline = pipeline(SchemaMode::Required, lookup);
        let input = complete_input().with(POKEMON_FAVORITE, "slowpoke");

        let remote = pipeline.validate_field(POKEMON_FAVORITE, json!("slowpoke"), &input);
        let local = async {
            let result = pipeline.evaluate_snapshot(AGE, &input).await;
            gate.notify_one();
            result
        };
        let (remote, local) = tokio::join!(remote, local);
        assert!(remote.expect("known field").valid);
        assert!(local.expect("known field").valid);
    }

    #[tokio::test]
    async fn failing_refinement_blocks_submission() {
        let schema = Schema::builder(SchemaMode::Required)
            .field(USERNAME, |f| f.required(MSG_REQUIRED))
            .refine(|input| {
                if input.text(USERNAME).as_deref() == Some("root") {
                    Refinement::Fail("reserved username".into())
                } else {
                    Refinement::Pass
                }
            })
            .build()
            .expect("schema");
        let checker = RemoteExistenceChecker::new(
            Arc::new(LookupCache::new()),
            Arc::new(ScriptedLookup::default()),
        );
        let pipeline = ValidationPipeline::new(Arc::new(schema), checker);

        let report = pipeline
            .validate(&FormInput::new().with(USERNAME, "root"))
            .await;
        assert!(report.field(USERNAME).expect("field").valid);
        assert_eq!(report.form_errors, vec!["reserved username".to_string()]);

        let submission = pipeline
            .submit::<serde_json::Map<String, Value>>(&FormInput::new().with(USERNAME, "root"))
            .await;
        assert!(!submission.is_accepted());
    }

    #[tokio::test]
    async fn shape_mismatch_after_validation_is_rejected() {
        let pipeline = pipeline(SchemaMode::Required, Arc::new(ScriptedLookup::knowing(&["pikachu"])));
        let input = complete_input().with(AGE, 30.5);
        let submission = pipeline.submit::<Registration>(&input).await;
        let errors = submission.dispatch(|_| None, Some).expect("rejected");
        assert!(errors.fields.is_empty());
        assert_eq!(errors.form.len(), 1);
    }
}
