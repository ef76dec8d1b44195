//! Edit sessions with stale-response discard.
//!
//! Every evaluation of a field is tagged with a monotonically increasing
//! [`ValidationToken`]. A result is only applied to the displayed state when
//! its token is still the latest one issued for that field, so an older pass
//! that completes late can never overwrite a newer one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SchemaError;
use crate::input::FormInput;
use crate::pipeline::{Submission, ValidationPipeline};
use crate::report::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ValidationToken(u64);

impl ValidationToken {
    /// No evaluation has been started.
    pub const NONE: Self = Self(0);

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ValidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Discarded; `current` is the newer token that superseded it.
    Stale { current: ValidationToken },
}

/// Displayed per-field results plus the latest token for each field.
#[derive(Debug, Default)]
pub struct FieldStates {
    next: u64,
    latest: HashMap<String, ValidationToken>,
    displayed: BTreeMap<String, ValidationResult>,
    stale_discarded: u64,
}

impl FieldStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a token for a new evaluation of `field`, superseding older ones.
    pub fn start(&mut self, field: &str) -> ValidationToken {
        self.next += 1;
        let token = ValidationToken(self.next);
        self.latest.insert(field.to_string(), token);
        token
    }

    pub fn current(&self, field: &str) -> ValidationToken {
        self.latest
            .get(field)
            .copied()
            .unwrap_or(ValidationToken::NONE)
    }

    pub fn apply(
        &mut self,
        field: &str,
        token: ValidationToken,
        result: ValidationResult,
    ) -> ApplyOutcome {
        let current = self.current(field);
        if token != current {
            self.stale_discarded += 1;
            tracing::trace!(field, %token, %current, "discarding stale validation result");
            return ApplyOutcome::Stale { current };
        }
        self.displayed.insert(field.to_string(), result);
        ApplyOutcome::Applied
    }

    pub fn displayed(&self, field: &str) -> Option<&ValidationResult> {
        self.displayed.get(field)
    }

    pub fn snapshot(&self) -> BTreeMap<String, ValidationResult> {
        self.displayed.clone()
    }

    pub fn stale_discarded(&self) -> u64 {
        self.stale_discarded
    }
}

#[derive(Default)]
struct SessionState {
    input: FormInput,
    fields: FieldStates,
}

/// Live form state driven by user edits.
///
/// Owns the current record and the displayed results. Concurrent edits are
/// allowed; each one evaluates against its own snapshot and only the latest
/// evaluation per field reaches the displayed state.
pub struct FormSession {
    pipeline: ValidationPipeline,
    state: Mutex<SessionState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub field: String,
    pub token: ValidationToken,
    pub result: ValidationResult,
    pub outcome: ApplyOutcome,
}

impl FormSession {
    pub fn new(pipeline: ValidationPipeline) -> Self {
        Self::with_input(pipeline, FormInput::new())
    }

    pub fn with_input(pipeline: ValidationPipeline, input: FormInput) -> Self {
        Self {
            pipeline,
            state: Mutex::new(SessionState {
                input,
                fields: FieldStates::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an edit and re-evaluate the field plus every field that reads
    /// it.
    pub async fn edit(&self, name: &str, value: Value) -> Result<Vec<FieldUpdate>, SchemaError> {
        let schema = self.pipeline.schema();
        if schema.field(name).is_none() {
            return Err(SchemaError::UnknownField(name.to_string()));
        }

        let (snapshot, started) = {
            let mut state = self.state();
            state.input.set(name, value);
            let snapshot = state.input.clone();
            let mut affected = vec![name.to_string()];
            affected.extend(schema.dependents(name).into_iter().map(str::to_string));
            let started: Vec<(String, ValidationToken)> = affected
                .into_iter()
                .map(|field| {
                    let token = state.fields.start(&field);
                    (field, token)
                })
                .collect();
            (snapshot, started)
        };

        let passes = started.into_iter().map(|(field, token)| {
            let snapshot = &snapshot;
            async move {
                let result = self.pipeline.evaluate_snapshot(&field, snapshot).await;
                (field, token, result)
            }
        });
        let finished = join_all(passes).await;

        let mut state = self.state();
        let mut updates = Vec::with_capacity(finished.len());
        for (field, token, result) in finished {
            let result = result?;
            let outcome = state.fields.apply(&field, token, result.clone());
            updates.push(FieldUpdate {
                field,
                token,
                result,
                outcome,
            });
        }
        Ok(updates)
    }

    pub fn input(&self) -> FormInput {
        self.state().input.clone()
    }

    pub fn results(&self) -> BTreeMap<String, ValidationResult> {
        self.state().fields.snapshot()
    }

    pub fn result(&self, field: &str) -> Option<ValidationResult> {
        self.state().fields.displayed(field).cloned()
    }

    pub fn stale_discarded(&self) -> u64 {
        self.state().fields.stale_discarded()
    }

    /// Submit the current record.
    pub async fn submit<T: DeserializeOwned>(&self) -> Submission<T> {
        let snapshot = self.input();
        self.pipeline.submit(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::checker::test_support::ScriptedLookup;
    use crate::checker::RemoteExistenceChecker;
    use crate::lookup_cache::LookupCache;
    use crate::registration::{
        registration_schema, Registration, RegistrationLimits, CONFIRM_PASSWORD, MSG_NOT_FOUND,
        MSG_PASSWORD_MISMATCH, PASSWORD, POKEMON_FAVORITE,
    };
    use crate::schema::SchemaMode;

    fn session(lookup: Arc<ScriptedLookup>) -> FormSession {
        let schema = registration_schema(SchemaMode::Required, &RegistrationLimits::default())
            .expect("schema");
        let checker = RemoteExistenceChecker::new(Arc::new(LookupCache::new()), lookup);
        FormSession::new(ValidationPipeline::new(Arc::new(schema), checker))
    }

    #[test]
    fn tokens_are_monotonic_and_per_field() {
        let mut states = FieldStates::new();
        assert_eq!(states.current("age"), ValidationToken::NONE);
        let first = states.start("age");
        let other = states.start("username");
        let second = states.start("age");
        assert!(first < other && other < second);
        assert_eq!(states.current("age"), second);
        assert_eq!(states.current("username"), other);

        assert_eq!(
            states.apply("age", first, ValidationResult::valid()),
            ApplyOutcome::Stale { current: second }
        );
        assert!(states.displayed("age").is_none());
        assert_eq!(
            states.apply("age", second, ValidationResult::invalid("range")),
            ApplyOutcome::Applied
        );
        assert_eq!(
            states.apply("username", other, ValidationResult::valid()),
            ApplyOutcome::Applied
        );
        assert_eq!(states.stale_discarded(), 1);
        assert_eq!(states.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn late_result_for_superseded_value_is_discarded() {
        let gate = Arc::new(Notify::new());
        let lookup = Arc::new(
            ScriptedLookup::knowing(&["slowpoke"]).gated("slowpoke", gate.clone()),
        );
        let session = session(lookup.clone());

        let first = session.edit(POKEMON_FAVORITE, json!("slowpoke"));
        let second = async {
            let updates = session.edit(POKEMON_FAVORITE, json!("agumon")).await;
            gate.notify_one();
            updates
        };
        let (first, second) = tokio::join!(first, second);

        let first = first.expect("known field");
        let second = second.expect("known field");
        assert!(first[0].result.valid, "slowpoke exists");
        assert!(matches!(first[0].outcome, ApplyOutcome::Stale { .. }));
        assert_eq!(second[0].outcome, ApplyOutcome::Applied);

        assert_eq!(
            session.result(POKEMON_FAVORITE),
            Some(ValidationResult::invalid(MSG_NOT_FOUND))
        );
        assert_eq!(session.stale_discarded(), 1);
        assert_eq!(lookup.seen(), vec!["slowpoke", "agumon"]);
    }

    #[tokio::test]
    async fn editing_password_revalidates_confirmation() {
        let session = session(Arc::new(ScriptedLookup::default()));
        session.edit(PASSWORD, json!("p")).await.expect("edit");
        session.edit(CONFIRM_PASSWORD, json!("p")).await.expect("edit");
        assert_eq!(session.result(CONFIRM_PASSWORD), Some(ValidationResult::valid()));

        let updates = session.edit(PASSWORD, json!("q")).await.expect("edit");
        let fields: Vec<_> = updates.iter().map(|u| u.field.as_str()).collect();
        assert_eq!(fields, vec![PASSWORD, CONFIRM_PASSWORD]);
        assert_eq!(
            session.result(CONFIRM_PASSWORD),
            Some(ValidationResult::invalid(MSG_PASSWORD_MISMATCH))
        );
    }

    #[tokio::test]
    async fn unknown_field_edit_is_rejected_without_mutation() {
        let session = session(Arc::new(ScriptedLookup::default()));
        let err = session.edit("email", json!("x")).await.unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("email".into()));
        assert_eq!(session.input(), FormInput::new());
    }

    #[tokio::test]
    async fn submit_uses_current_record() {
        let session = session(Arc::new(ScriptedLookup::knowing(&["pikachu"])));
        for (field, value) in [
            ("username", json!("a")),
            ("password", json!("p")),
            ("confirmPassword", json!("p")),
            ("age", json!("30")),
            ("pokemonFavorite", json!("pikachu")),
        ] {
            session.edit(field, value).await.expect("edit");
        }
        assert!(session.results().values().all(|r| r.valid));
        let record = session
            .submit::<Registration>()
            .await
            .dispatch(Some, |errors| panic!("{:?}", errors))
            .expect("accepted");
        assert_eq!(record.age, 30);
    }
}
