//! The per-turn driver.
//!
//! One call to [`Orchestrator::process_input`] is one turn: snapshot the
//! session, classify the input, fan it out to the activated specialists,
//! reconcile their proposals, commit one batch and advance the transcript.

use crate::chaos::{DeterministicRng, OracleOutcome};
use crate::compiler::{CompileRequest, Compiler, CompilerFallback};
use crate::completion::{ApiKey, TextCompletion};
use crate::config::EngineConfig;
use crate::context::ContextBuilder;
use crate::director::Director;
use crate::error::{EngineError, Result};
use crate::ids::{PlayerId, SessionId};
use crate::path::MutationBatch;
use crate::role::Role;
use crate::session::SessionSnapshot;
use crate::specialists::{FallbackReason, Specialist, SpecialistPool};
use crate::store::WorldStore;
use crate::transcript::TranscriptEntry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a turn produced.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub narrative: String,
    pub rich_narrative: String,

    /// Activated roles, in the order the classifier ranked them.
    pub roles: Vec<Role>,

    /// Per role: `None` if the specialist proposed, otherwise why it fell back.
    pub outcomes: BTreeMap<Role, Option<FallbackReason>>,

    /// The batch handed to the store.
    pub mutations: MutationBatch,

    /// Number of paths the store reported written.
    pub committed_paths: usize,

    /// False when the batch write failed; the transcript still advanced.
    pub state_committed: bool,

    pub oracle: Option<OracleOutcome>,

    pub compiler_fallback: Option<CompilerFallback>,
}

/// Drives turns against one store.
pub struct Orchestrator {
    store: Arc<dyn WorldStore>,
    director: Director,
    specialists: SpecialistPool,
    compiler: Compiler,
    history_window: usize,
}

impl Orchestrator {
    /// An orchestrator with default timeouts and a thread-local dice source.
    pub fn new(store: Arc<dyn WorldStore>, completion: Arc<dyn TextCompletion>) -> Self {
        let config = EngineConfig::default();
        Self {
            store,
            director: Director::new(completion.clone()),
            specialists: SpecialistPool::new(completion.clone()),
            compiler: Compiler::new(completion),
            history_window: config.history_window,
        }
        .with_config(&config)
    }

    /// Apply timeouts, history window and conflict policy from `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.director = self
            .director
            .with_timeout(config.classifier_timeout)
            .with_history_window(config.history_window);
        self.specialists = self.specialists.with_timeout(config.specialist_timeout);
        self.compiler = self
            .compiler
            .with_timeout(config.compiler_timeout)
            .with_policy(config.conflict_policy);
        self.history_window = config.history_window;
        self
    }

    /// Dice source for the oracle.
    pub fn with_rng(mut self, rng: Arc<dyn DeterministicRng>) -> Self {
        self.compiler = self.compiler.with_rng(rng);
        self
    }

    /// Replace the built-in specialist for its role.
    pub fn with_specialist(mut self, specialist: Arc<dyn Specialist>) -> Self {
        self.specialists = self.specialists.with_specialist(specialist);
        self
    }

    pub fn store(&self) -> &Arc<dyn WorldStore> {
        &self.store
    }

    /// Run one turn for `player` in `session`.
    ///
    /// Only a missing session or a transcript write failure is an error;
    /// everything else degrades to a fallback and the participant still
    /// gets a narrative.
    #[tracing::instrument(skip_all, fields(session = %session, player = %player))]
    pub async fn process_input(
        &self,
        session: &SessionId,
        player: &PlayerId,
        credential: &ApiKey,
        input: &str,
    ) -> Result<TurnResult> {
        let raw = self
            .store
            .read_session(session)
            .await?
            .ok_or_else(|| EngineError::NotFound(session.clone()))?;
        let snapshot = SessionSnapshot::from_value(session.clone(), raw);

        let classification = self.director.classify(credential, input, &snapshot).await;
        let roles = classification.roles.clone();

        let reference = if roles.contains(&Role::CharacterCreation) {
            self.system_reference(&snapshot).await
        } else {
            None
        };

        let builder = ContextBuilder::new(&snapshot, player)
            .with_reference(reference.as_ref())
            .with_history_window(self.history_window);
        let contexts = builder.build(&roles);

        let outcomes = self
            .specialists
            .run_all(credential, input, session, player, &contexts)
            .await;

        let compiler_context = builder.for_compiler();
        let compiled = self
            .compiler
            .compile(
                credential,
                &CompileRequest {
                    input,
                    snapshot: &snapshot,
                    context: &compiler_context,
                    outcomes: &outcomes,
                    oracle_requested: classification.oracle_requested(),
                },
            )
            .await;

        let (mutations, late_discards) = compiled
            .mutations
            .rebased(session)
            .without_ancestor_conflicts(self.compiler.policy());
        if !late_discards.is_empty() {
            tracing::warn!(?late_discards, "conflicts survived compilation");
        }

        let (committed_paths, state_committed) = match self.store.apply_batch(&mutations).await {
            Ok(written) => (written, true),
            Err(e) => {
                tracing::error!(error = %e, paths = mutations.len(), "batch write failed");
                (0, false)
            }
        };

        self.store
            .append_transcript(session, &TranscriptEntry::from_player(player, input))
            .await?;
        self.store
            .append_transcript(
                session,
                &TranscriptEntry::from_narrator(
                    compiled.narrative.clone(),
                    Some(compiled.rich_narrative.clone()),
                ),
            )
            .await?;

        tracing::info!(
            roles = ?roles,
            committed_paths,
            state_committed,
            "turn complete"
        );

        Ok(TurnResult {
            narrative: compiled.narrative,
            rich_narrative: compiled.rich_narrative,
            roles,
            outcomes: outcomes
                .into_iter()
                .map(|(role, outcome)| (role, outcome.fallback))
                .collect(),
            mutations,
            committed_paths,
            state_committed,
            oracle: compiled.oracle,
            compiler_fallback: compiled.fallback,
        })
    }

    /// `global/<system>`, if the session names a system and the read works.
    async fn system_reference(&self, snapshot: &SessionSnapshot) -> Option<Value> {
        let system = snapshot.metadata.system.trim();
        if system.is_empty() {
            return None;
        }
        match self.store.read_global(system).await {
            Ok(reference) => reference,
            Err(e) => {
                tracing::warn!(error = %e, system, "could not read system reference");
                None
            }
        }
    }
}
