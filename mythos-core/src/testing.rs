//! Testing utilities.
//!
//! This module provides tools for tests that must not touch the network:
//! - `ScriptedCompletion` answers prompts from a script and records them
//! - `SequenceRng` and `FixedRng` make oracle draws deterministic
//! - `TestHarness` wires an in-memory store, an orchestrator and a seeded session
//! - Assertion helpers for checking a turn's writes

use crate::chaos::DeterministicRng;
use crate::completion::{ApiKey, CompletionError, TextCompletion};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::ids::{PlayerId, SessionId};
use crate::orchestrator::{Orchestrator, TurnResult};
use crate::path::{MutationBatch, StorePath};
use crate::role::Role;
use crate::session::SessionSnapshot;
use crate::store::{MemoryStore, WorldStore};
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Scripted completion
// ============================================================================

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail,
}

/// A [`TextCompletion`] that answers from a script.
///
/// Each rule pairs a marker with a reply; the first rule whose marker occurs
/// in the prompt wins. Prompts that match nothing fail as unavailable.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    rules: Vec<(String, Reply)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer prompts containing `marker` with `reply`.
    pub fn on(mut self, marker: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((marker.into(), Reply::Text(reply.into())));
        self
    }

    /// Fail prompts containing `marker`.
    pub fn fail_on(mut self, marker: impl Into<String>) -> Self {
        self.rules.push((marker.into(), Reply::Fail));
        self
    }

    /// Wait this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every prompt received so far, in order.
    pub fn calls(&self) -> Vec<String> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl TextCompletion for ScriptedCompletion {
    async fn complete(
        &self,
        _credential: &ApiKey,
        prompt: &str,
    ) -> Result<String, CompletionError> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(prompt.to_string()),
            Err(poisoned) => poisoned.into_inner().push(prompt.to_string()),
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail) => Err(CompletionError::Unavailable("scripted failure".into())),
            None => Err(CompletionError::Unavailable("no scripted reply".into())),
        }
    }
}

// ============================================================================
// Dice
// ============================================================================

/// Returns queued values in order, clamped into the requested range.
///
/// Once the queue is empty every draw returns the range minimum.
#[derive(Debug, Default)]
pub struct SequenceRng {
    values: Mutex<VecDeque<u32>>,
}

impl SequenceRng {
    pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }
}

impl DeterministicRng for SequenceRng {
    fn next_u32_range(&self, min: u32, max: u32) -> u32 {
        let next = match self.values.lock() {
            Ok(mut values) => values.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.map(|v| v.clamp(min, max.max(min))).unwrap_or(min)
    }
}

/// Always returns the same value, clamped into the requested range.
#[derive(Debug, Clone, Copy)]
pub struct FixedRng(pub u32);

impl DeterministicRng for FixedRng {
    fn next_u32_range(&self, min: u32, max: u32) -> u32 {
        self.0.clamp(min, max.max(min))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Session every harness starts from unless told otherwise.
pub fn sample_session() -> Value {
    json!({
        "metadata": {
            "campaignName": "Test Campaign",
            "tone": "grim",
            "playerMode": "solo",
            "system": "pf2e"
        },
        "gameState": {
            "currentLocationId": "location_start",
            "chaosFactor": 5,
            "combat": {"inCombat": false}
        },
        "players": {
            "u1": {
                "characterName": "Ayla",
                "level": 1,
                "experience": 0,
                "inventory": {"items": {}, "currency": {"gold": 10}}
            }
        },
        "world": {
            "locations": {"location_start": {"name": "Crossroads Inn"}}
        },
        "npcs": {
            "npc_mira0001": {
                "name": "Mira",
                "locationId": "location_start",
                "disposition": "wary"
            }
        }
    })
}

/// Test harness for running turns against an in-memory store.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub completion: Arc<ScriptedCompletion>,
    pub orchestrator: Orchestrator,
    pub session: SessionId,
    pub player: PlayerId,
    credential: ApiKey,
}

impl TestHarness {
    /// A harness over [`sample_session`] as session `S1`, player `u1`.
    pub async fn new(completion: ScriptedCompletion) -> Result<Self> {
        Self::with_session(completion, sample_session()).await
    }

    /// A harness over custom session data.
    pub async fn with_session(completion: ScriptedCompletion, data: Value) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let session = SessionId::from("S1");
        store.create_session(&session, data).await?;
        let completion = Arc::new(completion);
        let orchestrator = Orchestrator::new(store.clone(), completion.clone());
        Ok(Self {
            store,
            completion,
            orchestrator,
            session,
            player: PlayerId::from("u1"),
            credential: ApiKey::from("test-key"),
        })
    }

    pub fn with_rng(mut self, rng: impl DeterministicRng + 'static) -> Self {
        self.orchestrator = self.orchestrator.with_rng(Arc::new(rng));
        self
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.orchestrator = self.orchestrator.with_config(config);
        self
    }

    pub fn as_player(mut self, player: impl Into<PlayerId>) -> Self {
        self.player = player.into();
        self
    }

    /// Run one turn as the harness player.
    pub async fn input(&self, text: &str) -> Result<TurnResult> {
        self.orchestrator
            .process_input(&self.session, &self.player, &self.credential, text)
            .await
    }

    /// Value at a session-relative path.
    pub async fn get(&self, relative: &str) -> Option<Value> {
        let path = StorePath::resolve(relative, &self.session).ok()?;
        self.store.get(&path).await
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let raw = self
            .store
            .read_session(&self.session)
            .await
            .ok()
            .flatten()
            .unwrap_or(Value::Null);
        SessionSnapshot::from_value(self.session.clone(), raw)
    }

    /// The whole transcript, oldest first.
    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.snapshot().await.history.chat.into_values().collect()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the turn activated exactly `expected`, in order.
#[track_caller]
pub fn assert_roles(result: &TurnResult, expected: &[Role]) {
    assert_eq!(
        result.roles, expected,
        "Expected roles {expected:?}, got {:?}",
        result.roles
    );
}

/// Assert the turn wrote `expected` at a session-relative path.
#[track_caller]
pub fn assert_wrote(result: &TurnResult, relative: &str, expected: &Value) {
    let written = result
        .mutations
        .iter()
        .find(|(path, _)| path.relative() == relative)
        .map(|(_, value)| value);
    assert_eq!(
        written,
        Some(expected),
        "Expected write of {expected} at '{relative}'"
    );
}

/// Assert the turn did NOT write a session-relative path.
#[track_caller]
pub fn assert_no_write(result: &TurnResult, relative: &str) {
    assert!(
        !result.mutations.paths().any(|path| path.relative() == relative),
        "Expected no write at '{relative}'"
    );
}

/// Assert no path in `batch` is a strict ancestor of another.
#[track_caller]
pub fn assert_conflict_free(batch: &MutationBatch) {
    for a in batch.paths() {
        for b in batch.paths() {
            assert!(
                !a.is_strict_ancestor_of(b),
                "Batch writes both '{a}' and its descendant '{b}'"
            );
        }
    }
}

/// Assert every path in `batch` addresses `session`.
#[track_caller]
pub fn assert_in_session(batch: &MutationBatch, session: &SessionId) {
    for path in batch.paths() {
        assert_eq!(path.session(), session, "Path '{path}' escaped the session");
    }
}
