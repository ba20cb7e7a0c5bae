//! The reconciler: merges specialist proposals into one reply and one batch.
//!
//! Mutations are consolidated deterministically; only the narrative is left
//! to the completion service. Proposals are applied from the most general
//! role to the most specific one, so on an exact path collision the more
//! specific role wins. Every raw path is pinned to the turn's session and
//! the final batch never holds a node together with one of its descendants.
//!
//! In oracle mode the compiler also runs the chaos subsystem (see
//! [`crate::chaos`]) and emits the resulting state changes as ordinary
//! mutations.

use crate::chaos::{
    consult, is_yes_no_question, ChaosFactor, DeterministicRng, OracleOutcome, OracleTrigger,
    TensionShift, ThreadRng,
};
use crate::completion::{parse_json, ApiKey, TextCompletion};
use crate::context::RoleContext;
use crate::ids::{EntityKind, PlayerId, SessionId};
use crate::path::{update_writes, ConflictPolicy, MutationBatch, StorePath};
use crate::proposal::{object_or_empty, text_or_empty, Proposal};
use crate::role::Role;
use crate::session::SessionSnapshot;
use crate::specialists::SpecialistOutcome;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const CURRENT_LOCATION: &str = "gameState/currentLocationId";
const CHAOS_FACTOR: &[&str] = &["gameState", "chaosFactor"];
const ORACLE_LAST: &[&str] = &["gameState", "oracle", "last"];
/// Fields of `gameState` that only the chaos subsystem writes.
const ENGINE_OWNED: [&str; 2] = ["chaosFactor", "oracle"];

// ============================================================================
// Consolidation
// ============================================================================

/// Proposed writes merged into one batch, plus what could not be placed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consolidation {
    pub batch: MutationBatch,
    /// Raw paths or entity keys that were dropped, with the reason.
    pub rejected: Vec<String>,
}

impl Consolidation {
    /// Resolve and insert raw `path -> value` writes.
    fn apply_raw(&mut self, snapshot: &SessionSnapshot, updates: &Map<String, Value>) {
        for (raw, value) in updates {
            match StorePath::resolve(raw, &snapshot.id) {
                Ok(path) => self.place(snapshot, raw, path, value.clone()),
                Err(e) => self.reject(raw, e.to_string()),
            }
        }
    }

    fn apply_proposal(&mut self, snapshot: &SessionSnapshot, role: Role, proposal: &Proposal) {
        self.apply_raw(snapshot, &proposal.database_updates);

        for (key, value) in &proposal.new_entities {
            match new_entity_path(&snapshot.id, key, value) {
                Ok(path) => self.place(snapshot, key, path, value.clone()),
                Err(reason) => self.reject(key, reason),
            }
        }

        // An empty object names no field, so `{}` leaves the entity alone.
        for (key, value) in &proposal.entity_updates {
            match updated_entity_path(snapshot, key, value) {
                Ok(path) => {
                    for (leaf, leaf_value) in update_writes(&path, value) {
                        self.place(snapshot, key, leaf, leaf_value);
                    }
                }
                Err(reason) => self.reject(key, reason),
            }
        }

        tracing::trace!(%role, total = self.batch.len(), "applied proposal");
    }

    /// Insert one write unless it touches the chaos state.
    ///
    /// A whole-`gameState` object keeps the stored chaos factor and oracle
    /// record in place of whatever the proposal put there.
    fn place(&mut self, snapshot: &SessionSnapshot, key: &str, path: StorePath, value: Value) {
        match path.segments() {
            [root, field, ..] if root == "gameState" && ENGINE_OWNED.contains(&field.as_str()) => {
                self.reject(key, "engine-owned".to_string());
            }
            [root] if root == "gameState" => match value {
                Value::Object(mut state) => {
                    let game_state = &snapshot.game_state;
                    state.insert("chaosFactor".into(), Value::from(game_state.chaos_factor.get()));
                    match &game_state.oracle {
                        Value::Null => state.remove("oracle"),
                        oracle => state.insert("oracle".into(), oracle.clone()),
                    };
                    self.batch.insert(path, Value::Object(state));
                }
                _ => self.reject(key, "gameState must be an object".to_string()),
            },
            _ => self.batch.insert(path, value),
        }
    }

    fn reject(&mut self, key: &str, reason: String) {
        tracing::warn!(key, %reason, "dropping proposed write");
        self.rejected.push(format!("{key}: {reason}"));
    }
}

/// Merge every proposal's writes, least specific role first.
pub fn consolidate<'p>(
    snapshot: &SessionSnapshot,
    proposals: impl IntoIterator<Item = (Role, &'p Proposal)>,
) -> Consolidation {
    let mut ordered: Vec<(Role, &Proposal)> = proposals.into_iter().collect();
    ordered.sort_by_key(|(role, _)| role.specificity());

    let mut out = Consolidation::default();
    for (role, proposal) in ordered {
        out.apply_proposal(snapshot, role, proposal);
    }
    out
}

/// Where a brand-new entity lives, judged by its id prefix.
fn new_entity_path(session: &SessionId, key: &str, value: &Value) -> Result<StorePath, String> {
    if key.contains('/') {
        return StorePath::resolve(key, session).map_err(|e| e.to_string());
    }
    let kind = EntityKind::of_id(key).ok_or_else(|| "unknown entity kind".to_string())?;
    entity_path(
        session,
        key,
        kind,
        str_field(value, "parentLocationId"),
        str_field(value, "questId"),
    )
}

/// Where an existing entity lives.
///
/// Player ids map to their sheets; a point of interest whose parent is not
/// named in the update is looked up among the known locations.
fn updated_entity_path(
    snapshot: &SessionSnapshot,
    key: &str,
    value: &Value,
) -> Result<StorePath, String> {
    if key.contains('/') {
        return StorePath::resolve(key, &snapshot.id).map_err(|e| e.to_string());
    }
    if snapshot.players.contains_key(&PlayerId::from(key)) {
        return StorePath::new(&snapshot.id, ["players", key]).map_err(|e| e.to_string());
    }

    let kind = EntityKind::of_id(key).ok_or_else(|| "unknown entity kind".to_string())?;
    let parent = str_field(value, "parentLocationId").or_else(|| {
        snapshot
            .world
            .locations
            .iter()
            .find(|(_, location)| {
                location
                    .fields
                    .get("points_of_interest")
                    .and_then(|pois| pois.get(key))
                    .is_some()
            })
            .map(|(id, _)| id.as_str())
    });
    entity_path(&snapshot.id, key, kind, parent, str_field(value, "questId"))
}

fn entity_path(
    session: &SessionId,
    id: &str,
    kind: EntityKind,
    parent_location: Option<&str>,
    quest: Option<&str>,
) -> Result<StorePath, String> {
    let segments: Vec<&str> = match kind {
        EntityKind::Npc => vec!["npcs", id],
        EntityKind::Location => vec!["world", "locations", id],
        EntityKind::Poi => match parent_location {
            Some(parent) => vec!["world", "locations", parent, "points_of_interest", id],
            None => vec!["world", "pointsOfInterest", id],
        },
        EntityKind::Quest => vec!["quests", id],
        EntityKind::Item => vec!["items", id],
        EntityKind::Event => vec!["events", id],
        EntityKind::Faction => vec!["world", "factions", id],
        EntityKind::Region => vec!["world", "regions", id],
        EntityKind::Objective => match quest {
            Some(quest) => vec!["quests", quest, "objectives", id],
            None => return Err("objective without questId".to_string()),
        },
    };
    StorePath::new(session, segments).map_err(|e| e.to_string())
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

// ============================================================================
// Compiler
// ============================================================================

/// What the compiler needs for one turn.
pub struct CompileRequest<'a> {
    pub input: &'a str,
    pub snapshot: &'a SessionSnapshot,
    /// The compiler's own context slice.
    pub context: &'a RoleContext,
    pub outcomes: &'a BTreeMap<Role, SpecialistOutcome>,
    /// The participant addressed the oracle with a slash command.
    pub oracle_requested: bool,
}

/// Why the compiled narrative is the neutral apology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerFallback {
    Timeout,
    Upstream(String),
    Malformed(String),
}

/// The reconciled turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub narrative: String,
    pub rich_narrative: String,
    /// Conflict-free writes, all inside the turn's session.
    pub mutations: MutationBatch,
    /// Ancestor writes removed because a descendant was also written.
    pub discarded_paths: Vec<StorePath>,
    /// Writes that could not be addressed at all.
    pub rejected_paths: Vec<String>,
    pub oracle: Option<OracleOutcome>,
    /// New chaos factor, when it changed or the oracle was consulted.
    pub chaos_factor: Option<ChaosFactor>,
    pub tension: TensionShift,
    pub fallback: Option<CompilerFallback>,
}

impl Compiled {
    fn apology(reason: CompilerFallback) -> Self {
        let apology = Proposal::apology();
        Self {
            narrative: apology.content,
            rich_narrative: apology.rich_content.unwrap_or_default(),
            mutations: MutationBatch::new(),
            discarded_paths: Vec::new(),
            rejected_paths: Vec::new(),
            oracle: None,
            chaos_factor: None,
            tension: TensionShift::Steady,
            fallback: Some(reason),
        }
    }
}

/// What the synthesis completion returns.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Synthesis {
    #[serde(alias = "narrative", deserialize_with = "text_or_empty")]
    narrative_response: String,
    #[serde(alias = "richNarrative", deserialize_with = "text_or_empty")]
    html_response: String,
    #[serde(deserialize_with = "object_or_empty")]
    database_updates: Map<String, Value>,
    #[serde(deserialize_with = "text_or_empty")]
    tension_shift: String,
}

/// Merges proposals, writes the narrative and runs the chaos subsystem.
pub struct Compiler {
    completion: Arc<dyn TextCompletion>,
    rng: Arc<dyn DeterministicRng>,
    timeout: Duration,
    policy: ConflictPolicy,
}

impl Compiler {
    pub fn new(completion: Arc<dyn TextCompletion>) -> Self {
        Self {
            completion,
            rng: Arc::new(ThreadRng),
            timeout: Duration::from_secs(120),
            policy: ConflictPolicy::default(),
        }
    }

    pub fn with_rng(mut self, rng: Arc<dyn DeterministicRng>) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Reconcile one turn. Never fails; a failed synthesis yields the
    /// apology narrative and no writes.
    #[tracing::instrument(skip_all, fields(session = %request.snapshot.id))]
    pub async fn compile(&self, credential: &ApiKey, request: &CompileRequest<'_>) -> Compiled {
        let snapshot = request.snapshot;
        let proposals = request
            .outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_fallback())
            .map(|(role, outcome)| (*role, &outcome.proposal));
        let mut consolidation = consolidate(snapshot, proposals);

        let oracle_mode = snapshot.metadata.is_oracle_mode();
        let chaos_before = snapshot.game_state.chaos_factor;
        let oracle = oracle_trigger(request, oracle_mode, &consolidation.batch)
            .map(|trigger| consult(&trigger, chaos_before, self.rng.as_ref()));
        if let Some(outcome) = &oracle {
            tracing::info!(
                roll = outcome.roll,
                adjusted = outcome.adjusted_roll,
                answer = ?outcome.answer,
                twist = ?outcome.twist,
                chaos = chaos_before.get(),
                "oracle consulted"
            );
        }

        let prompt = self.build_prompt(request, &consolidation.batch, oracle.as_ref());
        let reply =
            tokio::time::timeout(self.timeout, self.completion.complete(credential, &prompt)).await;
        let synthesis = match reply {
            Err(_) => return self.fall_back(CompilerFallback::Timeout),
            Ok(Err(e)) => return self.fall_back(CompilerFallback::Upstream(e.to_string())),
            Ok(Ok(text)) => match parse_json::<Synthesis>(&text) {
                Ok(synthesis) => synthesis,
                Err(e) => return self.fall_back(CompilerFallback::Malformed(e.to_string())),
            },
        };

        consolidation.apply_raw(snapshot, &synthesis.database_updates);

        let tension = TensionShift::parse(&synthesis.tension_shift);
        let chaos_after = if oracle_mode {
            tension.apply(chaos_before)
        } else {
            chaos_before
        };
        let chaos_changed = oracle.is_some() || chaos_after != chaos_before;
        if chaos_changed {
            consolidation
                .batch
                .extend(chaos_writes(&snapshot.id, chaos_after, oracle.as_ref()));
        }

        let (narrative, rich_narrative) = narratives(synthesis, request, oracle.as_ref());

        let Consolidation { batch, rejected } = consolidation;
        let (mutations, discarded) = batch
            .rebased(&snapshot.id)
            .without_ancestor_conflicts(self.policy);
        if !discarded.is_empty() {
            tracing::warn!(?discarded, "dropped ancestor writes");
        }
        tracing::info!(writes = mutations.len(), "compiled turn");

        Compiled {
            narrative,
            rich_narrative,
            mutations,
            discarded_paths: discarded,
            rejected_paths: rejected,
            oracle,
            chaos_factor: chaos_changed.then_some(chaos_after),
            tension,
            fallback: None,
        }
    }

    fn fall_back(&self, reason: CompilerFallback) -> Compiled {
        tracing::error!(?reason, "compiler fell back to apology");
        Compiled::apology(reason)
    }

    fn build_prompt(
        &self,
        request: &CompileRequest<'_>,
        batch: &MutationBatch,
        oracle: Option<&OracleOutcome>,
    ) -> String {
        let meta = &request.snapshot.metadata;

        let mut answers: Vec<(&Role, &SpecialistOutcome)> = request
            .outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_fallback())
            .collect();
        answers.sort_by_key(|(role, _)| role.specificity());
        let answers: String = if answers.is_empty() {
            "(no specialist produced an answer)\n".to_string()
        } else {
            answers
                .iter()
                .map(|(role, outcome)| {
                    format!(
                        "### {} (priority {})\n{}\n",
                        role.tag(),
                        role.specificity(),
                        outcome.proposal.content
                    )
                })
                .collect()
        };

        let changes: Map<String, Value> = batch
            .iter()
            .map(|(path, value)| (path.relative(), value.clone()))
            .collect();
        let changes =
            serde_json::to_string_pretty(&changes).unwrap_or_else(|_| "{}".to_string());

        let oracle_section = oracle.map(oracle_instructions).unwrap_or_default();

        format!(
            r#"You are the Compiler of the game master team for campaign `{session}`.
Several specialists answered the participant's input independently. Merge their answers into ONE coherent reply.

## Campaign
- Name: {name}
- System: {system}
- Tone: {tone}

## Latest chat messages
{transcript}

## Participant input
"{input}"

## Specialist answers
{answers}
## World changes already recorded
{changes}

## Players
{players}

## Current location
{location}

## Rules
- When answers contradict each other, follow the one with the higher priority.
- Reveal only what participants know (`playerKnowledge`); never reveal `masterKnowledge`.
- Keep the campaign's tone and the participant's language.
- The world changes above are applied automatically. Only return `databaseUpdates` for missing cross references between entities, using the same relative paths.
{oracle_section}
## Output
Return ONE JSON object with:
1. "narrativeResponse": the merged reply as plain text
2. "htmlResponse": the same reply formatted as HTML
3. "databaseUpdates": object of relative path -> value (may be empty)
4. "tensionShift": "raised" if the story grew more tense, "resolved" if a thread was favourably resolved, otherwise "steady""#,
            session = request.snapshot.id,
            name = meta.campaign_name,
            system = meta.system,
            tone = meta.tone,
            transcript = request.context.render_transcript(),
            input = request.input,
            players = request.context.render("players"),
            location = request.context.render("currentLocation"),
        )
    }
}

/// Decide whether this turn consults the oracle.
///
/// An explicit oracle command always asks; otherwise only oracle-mode
/// sessions draw, on yes/no questions or when the party changes location.
fn oracle_trigger(
    request: &CompileRequest<'_>,
    oracle_mode: bool,
    batch: &MutationBatch,
) -> Option<OracleTrigger> {
    if request.oracle_requested {
        let question = request
            .input
            .trim()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default();
        return Some(OracleTrigger::Question(question.to_string()));
    }
    if !oracle_mode {
        return None;
    }
    if is_yes_no_question(request.input) {
        return Some(OracleTrigger::Question(request.input.trim().to_string()));
    }

    let moved_to = batch
        .iter()
        .find(|(path, _)| path.is(CURRENT_LOCATION))
        .and_then(|(_, value)| value.as_str());
    match moved_to {
        Some(next) if Some(next) != request.snapshot.current_location_id() => {
            Some(OracleTrigger::SceneTransition)
        }
        _ => None,
    }
}

fn oracle_instructions(outcome: &OracleOutcome) -> String {
    let mut text = String::from("\n## Oracle\n");
    match (&outcome.question, outcome.answer) {
        (Some(question), Some(answer)) => text.push_str(&format!(
            "The participant asked the oracle: \"{question}\". The answer is \"{answer}\". \
             Your reply MUST be consistent with this answer.\n"
        )),
        _ => text.push_str("The scene has just changed.\n"),
    }
    if let Some(twist) = &outcome.twist {
        text.push_str(&format!(
            "A twist happens: {} involving {}. Weave it naturally into the reply.\n",
            twist.kind.describe(),
            twist.focus.describe()
        ));
    }
    text
}

/// `gameState/chaosFactor` and, after a draw, `gameState/oracle/last`.
fn chaos_writes(
    session: &SessionId,
    chaos: ChaosFactor,
    oracle: Option<&OracleOutcome>,
) -> MutationBatch {
    let mut batch = MutationBatch::new();
    match StorePath::new(session, CHAOS_FACTOR.iter().copied()) {
        Ok(path) => batch.insert(path, Value::from(chaos.get())),
        Err(e) => tracing::warn!(error = %e, "cannot address chaos factor"),
    }
    if let Some(outcome) = oracle {
        let path = StorePath::new(session, ORACLE_LAST.iter().copied());
        match (path, serde_json::to_value(outcome)) {
            (Ok(path), Ok(value)) => batch.insert(path, value),
            (Err(e), _) => tracing::warn!(error = %e, "cannot address oracle outcome"),
            (_, Err(e)) => tracing::warn!(error = %e, "cannot encode oracle outcome"),
        }
    }
    batch
}

/// Final plain and rich narratives, with the oracle line appended.
///
/// An empty synthesis falls back to the specialists' own prose.
fn narratives(
    synthesis: Synthesis,
    request: &CompileRequest<'_>,
    oracle: Option<&OracleOutcome>,
) -> (String, String) {
    let mut narrative = synthesis.narrative_response.trim().to_string();
    if narrative.is_empty() {
        let mut answers: Vec<(&Role, &SpecialistOutcome)> = request
            .outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_fallback() && !outcome.proposal.content.is_empty())
            .collect();
        answers.sort_by_key(|(role, _)| role.specificity());
        narrative = answers
            .iter()
            .map(|(_, outcome)| outcome.proposal.content.trim())
            .collect::<Vec<_>>()
            .join("\n\n");
    }
    if narrative.is_empty() {
        narrative = Proposal::apology().content;
    }

    let mut rich = synthesis.html_response.trim().to_string();
    if rich.is_empty() {
        rich = paragraphs(&narrative);
    }

    if let Some(outcome) = oracle {
        if let (Some(line), Some(rich_line)) = (outcome.narrative_line(), outcome.rich_line()) {
            narrative.push_str("\n\n");
            narrative.push_str(&line);
            rich.push_str(&rich_line);
        }
    }
    (narrative, rich)
}

/// Wrap plain text in `<p>` elements, one per blank-line separated block.
fn paragraphs(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            let escaped = block
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            format!("<p>{escaped}</p>")
        })
        .collect()
}
