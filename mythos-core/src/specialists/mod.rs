//! Specialist roles.
//!
//! Each role is a small struct implementing [`Specialist`], which only knows
//! how to write its prompt. Running a role (the completion call, timeout,
//! decoding, and falling back to a neutral proposal) is shared and lives in
//! [`SpecialistPool`]:
//! - [`CharacterCreation`]: character sheets
//! - [`NpcManager`]: NPCs and dialogue
//! - [`WorldBuilder`]: locations and points of interest
//! - [`CombatManager`]: combat resolution
//! - [`QuestManager`]: quests and objectives
//! - [`RulesExpert`]: rules lookups, no writes
//! - [`NarrativeWeaver`]: prose, no writes
//! - [`InventoryManager`]: items and currency
//! - [`RelationshipManager`]: cross references between entities

mod character;
mod combat;
mod inventory;
mod narrative;
mod npc;
mod quest;
mod relationship;
mod rules;
mod world;

pub use character::CharacterCreation;
pub use combat::CombatManager;
pub use inventory::InventoryManager;
pub use narrative::NarrativeWeaver;
pub use npc::NpcManager;
pub use quest::QuestManager;
pub use relationship::RelationshipManager;
pub use rules::RulesExpert;
pub use world::WorldBuilder;

use crate::completion::{parse_json, ApiKey, TextCompletion};
use crate::context::RoleContext;
use crate::ids::{generate_entity_id, EntityKind, PlayerId, SessionId};
use crate::path::SESSIONS_ROOT;
use crate::proposal::Proposal;
use crate::role::Role;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a specialist's prompt can draw on.
pub struct SpecialistRequest<'a> {
    pub input: &'a str,
    pub session: &'a SessionId,
    pub player: &'a PlayerId,
    pub context: &'a RoleContext,
}

/// A specialist role: turns a request into a prompt.
pub trait Specialist: Send + Sync {
    fn role(&self) -> Role;

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String;
}

/// Why a specialist's proposal is the neutral fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Timeout,
    Upstream(String),
    Malformed(String),
    /// No specialist is registered for the role.
    Unregistered,
}

/// What came back from one specialist.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialistOutcome {
    pub proposal: Proposal,
    pub fallback: Option<FallbackReason>,
}

impl SpecialistOutcome {
    fn proposed(proposal: Proposal) -> Self {
        Self {
            proposal,
            fallback: None,
        }
    }

    fn fallback(reason: FallbackReason) -> Self {
        Self {
            proposal: Proposal::apology(),
            fallback: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// The nine specialists plus the machinery to run them concurrently.
pub struct SpecialistPool {
    completion: Arc<dyn TextCompletion>,
    specialists: BTreeMap<Role, Arc<dyn Specialist>>,
    timeout: Duration,
}

impl SpecialistPool {
    /// A pool with every built-in specialist registered.
    pub fn new(completion: Arc<dyn TextCompletion>) -> Self {
        let builtin: [Arc<dyn Specialist>; 9] = [
            Arc::new(CharacterCreation),
            Arc::new(NpcManager),
            Arc::new(WorldBuilder),
            Arc::new(CombatManager),
            Arc::new(QuestManager),
            Arc::new(RulesExpert),
            Arc::new(NarrativeWeaver),
            Arc::new(InventoryManager),
            Arc::new(RelationshipManager),
        ];
        Self {
            completion,
            specialists: builtin.into_iter().map(|s| (s.role(), s)).collect(),
            timeout: Duration::from_secs(90),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the specialist registered for its role.
    pub fn with_specialist(mut self, specialist: Arc<dyn Specialist>) -> Self {
        self.specialists.insert(specialist.role(), specialist);
        self
    }

    /// Run one specialist. Never fails; problems become a fallback outcome.
    #[tracing::instrument(skip_all, fields(role = %role))]
    pub async fn run(
        &self,
        role: Role,
        credential: &ApiKey,
        request: &SpecialistRequest<'_>,
    ) -> SpecialistOutcome {
        let Some(specialist) = self.specialists.get(&role) else {
            tracing::warn!("no specialist registered");
            return SpecialistOutcome::fallback(FallbackReason::Unregistered);
        };

        let prompt = specialist.prompt(request);
        let reply =
            tokio::time::timeout(self.timeout, self.completion.complete(credential, &prompt)).await;

        let outcome = match reply {
            Err(_) => SpecialistOutcome::fallback(FallbackReason::Timeout),
            Ok(Err(e)) => SpecialistOutcome::fallback(FallbackReason::Upstream(e.to_string())),
            Ok(Ok(text)) => match parse_json::<Proposal>(&text) {
                Ok(proposal) => SpecialistOutcome::proposed(proposal),
                Err(e) => SpecialistOutcome::fallback(FallbackReason::Malformed(e.to_string())),
            },
        };

        match &outcome.fallback {
            Some(reason) => tracing::warn!(?reason, "specialist fell back"),
            None => tracing::debug!(
                writes = outcome.proposal.database_updates.len(),
                new_entities = outcome.proposal.new_entities.len(),
                entity_updates = outcome.proposal.entity_updates.len(),
                "specialist proposed"
            ),
        }
        outcome
    }

    /// Run every role in `contexts` concurrently and wait for all of them.
    pub async fn run_all(
        &self,
        credential: &ApiKey,
        input: &str,
        session: &SessionId,
        player: &PlayerId,
        contexts: &BTreeMap<Role, RoleContext>,
    ) -> BTreeMap<Role, SpecialistOutcome> {
        let runs = contexts.iter().map(|(role, context)| async move {
            let request = SpecialistRequest {
                input,
                session,
                player,
                context,
            };
            (*role, self.run(*role, credential, &request).await)
        });
        join_all(runs).await.into_iter().collect()
    }
}

// ============================================================================
// Prompt building
// ============================================================================

const SOURCE_OF_TRUTH: &str = "\
## Source of truth: the world store

The JSON context below is the ONLY state you may rely on. For system rules, follow strictly \
what is in the global reference data and the campaign's `rules` node; do NOT invent rules that \
are not there. For narrative elements (locations, NPCs, items, quests, events) you SHOULD create \
new entries whenever the story needs them, consistent with the campaign's tone and setting, and \
always record them in the store.";

const ENTITY_PROTOCOL: &str = "\
## Entity management

1. Unique ids: every entity id is `<kind>_<8 hex chars>`, e.g. `npc_3f9a12bc`. Never reuse an id.
2. Hierarchy: locations may contain points of interest (`parentLocationId`); NPCs belong to \
locations (`locationId`) and factions (`factionId`); items belong to NPCs or locations.
3. Cross references: refer to other entities by id only, and keep both sides in sync \
(an NPC with `locationId` is listed in that location's `npcIds`).
4. Update vs create: if the input refers to an existing entity, UPDATE it; if it refers to \
something new, CREATE it; a sub-entity is created with a reference to its parent.
5. Knowledge: keep `masterKnowledge` (narrator only) separate from `playerKnowledge` \
(what participants have learned).
6. Partial updates: in `entityUpdates` send only the fields that change; everything else is kept.";

const CONSTRAINTS: &str = "\
## Constraints

* Keep the world and its rules internally consistent.
* Be an impartial game master and apply the rules fairly.
* Be clear about descriptions and the outcome of actions.";

const RICH_FORMATTING: &str = "\
## Rich formatting

`richContent` is HTML: <h2>/<h3> for headings, <p> for paragraphs, <ul>/<li> for lists, \
<strong>/<em> for emphasis, <blockquote> for important dialogue, <div class=\"description\"> for \
scenery, <div class=\"combat\"> for combat, <div class=\"npc-dialogue\"> for NPC speech and \
<div class=\"system-message\"> for system messages.";

/// A field the specialist may return besides `content` and `richContent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputField {
    DatabaseUpdates,
    NewEntities,
    EntityUpdates,
    Metadata,
}

impl OutputField {
    fn describe(self, session: &SessionId) -> String {
        match self {
            OutputField::DatabaseUpdates => format!(
                "\"databaseUpdates\": object mapping store paths to values, paths written as \
                 `{SESSIONS_ROOT}/{session}/...`; a null value deletes the node"
            ),
            OutputField::NewEntities => {
                "\"newEntities\": object mapping a new entity id to the full entity".to_string()
            }
            OutputField::EntityUpdates => "\"entityUpdates\": object mapping an existing entity id \
                 (or its store path) to only the fields that change"
                .to_string(),
            OutputField::Metadata => {
                "\"metadata\": optional notes (rules consulted, elements introduced)".to_string()
            }
        }
    }
}

/// Assembles a specialist prompt section by section.
pub(crate) struct PromptBuilder<'r, 'a> {
    request: &'r SpecialistRequest<'a>,
    sections: Vec<String>,
}

impl<'r, 'a> PromptBuilder<'r, 'a> {
    /// Start with the persona line, the common core sections and the
    /// recent transcript.
    pub fn new(request: &'r SpecialistRequest<'a>, persona: &str) -> Self {
        let mut builder = Self {
            request,
            sections: Vec::new(),
        };
        builder.sections.push(format!(
            "# Game master team\n\n{persona} You work on one campaign, identified as `{}`. \
             Base every action, description and ruling only on the context provided.",
            request.session
        ));
        builder = builder
            .context("Campaign", "campaignMetadata")
            .context("Game state", "gameState")
            .context("Current location", "currentLocation");
        builder.sections.push(format!(
            "## Latest chat messages\n{}",
            request.context.render_transcript()
        ));
        builder
    }

    pub fn source_of_truth(mut self) -> Self {
        self.sections.push(SOURCE_OF_TRUTH.to_string());
        self
    }

    /// Entity protocol plus fresh ids the role may use for new entities.
    pub fn entity_protocol(mut self, kinds: &[EntityKind]) -> Self {
        let mut text = ENTITY_PROTOCOL.to_string();
        if !kinds.is_empty() {
            text.push_str("\n\nFresh ids you may use for new entities:");
            for kind in kinds {
                text.push_str(&format!(
                    "\n- {kind}: {}, {}",
                    generate_entity_id(*kind),
                    generate_entity_id(*kind)
                ));
            }
        }
        self.sections.push(text);
        self
    }

    /// A titled JSON section from the role context.
    pub fn context(mut self, title: &str, key: &str) -> Self {
        self.sections
            .push(format!("## {title}\n{}", self.request.context.render(key)));
        self
    }

    pub fn input(mut self) -> Self {
        self.sections.push(format!(
            "## Participant input (from `{}`)\n\"{}\"",
            self.request.player, self.request.input
        ));
        self
    }

    pub fn task(mut self, task: &str) -> Self {
        self.sections.push(format!("## Your task\n{task}"));
        self
    }

    /// Constraints, formatting, and the required output shape; ends the prompt.
    pub fn output(mut self, content: &str, fields: &[OutputField]) -> String {
        self.sections.push(CONSTRAINTS.to_string());
        self.sections.push(RICH_FORMATTING.to_string());

        let mut shape = format!(
            "## Output\nReturn ONE JSON object with:\n1. \"content\": {content} (plain text)\n\
             2. \"richContent\": the same, formatted as HTML"
        );
        for (i, field) in fields.iter().enumerate() {
            shape.push_str(&format!("\n{}. {}", i + 3, field.describe(self.request.session)));
        }
        self.sections.push(shape);
        self.sections.join("\n\n")
    }
}

/// The campaign tone for "keep the ... tone" instructions.
pub(crate) fn campaign_tone(context: &RoleContext) -> &str {
    context.section("campaignMetadata")["tone"]
        .as_str()
        .filter(|t| !t.is_empty())
        .unwrap_or("established")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBuilder;
    use crate::session::SessionSnapshot;
    use crate::testing::ScriptedCompletion;
    use serde_json::json;

    fn context(role: Role) -> RoleContext {
        let snapshot = SessionSnapshot::from_value(
            SessionId::from("S1"),
            json!({
                "metadata": {"tone": "grim"},
                "gameState": {"currentLocationId": "location_a", "weather": "sleet"},
                "world": {"locations": {"location_a": {"name": "Saltmarsh Ferry"}}}
            }),
        );
        ContextBuilder::new(&snapshot, &PlayerId::from("u1")).for_role(role)
    }

    #[test]
    fn test_every_role_registered_and_prompts_mention_session() {
        let pool = SpecialistPool::new(Arc::new(ScriptedCompletion::new()));
        for role in Role::ALL {
            let specialist = pool.specialists.get(&role).unwrap();
            assert_eq!(specialist.role(), role);

            let ctx = context(role);
            let request = SpecialistRequest {
                input: "I look around",
                session: &SessionId::from("S1"),
                player: &PlayerId::from("u1"),
                context: &ctx,
            };
            let prompt = specialist.prompt(&request);
            assert!(prompt.contains("S1"), "{role}");
            assert!(prompt.contains("I look around"), "{role}");
            assert!(prompt.contains("\"content\""), "{role}");
        }
    }

    #[test]
    fn test_every_prompt_carries_core_sections() {
        let pool = SpecialistPool::new(Arc::new(ScriptedCompletion::new()));
        for role in Role::ALL {
            let ctx = context(role);
            let request = SpecialistRequest {
                input: "I wait",
                session: &SessionId::from("S1"),
                player: &PlayerId::from("u1"),
                context: &ctx,
            };
            let prompt = pool.specialists[&role].prompt(&request);
            for (title, key) in [
                ("## Campaign\n", "campaignMetadata"),
                ("## Game state\n", "gameState"),
                ("## Current location\n", "currentLocation"),
            ] {
                let section = format!("{title}{}", ctx.render(key));
                assert_eq!(prompt.matches(&section).count(), 1, "{role}: {key}");
            }
            assert!(prompt.contains("sleet"), "{role}");
            assert!(prompt.contains("Saltmarsh Ferry"), "{role}");
        }
    }

    #[tokio::test]
    async fn test_run_decodes_proposal() {
        let completion = ScriptedCompletion::new().on(
            "NPC Manager",
            r#"```json
{"content": "Mira smiles.", "entityUpdates": {"npc_1": {"disposition": "friendly"}}}
```"#,
        );
        let pool = SpecialistPool::new(Arc::new(completion));
        let ctx = context(Role::NpcManager);
        let request = SpecialistRequest {
            input: "I greet Mira",
            session: &SessionId::from("S1"),
            player: &PlayerId::from("u1"),
            context: &ctx,
        };
        let outcome = pool.run(Role::NpcManager, &ApiKey::from("k"), &request).await;
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.proposal.content, "Mira smiles.");
        assert_eq!(outcome.proposal.entity_updates.len(), 1);
    }

    #[tokio::test]
    async fn test_run_all_isolates_failures() {
        let completion = ScriptedCompletion::new()
            .on("NPC Manager", r#"{"content": "ok"}"#)
            .on("World Builder", "this is not json")
            .fail_on("Narrative Weaver");
        let pool = SpecialistPool::new(Arc::new(completion));

        let roles = [Role::NpcManager, Role::WorldBuilder, Role::NarrativeWeaver];
        let contexts: BTreeMap<Role, RoleContext> =
            roles.iter().map(|r| (*r, context(*r))).collect();

        let outcomes = pool
            .run_all(
                &ApiKey::from("k"),
                "hello",
                &SessionId::from("S1"),
                &PlayerId::from("u1"),
                &contexts,
            )
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[&Role::NpcManager].is_fallback());
        assert!(matches!(
            outcomes[&Role::WorldBuilder].fallback,
            Some(FallbackReason::Malformed(_))
        ));
        assert!(matches!(
            outcomes[&Role::NarrativeWeaver].fallback,
            Some(FallbackReason::Upstream(_))
        ));
        assert!(!outcomes[&Role::WorldBuilder].proposal.has_mutations());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let completion = ScriptedCompletion::new()
            .on("Rules Expert", r#"{"content": "late"}"#)
            .with_delay(Duration::from_millis(200));
        let pool =
            SpecialistPool::new(Arc::new(completion)).with_timeout(Duration::from_millis(20));
        let ctx = context(Role::RulesExpert);
        let request = SpecialistRequest {
            input: "how does flanking work?",
            session: &SessionId::from("S1"),
            player: &PlayerId::from("u1"),
            context: &ctx,
        };
        let outcome = pool.run(Role::RulesExpert, &ApiKey::from("k"), &request).await;
        assert_eq!(outcome.fallback, Some(FallbackReason::Timeout));
    }
}
