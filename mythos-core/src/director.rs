//! The classifier: decides which specialists a turn needs.
//!
//! Slash commands are honoured before anything else and survive a failed
//! completion. The narrative role is always part of the result, so a turn
//! never runs with zero specialists.

use crate::completion::{parse_json, ApiKey, TextCompletion};
use crate::role::Role;
use crate::session::SessionSnapshot;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Slash commands and the role each one forces.
const SLASH_COMMANDS: &[(&str, Role)] = &[
    ("/criar_personagem", Role::CharacterCreation),
    ("/create_character", Role::CharacterCreation),
    ("/atacar", Role::CombatManager),
    ("/attack", Role::CombatManager),
    ("/usar_pericia", Role::RulesExpert),
    ("/skill", Role::RulesExpert),
    ("/regra", Role::RulesExpert),
    ("/rules", Role::RulesExpert),
    ("/inventario", Role::InventoryManager),
    ("/inventory", Role::InventoryManager),
    ("/missao", Role::QuestManager),
    ("/quest", Role::QuestManager),
    ("/explorar", Role::WorldBuilder),
    ("/explore", Role::WorldBuilder),
    ("/falar", Role::NpcManager),
    ("/talk", Role::NpcManager),
    ("/oraculo", Role::NarrativeWeaver),
    ("/oracle", Role::NarrativeWeaver),
];

/// A recognised slash command at the start of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashCommand {
    pub role: Role,
    /// `/oracle` asks the oracle directly.
    pub oracle: bool,
}

impl SlashCommand {
    /// Parse the first token of `input`, case-insensitively.
    pub fn parse(input: &str) -> Option<SlashCommand> {
        let first = input.split_whitespace().next()?.to_lowercase();
        SLASH_COMMANDS
            .iter()
            .find(|(command, _)| *command == first)
            .map(|(command, role)| SlashCommand {
                role: *role,
                oracle: matches!(*command, "/oraculo" | "/oracle"),
            })
    }
}

/// Why the classifier result is not the completion's own answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierFallback {
    Timeout,
    Upstream(String),
    Malformed(String),
    NoValidRoles,
}

/// Outcome of classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Activated roles in priority order; never empty.
    pub roles: Vec<Role>,
    pub slash: Option<SlashCommand>,
    /// Tags the completion returned that name no role.
    pub discarded: Vec<String>,
    pub fallback: Option<ClassifierFallback>,
}

impl Classification {
    pub fn oracle_requested(&self) -> bool {
        self.slash.map(|s| s.oracle).unwrap_or(false)
    }
}

/// Classifies inputs with one completion call.
pub struct Director {
    completion: Arc<dyn TextCompletion>,
    timeout: Duration,
    history_window: usize,
}

impl Director {
    pub fn new(completion: Arc<dyn TextCompletion>) -> Self {
        Self {
            completion,
            timeout: Duration::from_secs(30),
            history_window: 4,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_history_window(mut self, entries: usize) -> Self {
        self.history_window = entries;
        self
    }

    /// Decide which roles handle `input`.
    #[tracing::instrument(skip_all, fields(session = %snapshot.id))]
    pub async fn classify(
        &self,
        credential: &ApiKey,
        input: &str,
        snapshot: &SessionSnapshot,
    ) -> Classification {
        let slash = SlashCommand::parse(input);
        let prompt = self.build_prompt(input, snapshot);

        let reply =
            tokio::time::timeout(self.timeout, self.completion.complete(credential, &prompt)).await;

        let (proposed, discarded, fallback) = match reply {
            Err(_) => (Vec::new(), Vec::new(), Some(ClassifierFallback::Timeout)),
            Ok(Err(e)) => {
                let fallback = ClassifierFallback::Upstream(e.to_string());
                (Vec::new(), Vec::new(), Some(fallback))
            }
            Ok(Ok(text)) => match parse_role_list(&text) {
                Ok((roles, discarded)) if roles.is_empty() => {
                    (roles, discarded, Some(ClassifierFallback::NoValidRoles))
                }
                Ok((roles, discarded)) => (roles, discarded, None),
                Err(e) => (Vec::new(), Vec::new(), Some(ClassifierFallback::Malformed(e))),
            },
        };

        if let Some(reason) = &fallback {
            tracing::warn!(?reason, "classifier fell back to default roles");
        }
        if !discarded.is_empty() {
            tracing::warn!(?discarded, "classifier returned unknown roles");
        }

        let roles = assemble_roles(slash.map(|s| s.role), proposed);
        tracing::info!(roles = ?roles, "activated roles");

        Classification {
            roles,
            slash,
            discarded,
            fallback,
        }
    }

    fn build_prompt(&self, input: &str, snapshot: &SessionSnapshot) -> String {
        let meta = &snapshot.metadata;
        let transcript: Vec<String> = snapshot
            .recent_transcript(self.history_window)
            .into_iter()
            .map(|e| e.as_prompt_line())
            .collect();

        let roles: String = Role::ALL
            .iter()
            .enumerate()
            .map(|(i, role)| format!("{}. \"{}\" - {}\n", i + 1, role.tag(), role.summary()))
            .collect();

        let commands: String = SLASH_COMMANDS
            .iter()
            .map(|(command, role)| format!("- \"{command}\" -> \"{}\"\n", role.tag()))
            .collect();

        format!(
            r#"You are the Director of a tabletop role-playing game run by a team of specialist game-master agents.
Your only job is to decide which specialists must handle the participant's input.

## Campaign
- Name: {name}
- System: {system}
- Tone: {tone}
- Mode: {mode}
- Duration: {duration}
- Setting: {setting}

## Latest chat messages
{transcript}

## Participant input
"{input}"

## Specialists
{roles}
## Hints
- Slash commands are strong signals:
{commands}- Interaction with NPCs needs "npc_manager"; exploring or asking about places needs "world_builder".
- Rules questions need "rules_expert"; relationships between entities need "entity_relationship_manager".
- Always include "narrative_weaver" so the participant gets a narrative answer.

Return only a JSON array of specialist ids in priority order, for example:
["combat_manager", "npc_manager", "narrative_weaver"]"#,
            name = meta.campaign_name,
            system = meta.system,
            tone = meta.tone,
            mode = meta.player_mode,
            duration = meta.duration,
            setting = meta.setting_summary,
            transcript = if transcript.is_empty() {
                "(no messages yet)".to_string()
            } else {
                transcript.join("\n")
            },
        )
    }
}

/// Parse the classifier's JSON array into known roles and unknown tags.
///
/// Also accepts `{"roles": [...]}` and `{"agents": [...]}` wrappers.
pub fn parse_role_list(text: &str) -> Result<(Vec<Role>, Vec<String>), String> {
    let value: Value = parse_json(text).map_err(|e| e.to_string())?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("roles").or_else(|| map.remove("agents")) {
            Some(Value::Array(items)) => items,
            _ => return Err("expected a JSON array of role ids".to_string()),
        },
        _ => return Err("expected a JSON array of role ids".to_string()),
    };

    let mut roles = Vec::new();
    let mut discarded = Vec::new();
    for item in items {
        match item.as_str().and_then(Role::from_tag) {
            Some(role) => roles.push(role),
            None => discarded.push(match item {
                Value::String(s) => s,
                other => other.to_string(),
            }),
        }
    }
    Ok((roles, discarded))
}

/// Slash role first, then the proposed roles, deduplicated, with the
/// narrative role guaranteed.
fn assemble_roles(slash: Option<Role>, proposed: Vec<Role>) -> Vec<Role> {
    let mut roles: Vec<Role> = Vec::with_capacity(proposed.len() + 2);
    for role in slash.into_iter().chain(proposed) {
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    if !roles.contains(&Role::NarrativeWeaver) {
        roles.push(Role::NarrativeWeaver);
    }
    roles
}
