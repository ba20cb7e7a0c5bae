//! Per-role slices of session state.
//!
//! Each specialist sees the common core (metadata, game state, current
//! location) plus only the collections its role needs. Building a context
//! never writes and never fails; anything missing becomes an empty value.

use crate::ids::PlayerId;
use crate::role::Role;
use crate::session::{Entity, EntityMap, SessionSnapshot};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Reference-data sections handed to character creation.
const REFERENCE_SECTIONS: [&str; 4] = ["ancestries", "classes", "backgrounds", "feats"];

/// What one specialist (or the reconciler) gets to see.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleContext {
    /// JSON object with the role's slice, keyed by section name.
    pub data: Map<String, Value>,
    /// Recent transcript lines, oldest first, as `speaker: text`.
    pub transcript: Vec<String>,
}

impl RoleContext {
    pub fn section(&self, key: &str) -> &Value {
        self.data.get(key).unwrap_or(&Value::Null)
    }

    /// Pretty JSON of one section, for prompts.
    pub fn render(&self, key: &str) -> String {
        serde_json::to_string_pretty(self.section(key)).unwrap_or_else(|_| "null".to_string())
    }

    /// Transcript lines joined for a prompt, or a placeholder.
    pub fn render_transcript(&self) -> String {
        if self.transcript.is_empty() {
            "(no messages yet)".to_string()
        } else {
            self.transcript.join("\n")
        }
    }
}

/// Builds [`RoleContext`]s from a snapshot.
pub struct ContextBuilder<'a> {
    snapshot: &'a SessionSnapshot,
    player: &'a PlayerId,
    reference: Option<&'a Value>,
    history_window: usize,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(snapshot: &'a SessionSnapshot, player: &'a PlayerId) -> Self {
        Self {
            snapshot,
            player,
            reference: None,
            history_window: 4,
        }
    }

    /// System reference data (`global/<system>`), for character creation.
    pub fn with_reference(mut self, reference: Option<&'a Value>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_history_window(mut self, entries: usize) -> Self {
        self.history_window = entries;
        self
    }

    /// One context per activated role.
    pub fn build(&self, roles: &[Role]) -> BTreeMap<Role, RoleContext> {
        roles
            .iter()
            .map(|role| (*role, self.for_role(*role)))
            .collect()
    }

    pub fn for_role(&self, role: Role) -> RoleContext {
        let s = self.snapshot;
        let mut data = self.common();

        match role {
            Role::CharacterCreation => {
                data.insert(
                    "currentCharacter".into(),
                    s.player(self.player).map(to_value).unwrap_or(Value::Null),
                );
                data.insert("systemReference".into(), self.reference_slice());
            }
            Role::NpcManager => {
                data.insert("npcs".into(), entities(&s.npcs));
            }
            Role::WorldBuilder => {
                data.insert("locations".into(), entities(&s.world.locations));
            }
            Role::CombatManager => {
                let combat = match to_value(&s.game_state.combat) {
                    Value::Object(map) if !map.is_empty() => Value::Object(map),
                    _ => json!({ "inCombat": false }),
                };
                data.insert("combatState".into(), combat);
                data.insert("players".into(), to_value(&s.players));
                data.insert(
                    "combatNpcs".into(),
                    Value::Object(
                        s.npcs_here()
                            .map(|(id, npc)| (id.clone(), to_value(npc)))
                            .collect(),
                    ),
                );
                data.insert("combatRules".into(), s.rule("combatRules"));
            }
            Role::QuestManager => {
                data.insert("quests".into(), entities(&s.quests));
                data.insert("relevantNpcs".into(), entities(&s.npcs));
            }
            Role::RulesExpert => {
                let rules = match &s.rules {
                    Value::Null => Value::Object(Map::new()),
                    other => other.clone(),
                };
                data.insert("campaignRules".into(), rules);
            }
            Role::NarrativeWeaver => {
                data.insert(
                    "visibleNpcs".into(),
                    Value::Object(
                        s.npcs_here()
                            .map(|(id, npc)| (id.clone(), npc.player_view()))
                            .collect(),
                    ),
                );
                data.insert(
                    "recentEvents".into(),
                    Value::Array(
                        s.recent_events(10)
                            .into_iter()
                            .map(|(id, event)| {
                                let mut value = to_value(event);
                                if let Value::Object(map) = &mut value {
                                    map.insert("id".into(), Value::String(id.clone()));
                                }
                                value
                            })
                            .collect(),
                    ),
                );
            }
            Role::InventoryManager => {
                data.insert(
                    "playerInventory".into(),
                    s.player(self.player)
                        .map(|p| to_value(&p.inventory))
                        .unwrap_or_else(|| Value::Object(Map::new())),
                );
                data.insert("availableItems".into(), self.items_here());
            }
            Role::EntityRelationshipManager => {
                data.insert("npcs".into(), entities(&s.npcs));
                data.insert("locations".into(), entities(&s.world.locations));
                data.insert("factions".into(), entities(&s.world.factions));
                data.insert("quests".into(), entities(&s.quests));
            }
        }

        RoleContext {
            data,
            transcript: self.transcript(),
        }
    }

    /// The reconciler's context: common core plus every player sheet.
    pub fn for_compiler(&self) -> RoleContext {
        let mut data = self.common();
        data.insert("players".into(), to_value(&self.snapshot.players));
        RoleContext {
            data,
            transcript: self.transcript(),
        }
    }

    fn common(&self) -> Map<String, Value> {
        let s = self.snapshot;
        let mut data = Map::new();
        data.insert("campaignMetadata".into(), to_value(&s.metadata));
        data.insert("gameState".into(), to_value(&s.game_state));
        data.insert(
            "currentLocation".into(),
            s.current_location().map(to_value).unwrap_or(Value::Null),
        );
        data
    }

    fn transcript(&self) -> Vec<String> {
        self.snapshot
            .recent_transcript(self.history_window)
            .into_iter()
            .map(|entry| entry.as_prompt_line())
            .collect()
    }

    fn reference_slice(&self) -> Value {
        let Some(reference) = self.reference else {
            return Value::Object(Map::new());
        };
        Value::Object(
            REFERENCE_SECTIONS
                .iter()
                .map(|key| {
                    (
                        key.to_string(),
                        reference.get(*key).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect(),
        )
    }

    fn items_here(&self) -> Value {
        self.snapshot
            .current_location()
            .and_then(|location: &Entity| location.player_knowledge.get("items"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn entities(map: &EntityMap) -> Value {
    to_value(map)
}
