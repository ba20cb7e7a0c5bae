//! Typed view of one session's subtree in the world store.
//!
//! Decoding is lenient: the store is largely written by completion output, so
//! a node with an unexpected shape decodes to its default rather than
//! failing the whole read. Collections skip individual entries that do not
//! decode. Unknown fields are kept in `extra` maps so that serializing a
//! snapshot slice back into a prompt loses nothing.

use crate::chaos::ChaosFactor;
use crate::ids::{PlayerId, SessionId};
use crate::transcript::TranscriptEntry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Deserialize `T`, falling back to `T::default()` on any shape mismatch.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Deserialize a keyed collection, dropping entries that do not decode.
fn lenient_map<'de, D, K, T>(deserializer: D) -> Result<BTreeMap<K, T>, D::Error>
where
    D: Deserializer<'de>,
    K: From<String> + Ord,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(map) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(key, entry)| {
            serde_json::from_value(entry)
                .ok()
                .map(|decoded| (K::from(key), decoded))
        })
        .collect())
}

/// Free text that may have been stored as something else.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

// ============================================================================
// Metadata and game state
// ============================================================================

/// Descriptive data about a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionMetadata {
    #[serde(deserialize_with = "lenient_text")]
    pub campaign_name: String,
    #[serde(deserialize_with = "lenient_text")]
    pub system: String,
    #[serde(deserialize_with = "lenient_text")]
    pub tone: String,
    #[serde(deserialize_with = "lenient_text")]
    pub player_mode: String,
    #[serde(deserialize_with = "lenient_text")]
    pub duration: String,
    #[serde(deserialize_with = "lenient_text")]
    pub setting_summary: String,
    #[serde(deserialize_with = "lenient_text")]
    pub created_by: String,
    #[serde(deserialize_with = "lenient_text")]
    pub created_at: String,
    #[serde(deserialize_with = "lenient_text")]
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionMetadata {
    /// Single-participant play, where the oracle draws on its own.
    ///
    /// Sessions created before modes existed have no mode and count as solo.
    pub fn is_oracle_mode(&self) -> bool {
        let mode = self.player_mode.trim();
        mode.is_empty() || mode.eq_ignore_ascii_case("solo")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CombatState {
    #[serde(deserialize_with = "lenient")]
    pub in_combat: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Mutable per-session game state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameState {
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub current_location_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub active_quest_ids: Vec<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub time_of_day: String,
    #[serde(deserialize_with = "lenient_text")]
    pub weather: String,
    #[serde(deserialize_with = "lenient")]
    pub combat: CombatState,
    #[serde(deserialize_with = "lenient")]
    pub chaos_factor: ChaosFactor,
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Value::is_null")]
    pub oracle: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Players
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Currency {
    #[serde(deserialize_with = "lenient")]
    pub platinum: i64,
    #[serde(deserialize_with = "lenient")]
    pub gold: i64,
    #[serde(deserialize_with = "lenient")]
    pub silver: i64,
    #[serde(deserialize_with = "lenient")]
    pub copper: i64,
}

impl Currency {
    /// Starting purse for a new character.
    pub fn starting() -> Self {
        Self {
            gold: 10,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    #[serde(deserialize_with = "lenient")]
    pub items: Map<String, Value>,
    #[serde(deserialize_with = "lenient")]
    pub currency: Currency,
}

/// A participant's character sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerCharacter {
    #[serde(deserialize_with = "lenient_text")]
    pub character_name: String,
    #[serde(deserialize_with = "lenient")]
    pub level: u32,
    #[serde(deserialize_with = "lenient")]
    pub experience: u64,
    #[serde(deserialize_with = "lenient")]
    pub inventory: Inventory,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for PlayerCharacter {
    fn default() -> Self {
        Self {
            character_name: String::new(),
            level: 1,
            experience: 0,
            inventory: Inventory {
                items: Map::new(),
                currency: Currency::starting(),
            },
            extra: Map::new(),
        }
    }
}

impl PlayerCharacter {
    /// True until character creation has named the character.
    pub fn is_blank(&self) -> bool {
        self.character_name.trim().is_empty()
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Any named thing in the world: NPC, location, quest, item, event, faction.
///
/// Only `name` and the two knowledge partitions are common to all kinds;
/// everything else is kept verbatim in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Entity {
    #[serde(deserialize_with = "lenient_text")]
    pub name: String,
    /// Facts only the narrator may know.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub master_knowledge: Value,
    /// Facts participants have learned.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub player_knowledge: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn location_id(&self) -> Option<&str> {
        self.field_str("locationId")
    }

    /// Millisecond timestamp, for events.
    pub fn timestamp(&self) -> i64 {
        self.fields
            .get("timestamp")
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }

    /// The entity as participants see it: `name` plus `playerKnowledge`.
    pub fn player_view(&self) -> Value {
        let mut view = match &self.player_knowledge {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("description".into(), other.clone());
                map
            }
        };
        view.insert("name".into(), Value::String(self.name.clone()));
        Value::Object(view)
    }
}

/// Entities keyed by id.
pub type EntityMap = BTreeMap<String, Entity>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct World {
    #[serde(deserialize_with = "lenient_text")]
    pub history: String,
    #[serde(deserialize_with = "lenient_text")]
    pub campaign_history: String,
    #[serde(deserialize_with = "lenient_map")]
    pub regions: EntityMap,
    #[serde(deserialize_with = "lenient_map")]
    pub locations: EntityMap,
    #[serde(deserialize_with = "lenient_map")]
    pub factions: EntityMap,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct History {
    #[serde(deserialize_with = "lenient_map")]
    pub chat: BTreeMap<String, TranscriptEntry>,
    #[serde(deserialize_with = "lenient_map")]
    pub events: EntityMap,
}

// ============================================================================
// Snapshot
// ============================================================================

/// A consistent read of one session, taken at the start of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSnapshot {
    #[serde(skip)]
    pub id: SessionId,
    #[serde(deserialize_with = "lenient")]
    pub metadata: SessionMetadata,
    #[serde(deserialize_with = "lenient")]
    pub game_state: GameState,
    #[serde(deserialize_with = "lenient_map")]
    pub players: BTreeMap<PlayerId, PlayerCharacter>,
    #[serde(deserialize_with = "lenient_map")]
    pub npcs: EntityMap,
    #[serde(deserialize_with = "lenient")]
    pub world: World,
    #[serde(deserialize_with = "lenient_map")]
    pub quests: EntityMap,
    #[serde(deserialize_with = "lenient_map")]
    pub events: EntityMap,
    #[serde(deserialize_with = "lenient_map")]
    pub items: EntityMap,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub rules: Value,
    #[serde(deserialize_with = "lenient")]
    pub history: History,
}

impl SessionSnapshot {
    /// Decode a session subtree. Never fails on shape; only on non-object input.
    pub fn from_value(id: SessionId, value: Value) -> Self {
        let mut snapshot: SessionSnapshot = match value {
            Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            _ => SessionSnapshot::default(),
        };
        snapshot.id = id;
        snapshot
    }

    pub fn current_location_id(&self) -> Option<&str> {
        self.game_state.current_location_id.as_deref()
    }

    pub fn current_location(&self) -> Option<&Entity> {
        self.current_location_id()
            .and_then(|id| self.world.locations.get(id))
    }

    pub fn player(&self, id: &PlayerId) -> Option<&PlayerCharacter> {
        self.players.get(id)
    }

    /// NPCs whose `locationId` is the current location.
    pub fn npcs_here(&self) -> impl Iterator<Item = (&String, &Entity)> {
        let here = self.current_location_id();
        self.npcs
            .iter()
            .filter(move |(_, npc)| here.is_some() && npc.location_id() == here)
    }

    /// The last `n` transcript entries, oldest first.
    pub fn recent_transcript(&self, n: usize) -> Vec<&TranscriptEntry> {
        let skip = self.history.chat.len().saturating_sub(n);
        self.history.chat.values().skip(skip).collect()
    }

    /// The `n` most recent past events, newest first.
    pub fn recent_events(&self, n: usize) -> Vec<(&String, &Entity)> {
        let mut events: Vec<(&String, &Entity)> = self.history.events.iter().collect();
        events.sort_by(|a, b| b.1.timestamp().cmp(&a.1.timestamp()));
        events.truncate(n);
        events
    }

    /// Rules value at `key`, or an empty object.
    pub fn rule(&self, key: &str) -> Value {
        self.rules
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_odd_shapes_decode_to_defaults() {
        let snapshot = SessionSnapshot::from_value(
            SessionId::from("S1"),
            json!({
                "metadata": "not an object",
                "gameState": {"currentLocationId": 42, "chaosFactor": 99, "weather": "rain"},
                "npcs": {"npc_1": {"name": "Mira"}, "npc_2": "garbage"},
                "players": {"u1": {"characterName": "Ayla", "level": "three"}},
            }),
        );

        assert_eq!(snapshot.id.as_str(), "S1");
        assert_eq!(snapshot.metadata, SessionMetadata::default());
        assert_eq!(snapshot.game_state.current_location_id, None);
        assert_eq!(snapshot.game_state.chaos_factor.get(), 9);
        assert_eq!(snapshot.game_state.weather, "rain");
        assert_eq!(snapshot.npcs.len(), 1);
        let ayla = snapshot.player(&PlayerId::from("u1")).unwrap();
        assert_eq!(ayla.character_name, "Ayla");
        assert_eq!(ayla.level, 0);
    }

    #[test]
    fn test_oracle_mode() {
        let mut meta = SessionMetadata::default();
        assert!(meta.is_oracle_mode());
        meta.player_mode = "Solo".into();
        assert!(meta.is_oracle_mode());
        meta.player_mode = "group".into();
        assert!(!meta.is_oracle_mode());
    }

    #[test]
    fn test_non_object_session_is_empty() {
        let snapshot = SessionSnapshot::from_value(SessionId::from("S1"), json!([1, 2]));
        assert!(snapshot.npcs.is_empty());
        assert_eq!(snapshot.game_state.chaos_factor.get(), 5);
    }

    #[test]
    fn test_npcs_here_and_player_view() {
        let snapshot = SessionSnapshot::from_value(
            SessionId::from("S1"),
            json!({
                "gameState": {"currentLocationId": "location_a"},
                "world": {"locations": {"location_a": {"name": "Harbor"}}},
                "npcs": {
                    "npc_1": {"name": "Mira", "locationId": "location_a",
                              "playerKnowledge": {"role": "smuggler"},
                              "masterKnowledge": {"secret": "spy"}},
                    "npc_2": {"name": "Olt", "locationId": "location_b"}
                }
            }),
        );

        assert_eq!(snapshot.current_location().unwrap().name, "Harbor");
        let here: Vec<&String> = snapshot.npcs_here().map(|(id, _)| id).collect();
        assert_eq!(here, vec!["npc_1"]);
        let view = snapshot.npcs["npc_1"].player_view();
        assert_eq!(view, json!({"name": "Mira", "role": "smuggler"}));
    }

    #[test]
    fn test_recent_events_newest_first() {
        let events: Map<String, Value> = (0..15)
            .map(|i| (format!("event_{i}"), json!({"name": format!("e{i}"), "timestamp": i})))
            .collect();
        let snapshot = SessionSnapshot::from_value(
            SessionId::from("S1"),
            json!({"history": {"events": events}}),
        );
        let recent = snapshot.recent_events(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].1.name, "e14");
        assert_eq!(recent[9].1.name, "e5");
    }

    #[test]
    fn test_recent_transcript_window() {
        let chat: Map<String, Value> = (0..6)
            .map(|i| {
                (
                    format!("000000000000{i}-00000{i}"),
                    json!({
                        "timestamp": i,
                        "userId": "u1",
                        "type": "speech",
                        "content": format!("line {i}"),
                    }),
                )
            })
            .collect();
        let snapshot = SessionSnapshot::from_value(
            SessionId::from("S1"),
            json!({"history": {"chat": chat}}),
        );
        let lines: Vec<&str> = snapshot
            .recent_transcript(4)
            .iter()
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4", "line 5"]);
    }

    #[test]
    fn test_new_character_defaults() {
        let sheet = PlayerCharacter::default();
        let json = serde_json::to_value(&sheet).unwrap();
        assert_eq!(
            json,
            json!({
                "characterName": "",
                "level": 1,
                "experience": 0,
                "inventory": {
                    "items": {},
                    "currency": {"platinum": 0, "gold": 10, "silver": 0, "copper": 0}
                }
            })
        );
        assert!(sheet.is_blank());
    }
}
