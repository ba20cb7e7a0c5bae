//! Specialist roles.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the nine specialist roles a turn can activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    CharacterCreation,
    NpcManager,
    WorldBuilder,
    CombatManager,
    QuestManager,
    RulesExpert,
    #[serde(alias = "narrative_prose")]
    NarrativeWeaver,
    InventoryManager,
    EntityRelationshipManager,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::CharacterCreation,
        Role::NpcManager,
        Role::WorldBuilder,
        Role::CombatManager,
        Role::QuestManager,
        Role::RulesExpert,
        Role::NarrativeWeaver,
        Role::InventoryManager,
        Role::EntityRelationshipManager,
    ];

    /// Wire tag used in prompts and classifier output.
    pub fn tag(&self) -> &'static str {
        match self {
            Role::CharacterCreation => "character_creation",
            Role::NpcManager => "npc_manager",
            Role::WorldBuilder => "world_builder",
            Role::CombatManager => "combat_manager",
            Role::QuestManager => "quest_manager",
            Role::RulesExpert => "rules_expert",
            Role::NarrativeWeaver => "narrative_weaver",
            Role::InventoryManager => "inventory_manager",
            Role::EntityRelationshipManager => "entity_relationship_manager",
        }
    }

    /// Parse a tag, tolerating case, whitespace and the legacy narrative alias.
    pub fn from_tag(tag: &str) -> Option<Role> {
        let tag = tag.trim().trim_matches('"').to_ascii_lowercase();
        if tag == "narrative_prose" {
            return Some(Role::NarrativeWeaver);
        }
        Self::ALL.into_iter().find(|role| role.tag() == tag)
    }

    /// What the role is for, as listed to the classifier.
    pub fn summary(&self) -> &'static str {
        match self {
            Role::CharacterCreation => "create or update player characters",
            Role::NpcManager => "create NPCs or handle interaction with them",
            Role::WorldBuilder => "create or describe locations and scenery",
            Role::CombatManager => "run combat situations",
            Role::QuestManager => "create or update quests",
            Role::RulesExpert => "answer questions about the game system's rules",
            Role::NarrativeWeaver => "write narrative responses and descriptions",
            Role::InventoryManager => "manage items and inventory",
            Role::EntityRelationshipManager => "manage relationships between entities",
        }
    }

    /// Rank used to settle contradictions between proposals; higher wins.
    ///
    /// Narrative prose is the most general role, combat the most specific.
    pub fn specificity(&self) -> u8 {
        match self {
            Role::NarrativeWeaver => 0,
            Role::EntityRelationshipManager => 1,
            Role::WorldBuilder => 2,
            Role::NpcManager => 3,
            Role::QuestManager => 4,
            Role::InventoryManager => 5,
            Role::CharacterCreation => 6,
            Role::RulesExpert => 7,
            Role::CombatManager => 8,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_tag(s).ok_or_else(|| EngineError::InvalidRole(s.to_string()))
    }
}
