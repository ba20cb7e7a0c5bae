//! Cross references between entities.

use super::{OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::ids::EntityKind;
use crate::role::Role;

const TASK: &str = "\
1. Identify the entities the input mentions: NPCs, locations, factions, quests, items.
2. Work out the relation being set up or changed: an NPC working at a location or belonging \
to a faction, a place inside another place, an item owned by someone, friendship, rivalry or \
family between NPCs, alliances between factions.
3. Update both sides of the relation with id references so it reads the same from either end, \
changing only the affected fields.
4. If a mentioned entity does not exist yet, create it with a fresh id and link it at once.
5. Describe the relation narratively.";

/// Keeps id references between entities consistent in both directions.
pub struct RelationshipManager;

impl Specialist for RelationshipManager {
    fn role(&self) -> Role {
        Role::EntityRelationshipManager
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        PromptBuilder::new(request, "You are the Relationship Manager of the game master team.")
            .source_of_truth()
            .entity_protocol(&[
                EntityKind::Npc,
                EntityKind::Location,
                EntityKind::Faction,
                EntityKind::Quest,
                EntityKind::Item,
            ])
            .context("NPCs", "npcs")
            .context("Locations", "locations")
            .context("Factions", "factions")
            .context("Quests", "quests")
            .input()
            .task(TASK)
            .output(
                "a narrative description of the relation",
                &[
                    OutputField::DatabaseUpdates,
                    OutputField::NewEntities,
                    OutputField::EntityUpdates,
                ],
            )
    }
}
