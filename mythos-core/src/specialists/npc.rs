//! NPC personality and dialogue.

use super::{campaign_tone, OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::ids::EntityKind;
use crate::role::Role;

/// NPC specialist.
///
/// Handles:
/// - Creating NPCs with unique ids
/// - In-character reactions and dialogue
/// - Disposition and relationship changes
pub struct NpcManager;

impl Specialist for NpcManager {
    fn role(&self) -> Role {
        Role::NpcManager
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        let task = format!(
            "1. Decide whether the input concerns an existing NPC (update it) or a new one \
             (create it with a fresh `npc_` id).\n\
             2. A new NPC needs a name, physical description, personality and motivations, basic \
             statistics, `locationId`, `factionId` if any, relationships by id, and separate \
             `playerKnowledge` / `masterKnowledge`.\n\
             3. For an interaction, answer in character, stay consistent with earlier \
             interactions, and update the NPC's disposition towards the participants if it changes.\n\
             4. Update location, disposition, knowledge, inventory and relationships only where \
             they change.\n\
             Keep the {} tone and each NPC's established personality.",
            campaign_tone(request.context)
        );

        PromptBuilder::new(request, "You are the NPC Manager of the game master team.")
            .source_of_truth()
            .entity_protocol(&[EntityKind::Npc])
            .context("Existing NPCs", "npcs")
            .input()
            .task(&task)
            .output(
                "the NPC's description or reaction and dialogue",
                &[
                    OutputField::DatabaseUpdates,
                    OutputField::NewEntities,
                    OutputField::EntityUpdates,
                ],
            )
    }
}
