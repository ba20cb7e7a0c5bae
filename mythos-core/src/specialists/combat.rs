//! Combat resolution.

use super::{OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::role::Role;

const TASK: &str = "\
1. Resolve the participant's combat action: attacks, spells, movement, special actions.
2. Apply the campaign's combat rules: attack rolls against armor class, damage, critical \
successes and failures, conditions.
3. Run initiative order and decide NPC actions from their intelligence and tactics.
4. Update every participant: hit points, positions, conditions, spent resources.
5. Update existing player sheets and NPCs (never create players) and the combat state at \
`gameState/combat`, including `inCombat`.";

/// Runs fights. Updates existing entities; it does not create new ones.
pub struct CombatManager;

impl Specialist for CombatManager {
    fn role(&self) -> Role {
        Role::CombatManager
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        PromptBuilder::new(request, "You are the Combat Manager of the game master team.")
            .source_of_truth()
            .entity_protocol(&[])
            .context("Combat state", "combatState")
            .context("Player characters", "players")
            .context("NPCs in the fight", "combatNpcs")
            .context("Combat rules", "combatRules")
            .input()
            .task(TASK)
            .output(
                "a narrative account of the actions and their results",
                &[OutputField::DatabaseUpdates, OutputField::EntityUpdates],
            )
    }
}
