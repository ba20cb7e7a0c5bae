//! Items and currency.

use super::{OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::ids::EntityKind;
use crate::path::SESSIONS_ROOT;
use crate::role::Role;

/// Inventory specialist.
///
/// Moves items between the location and the acting participant's inventory
/// at `players/<playerId>/inventory`, and creates new items.
pub struct InventoryManager;

impl Specialist for InventoryManager {
    fn role(&self) -> Role {
        Role::InventoryManager
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        let inventory_path = format!(
            "{SESSIONS_ROOT}/{}/players/{}/inventory",
            request.session, request.player
        );
        let task = format!(
            "1. Decide whether the input concerns an item already carried (update it), a new item \
             (create it with a fresh `item_` id) or an item in the surroundings (move it into the \
             inventory).\n\
             2. Handle taking, using, equipping, selling, buying, trading, examining and repairing.\n\
             3. A new item needs a name, description, properties, value, weight, rarity and type.\n\
             4. Update the inventory at `{inventory_path}`: items by id, quantities, equipped \
             state, and `currency` (platinum, gold, silver, copper).\n\
             5. Describe the effect of consumables and equipment, and respect carrying limits."
        );

        PromptBuilder::new(request, "You are the Inventory Manager of the game master team.")
            .source_of_truth()
            .entity_protocol(&[EntityKind::Item])
            .context("Participant's inventory", "playerInventory")
            .context("Items available here", "availableItems")
            .input()
            .task(&task)
            .output(
                "what changed in the inventory or what the item did",
                &[
                    OutputField::DatabaseUpdates,
                    OutputField::NewEntities,
                    OutputField::EntityUpdates,
                ],
            )
    }
}
