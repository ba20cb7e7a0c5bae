//! Locations and points of interest.

use super::{campaign_tone, OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::ids::EntityKind;
use crate::role::Role;

pub struct WorldBuilder;

impl Specialist for WorldBuilder {
    fn role(&self) -> Role {
        Role::WorldBuilder
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        let task = format!(
            "1. Decide whether the input concerns the current location (update it), a new location \
             (create it with a fresh `location_` id) or a place inside the current location \
             (create a point of interest with a fresh `poi_` id and `parentLocationId`).\n\
             2. A new location needs a name, a vivid description, a type, its region id if any, \
             notable features, present NPC ids, item ids, dangers, and connections to other \
             locations by id.\n\
             3. When exploring an existing place, reveal new details as appropriate and update \
             only the fields that change (objects, exits, present NPCs, conditions).\n\
             4. When the participants move, set `gameState/currentLocationId` to the new location id.\n\
             Keep the {} tone and the established geography.",
            campaign_tone(request.context)
        );

        PromptBuilder::new(request, "You are the World Builder of the game master team.")
            .source_of_truth()
            .entity_protocol(&[EntityKind::Location, EntityKind::Poi, EntityKind::Region])
            .context("Existing locations", "locations")
            .input()
            .task(&task)
            .output(
                "a vivid description of the place",
                &[
                    OutputField::DatabaseUpdates,
                    OutputField::NewEntities,
                    OutputField::EntityUpdates,
                ],
            )
    }
}
