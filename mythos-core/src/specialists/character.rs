//! Character creation and sheet updates.

use super::{campaign_tone, OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::role::Role;
use crate::path::SESSIONS_ROOT;

/// Guides a participant through building or changing their character.
///
/// Writes go to `players/<playerId>` only; options come from the system
/// reference data, never from memory.
pub struct CharacterCreation;

impl Specialist for CharacterCreation {
    fn role(&self) -> Role {
        Role::CharacterCreation
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        let sheet_path = format!("{SESSIONS_ROOT}/{}/players/{}", request.session, request.player);
        let task = format!(
            "Guide the participant through creating or updating their character:\n\
             1. Offer only ancestries, classes, backgrounds and feats present in the system reference.\n\
             2. Walk the steps in order: ancestry, background, class, free boosts, skills, feats, \
             then derived statistics (hit points, armor class, saves).\n\
             3. Ask for whatever choice is still missing instead of deciding for the participant.\n\
             4. Store the sheet under `{sheet_path}`, writing only fields that changed.\n\
             Keep the {} tone of the campaign.",
            campaign_tone(request.context)
        );

        PromptBuilder::new(
            request,
            "You are the Character Creation specialist of the game master team.",
        )
        .source_of_truth()
        .entity_protocol(&[])
        .context("Current character (null if none yet)", "currentCharacter")
        .context("System reference", "systemReference")
        .input()
        .task(&task)
        .output(
            "explanation of the step or change for the participant",
            &[OutputField::DatabaseUpdates],
        )
    }
}
