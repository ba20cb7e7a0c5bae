//! Narrative prose.

use super::{campaign_tone, OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::role::Role;

/// Writes the scene. Always activated; proposes no writes.
pub struct NarrativeWeaver;

impl Specialist for NarrativeWeaver {
    fn role(&self) -> Role {
        Role::NarrativeWeaver
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        let task = format!(
            "1. Write a vivid, engaging narrative response that keeps the {} tone, uses \
             sensory detail, and conveys the emotions and reactions of present NPCs.\n\
             2. Reveal only what is in `playerKnowledge`; never expose `masterKnowledge`.\n\
             3. Add atmospheric detail that enriches the world without contradicting it.",
            campaign_tone(request.context)
        );

        PromptBuilder::new(request, "You are the Narrative Weaver of the game master team.")
            .source_of_truth()
            .context("NPCs present", "visibleNpcs")
            .context("Recent events (newest first)", "recentEvents")
            .input()
            .task(&task)
            .output("the narrative text", &[OutputField::Metadata])
    }
}
