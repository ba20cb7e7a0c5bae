//! Quests and objectives.

use super::{OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::ids::EntityKind;
use crate::role::Role;

const TASK: &str = "\
1. Decide whether the input concerns an existing quest (update it), a new quest (create it \
with a fresh `quest_` id) or an objective inside a quest (update or create it with its own \
`objective_` id).
2. A new quest needs clear objectives, fitting rewards, and links to NPCs and locations by id.
3. For progress on an existing quest, mark completed objectives, reveal new information and \
set the next steps, changing only what changed.
4. Hand out rewards and consequences (experience, items, faction reputation) and add \
follow-up quests if appropriate. Keep `gameState/activeQuestIds` current.";

pub struct QuestManager;

impl Specialist for QuestManager {
    fn role(&self) -> Role {
        Role::QuestManager
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        PromptBuilder::new(request, "You are the Quest Manager of the game master team.")
            .source_of_truth()
            .entity_protocol(&[EntityKind::Quest, EntityKind::Objective])
            .context("Existing quests", "quests")
            .context("Relevant NPCs", "relevantNpcs")
            .input()
            .task(TASK)
            .output(
                "the quest or the progress update",
                &[
                    OutputField::DatabaseUpdates,
                    OutputField::NewEntities,
                    OutputField::EntityUpdates,
                ],
            )
    }
}
