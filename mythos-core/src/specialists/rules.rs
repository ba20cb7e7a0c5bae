//! Rules lookups.

use super::{OutputField, PromptBuilder, Specialist, SpecialistRequest};
use crate::role::Role;

/// Answers rules questions from the campaign's rules. Proposes no writes.
pub struct RulesExpert;

impl Specialist for RulesExpert {
    fn role(&self) -> Role {
        Role::RulesExpert
    }

    fn prompt(&self, request: &SpecialistRequest<'_>) -> String {
        PromptBuilder::new(request, "You are the Rules Expert of the game master team.")
            .source_of_truth()
            .context("Campaign rules", "campaignRules")
            .input()
            .task(
                "1. Identify the rules question.\n\
                 2. Answer clearly and precisely, strictly from the rules provided.\n\
                 3. Do NOT invent rules that are not in the context; say so when a rule is missing.\n\
                 4. Give a short example of the rule in play if it helps.",
            )
            .output("a clear explanation of the rule", &[OutputField::Metadata])
    }
}
