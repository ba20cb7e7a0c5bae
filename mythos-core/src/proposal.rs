//! What a specialist proposes for a turn.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One specialist's contribution: prose plus proposed writes.
///
/// Raw paths in `database_updates` are not trusted; the reconciler resolves
/// them into the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ProposalWire")]
pub struct Proposal {
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rich_content: Option<String>,

    /// Raw path -> value writes.
    pub database_updates: Map<String, Value>,

    /// Entity id (or raw path) -> full entity, for entities that do not exist yet.
    pub new_entities: Map<String, Value>,

    /// Entity id (or raw path) -> partial entity; only named fields change.
    pub entity_updates: Map<String, Value>,

    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// A proposal as models write it. Some replies use the older `htmlContent`
/// key, sometimes next to `richContent`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposalWire {
    #[serde(default, deserialize_with = "text_or_empty")]
    content: String,
    #[serde(default)]
    rich_content: Option<String>,
    #[serde(default)]
    html_content: Option<String>,
    #[serde(default, deserialize_with = "object_or_empty")]
    database_updates: Map<String, Value>,
    #[serde(default, deserialize_with = "object_or_empty")]
    new_entities: Map<String, Value>,
    #[serde(default, deserialize_with = "object_or_empty")]
    entity_updates: Map<String, Value>,
    #[serde(default)]
    metadata: Value,
}

impl From<ProposalWire> for Proposal {
    fn from(wire: ProposalWire) -> Self {
        Self {
            content: wire.content,
            rich_content: wire.rich_content.or(wire.html_content),
            database_updates: wire.database_updates,
            new_entities: wire.new_entities,
            entity_updates: wire.entity_updates,
            metadata: wire.metadata,
        }
    }
}

impl Proposal {
    /// Plain text only, no writes.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// The neutral apology used when a specialist produced nothing usable.
    pub fn apology() -> Self {
        let text = "Sorry, something went wrong while working that out. Could you try again?";
        Self {
            content: text.to_string(),
            rich_content: Some(format!("<div class='system-message'><p>{text}</p></div>")),
            ..Self::default()
        }
    }

    pub fn has_mutations(&self) -> bool {
        !(self.database_updates.is_empty()
            && self.new_entities.is_empty()
            && self.entity_updates.is_empty())
    }
}

pub(crate) fn text_or_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

pub(crate) fn object_or_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Map<String, Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_html_key() {
        let proposal: Proposal = serde_json::from_value(json!({
            "content": "Mira nods.",
            "htmlContent": "<p>Mira nods.</p>",
            "databaseUpdates": {"campaigns/S1/npcs/npc_1/disposition": "friendly"}
        }))
        .unwrap();
        assert_eq!(proposal.rich_content.as_deref(), Some("<p>Mira nods.</p>"));
        assert!(proposal.has_mutations());
    }

    #[test]
    fn test_both_html_keys_prefer_rich_content() {
        let proposal: Proposal = serde_json::from_str(
            r#"{"content": "Mira nods.",
                "richContent": "<p><em>Mira</em> nods.</p>",
                "htmlContent": "<p>Mira nods.</p>"}"#,
        )
        .unwrap();
        assert_eq!(proposal.rich_content.as_deref(), Some("<p><em>Mira</em> nods.</p>"));

        let proposal: Proposal = serde_json::from_str(
            r#"{"content": "Mira nods.", "richContent": null, "htmlContent": "<p>Mira nods.</p>"}"#,
        )
        .unwrap();
        assert_eq!(proposal.rich_content.as_deref(), Some("<p>Mira nods.</p>"));
    }

    #[test]
    fn test_odd_field_shapes_are_tolerated() {
        let proposal: Proposal = serde_json::from_value(json!({
            "content": 7,
            "databaseUpdates": ["not", "a", "map"],
            "newEntities": null
        }))
        .unwrap();
        assert_eq!(proposal.content, "7");
        assert!(!proposal.has_mutations());
    }

    #[test]
    fn test_apology_has_no_mutations() {
        let apology = Proposal::apology();
        assert!(!apology.content.is_empty());
        assert!(!apology.has_mutations());
    }
}
