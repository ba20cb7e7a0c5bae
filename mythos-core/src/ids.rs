//! Identifiers used throughout the engine.
//!
//! Session and player ids are opaque strings chosen by the store or the
//! caller. Entity ids are generated here and carry their kind as a prefix,
//! e.g. `npc_3f9a12bc`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to define a newtype id wrapper around an opaque string.
macro_rules! define_string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

define_string_id!(
    /// Identifier of a session (a campaign) in the world store.
    SessionId
);

define_string_id!(
    /// Stable identity of a human participant.
    PlayerId
);

impl SessionId {
    /// Allocate a fresh session id.
    pub fn generate() -> Self {
        Self(format!("session_{}", Uuid::new_v4().simple()))
    }
}

/// Player id used for narrator-authored transcript entries.
pub const NARRATOR_ID: &str = "gm";

/// The kinds of entity the engine can mint ids for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Npc,
    Location,
    Quest,
    Item,
    Event,
    Faction,
    Poi,
    Region,
    Objective,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Npc,
        EntityKind::Location,
        EntityKind::Quest,
        EntityKind::Item,
        EntityKind::Event,
        EntityKind::Faction,
        EntityKind::Poi,
        EntityKind::Region,
        EntityKind::Objective,
    ];

    /// The id prefix for this kind, without the trailing underscore.
    pub fn tag(&self) -> &'static str {
        match self {
            EntityKind::Npc => "npc",
            EntityKind::Location => "location",
            EntityKind::Quest => "quest",
            EntityKind::Item => "item",
            EntityKind::Event => "event",
            EntityKind::Faction => "faction",
            EntityKind::Poi => "poi",
            EntityKind::Region => "region",
            EntityKind::Objective => "objective",
        }
    }

    /// Recover the kind of an existing entity id from its prefix.
    pub fn of_id(id: &str) -> Option<EntityKind> {
        let (prefix, rest) = id.split_once('_')?;
        if rest.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|kind| kind.tag() == prefix)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Generate a new entity id of the form `{kind}_{8 hex chars}`.
///
/// The suffix is the first group of a random v4 UUID, so collisions within
/// one session are vanishingly unlikely. Nothing is written to the store.
pub fn generate_entity_id(kind: EntityKind) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}_{}", kind.tag(), &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_entity_id_shape() {
        let id = generate_entity_id(EntityKind::Npc);
        let (prefix, suffix) = id.split_once('_').unwrap();
        assert_eq!(prefix, "npc");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_entity_ids_do_not_repeat() {
        let ids: HashSet<String> = (0..2_000)
            .map(|_| generate_entity_id(EntityKind::Location))
            .collect();
        assert_eq!(ids.len(), 2_000);
    }

    #[test]
    fn test_kind_of_id() {
        assert_eq!(EntityKind::of_id("npc_ab12cd34"), Some(EntityKind::Npc));
        assert_eq!(EntityKind::of_id("poi_00000000"), Some(EntityKind::Poi));
        assert_eq!(EntityKind::of_id("dragon_1234"), None);
        assert_eq!(EntityKind::of_id("npc_"), None);
        assert_eq!(EntityKind::of_id("npc"), None);
    }

    #[test]
    fn test_string_ids() {
        let session = SessionId::from("S1");
        assert_eq!(session.as_str(), "S1");
        assert_eq!(format!("{session:?}"), "SessionId(S1)");
        assert!(SessionId::generate().as_str().starts_with("session_"));
    }
}
