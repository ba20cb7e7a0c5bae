//! Chat transcript entries.

use crate::ids::{PlayerId, NARRATOR_ID};
use serde::{Deserialize, Serialize};

/// What kind of line an entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Something said or narrated in the fiction.
    #[default]
    Speech,
    /// Out-of-fiction text, e.g. the opening message of a session.
    System,
}

/// One line of a session's chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: EntryKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
}

impl TranscriptEntry {
    /// A line typed by a participant.
    pub fn from_player(player: &PlayerId, content: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            user_id: player.to_string(),
            kind: EntryKind::Speech,
            content: content.into(),
            html_content: None,
        }
    }

    /// A line authored by the narrator.
    pub fn from_narrator(content: impl Into<String>, html: Option<String>) -> Self {
        Self {
            timestamp: now_millis(),
            user_id: NARRATOR_ID.to_string(),
            kind: EntryKind::Speech,
            content: content.into(),
            html_content: html,
        }
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_narrator(&self) -> bool {
        self.user_id == NARRATOR_ID
    }

    /// `"<speaker>: <content>"`, as used in prompts.
    pub fn as_prompt_line(&self) -> String {
        let speaker = if self.is_narrator() {
            "Narrator"
        } else {
            self.user_id.as_str()
        };
        format!("{speaker}: {}", self.content)
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Key under which a transcript entry is stored.
///
/// Zero-padded so that string order equals append order.
pub fn transcript_key(millis: i64, sequence: u64) -> String {
    format!("{:013}-{:06}", millis.max(0), sequence % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_matches_append_order() {
        let a = transcript_key(999, 1);
        let b = transcript_key(1_000, 2);
        let c = transcript_key(1_000, 10);
        assert!(a < b && b < c);
        assert_eq!(c, "0000000001000-000010");
    }

    #[test]
    fn test_entry_wire_format() {
        let rich = Some("<p>The door creaks.</p>".to_string());
        let entry = TranscriptEntry::from_narrator("The door creaks.", rich);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["userId"], "gm");
        assert_eq!(json["type"], "speech");
        assert_eq!(json["htmlContent"], "<p>The door creaks.</p>");

        let player = TranscriptEntry::from_player(&PlayerId::from("u1"), "hello");
        let json = serde_json::to_value(&player).unwrap();
        assert!(json.get("htmlContent").is_none());
        assert_eq!(player.as_prompt_line(), "u1: hello");
    }
}
