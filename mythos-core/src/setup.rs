//! Creating a new session from a short description.

use crate::chaos::ChaosFactor;
use crate::completion::{parse_json, ApiKey, TextCompletion};
use crate::error::{EngineError, Result};
use crate::ids::{PlayerId, SessionId};
use crate::proposal::{object_or_empty, text_or_empty};
use crate::session::PlayerCharacter;
use crate::store::WorldStore;
use crate::transcript::{now_millis, EntryKind, TranscriptEntry};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// What the owner asked for.
#[derive(Debug, Clone, Default)]
pub struct SetupRequest {
    pub campaign_name: String,
    pub setting_summary: String,
    pub tone: String,
    /// `solo` or `group`.
    pub player_mode: String,
    pub duration: String,
    pub system: String,
    pub owner: PlayerId,
}

impl SetupRequest {
    pub fn new(campaign_name: impl Into<String>, owner: impl Into<PlayerId>) -> Self {
        Self {
            campaign_name: campaign_name.into(),
            player_mode: "solo".to_string(),
            owner: owner.into(),
            ..Self::default()
        }
    }

    pub fn with_setting(mut self, summary: impl Into<String>) -> Self {
        self.setting_summary = summary.into();
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = tone.into();
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.player_mode = mode.into();
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = duration.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }
}

/// A freshly created session and its opening message.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupResult {
    pub session: SessionId,
    pub initial_message: String,
    pub html_initial_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetupEnvelope {
    campaign_setup: CampaignSetup,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CampaignSetup {
    #[serde(deserialize_with = "object_or_empty")]
    metadata: Map<String, Value>,
    #[serde(deserialize_with = "object_or_empty")]
    world: Map<String, Value>,
    #[serde(deserialize_with = "object_or_empty")]
    npcs: Map<String, Value>,
    #[serde(deserialize_with = "object_or_empty")]
    quests: Map<String, Value>,
    #[serde(deserialize_with = "object_or_empty")]
    events: Map<String, Value>,
    #[serde(deserialize_with = "object_or_empty")]
    game_state: Map<String, Value>,
    #[serde(deserialize_with = "text_or_empty")]
    initial_message: String,
    #[serde(deserialize_with = "text_or_empty")]
    html_initial_message: String,
}

const WORLD_SECTIONS: [&str; 5] =
    ["history", "campaignHistory", "regions", "locations", "factions"];

/// Builds the opening state of a session with one completion call.
pub struct SessionSetup {
    store: Arc<dyn WorldStore>,
    completion: Arc<dyn TextCompletion>,
    timeout: Duration,
}

impl SessionSetup {
    pub fn new(store: Arc<dyn WorldStore>, completion: Arc<dyn TextCompletion>) -> Self {
        Self {
            store,
            completion,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Generate, store and announce a new session.
    ///
    /// Nothing is written unless the completion's output decodes.
    #[tracing::instrument(skip_all, fields(campaign = %request.campaign_name))]
    pub async fn create_session(
        &self,
        request: &SetupRequest,
        credential: &ApiKey,
    ) -> Result<SetupResult> {
        let prompt = setup_prompt(request);
        let text = tokio::time::timeout(self.timeout, self.completion.complete(credential, &prompt))
            .await
            .map_err(|_| EngineError::UpstreamUnavailable("session setup timed out".to_string()))?
            .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;

        let envelope: SetupEnvelope =
            parse_json(&text).map_err(|e| EngineError::MalformedUpstreamOutput(e.to_string()))?;
        let setup = envelope.campaign_setup;

        let session = SessionId::generate();
        let initial_message = setup.initial_message.clone();
        let html_initial_message = setup.html_initial_message.clone();
        let data = session_tree(request, setup);

        self.store.create_session(&session, data).await?;
        self.store
            .append_transcript(
                &session,
                &TranscriptEntry::from_narrator(
                    initial_message.clone(),
                    Some(html_initial_message.clone()).filter(|html| !html.is_empty()),
                )
                .with_kind(EntryKind::System),
            )
            .await?;

        tracing::info!(%session, "session created");
        Ok(SetupResult {
            session,
            initial_message,
            html_initial_message,
        })
    }
}

/// The stored session: generated content plus the fields the engine owns.
fn session_tree(request: &SetupRequest, setup: CampaignSetup) -> Value {
    let now = now_millis();

    let mut metadata = setup.metadata;
    for (key, value) in [
        ("campaignName", &request.campaign_name),
        ("settingSummary", &request.setting_summary),
        ("tone", &request.tone),
        ("playerMode", &request.player_mode),
        ("duration", &request.duration),
        ("system", &request.system),
    ] {
        let missing = metadata
            .get(key)
            .and_then(Value::as_str)
            .map_or(true, str::is_empty);
        if missing {
            metadata.insert(key.to_string(), json!(value));
        }
    }
    metadata.insert("createdBy".into(), json!(request.owner.as_str()));
    metadata.insert("createdAt".into(), json!(now));
    metadata.insert("updatedAt".into(), json!(now));

    let world: Map<String, Value> = WORLD_SECTIONS
        .iter()
        .map(|key| {
            let value = setup.world.get(*key).cloned().unwrap_or_else(|| match *key {
                "history" | "campaignHistory" => json!(""),
                _ => json!({}),
            });
            (key.to_string(), value)
        })
        .collect();

    let mut game_state = setup.game_state;
    game_state
        .entry("chaosFactor")
        .or_insert_with(|| json!(ChaosFactor::INITIAL));
    if !matches!(game_state.get("combat"), Some(Value::Object(_))) {
        game_state.insert("combat".into(), json!({}));
    }
    if let Some(Value::Object(combat)) = game_state.get_mut("combat") {
        combat.entry("inCombat").or_insert(json!(false));
    }

    let mut players = Map::new();
    players.insert(
        request.owner.to_string(),
        serde_json::to_value(PlayerCharacter::default()).unwrap_or_else(|_| json!({})),
    );

    json!({
        "metadata": metadata,
        "world": world,
        "npcs": setup.npcs,
        "quests": setup.quests,
        "events": setup.events,
        "gameState": game_state,
        "players": players,
        "rules": {},
        "history": {"events": {}},
    })
}

fn setup_prompt(request: &SetupRequest) -> String {
    format!(
        r#"# Campaign setup

You are the Campaign Setup specialist of the game master team. Create the complete opening state of a new tabletop role-playing campaign.

## Campaign
- Name: {name}
- Setting summary: {setting}
- Tone: {tone}
- Mode: {mode}
- Duration: {duration}
- System: {system}

## Your task
1. World history: a rich history suited to the tone.
2. Campaign history: the past and current events this campaign starts from.
3. Starting location: name, description and at least 3 points of interest, keeping masterKnowledge separate from playerKnowledge.
4. At least 3 NPCs present at the starting location; at least one holds a quest or important information.
5. At least 2 events happening at or near the starting location.
6. At least 2 factions with goals and relations to each other.
7. At least 2 starting quests with objectives, rewards and complications.
8. An opening message that sets the tone, describes what the participant perceives and ends with a hook.

Every entity id is `<kind>_<8 hex chars>` (location_, poi_, npc_, quest_, event_, faction_, region_); refer to other entities by id only.
Format the HTML opening message with <h2>/<h3>, <p>, <strong>, <em>, <blockquote>, <div class="description"> and <div class="npc-dialogue">.

## Output
Return ONE JSON object:
{{"campaignSetup": {{
  "metadata": {{"campaignName": "...", "settingSummary": "...", "tone": "...", "system": "..."}},
  "world": {{"history": "...", "campaignHistory": "...", "regions": {{}}, "locations": {{}}, "factions": {{}}}},
  "npcs": {{}}, "quests": {{}}, "events": {{}},
  "gameState": {{"currentLocationId": "location_...", "activeQuestIds": [], "timeOfDay": "morning", "weather": "clear", "combat": {{"inCombat": false}}}},
  "initialMessage": "plain text opening",
  "htmlInitialMessage": "HTML opening"
}}}}"#,
        name = request.campaign_name,
        setting = request.setting_summary,
        tone = request.tone,
        mode = request.player_mode,
        duration = request.duration,
        system = request.system,
    )
}
