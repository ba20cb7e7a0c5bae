//! Text-completion boundary.
//!
//! The engine only needs `prompt -> text`. Every caller then decodes one JSON
//! document out of the text with [`parse_json`], and treats a decode failure
//! as malformed output with its own fallback.

use crate::config::EngineConfig;
use async_trait::async_trait;
use claude::{Claude, Request};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The credential a turn's completion calls are made with.
///
/// Supplied per call by the participant; never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Why a completion call produced no text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("completion service unavailable: {0}")]
    Unavailable(String),

    #[error("completion service throttled the request: {0}")]
    Throttled(String),

    #[error("completion timed out")]
    Timeout,

    #[error("credential rejected: {0}")]
    Rejected(String),
}

impl From<claude::Error> for CompletionError {
    fn from(err: claude::Error) -> Self {
        if err.is_throttled() {
            CompletionError::Throttled(err.to_string())
        } else if err.is_auth_failure() {
            CompletionError::Rejected(err.to_string())
        } else {
            CompletionError::Unavailable(err.to_string())
        }
    }
}

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, credential: &ApiKey, prompt: &str) -> Result<String, CompletionError>;
}

#[async_trait]
impl<T: TextCompletion + ?Sized> TextCompletion for Arc<T> {
    async fn complete(&self, credential: &ApiKey, prompt: &str) -> Result<String, CompletionError> {
        (**self).complete(credential, prompt).await
    }
}

/// [`TextCompletion`] backed by the Claude Messages API.
#[derive(Clone)]
pub struct ClaudeCompletion {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeCompletion {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 4096,
            temperature: None,
        }
    }

    /// Apply model, token and temperature settings from `config`.
    pub fn configured(client: Claude, config: &EngineConfig) -> Self {
        let client = match &config.model {
            Some(model) => client.with_model(model.clone()),
            None => client,
        };
        Self {
            client,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl TextCompletion for ClaudeCompletion {
    async fn complete(&self, credential: &ApiKey, prompt: &str) -> Result<String, CompletionError> {
        let mut request = Request::prompt(prompt).with_max_tokens(self.max_tokens);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        let response = self.client.complete_as(credential.expose(), request).await?;
        Ok(response.text())
    }
}

/// Extract the JSON document from completion text.
///
/// Handles ```json fences, bare ``` fences, and prose around a single
/// top-level object or array.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    let open = text.find(['{', '[']);
    let close = text.rfind(['}', ']']);
    match (open, close) {
        (Some(open), Some(close)) if close > open => &text[open..=close],
        _ => text,
    }
}

/// Decode `T` from completion text.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"content": "hi"}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_extract_json_fenced() {
        let text = "Here you go:\n```json\n[\"npc_manager\"]\n```\nDone.";
        assert_eq!(extract_json(text), "[\"npc_manager\"]");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = "Sure! {\"content\": \"x\", \"n\": {\"a\": 1}} Hope that helps.";
        let value: Value = parse_json(text).unwrap();
        assert_eq!(value["n"]["a"], 1);
    }

    #[test]
    fn test_parse_json_rejects_prose() {
        assert!(parse_json::<Value>("I cannot help with that.").is_err());
    }

    #[test]
    fn test_api_key_is_redacted() {
        let key = ApiKey::from("sk-secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert_eq!(key.expose(), "sk-secret");
    }

    #[test]
    fn test_error_classification() {
        let throttled: CompletionError = claude::Error::Api {
            status: 429,
            message: "slow down".into(),
        }
        .into();
        assert!(matches!(throttled, CompletionError::Throttled(_)));

        let rejected: CompletionError = claude::Error::NoApiKey.into();
        assert!(matches!(rejected, CompletionError::Rejected(_)));

        let down: CompletionError = claude::Error::Network("reset".into()).into();
        assert!(matches!(down, CompletionError::Unavailable(_)));
    }
}
