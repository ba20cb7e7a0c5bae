//! Engine configuration.

use crate::path::ConflictPolicy;
use std::str::FromStr;
use std::time::Duration;

/// Configuration shared by every turn an [`Orchestrator`](crate::Orchestrator) runs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model used for every completion call.
    pub model: Option<String>,

    /// Maximum tokens per completion.
    pub max_tokens: usize,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// How many recent transcript entries go into each prompt.
    pub history_window: usize,

    /// Budget for the classifier call.
    pub classifier_timeout: Duration,

    /// Budget for each specialist call.
    pub specialist_timeout: Duration,

    /// Budget for the reconciler's synthesis call.
    pub compiler_timeout: Duration,

    /// What to do when a batch writes both a node and its descendant.
    pub conflict_policy: ConflictPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: Some(0.8),
            history_window: 4,
            classifier_timeout: Duration::from_secs(30),
            specialist_timeout: Duration::from_secs(90),
            compiler_timeout: Duration::from_secs(120),
            conflict_policy: ConflictPolicy::DropAncestor,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `MYTHOS_*` environment variables.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(model) = std::env::var("MYTHOS_MODEL") {
            if !model.trim().is_empty() {
                config.model = Some(model.trim().to_string());
            }
        }
        if let Some(v) = env_parse::<usize>("MYTHOS_MAX_TOKENS") {
            config.max_tokens = v;
        }
        if let Some(v) = env_parse::<f32>("MYTHOS_TEMPERATURE") {
            config.temperature = Some(v);
        }
        if let Some(v) = env_parse::<usize>("MYTHOS_HISTORY_WINDOW") {
            config.history_window = v;
        }
        if let Some(v) = env_parse::<u64>("MYTHOS_CLASSIFIER_TIMEOUT_SECS") {
            config.classifier_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("MYTHOS_SPECIALIST_TIMEOUT_SECS") {
            config.specialist_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("MYTHOS_COMPILER_TIMEOUT_SECS") {
            config.compiler_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<ConflictPolicy>("MYTHOS_CONFLICT_POLICY") {
            config.conflict_policy = v;
        }

        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_history_window(mut self, entries: usize) -> Self {
        self.history_window = entries;
        self
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn with_specialist_timeout(mut self, timeout: Duration) -> Self {
        self.specialist_timeout = timeout;
        self
    }

    pub fn with_compiler_timeout(mut self, timeout: Duration) -> Self {
        self.compiler_timeout = timeout;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

fn env_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(variable = name, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.history_window, 4);
        assert_eq!(config.conflict_policy, ConflictPolicy::DropAncestor);
        assert!(config.model.is_none());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_model("claude-haiku")
            .with_history_window(8)
            .with_specialist_timeout(Duration::from_secs(5))
            .with_conflict_policy(ConflictPolicy::MergeIntoDescendants);
        assert_eq!(config.model.as_deref(), Some("claude-haiku"));
        assert_eq!(config.history_window, 8);
        assert_eq!(config.specialist_timeout, Duration::from_secs(5));
        assert_eq!(config.conflict_policy, ConflictPolicy::MergeIntoDescendants);
    }
}
