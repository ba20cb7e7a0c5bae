//! World-state store boundary and an in-memory implementation.
//!
//! The store is a hierarchical JSON tree addressed by `/`-separated paths.
//! Sessions live under `campaigns/<sessionId>`; read-only reference data for
//! each game system lives under `global/<system>`.

use crate::error::StoreError;
use crate::ids::SessionId;
use crate::path::{MutationBatch, StorePath, SESSIONS_ROOT};
use crate::transcript::{now_millis, transcript_key, TranscriptEntry};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use tokio::fs;
use tokio::sync::RwLock;

/// Name of the top-level node holding per-system reference data.
pub const GLOBAL_ROOT: &str = "global";

/// Path-addressable persistent store.
#[async_trait]
pub trait WorldStore: Send + Sync {
    /// The full subtree of one session, or `None` if it does not exist.
    async fn read_session(&self, session: &SessionId) -> Result<Option<Value>, StoreError>;

    /// Reference data stored at `global/<key>`.
    async fn read_global(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Apply every write in `batch` as one atomic update. A `null` value
    /// deletes the node. Returns the number of paths written.
    async fn apply_batch(&self, batch: &MutationBatch) -> Result<usize, StoreError>;

    /// Append a transcript entry and return the key it was stored under.
    /// Keys of successive appends compare in append order.
    async fn append_transcript(
        &self,
        session: &SessionId,
        entry: &TranscriptEntry,
    ) -> Result<String, StoreError>;

    /// Create a session subtree. Fails if the session already exists.
    async fn create_session(&self, session: &SessionId, data: Value) -> Result<(), StoreError>;
}

struct Inner {
    root: Value,
    last_millis: i64,
    sequence: u64,
}

/// A [`WorldStore`] held in memory, with optional JSON file persistence.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    /// Create a store over an existing tree.
    pub fn from_value(root: Value) -> Self {
        let root = match root {
            Value::Object(_) => root,
            _ => Value::Object(Map::new()),
        };
        Self {
            inner: RwLock::new(Inner {
                root,
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    /// Load a store previously written with [`save_json`](Self::save_json).
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path).await?;
        let root: Value = serde_json::from_str(&content)?;
        Ok(Self::from_value(root))
    }

    /// Load from `path` if it exists, otherwise start empty.
    pub async fn open_or_default(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        match fs::try_exists(path.as_ref()).await? {
            true => Self::load_json(path).await,
            false => Ok(Self::new()),
        }
    }

    /// Write the whole tree to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let content = {
            let inner = self.inner.read().await;
            serde_json::to_string_pretty(&inner.root)?
        };
        fs::write(path, content).await?;
        Ok(())
    }

    /// A copy of the whole tree.
    pub async fn to_value(&self) -> Value {
        self.inner.read().await.root.clone()
    }

    /// Value at a session path, if present.
    pub async fn get(&self, path: &StorePath) -> Option<Value> {
        let inner = self.inner.read().await;
        let mut node = inner.root.get(SESSIONS_ROOT)?.get(path.session().as_str())?;
        for segment in path.segments() {
            node = node.get(segment)?;
        }
        Some(node.clone())
    }

    /// Seed reference data at `global/<key>`.
    pub async fn set_global(&self, key: &str, value: Value) {
        let mut inner = self.inner.write().await;
        write_node(&mut inner.root, &[GLOBAL_ROOT, key], value);
    }
}

#[async_trait]
impl WorldStore for MemoryStore {
    async fn read_session(&self, session: &SessionId) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .root
            .get(SESSIONS_ROOT)
            .and_then(|sessions| sessions.get(session.as_str()))
            .cloned())
    }

    async fn read_global(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .root
            .get(GLOBAL_ROOT)
            .and_then(|global| global.get(key))
            .cloned())
    }

    async fn apply_batch(&self, batch: &MutationBatch) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut inner = self.inner.write().await;
        for (path, value) in batch.iter() {
            let mut segments: Vec<&str> = Vec::with_capacity(path.segments().len() + 2);
            segments.push(SESSIONS_ROOT);
            segments.push(path.session().as_str());
            segments.extend(path.segments().iter().map(String::as_str));
            write_node(&mut inner.root, &segments, value.clone());
        }

        tracing::debug!(paths = batch.len(), "applied mutation batch");
        Ok(batch.len())
    }

    async fn append_transcript(
        &self,
        session: &SessionId,
        entry: &TranscriptEntry,
    ) -> Result<String, StoreError> {
        let value = serde_json::to_value(entry)?;

        let mut inner = self.inner.write().await;
        inner.last_millis = inner.last_millis.max(now_millis());
        inner.sequence += 1;
        let key = transcript_key(inner.last_millis, inner.sequence);

        write_node(
            &mut inner.root,
            &[SESSIONS_ROOT, session.as_str(), "history", "chat", key.as_str()],
            value,
        );
        Ok(key)
    }

    async fn create_session(&self, session: &SessionId, data: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let exists = inner
            .root
            .get(SESSIONS_ROOT)
            .and_then(|sessions| sessions.get(session.as_str()))
            .is_some();
        if exists {
            return Err(StoreError::Conflict(format!(
                "session {session} already exists"
            )));
        }
        write_node(&mut inner.root, &[SESSIONS_ROOT, session.as_str()], data);
        Ok(())
    }
}

/// Set `root/<segments…>` to `value`, creating intermediate objects.
///
/// A scalar in the way is replaced by an object. `null` removes the node.
fn write_node(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            if value.is_null() {
                return;
            }
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if value.is_null() {
            map.remove(*last);
        } else {
            map.insert(last.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PlayerId;
    use serde_json::json;

    fn path(raw: &str) -> StorePath {
        StorePath::resolve(raw, &SessionId::from("S1")).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_session() {
        let store = MemoryStore::new();
        let s1 = SessionId::from("S1");
        assert!(store.read_session(&s1).await.unwrap().is_none());

        store
            .create_session(&s1, json!({"metadata": {"campaignName": "Test"}}))
            .await
            .unwrap();
        let session = store.read_session(&s1).await.unwrap().unwrap();
        assert_eq!(session["metadata"]["campaignName"], "Test");

        let again = store.create_session(&s1, json!({})).await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_batch_merges_leaves_and_deletes_on_null() {
        let store = MemoryStore::from_value(json!({
            "campaigns": {"S1": {"npcs": {"npc_1": {"name": "Mira", "disposition": "wary"}}}}
        }));

        let batch: MutationBatch = [
            (path("npcs/npc_1/disposition"), json!("friendly")),
            (path("npcs/npc_2"), json!({"name": "Olt"})),
            (path("gameState/weather"), json!("rain")),
        ]
        .into_iter()
        .collect();
        assert_eq!(store.apply_batch(&batch).await.unwrap(), 3);

        assert_eq!(store.get(&path("npcs/npc_1/name")).await, Some(json!("Mira")));
        assert_eq!(
            store.get(&path("npcs/npc_1/disposition")).await,
            Some(json!("friendly"))
        );
        assert_eq!(store.get(&path("gameState/weather")).await, Some(json!("rain")));

        let delete: MutationBatch = [(path("npcs/npc_2"), Value::Null)].into_iter().collect();
        store.apply_batch(&delete).await.unwrap();
        assert_eq!(store.get(&path("npcs/npc_2")).await, None);
    }

    #[tokio::test]
    async fn test_write_through_scalar_replaces_it() {
        let store = MemoryStore::from_value(json!({"campaigns": {"S1": {"rules": "none"}}}));
        let batch: MutationBatch = [(path("rules/combatRules/initiative"), json!("d20"))]
            .into_iter()
            .collect();
        store.apply_batch(&batch).await.unwrap();
        assert_eq!(
            store.get(&path("rules")).await,
            Some(json!({"combatRules": {"initiative": "d20"}}))
        );
    }

    #[tokio::test]
    async fn test_transcript_keys_are_ordered() {
        let store = MemoryStore::new();
        let s1 = SessionId::from("S1");
        let player = PlayerId::from("u1");

        let mut keys = Vec::new();
        for i in 0..50 {
            let entry = TranscriptEntry::from_player(&player, format!("line {i}"));
            keys.push(store.append_transcript(&s1, &entry).await.unwrap());
        }
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let session = store.read_session(&s1).await.unwrap().unwrap();
        assert_eq!(session["history"]["chat"].as_object().unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_globals() {
        let store = MemoryStore::new();
        store.set_global("pathfinder2e", json!({"classes": ["fighter"]})).await;
        let global = store.read_global("pathfinder2e").await.unwrap().unwrap();
        assert_eq!(global["classes"][0], "fighter");
        assert!(store.read_global("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_json() {
        let dir = std::env::temp_dir().join(format!("mythos-store-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let file = dir.join("store.json");

        let store = MemoryStore::new();
        store
            .create_session(&SessionId::from("S1"), json!({"gameState": {"chaosFactor": 5}}))
            .await
            .unwrap();
        store.save_json(&file).await.unwrap();

        let loaded = MemoryStore::load_json(&file).await.unwrap();
        assert_eq!(loaded.to_value().await, store.to_value().await);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
