//! Structured world-store paths and write batches.
//!
//! A [`StorePath`] is a session id plus a list of segments. It is rendered as
//! `campaigns/<session>/<segments…>` only at the store boundary, so a write
//! can never silently address another session: raw strings coming back from
//! a completion are parsed with [`StorePath::resolve`], which forces the
//! session segment to the session the turn belongs to.

use crate::ids::SessionId;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Name of the top-level node that holds every session.
pub const SESSIONS_ROOT: &str = "campaigns";

/// Errors from building or parsing a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path '{0}' addresses a session root or collection, not a node inside a session")]
    RootWrite(String),

    #[error("invalid path segment '{segment}' in '{path}'")]
    InvalidSegment { path: String, segment: String },
}

/// A node address inside one session.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    session: SessionId,
    segments: Vec<String>,
}

impl StorePath {
    /// Build a path inside `session` from segments.
    pub fn new<I, S>(session: &SessionId, segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        let rendered = format!("{}/{}/{}", SESSIONS_ROOT, session, segments.join("/"));
        if segments.is_empty() {
            return Err(PathError::RootWrite(rendered));
        }
        for segment in &segments {
            validate_segment(segment, &rendered)?;
        }
        Ok(Self {
            session: session.clone(),
            segments,
        })
    }

    /// Parse a raw path and pin it to `current`.
    ///
    /// Accepts absolute paths (`campaigns/<any>/npcs/x`) and session-relative
    /// paths (`npcs/x`). Whatever session an absolute path names, the result
    /// addresses `current`.
    pub fn resolve(raw: &str, current: &SessionId) -> Result<Self, PathError> {
        let parts: Vec<&str> = raw
            .trim()
            .split('/')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let segments = match parts.first() {
            Some(&SESSIONS_ROOT) if parts.len() < 3 => {
                return Err(PathError::RootWrite(raw.to_string()));
            }
            Some(&SESSIONS_ROOT) => &parts[2..],
            Some(_) => &parts[..],
            None => return Err(PathError::RootWrite(raw.to_string())),
        };

        for segment in segments {
            validate_segment(segment, raw)?;
        }

        Ok(Self {
            session: current.clone(),
            segments: segments.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Append one segment.
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, PathError> {
        let segment = segment.into();
        validate_segment(&segment, &self.to_string())?;
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self {
            session: self.session.clone(),
            segments,
        })
    }

    /// The same node in another session.
    pub fn rebase(&self, session: &SessionId) -> Self {
        Self {
            session: session.clone(),
            segments: self.segments.clone(),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Segments joined with `/`, without the session prefix.
    pub fn relative(&self) -> String {
        self.segments.join("/")
    }

    /// True when `other` lies strictly below `self`.
    pub fn is_strict_ancestor_of(&self, other: &StorePath) -> bool {
        self.session == other.session
            && other.segments.len() > self.segments.len()
            && other.segments.starts_with(&self.segments)
    }

    /// True when the path is `relative` inside its session, e.g. `gameState/currentLocationId`.
    pub fn is(&self, relative: &str) -> bool {
        self.segments.iter().map(String::as_str).eq(relative.split('/'))
    }
}

fn validate_segment(segment: &str, path: &str) -> Result<(), PathError> {
    let bad = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '#', '$', '[', ']']);
    if bad {
        return Err(PathError::InvalidSegment {
            path: path.to_string(),
            segment: segment.to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", SESSIONS_ROOT, self.session)?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath({self})")
    }
}

/// Split a value into one write per leaf.
///
/// Objects are descended into; everything else (including arrays and empty
/// objects) is a leaf. Writing the result leaves sibling keys that the value
/// does not mention untouched.
pub fn leaf_writes(path: &StorePath, value: &Value) -> Vec<(StorePath, Value)> {
    let mut out = Vec::new();
    collect_leaves(path, value, true, &mut out);
    out
}

/// Like [`leaf_writes`], but an empty object names no field and writes nothing.
///
/// Used for partial entity updates, where `{}` means "no change".
pub fn update_writes(path: &StorePath, value: &Value) -> Vec<(StorePath, Value)> {
    let mut out = Vec::new();
    collect_leaves(path, value, false, &mut out);
    out
}

fn collect_leaves(
    path: &StorePath,
    value: &Value,
    keep_empty: bool,
    out: &mut Vec<(StorePath, Value)>,
) {
    match value {
        Value::Object(map) if map.is_empty() && !keep_empty => {}
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                match path.child(key.clone()) {
                    Ok(child_path) => collect_leaves(&child_path, child, keep_empty, out),
                    Err(e) => tracing::warn!(error = %e, "skipping unaddressable field"),
                }
            }
        }
        _ => out.push((path.clone(), value.clone())),
    }
}

/// How to treat a batch that writes both a node and one of its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Drop the ancestor write entirely; the deeper write wins.
    #[default]
    DropAncestor,
    /// Expand the ancestor's object payload into leaf writes first, so its
    /// unrelated keys survive; the deeper write still wins where they overlap.
    MergeIntoDescendants,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" | "drop_ancestor" | "drop-ancestor" => Ok(ConflictPolicy::DropAncestor),
            "merge" | "merge_into_descendants" | "merge-into-descendants" => {
                Ok(ConflictPolicy::MergeIntoDescendants)
            }
            other => Err(format!("unknown conflict policy '{other}'")),
        }
    }
}

/// A flat set of `path -> value` writes, committed to the store in one call.
///
/// Inserting a path that is already present replaces its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationBatch {
    writes: BTreeMap<StorePath, Value>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: StorePath, value: Value) {
        self.writes.insert(path, value);
    }

    /// Insert only if no write to `path` exists yet.
    pub fn insert_if_absent(&mut self, path: StorePath, value: Value) {
        self.writes.entry(path).or_insert(value);
    }

    /// Append all writes of `other`; `other` wins on identical paths.
    pub fn extend(&mut self, other: MutationBatch) {
        self.writes.extend(other.writes);
    }

    pub fn get(&self, path: &StorePath) -> Option<&Value> {
        self.writes.get(path)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &StorePath> {
        self.writes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StorePath, &Value)> {
        self.writes.iter()
    }

    /// Force every write into `session`.
    ///
    /// When two writes collapse onto the same path the one that sorted later
    /// in the original batch wins.
    pub fn rebased(self, session: &SessionId) -> MutationBatch {
        let mut out = MutationBatch::new();
        for (path, value) in self.writes {
            out.insert(path.rebase(session), value);
        }
        out
    }

    /// Remove every write that has a strict descendant in the batch.
    ///
    /// Returns the filtered batch and the discarded paths. The result never
    /// contains two paths in an ancestor/descendant relation, and filtering
    /// it again changes nothing.
    pub fn without_ancestor_conflicts(
        self,
        policy: ConflictPolicy,
    ) -> (MutationBatch, Vec<StorePath>) {
        let mut writes = self.writes;

        if policy == ConflictPolicy::MergeIntoDescendants {
            let ancestors: Vec<StorePath> = conflicting_ancestors(&writes);
            for ancestor in ancestors {
                if let Some(value) = writes.remove(&ancestor) {
                    for (leaf, leaf_value) in leaf_writes(&ancestor, &value) {
                        writes.entry(leaf).or_insert(leaf_value);
                    }
                }
            }
        }

        let discarded = conflicting_ancestors(&writes);
        for path in &discarded {
            writes.remove(path);
        }

        (MutationBatch { writes }, discarded)
    }

    pub fn into_inner(self) -> BTreeMap<StorePath, Value> {
        self.writes
    }
}

/// Paths in `writes` that have at least one strict descendant.
///
/// In the ordered map every descendant of a path sorts directly after it,
/// so checking the immediate successor is enough.
fn conflicting_ancestors(writes: &BTreeMap<StorePath, Value>) -> Vec<StorePath> {
    let keys: Vec<&StorePath> = writes.keys().collect();
    keys.windows(2)
        .filter(|pair| pair[0].is_strict_ancestor_of(pair[1]))
        .map(|pair| pair[0].clone())
        .collect()
}

impl FromIterator<(StorePath, Value)> for MutationBatch {
    fn from_iter<T: IntoIterator<Item = (StorePath, Value)>>(iter: T) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for MutationBatch {
    type Item = (StorePath, Value);
    type IntoIter = std::collections::btree_map::IntoIter<StorePath, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn s1() -> SessionId {
        SessionId::from("S1")
    }

    fn p(raw: &str) -> StorePath {
        StorePath::resolve(raw, &s1()).unwrap()
    }

    #[test]
    fn test_resolve_corrects_foreign_session() {
        let path = StorePath::resolve("campaigns/OTHER/players/p1", &s1()).unwrap();
        assert_eq!(path.to_string(), "campaigns/S1/players/p1");
        assert_eq!(path.session(), &s1());
    }

    #[test]
    fn test_resolve_relative_and_messy_paths() {
        assert_eq!(p("npcs/npc_1").to_string(), "campaigns/S1/npcs/npc_1");
        assert_eq!(p("/campaigns/S1//npcs/npc_1/").to_string(), "campaigns/S1/npcs/npc_1");
        assert_eq!(p(" gameState/chaosFactor ").relative(), "gameState/chaosFactor");
    }

    #[test]
    fn test_resolve_rejects_root_writes() {
        assert!(matches!(
            StorePath::resolve("campaigns/S1", &s1()),
            Err(PathError::RootWrite(_))
        ));
        assert!(matches!(
            StorePath::resolve("campaigns", &s1()),
            Err(PathError::RootWrite(_))
        ));
        assert!(StorePath::resolve("", &s1()).is_err());
        assert!(StorePath::resolve("npcs/../players", &s1()).is_err());
        assert!(StorePath::resolve("npcs/a$b", &s1()).is_err());
    }

    #[test]
    fn test_session_segment_always_current() {
        for raw in [
            "campaigns/A/x",
            "campaigns/S1/x",
            "campaigns/some-very-long-id/x/y/z",
            "x/y",
        ] {
            let path = StorePath::resolve(raw, &s1()).unwrap();
            assert_eq!(path.session(), &s1(), "raw path {raw}");
            assert!(path.to_string().starts_with("campaigns/S1/"));
        }
    }

    #[test]
    fn test_strict_ancestor() {
        let npc = p("npcs/npc_ab12cd34");
        let disposition = p("npcs/npc_ab12cd34/disposition");
        let sibling = p("npcs/npc_ab12cd345");
        assert!(npc.is_strict_ancestor_of(&disposition));
        assert!(!disposition.is_strict_ancestor_of(&npc));
        assert!(!npc.is_strict_ancestor_of(&npc));
        assert!(!npc.is_strict_ancestor_of(&sibling));
    }

    #[test]
    fn test_filter_keeps_deeper_write() {
        let mut batch = MutationBatch::new();
        batch.insert(p("npcs/npc_ab12cd34"), json!({"name": "Mira"}));
        batch.insert(p("npcs/npc_ab12cd34/disposition"), json!("friendly"));

        let (filtered, discarded) = batch.without_ancestor_conflicts(ConflictPolicy::DropAncestor);
        let paths: Vec<String> = filtered.paths().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["campaigns/S1/npcs/npc_ab12cd34/disposition"]);
        assert_eq!(discarded, vec![p("npcs/npc_ab12cd34")]);
    }

    #[test]
    fn test_filter_multi_level_chain() {
        let batch: MutationBatch = [
            (p("world"), json!({})),
            (p("world/locations"), json!({})),
            (p("world/locations/location_1"), json!({})),
            (p("world/locations/location_1/name"), json!("Keep")),
            (p("world/factions/faction_1"), json!({"name": "Owls"})),
        ]
        .into_iter()
        .collect();

        let (filtered, discarded) = batch.without_ancestor_conflicts(ConflictPolicy::DropAncestor);
        assert_eq!(filtered.len(), 2);
        assert_eq!(discarded.len(), 3);
        assert!(filtered.get(&p("world/locations/location_1/name")).is_some());
        assert!(filtered.get(&p("world/factions/faction_1")).is_some());
    }

    #[test]
    fn test_filter_properties_hold_for_generated_sets() {
        // Deterministic pseudo-random path sets over a small alphabet so
        // ancestor/descendant pairs are common.
        let alphabet = ["a", "b", "ab"];
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..200 {
            let count = (next() % 12) as usize;
            let mut batch = MutationBatch::new();
            for _ in 0..count {
                let depth = 1 + (next() % 4) as usize;
                let segments: Vec<&str> = (0..depth)
                    .map(|_| alphabet[(next() % alphabet.len() as u64) as usize])
                    .collect();
                batch.insert(StorePath::new(&s1(), segments).unwrap(), json!(1));
            }

            let original = batch.clone();
            let (once, discarded) = batch.without_ancestor_conflicts(ConflictPolicy::DropAncestor);

            // No ancestor/descendant pair survives.
            for a in once.paths() {
                for b in once.paths() {
                    assert!(!a.is_strict_ancestor_of(b), "{a} is ancestor of {b}");
                }
            }

            // Every discarded path had a retained descendant.
            for gone in &discarded {
                assert!(original.get(gone).is_some());
                assert!(once.paths().any(|kept| gone.is_strict_ancestor_of(kept)));
            }

            // Idempotence.
            let (twice, again) =
                once.clone().without_ancestor_conflicts(ConflictPolicy::DropAncestor);
            assert_eq!(once, twice);
            assert!(again.is_empty());
        }
    }

    #[test]
    fn test_merge_policy_keeps_sibling_keys() {
        let mut batch = MutationBatch::new();
        batch.insert(
            p("npcs/npc_1"),
            json!({"name": "Mira", "disposition": "wary", "stats": {"level": 3}}),
        );
        batch.insert(p("npcs/npc_1/disposition"), json!("friendly"));

        let (filtered, discarded) =
            batch.without_ancestor_conflicts(ConflictPolicy::MergeIntoDescendants);

        assert!(discarded.is_empty());
        assert_eq!(filtered.get(&p("npcs/npc_1/name")), Some(&json!("Mira")));
        assert_eq!(filtered.get(&p("npcs/npc_1/disposition")), Some(&json!("friendly")));
        assert_eq!(filtered.get(&p("npcs/npc_1/stats/level")), Some(&json!(3)));
        assert!(filtered.get(&p("npcs/npc_1")).is_none());
    }

    #[test]
    fn test_merge_policy_scalar_ancestor_still_dropped() {
        let mut batch = MutationBatch::new();
        batch.insert(p("gameState/weather"), json!("rain"));
        batch.insert(p("gameState/weather/current"), json!("storm"));

        let (filtered, discarded) =
            batch.without_ancestor_conflicts(ConflictPolicy::MergeIntoDescendants);
        assert_eq!(filtered.len(), 1);
        assert_eq!(discarded, vec![p("gameState/weather")]);
    }

    #[test]
    fn test_leaf_writes() {
        let leaves = leaf_writes(
            &p("npcs/npc_1"),
            &json!({"disposition": {"default": "friendly"}, "tags": ["a"], "empty": {}}),
        );
        let rendered: Vec<String> = leaves.iter().map(|(p, _)| p.relative()).collect();
        assert_eq!(
            rendered,
            vec!["npcs/npc_1/disposition/default", "npcs/npc_1/empty", "npcs/npc_1/tags"]
        );
    }

    #[test]
    fn test_update_writes_skip_empty_objects() {
        assert!(update_writes(&p("npcs/npc_1"), &json!({})).is_empty());

        let leaves = update_writes(
            &p("npcs/npc_1"),
            &json!({"disposition": {}, "mood": "calm", "tags": []}),
        );
        let rendered: Vec<String> = leaves.iter().map(|(p, _)| p.relative()).collect();
        assert_eq!(rendered, vec!["npcs/npc_1/mood", "npcs/npc_1/tags"]);
    }

    #[test]
    fn test_rebased_collapses_duplicates() {
        let other = SessionId::from("OTHER");
        let mut batch = MutationBatch::new();
        batch.insert(StorePath::new(&other, ["players", "p1"]).unwrap(), json!(1));
        let batch = batch.rebased(&s1());
        assert_eq!(batch.get(&p("players/p1")), Some(&json!(1)));
    }

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!("merge".parse::<ConflictPolicy>(), Ok(ConflictPolicy::MergeIntoDescendants));
        assert_eq!("DROP_ANCESTOR".parse::<ConflictPolicy>(), Ok(ConflictPolicy::DropAncestor));
        assert!("other".parse::<ConflictPolicy>().is_err());
    }
}
