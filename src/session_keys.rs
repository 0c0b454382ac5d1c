//! Process-wide cache of message session keys.
//!
//! A cached key lets metadata be decrypted symmetrically, skipping the
//! asymmetric unwrap. Entries are only a hint: callers evict and recompute
//! when a cached key fails. The cache never persists itself; [`export`] and
//! [`seed`] let the caller move entries to and from a persisted bundle.
//!
//! [`export`]: SessionKeyCache::export
//! [`seed`]: SessionKeyCache::seed

use crate::crypto::SessionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use tracing::debug;

/// Kind of object a session key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignModel {
    Resource,
    Folder,
    Tag,
    Comment,
}

impl fmt::Display for ForeignModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForeignModel::Resource => "resource",
            ForeignModel::Folder => "folder",
            ForeignModel::Tag => "tag",
            ForeignModel::Comment => "comment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKeyIdentifier {
    pub foreign_model: ForeignModel,
    pub foreign_id: String,
}

impl SessionKeyIdentifier {
    pub fn new(foreign_model: ForeignModel, foreign_id: impl Into<String>) -> Self {
        Self {
            foreign_model,
            foreign_id: foreign_id.into(),
        }
    }

    pub fn resource(id: impl Into<String>) -> Self {
        Self::new(ForeignModel::Resource, id)
    }
}

#[derive(Debug, Clone)]
pub struct SessionKeyEntry {
    pub session_key: SessionKey,
    /// Modification time of the object when the key was recorded.
    pub modified: DateTime<Utc>,
}

/// Persistable form of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyRecord {
    pub foreign_model: ForeignModel,
    pub foreign_id: String,
    pub session_key: String,
    pub modified: DateTime<Utc>,
}

/// A set of session keys, as stored by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeysBundle {
    pub session_keys: Vec<SessionKeyRecord>,
    pub modified: DateTime<Utc>,
}

/// Merge bundles into one; for each identifier the newest `modified` wins.
pub fn merge_bundles(bundles: &[SessionKeysBundle]) -> SessionKeysBundle {
    let mut newest: HashMap<(ForeignModel, &str), &SessionKeyRecord> = HashMap::new();
    for record in bundles.iter().flat_map(|b| b.session_keys.iter()) {
        let key = (record.foreign_model, record.foreign_id.as_str());
        let replace = newest
            .get(&key)
            .map_or(true, |existing| existing.modified < record.modified);
        if replace {
            newest.insert(key, record);
        }
    }

    let mut session_keys: Vec<SessionKeyRecord> = newest.into_values().cloned().collect();
    session_keys.sort_by(|a, b| a.foreign_id.cmp(&b.foreign_id));

    SessionKeysBundle {
        session_keys,
        modified: bundles
            .iter()
            .map(|b| b.modified)
            .max()
            .unwrap_or_else(Utc::now),
    }
}

/// Thread-safe session key cache.
#[derive(Default)]
pub struct SessionKeyCache {
    entries: RwLock<HashMap<SessionKeyIdentifier, SessionKeyEntry>>,
}

impl SessionKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_cached_key(&self, id: &SessionKeyIdentifier) -> bool {
        self.read().contains_key(id)
    }

    pub fn get(&self, id: &SessionKeyIdentifier) -> Option<SessionKey> {
        self.read().get(id).map(|e| e.session_key.clone())
    }

    pub fn get_entry(&self, id: &SessionKeyIdentifier) -> Option<SessionKeyEntry> {
        self.read().get(id).cloned()
    }

    pub fn put(&self, id: SessionKeyIdentifier, session_key: SessionKey, modified: DateTime<Utc>) {
        self.put_entry(
            id,
            SessionKeyEntry {
                session_key,
                modified,
            },
        );
    }

    pub fn put_entry(&self, id: SessionKeyIdentifier, entry: SessionKeyEntry) {
        debug!(model = %id.foreign_model, id = %id.foreign_id, "caching session key");
        self.write().insert(id, entry);
    }

    /// Remove every entry recorded for `foreign_id`, whatever its model.
    pub fn invalidate(&self, foreign_id: &str) {
        self.write().retain(|k, _| k.foreign_id != foreign_id);
    }

    pub fn invalidate_key(&self, id: &SessionKeyIdentifier) {
        self.write().remove(id);
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// True when the cached key predates `modified` (or there is none).
    pub fn is_stale(&self, id: &SessionKeyIdentifier, modified: DateTime<Utc>) -> bool {
        self.read()
            .get(id)
            .map(|e| e.modified < modified)
            .unwrap_or(true)
    }

    /// Load entries from persisted bundles. Entries already cached with a
    /// newer modification time are kept.
    pub fn seed(&self, bundles: &[SessionKeysBundle]) -> usize {
        let merged = merge_bundles(bundles);
        let mut entries = self.write();
        let mut loaded = 0;
        for record in merged.session_keys {
            let Ok(session_key) = SessionKey::from_hex(&record.session_key) else {
                debug!(id = %record.foreign_id, "skipping malformed session key");
                continue;
            };
            let id = SessionKeyIdentifier::new(record.foreign_model, record.foreign_id);
            if entries
                .get(&id)
                .map(|e| e.modified >= record.modified)
                .unwrap_or(false)
            {
                continue;
            }
            entries.insert(
                id,
                SessionKeyEntry {
                    session_key,
                    modified: record.modified,
                },
            );
            loaded += 1;
        }
        loaded
    }

    /// Snapshot the cache as a bundle for the caller to persist.
    pub fn export(&self) -> SessionKeysBundle {
        let mut session_keys: Vec<SessionKeyRecord> = self
            .read()
            .iter()
            .map(|(id, entry)| SessionKeyRecord {
                foreign_model: id.foreign_model,
                foreign_id: id.foreign_id.clone(),
                session_key: entry.session_key.to_hex(),
                modified: entry.modified,
            })
            .collect();
        session_keys.sort_by(|a, b| a.foreign_id.cmp(&b.foreign_id));
        SessionKeysBundle {
            session_keys,
            modified: Utc::now(),
        }
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<SessionKeyIdentifier, SessionKeyEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionKeyIdentifier, SessionKeyEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(byte: u8) -> SessionKey {
        SessionKey::from(vec![byte; 32])
    }

    fn record(id: &str, byte: u8, modified: DateTime<Utc>) -> SessionKeyRecord {
        SessionKeyRecord {
            foreign_model: ForeignModel::Resource,
            foreign_id: id.to_string(),
            session_key: key(byte).to_hex(),
            modified,
        }
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = SessionKeyCache::new();
        let id = SessionKeyIdentifier::resource("r1");
        assert!(!cache.has_cached_key(&id));

        cache.put(id.clone(), key(1), Utc::now());
        assert!(cache.has_cached_key(&id));
        assert_eq!(cache.get(&id).unwrap(), key(1));

        cache.invalidate("r1");
        assert!(cache.get(&id).is_none());
    }

    #[test]
    fn test_invalidate_key_only_touches_one_model() {
        let cache = SessionKeyCache::new();
        let resource = SessionKeyIdentifier::resource("x");
        let folder = SessionKeyIdentifier::new(ForeignModel::Folder, "x");
        cache.put(resource.clone(), key(1), Utc::now());
        cache.put(folder.clone(), key(2), Utc::now());

        cache.invalidate_key(&resource);
        assert!(!cache.has_cached_key(&resource));
        assert!(cache.has_cached_key(&folder));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_is_stale() {
        let cache = SessionKeyCache::new();
        let id = SessionKeyIdentifier::resource("r1");
        let now = Utc::now();
        assert!(cache.is_stale(&id, now));

        cache.put(id.clone(), key(1), now);
        assert!(!cache.is_stale(&id, now));
        assert!(cache.is_stale(&id, now + Duration::seconds(5)));
    }

    #[test]
    fn test_merge_bundles_newest_wins() {
        let old = Utc::now() - Duration::hours(1);
        let new = Utc::now();
        let a = SessionKeysBundle {
            session_keys: vec![record("r1", 1, old), record("r2", 2, new)],
            modified: old,
        };
        let b = SessionKeysBundle {
            session_keys: vec![record("r1", 3, new), record("r2", 4, old)],
            modified: new,
        };

        let merged = merge_bundles(&[a, b]);
        assert_eq!(merged.session_keys.len(), 2);
        assert_eq!(merged.session_keys[0].session_key, key(3).to_hex());
        assert_eq!(merged.session_keys[1].session_key, key(2).to_hex());
        assert_eq!(merged.modified, new);
    }

    #[test]
    fn test_seed_and_export() {
        let now = Utc::now();
        let bundle = SessionKeysBundle {
            session_keys: vec![
                record("r1", 1, now),
                SessionKeyRecord {
                    session_key: "zz".to_string(),
                    ..record("bad", 0, now)
                },
            ],
            modified: now,
        };

        let cache = SessionKeyCache::new();
        assert_eq!(cache.seed(&[bundle]), 1);
        assert_eq!(
            cache.get(&SessionKeyIdentifier::resource("r1")).unwrap(),
            key(1)
        );

        let exported = cache.export();
        assert_eq!(exported.session_keys, vec![record("r1", 1, now)]);
    }
}
