use std::collections::BTreeMap;
use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{ItemId, PropertyId};
use crate::error::SyncError;
use crate::store::write_bytes_atomic;

/// When cache mutations reach disk. With `EveryUpdate` a crash loses at
/// most the entry in flight; `Manual` leaves persistence to an explicit
/// `flush` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushPolicy {
    EveryUpdate,
    Manual,
}

/// Cross-run memoization of (property, external value) → item resolutions.
/// Only confirmed hits are stored; misses are retried on every run so
/// resolution improves as the knowledge base grows.
#[derive(Debug)]
pub struct IdentifierCache {
    path: Option<Utf8PathBuf>,
    entries: BTreeMap<String, BTreeMap<String, ItemId>>,
    policy: FlushPolicy,
    dirty: bool,
}

impl IdentifierCache {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            policy: FlushPolicy::Manual,
            dirty: false,
        }
    }

    /// Loads the snapshot at `path`, or starts empty when the file is
    /// missing. A corrupt snapshot is discarded with a warning rather than
    /// aborting the run.
    pub fn load(path: Utf8PathBuf, policy: FlushPolicy) -> Result<Self, SyncError> {
        let entries = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, path = %path, "identifier cache is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(SyncError::Filesystem(err.to_string())),
        };

        let cache = Self {
            path: Some(path),
            entries,
            policy,
            dirty: false,
        };
        info!(entries = cache.len(), "identifier cache loaded");
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|values| values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|values| values.is_empty())
    }

    pub fn get(&self, property: &PropertyId, value: &str) -> Option<&ItemId> {
        self.entries
            .get(property.as_str())
            .and_then(|values| values.get(value))
    }

    pub fn insert(
        &mut self,
        property: &PropertyId,
        value: &str,
        item: ItemId,
    ) -> Result<(), SyncError> {
        self.entries
            .entry(property.as_str().to_string())
            .or_default()
            .insert(value.to_string(), item);
        self.dirty = true;
        if self.policy == FlushPolicy::EveryUpdate {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SyncError> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };
        let content = serde_json::to_vec_pretty(&self.entries)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path, &content)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(id: &str) -> PropertyId {
        id.parse().unwrap()
    }

    fn item(id: &str) -> ItemId {
        id.parse().unwrap()
    }

    #[test]
    fn insert_then_get() {
        let mut cache = IdentifierCache::in_memory();
        cache
            .insert(&property("P352"), "P12345", item("Q418764"))
            .unwrap();

        assert_eq!(
            cache.get(&property("P352"), "P12345").map(ItemId::as_str),
            Some("Q418764")
        );
        assert!(cache.get(&property("P352"), "P99999").is_none());
        assert!(cache.get(&property("P685"), "P12345").is_none());
    }

    #[test]
    fn every_update_persists_and_reloads() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("cache.json")).unwrap();

        let mut cache = IdentifierCache::load(path.clone(), FlushPolicy::EveryUpdate).unwrap();
        assert!(cache.is_empty());
        cache
            .insert(&property("P685"), "9606", item("Q15978631"))
            .unwrap();

        let reloaded = IdentifierCache::load(path, FlushPolicy::EveryUpdate).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.get(&property("P685"), "9606").map(ItemId::as_str),
            Some("Q15978631")
        );
    }

    #[test]
    fn manual_policy_defers_persistence() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("cache.json")).unwrap();

        let mut cache = IdentifierCache::load(path.clone(), FlushPolicy::Manual).unwrap();
        cache
            .insert(&property("P352"), "P0DTC2", item("Q87917585"))
            .unwrap();
        assert!(!path.as_std_path().exists());

        cache.flush().unwrap();
        let reloaded = IdentifierCache::load(path, FlushPolicy::Manual).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn corrupt_snapshot_starts_empty() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("cache.json")).unwrap();
        fs::write(path.as_std_path(), b"{not json").unwrap();

        let cache = IdentifierCache::load(path, FlushPolicy::EveryUpdate).unwrap();
        assert!(cache.is_empty());
    }
}
