//! Per-type exclusion sets
//!
//! An [`ExclusionCache`] is created once at startup and shared by handle with
//! every client and converter. Sets are computed lazily on first use and
//! cached until a converter extends the type.

use crate::entity::{fields, SyncEntity};
use ferrosync_types::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Boundary a field is kept from crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExclusionDirection {
    /// Values arriving from a peer
    Incoming,
    /// Values sent to a peer
    Outgoing,
    /// Local values overwritten by a peer's update
    Update,
}

/// Cache key: type plus the three direction flags
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExclusionKey {
    /// Entity type name
    pub type_name: String,
    /// Include incoming exclusions
    pub incoming: bool,
    /// Include outgoing exclusions
    pub outgoing: bool,
    /// Include update exclusions
    pub update: bool,
}

impl ExclusionKey {
    /// Create a key
    pub fn new(type_name: impl Into<String>, incoming: bool, outgoing: bool, update: bool) -> Self {
        Self {
            type_name: type_name.into(),
            incoming,
            outgoing,
            update,
        }
    }

    fn includes(&self, direction: ExclusionDirection) -> bool {
        match direction {
            ExclusionDirection::Incoming => self.incoming,
            ExclusionDirection::Outgoing => self.outgoing,
            ExclusionDirection::Update => self.update,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExclusionStats {
    /// Number of cached sets
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that computed a set
    pub misses: u64,
}

/// Thread-safe, lazily populated exclusion sets
#[derive(Debug, Default)]
pub struct ExclusionCache {
    entries: RwLock<HashMap<ExclusionKey, Arc<HashSet<String>>>>,
    additions: RwLock<HashMap<(String, ExclusionDirection), HashSet<String>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ExclusionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared cache
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Exclusion set for `T` and the given directions
    pub fn exclusions_for<T: SyncEntity>(
        &self,
        incoming: bool,
        outgoing: bool,
        update: bool,
    ) -> Result<Arc<HashSet<String>>> {
        let key = ExclusionKey::new(T::TYPE_NAME, incoming, outgoing, update);

        if let Some(set) = read_lock(&self.entries)?.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(set));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let set = Arc::new(self.compute::<T>(&key)?);
        debug!(
            "Computed {} exclusions for {} (incoming={}, outgoing={}, update={})",
            set.len(),
            key.type_name,
            incoming,
            outgoing,
            update
        );

        let mut entries = write_lock(&self.entries)?;
        Ok(Arc::clone(entries.entry(key).or_insert(set)))
    }

    /// Fields kept out of incoming payloads
    pub fn incoming<T: SyncEntity>(&self) -> Result<Arc<HashSet<String>>> {
        self.exclusions_for::<T>(true, false, false)
    }

    /// Fields kept out of outgoing payloads
    pub fn outgoing<T: SyncEntity>(&self) -> Result<Arc<HashSet<String>>> {
        self.exclusions_for::<T>(false, true, false)
    }

    /// Fields kept from being overwritten by an incoming update
    ///
    /// Relationship id fields stay writable: the incoming entity carries
    /// repaired local ids by the time the update is applied.
    pub fn update<T: SyncEntity>(&self) -> Result<Arc<HashSet<String>>> {
        self.exclusions_for::<T>(true, false, true)
    }

    /// Extend the exclusions of a type and drop its cached sets
    pub fn add_exclusions<I, S>(
        &self,
        type_name: &str,
        direction: ExclusionDirection,
        fields: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut additions = write_lock(&self.additions)?;
            additions
                .entry((type_name.to_string(), direction))
                .or_default()
                .extend(fields.into_iter().map(Into::into));
        }

        let mut entries = write_lock(&self.entries)?;
        entries.retain(|key, _| key.type_name != type_name || !key.includes(direction));
        debug!("Extended {:?} exclusions for {}", direction, type_name);
        Ok(())
    }

    /// Drop every cached set, keeping registered additions
    pub fn clear(&self) -> Result<()> {
        write_lock(&self.entries)?.clear();
        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> ExclusionStats {
        ExclusionStats {
            entries: self.entries.read().map(|entries| entries.len()).unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn compute<T: SyncEntity>(&self, key: &ExclusionKey) -> Result<HashSet<String>> {
        let mut set = HashSet::new();
        let declared = T::exclusions();

        if key.incoming || key.outgoing {
            set.insert(fields::ID.to_string());
            if !key.update {
                for relationship in T::relationships() {
                    set.insert(relationship.id_field().to_string());
                }
            }
        }
        if key.incoming {
            set.extend(declared.incoming.iter().map(|f| (*f).to_string()));
        }
        if key.outgoing {
            set.extend(declared.outgoing.iter().map(|f| (*f).to_string()));
        }
        if key.update {
            set.insert(fields::ID.to_string());
            set.insert(fields::SYNC_ID.to_string());
            set.insert(fields::CREATED_ON.to_string());
            set.extend(declared.update.iter().map(|f| (*f).to_string()));
        }

        let additions = read_lock(&self.additions)?;
        for direction in [
            ExclusionDirection::Incoming,
            ExclusionDirection::Outgoing,
            ExclusionDirection::Update,
        ] {
            if key.includes(direction) {
                if let Some(extra) = additions.get(&(key.type_name.clone(), direction)) {
                    set.extend(extra.iter().cloned());
                }
            }
        }

        Ok(set)
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::sync("Exclusion cache lock poisoned"))
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::sync("Exclusion cache lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::test_entities::{Folder, Note};

    #[test]
    fn test_defaults_per_direction() {
        let cache = ExclusionCache::new();

        let outgoing = cache.outgoing::<Note>().unwrap();
        assert!(outgoing.contains("id"));
        assert!(outgoing.contains("folder_id"));
        assert!(!outgoing.contains("sync_id"));

        let update = cache.exclusions_for::<Note>(false, false, true).unwrap();
        assert!(update.contains("id"));
        assert!(update.contains("sync_id"));
        assert!(update.contains("created_on"));
        assert!(!update.contains("folder_id"));

        let applied = cache.update::<Note>().unwrap();
        assert!(applied.contains("id"));
        assert!(applied.contains("sync_id"));
        assert!(!applied.contains("folder_id"));
        assert!(cache.incoming::<Note>().unwrap().contains("folder_id"));
    }

    #[test]
    fn test_sets_are_cached() {
        let cache = ExclusionCache::new();

        let first = cache.incoming::<Folder>().unwrap();
        let second = cache.incoming::<Folder>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_additions_invalidate_matching_keys() {
        let cache = ExclusionCache::new();
        let before = cache.outgoing::<Folder>().unwrap();
        let incoming = cache.incoming::<Folder>().unwrap();

        cache
            .add_exclusions("Folder", ExclusionDirection::Outgoing, ["name"])
            .unwrap();

        let after = cache.outgoing::<Folder>().unwrap();
        assert!(!before.contains("name"));
        assert!(after.contains("name"));
        assert!(Arc::ptr_eq(&incoming, &cache.incoming::<Folder>().unwrap()));
    }

    #[test]
    fn test_additions_do_not_leak_to_other_types() {
        let cache = ExclusionCache::new();
        cache
            .add_exclusions("Folder", ExclusionDirection::Incoming, ["name"])
            .unwrap();

        assert!(!cache.incoming::<Note>().unwrap().contains("name"));
    }
}
