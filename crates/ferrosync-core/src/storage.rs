//! Storage collaborator interfaces
//!
//! The engine never talks to a physical store directly. A
//! [`SyncDatabaseProvider`] opens units of work ([`SyncableDatabase`]); each
//! unit of work exposes typed repositories and the tombstone store, and is
//! only made durable by [`SyncableDatabase::save_changes`]. Dropping a unit
//! of work without saving discards it.

use crate::entity::SyncEntity;
use ferrosync_types::{Result, SyncId, SyncTombstone, Timestamp};

/// Typed access to the entities of one type
pub trait Repository<T: SyncEntity>: Send {
    /// Number of entities modified in `[since, until)`
    fn change_count(&self, since: Timestamp, until: Timestamp) -> Result<usize>;

    /// Entities modified in `[since, until)`, ordered by modification time then id
    fn changes(&self, since: Timestamp, until: Timestamp, skip: usize, take: usize)
        -> Result<Vec<T>>;

    /// Read an entity by sync id
    fn read(&self, sync_id: SyncId) -> Result<Option<T>>;

    /// Insert an entity, returning it with its assigned local id
    fn add(&mut self, entity: T) -> Result<T>;

    /// Replace an existing entity matched by sync id
    fn update(&mut self, entity: T) -> Result<()>;

    /// Hard delete an entity, returning it when it existed
    fn remove(&mut self, sync_id: SyncId) -> Result<Option<T>>;
}

/// Records of hard-deleted entities
pub trait TombstoneStore: Send {
    /// Number of tombstones created in `[since, until)`
    fn count(&self, since: Timestamp, until: Timestamp) -> Result<usize>;

    /// Tombstones created in `[since, until)`, ordered by creation time then id
    fn window(
        &self,
        since: Timestamp,
        until: Timestamp,
        skip: usize,
        take: usize,
    ) -> Result<Vec<SyncTombstone>>;

    /// Tombstone for a sync id, if any
    fn find(&self, sync_id: SyncId) -> Result<Option<SyncTombstone>>;

    /// Record a hard deletion
    fn add(&mut self, sync_id: SyncId, type_name: &str, created_on: Timestamp)
        -> Result<SyncTombstone>;

    /// Remove every tombstone matching `predicate`, returning how many were removed
    fn remove_where(&mut self, predicate: &dyn Fn(&SyncTombstone) -> bool) -> Result<usize>;
}

/// A unit of work over every sync repository of a node
pub trait SyncableDatabase: Send {
    /// Typed repository for `T`
    fn repository<T: SyncEntity>(&mut self) -> Result<&mut dyn Repository<T>>;

    /// The tombstone store
    fn tombstones(&mut self) -> &mut dyn TombstoneStore;

    /// Make every change of this unit of work durable
    fn save_changes(&mut self) -> Result<()>;

    /// Hard delete an entity and record its tombstone in the same unit of work
    fn remove_entity<T: SyncEntity>(&mut self, sync_id: SyncId, at: Timestamp) -> Result<bool> {
        let removed = self.repository::<T>()?.remove(sync_id)?;
        if removed.is_some() {
            self.tombstones().add(sync_id, T::TYPE_NAME, at)?;
        }
        Ok(removed.is_some())
    }
}

/// Opens units of work
///
/// Each call returns an independent unit of work; connections are never
/// shared between concurrently running syncs.
pub trait SyncDatabaseProvider: Send + Sync {
    /// Unit of work type
    type Database: SyncableDatabase;

    /// Open a new unit of work
    fn open(&self) -> Result<Self::Database>;
}
