//! In-memory storage
//!
//! Every unit of work reads from a private copy of the committed state and
//! journals what it writes. Saving replays the journal onto the committed
//! state under its write lock, so units of work saved one after the other
//! keep each other's changes. Local ids come from a sequence shared by every
//! copy of a table and are never handed out twice. Used by the test suite and
//! the CLI simulation.

use crate::entity::SyncEntity;
use crate::storage::{Repository, SyncDatabaseProvider, SyncableDatabase, TombstoneStore};
use chrono::Utc;
use ferrosync_types::{Error, Result, SyncId, SyncTombstone, Timestamp};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

/// Extracts the value of a unique column
pub type UniqueKey<T> = fn(&T) -> String;

/// Write recorded by a unit of work, replayed when it is saved
#[derive(Debug, Clone)]
enum TableOp<T> {
    Add(T),
    Update(T),
    Remove(SyncId),
}

/// Rows of one entity type, keyed by local id
pub struct MemoryTable<T> {
    rows: BTreeMap<i64, T>,
    next_id: Arc<AtomicI64>,
    unique: Vec<(&'static str, UniqueKey<T>)>,
    journal: Vec<TableOp<T>>,
}

impl<T> Clone for MemoryTable<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
            next_id: Arc::clone(&self.next_id),
            unique: self.unique.clone(),
            journal: self.journal.clone(),
        }
    }
}

impl<T: SyncEntity> MemoryTable<T> {
    fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: Arc::new(AtomicI64::new(1)),
            unique: Vec::new(),
            journal: Vec::new(),
        }
    }

    /// Every row, ordered by local id
    pub fn rows(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    fn find(&self, sync_id: SyncId) -> Option<(i64, &T)> {
        self.rows
            .iter()
            .find(|(_, row)| row.sync_id() == sync_id)
            .map(|(id, row)| (*id, row))
    }

    fn insert_row(&mut self, entity: T) -> Result<()> {
        if self.find(entity.sync_id()).is_some() {
            return Err(Error::constraint(
                T::TYPE_NAME,
                format!("duplicate sync id {}", entity.sync_id()),
            ));
        }
        self.check_unique(&entity, None)?;
        self.rows.insert(entity.id(), entity);
        Ok(())
    }

    fn update_row(&mut self, mut entity: T) -> Result<()> {
        let id = self
            .find(entity.sync_id())
            .map(|(id, _)| id)
            .ok_or_else(|| {
                Error::storage(format!("{} {} does not exist", T::TYPE_NAME, entity.sync_id()))
            })?;
        self.check_unique(&entity, Some(id))?;

        entity.set_id(id);
        self.rows.insert(id, entity);
        Ok(())
    }

    fn remove_row(&mut self, sync_id: SyncId) -> Option<T> {
        let id = self.find(sync_id).map(|(id, _)| id);
        id.and_then(|id| self.rows.remove(&id))
    }

    fn replay(&mut self, journal: &[TableOp<T>]) -> Result<()> {
        for op in journal {
            match op {
                TableOp::Add(entity) => self.insert_row(entity.clone())?,
                TableOp::Update(entity) => self.update_row(entity.clone())?,
                TableOp::Remove(sync_id) => {
                    self.remove_row(*sync_id);
                }
            }
        }
        Ok(())
    }

    fn window(&self, since: Timestamp, until: Timestamp) -> Vec<&T> {
        let mut rows: Vec<&T> = self
            .rows
            .values()
            .filter(|row| row.modified_on() >= since && row.modified_on() < until)
            .collect();
        rows.sort_by_key(|row| (row.modified_on(), row.id()));
        rows
    }

    fn check_unique(&self, entity: &T, own_id: Option<i64>) -> Result<()> {
        for (column, key) in &self.unique {
            let value = key(entity);
            let clash = self
                .rows
                .iter()
                .any(|(id, row)| Some(*id) != own_id && key(row) == value);
            if clash {
                return Err(Error::constraint(
                    T::TYPE_NAME,
                    format!("duplicate {} '{}'", column, value),
                ));
            }
        }
        Ok(())
    }
}

impl<T: SyncEntity> Repository<T> for MemoryTable<T> {
    fn change_count(&self, since: Timestamp, until: Timestamp) -> Result<usize> {
        Ok(self.window(since, until).len())
    }

    fn changes(
        &self,
        since: Timestamp,
        until: Timestamp,
        skip: usize,
        take: usize,
    ) -> Result<Vec<T>> {
        Ok(self
            .window(since, until)
            .into_iter()
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }

    fn read(&self, sync_id: SyncId) -> Result<Option<T>> {
        Ok(self.find(sync_id).map(|(_, row)| row.clone()))
    }

    fn add(&mut self, mut entity: T) -> Result<T> {
        entity.set_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.insert_row(entity.clone())?;
        self.journal.push(TableOp::Add(entity.clone()));
        Ok(entity)
    }

    fn update(&mut self, entity: T) -> Result<()> {
        self.update_row(entity.clone())?;
        self.journal.push(TableOp::Update(entity));
        Ok(())
    }

    fn remove(&mut self, sync_id: SyncId) -> Result<Option<T>> {
        let removed = self.remove_row(sync_id);
        if removed.is_some() {
            self.journal.push(TableOp::Remove(sync_id));
        }
        Ok(removed)
    }
}

trait AnyTable: Send + Sync {
    fn clone_table(&self) -> Box<dyn AnyTable>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Apply this table's journal to `committed`, which holds the same type
    fn replay_onto(&self, committed: &mut dyn AnyTable) -> Result<()>;
    fn clear_journal(&mut self);
}

impl<T: SyncEntity> AnyTable for MemoryTable<T> {
    fn clone_table(&self) -> Box<dyn AnyTable> {
        Box::new(self.clone())
    }

    fn replay_onto(&self, committed: &mut dyn AnyTable) -> Result<()> {
        if self.journal.is_empty() {
            return Ok(());
        }
        committed
            .as_any_mut()
            .downcast_mut::<MemoryTable<T>>()
            .ok_or_else(|| Error::storage(format!("table {} holds another type", T::TYPE_NAME)))?
            .replay(&self.journal)
    }

    fn clear_journal(&mut self) {
        self.journal.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
enum TombstoneOp {
    Add(SyncTombstone),
    Remove(SyncId),
}

/// Tombstones held in memory
#[derive(Debug, Clone)]
pub struct MemoryTombstones {
    rows: Vec<SyncTombstone>,
    next_id: Arc<AtomicI64>,
    journal: Vec<TombstoneOp>,
}

impl Default for MemoryTombstones {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_id: Arc::new(AtomicI64::new(1)),
            journal: Vec::new(),
        }
    }
}

impl MemoryTombstones {
    fn replay(&mut self, journal: &[TombstoneOp]) {
        for op in journal {
            match op {
                TombstoneOp::Add(tombstone) => self.rows.push(tombstone.clone()),
                TombstoneOp::Remove(sync_id) => self.rows.retain(|t| t.sync_id != *sync_id),
            }
        }
    }

    fn ordered(&self, since: Timestamp, until: Timestamp) -> Vec<&SyncTombstone> {
        let mut rows: Vec<&SyncTombstone> = self
            .rows
            .iter()
            .filter(|t| t.created_on >= since && t.created_on < until)
            .collect();
        rows.sort_by_key(|t| (t.created_on, t.id));
        rows
    }
}

impl TombstoneStore for MemoryTombstones {
    fn count(&self, since: Timestamp, until: Timestamp) -> Result<usize> {
        Ok(self.ordered(since, until).len())
    }

    fn window(
        &self,
        since: Timestamp,
        until: Timestamp,
        skip: usize,
        take: usize,
    ) -> Result<Vec<SyncTombstone>> {
        Ok(self
            .ordered(since, until)
            .into_iter()
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }

    fn find(&self, sync_id: SyncId) -> Result<Option<SyncTombstone>> {
        Ok(self.rows.iter().find(|t| t.sync_id == sync_id).cloned())
    }

    fn add(
        &mut self,
        sync_id: SyncId,
        type_name: &str,
        created_on: Timestamp,
    ) -> Result<SyncTombstone> {
        let tombstone = SyncTombstone {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            sync_id,
            type_name: type_name.to_string(),
            created_on,
        };
        self.rows.push(tombstone.clone());
        self.journal.push(TombstoneOp::Add(tombstone.clone()));
        Ok(tombstone)
    }

    fn remove_where(&mut self, predicate: &dyn Fn(&SyncTombstone) -> bool) -> Result<usize> {
        let (removed, kept): (Vec<SyncTombstone>, Vec<SyncTombstone>) =
            self.rows.drain(..).partition(|t| predicate(t));
        self.rows = kept;
        self.journal
            .extend(removed.iter().map(|t| TombstoneOp::Remove(t.sync_id)));
        Ok(removed.len())
    }
}

struct MemoryState {
    tables: HashMap<&'static str, Box<dyn AnyTable>>,
    tombstones: MemoryTombstones,
}

impl Clone for MemoryState {
    fn clone(&self) -> Self {
        Self {
            tables: self
                .tables
                .iter()
                .map(|(name, table)| (*name, table.clone_table()))
                .collect(),
            tombstones: self.tombstones.clone(),
        }
    }
}

impl MemoryState {
    /// Replay every journal of `work` onto this state
    fn replay(&mut self, work: &MemoryState) -> Result<()> {
        for (name, table) in &work.tables {
            let committed = self
                .tables
                .get_mut(name)
                .ok_or_else(|| Error::unknown_type(*name))?;
            table.replay_onto(committed.as_mut())?;
        }
        self.tombstones.replay(&work.tombstones.journal);
        Ok(())
    }

    fn clear_journals(&mut self) {
        for table in self.tables.values_mut() {
            table.clear_journal();
        }
        self.tombstones.journal.clear();
    }

    fn table<T: SyncEntity>(&self) -> Result<&MemoryTable<T>> {
        self.tables
            .get(T::TYPE_NAME)
            .ok_or_else(|| Error::unknown_type(T::TYPE_NAME))?
            .as_any()
            .downcast_ref::<MemoryTable<T>>()
            .ok_or_else(|| Error::storage(format!("table {} holds another type", T::TYPE_NAME)))
    }

    fn table_mut<T: SyncEntity>(&mut self) -> Result<&mut MemoryTable<T>> {
        self.tables
            .get_mut(T::TYPE_NAME)
            .ok_or_else(|| Error::unknown_type(T::TYPE_NAME))?
            .as_any_mut()
            .downcast_mut::<MemoryTable<T>>()
            .ok_or_else(|| Error::storage(format!("table {} holds another type", T::TYPE_NAME)))
    }
}

/// A unit of work over a [`MemoryProvider`]
pub struct MemoryDatabase {
    state: MemoryState,
    committed: Arc<RwLock<MemoryState>>,
}

impl SyncableDatabase for MemoryDatabase {
    fn repository<T: SyncEntity>(&mut self) -> Result<&mut dyn Repository<T>> {
        let table: &mut dyn Repository<T> = self.state.table_mut::<T>()?;
        Ok(table)
    }

    fn tombstones(&mut self) -> &mut dyn TombstoneStore {
        &mut self.state.tombstones
    }

    fn save_changes(&mut self) -> Result<()> {
        let mut committed = write_lock(&self.committed)?;
        let mut next = committed.clone();
        next.replay(&self.state)?;
        *committed = next;
        drop(committed);

        self.state.clear_journals();
        Ok(())
    }
}

/// Shared in-memory store
#[derive(Clone)]
pub struct MemoryProvider {
    committed: Arc<RwLock<MemoryState>>,
    latency: Option<Duration>,
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl MemoryProvider {
    /// Start building a provider
    pub fn builder() -> MemoryProviderBuilder {
        MemoryProviderBuilder::default()
    }

    /// Insert an entity outside of any sync
    pub fn insert<T: SyncEntity>(&self, entity: T) -> Result<T> {
        let mut db = self.open()?;
        let entity = db.repository::<T>()?.add(entity)?;
        db.save_changes()?;
        Ok(entity)
    }

    /// Modify an entity outside of any sync, stamping it as modified now
    pub fn modify<T, F>(&self, sync_id: SyncId, change: F) -> Result<bool>
    where
        T: SyncEntity,
        F: FnOnce(&mut T),
    {
        let mut db = self.open()?;
        let repository = db.repository::<T>()?;
        let Some(mut entity) = repository.read(sync_id)? else {
            return Ok(false);
        };
        change(&mut entity);
        entity.set_modified_on(Utc::now());
        repository.update(entity)?;
        db.save_changes()?;
        Ok(true)
    }

    /// Hard delete an entity outside of any sync, recording a tombstone
    pub fn delete<T: SyncEntity>(&self, sync_id: SyncId) -> Result<bool> {
        let mut db = self.open()?;
        let removed = db.remove_entity::<T>(sync_id, Utc::now())?;
        db.save_changes()?;
        Ok(removed)
    }

    /// Read a committed entity
    pub fn get<T: SyncEntity>(&self, sync_id: SyncId) -> Result<Option<T>> {
        let state = read_lock(&self.committed)?;
        Ok(state.table::<T>()?.find(sync_id).map(|(_, row)| row.clone()))
    }

    /// Every committed entity of a type
    pub fn list<T: SyncEntity>(&self) -> Result<Vec<T>> {
        let state = read_lock(&self.committed)?;
        Ok(state.table::<T>()?.rows().cloned().collect())
    }

    /// Number of committed entities of a type
    pub fn count<T: SyncEntity>(&self) -> Result<usize> {
        let state = read_lock(&self.committed)?;
        Ok(state.table::<T>()?.rows.len())
    }

    /// Every committed tombstone
    pub fn tombstones(&self) -> Result<Vec<SyncTombstone>> {
        let state = read_lock(&self.committed)?;
        Ok(state.tombstones.rows.clone())
    }
}

impl SyncDatabaseProvider for MemoryProvider {
    type Database = MemoryDatabase;

    fn open(&self) -> Result<MemoryDatabase> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        let state = read_lock(&self.committed)?.clone();
        Ok(MemoryDatabase {
            state,
            committed: Arc::clone(&self.committed),
        })
    }
}

/// Builder for [`MemoryProvider`]
#[derive(Default)]
pub struct MemoryProviderBuilder {
    tables: HashMap<&'static str, Box<dyn AnyTable>>,
    latency: Option<Duration>,
}

impl MemoryProviderBuilder {
    /// Add a table for `T`
    pub fn with_entity<T: SyncEntity>(mut self) -> Self {
        self.tables
            .entry(T::TYPE_NAME)
            .or_insert_with(|| Box::new(MemoryTable::<T>::new()));
        self
    }

    /// Add a unique column to the table for `T`
    pub fn with_unique<T: SyncEntity>(mut self, column: &'static str, key: UniqueKey<T>) -> Self {
        self = self.with_entity::<T>();
        if let Some(table) = self
            .tables
            .get_mut(T::TYPE_NAME)
            .and_then(|table| table.as_any_mut().downcast_mut::<MemoryTable<T>>())
        {
            table.unique.push((column, key));
        }
        self
    }

    /// Sleep for `latency` whenever a unit of work is opened
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Build the provider
    pub fn build(self) -> MemoryProvider {
        debug!("Created in-memory store with {} tables", self.tables.len());
        MemoryProvider {
            committed: Arc::new(RwLock::new(MemoryState {
                tables: self.tables,
                tombstones: MemoryTombstones::default(),
            })),
            latency: self.latency,
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| Error::storage("Memory store lock poisoned"))
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| Error::storage("Memory store lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::test_entities::*;
    use chrono::Duration as ChronoDuration;

    fn provider() -> MemoryProvider {
        MemoryProvider::builder()
            .with_entity::<Folder>()
            .with_unique::<Folder>("name", |f| f.name.clone())
            .with_entity::<Note>()
            .build()
    }

    #[test]
    fn test_unsaved_work_is_discarded() {
        let provider = provider();
        {
            let mut db = provider.open().unwrap();
            db.repository::<Folder>().unwrap().add(folder("Drafts")).unwrap();
        }
        assert_eq!(provider.count::<Folder>().unwrap(), 0);

        let mut db = provider.open().unwrap();
        db.repository::<Folder>().unwrap().add(folder("Drafts")).unwrap();
        db.save_changes().unwrap();
        assert_eq!(provider.count::<Folder>().unwrap(), 1);
    }

    #[test]
    fn test_add_assigns_ids_and_enforces_uniqueness() {
        let provider = provider();
        let first = provider.insert(folder("Inbox")).unwrap();
        assert_eq!(first.id, 1);

        let duplicate_sync_id = provider.insert(first.clone()).unwrap_err();
        assert!(matches!(duplicate_sync_id, Error::Constraint { .. }));

        let duplicate_name = provider.insert(folder("Inbox")).unwrap_err();
        assert!(duplicate_name.to_string().contains("duplicate name"));
    }

    #[test]
    fn test_delete_records_tombstone() {
        let provider = provider();
        let inbox = provider.insert(folder("Inbox")).unwrap();

        assert!(provider.delete::<Folder>(inbox.sync_id).unwrap());
        assert!(!provider.delete::<Folder>(inbox.sync_id).unwrap());

        let tombstones = provider.tombstones().unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].sync_id, inbox.sync_id);
        assert_eq!(tombstones[0].type_name, "Folder");
    }

    #[test]
    fn test_changes_are_windowed_and_ordered() {
        let provider = provider();
        let base = Utc::now();
        for (offset, name) in [(3, "c"), (1, "a"), (2, "b")] {
            let mut entity = folder(name);
            entity.modified_on = base + ChronoDuration::seconds(offset);
            provider.insert(entity).unwrap();
        }

        let mut db = provider.open().unwrap();
        let repository = db.repository::<Folder>().unwrap();
        let since = base + ChronoDuration::seconds(1);
        let until = base + ChronoDuration::seconds(3);

        assert_eq!(repository.change_count(since, until).unwrap(), 2);
        let names: Vec<String> = repository
            .changes(since, until, 0, 10)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_modify_stamps_modified_on() {
        let provider = provider();
        let mut inbox = folder("Inbox");
        inbox.modified_on = Utc::now() - ChronoDuration::hours(1);
        let inbox = provider.insert(inbox).unwrap();

        assert!(provider
            .modify::<Folder, _>(inbox.sync_id, |f| f.name = "Archive".to_string())
            .unwrap());

        let stored = provider.get::<Folder>(inbox.sync_id).unwrap().unwrap();
        assert_eq!(stored.name, "Archive");
        assert!(stored.modified_on > inbox.modified_on);
    }

    #[test]
    fn test_interleaved_units_keep_each_others_writes() {
        let provider = provider();
        let inbox = provider.insert(folder("Inbox")).unwrap();

        let mut first = provider.open().unwrap();
        let mut second = provider.open().unwrap();

        let drafts = first.repository::<Folder>().unwrap().add(folder("Drafts")).unwrap();
        let sent = second.repository::<Folder>().unwrap().add(folder("Sent")).unwrap();
        assert_ne!(drafts.id, sent.id);

        let mut renamed = inbox.clone();
        renamed.name = "Archive".to_string();
        second.repository::<Folder>().unwrap().update(renamed).unwrap();
        // Drafts is not visible to the second unit
        assert!(!second.remove_entity::<Folder>(drafts.sync_id, Utc::now()).unwrap());

        // Written while both units are open
        let outside = provider.insert(note("outside", None)).unwrap();

        first.save_changes().unwrap();
        second.save_changes().unwrap();

        let names: Vec<String> = provider
            .list::<Folder>()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["Archive", "Drafts", "Sent"]);
        assert!(provider.get::<Note>(outside.sync_id).unwrap().is_some());
        assert!(provider.tombstones().unwrap().is_empty());
    }

    #[test]
    fn test_saving_twice_does_not_repeat_writes() {
        let provider = provider();
        let mut db = provider.open().unwrap();
        db.repository::<Folder>().unwrap().add(folder("Inbox")).unwrap();
        db.save_changes().unwrap();
        db.save_changes().unwrap();

        assert_eq!(provider.count::<Folder>().unwrap(), 1);
    }

    #[test]
    fn test_conflicting_save_leaves_committed_state_untouched() {
        let provider = provider();
        let mut first = provider.open().unwrap();
        let mut second = provider.open().unwrap();

        first.repository::<Folder>().unwrap().add(folder("Inbox")).unwrap();
        second.repository::<Folder>().unwrap().add(folder("Outbox")).unwrap();
        second.repository::<Folder>().unwrap().add(folder("Inbox")).unwrap();

        first.save_changes().unwrap();
        let error = second.save_changes().unwrap_err();

        assert!(matches!(error, Error::Constraint { .. }));
        let names: Vec<String> = provider
            .list::<Folder>()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["Inbox"]);
    }

    #[test]
    fn test_unregistered_type() {
        let provider = MemoryProvider::builder().with_entity::<Folder>().build();
        let error = provider.list::<Note>().unwrap_err();
        assert!(matches!(error, Error::UnknownType { .. }));
    }
}
