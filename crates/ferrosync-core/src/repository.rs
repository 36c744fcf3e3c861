//! Type-erased sync repositories and their registry
//!
//! [`EntitySet`] binds a [`SyncEntity`] type to the generic change
//! application rules so the client can work with sync objects of any
//! registered type by name.

use crate::conflict::{ChangeAction, ConflictResolver, LocalState, SkipReason};
use crate::entity::{change_status, from_sync_object_excluding, to_sync_object, SyncEntity};
use crate::exclusion::ExclusionCache;
use crate::relationship::Relationship;
use crate::storage::SyncableDatabase;
use chrono::Utc;
use ferrosync_types::{
    Error, Result, SyncId, SyncIssue, SyncIssueType, SyncObject, SyncOptions, SyncStatus,
    Timestamp,
};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of applying one object inside a unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object changed local state
    Applied(SyncStatus),
    /// The object was ignored
    Skipped(SkipReason),
    /// The object cannot be persisted; nothing was written for it
    Rejected(Vec<SyncIssue>),
}

impl ApplyOutcome {
    /// Check if this outcome prevents the unit of work from being saved
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Everything an application pass shares between objects
pub struct ApplyContext<'a, D> {
    /// Registered repositories, used for relationship repair
    pub registry: &'a SyncRegistry<D>,
    /// Shared exclusion sets
    pub exclusions: &'a ExclusionCache,
    /// Options of the running session
    pub options: &'a SyncOptions,
    /// Conflict rules of this pass
    pub resolver: ConflictResolver,
}

/// Current local state of an entity, as needed for corrections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionEntry {
    /// The entity as a sync object
    pub object: SyncObject,
    /// Entities it references, as `(type name, sync id)`
    pub references: Vec<(&'static str, SyncId)>,
}

/// Sync operations on the entities of one type
pub trait SyncRepository<D>: Send + Sync {
    /// Wire type name
    fn type_name(&self) -> &'static str;

    /// Number of changes in `[since, until)`
    fn change_count(&self, db: &mut D, since: Timestamp, until: Timestamp) -> Result<usize>;

    /// Changes in `[since, until)` as sync objects
    fn changes(
        &self,
        db: &mut D,
        since: Timestamp,
        until: Timestamp,
        skip: usize,
        take: usize,
        exclusions: &ExclusionCache,
    ) -> Result<Vec<SyncObject>>;

    /// Local id of a live entity
    fn local_id(&self, db: &mut D, sync_id: SyncId) -> Result<Option<i64>>;

    /// Apply one incoming object
    fn apply(
        &self,
        db: &mut D,
        object: &SyncObject,
        context: &ApplyContext<'_, D>,
    ) -> Result<ApplyOutcome>;

    /// Current local state of an entity
    fn correction(
        &self,
        db: &mut D,
        sync_id: SyncId,
        exclusions: &ExclusionCache,
    ) -> Result<Option<CorrectionEntry>>;
}

/// Sync repository for entities of type `T`
pub struct EntitySet<T: SyncEntity> {
    relationships: Vec<Relationship<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: SyncEntity> EntitySet<T> {
    /// Create the repository, reading the relationship table of `T` once
    pub fn new() -> Self {
        Self {
            relationships: T::relationships(),
            _marker: PhantomData,
        }
    }

    /// Resolve every relationship of `entity`, collecting all failures
    fn repair<D: SyncableDatabase>(
        &self,
        db: &mut D,
        entity: &mut T,
        context: &ApplyContext<'_, D>,
    ) -> Result<Vec<SyncIssue>> {
        let mut issues = Vec::new();

        for relationship in &self.relationships {
            let Some(target) = relationship.target_sync_id(entity) else {
                continue;
            };

            match context
                .registry
                .local_id(db, relationship.target_type(), target)?
            {
                Some(id) => relationship.set_local_id(entity, Some(id)),
                None => issues.push(SyncIssue::new(
                    entity.sync_id(),
                    T::TYPE_NAME,
                    SyncIssueType::RelationshipConstraint,
                    format!(
                        "{} references missing {} {}",
                        relationship.name(),
                        relationship.target_type(),
                        target
                    ),
                )),
            }
        }

        Ok(issues)
    }

    fn delete<D: SyncableDatabase>(
        db: &mut D,
        existing: Option<T>,
        object: &SyncObject,
        permanent: bool,
    ) -> Result<ApplyOutcome> {
        let Some(mut entity) = existing else {
            return Ok(ApplyOutcome::Skipped(SkipReason::AlreadyDeleted));
        };

        if permanent {
            db.remove_entity::<T>(object.sync_id(), Utc::now())?;
        } else {
            entity.set_deleted(true);
            entity.set_modified_on(object.modified_on());
            db.repository::<T>()?.update(entity)?;
        }
        Ok(ApplyOutcome::Applied(SyncStatus::Deleted))
    }
}

impl<T: SyncEntity> Default for EntitySet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SyncEntity, D: SyncableDatabase> SyncRepository<D> for EntitySet<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn change_count(&self, db: &mut D, since: Timestamp, until: Timestamp) -> Result<usize> {
        db.repository::<T>()?.change_count(since, until)
    }

    fn changes(
        &self,
        db: &mut D,
        since: Timestamp,
        until: Timestamp,
        skip: usize,
        take: usize,
        exclusions: &ExclusionCache,
    ) -> Result<Vec<SyncObject>> {
        let excluded = exclusions.outgoing::<T>()?;
        db.repository::<T>()?
            .changes(since, until, skip, take)?
            .iter()
            .map(|entity| to_sync_object(entity, change_status(entity, since), &excluded))
            .collect()
    }

    fn local_id(&self, db: &mut D, sync_id: SyncId) -> Result<Option<i64>> {
        Ok(db
            .repository::<T>()?
            .read(sync_id)?
            .filter(|entity| !entity.is_deleted())
            .map(|entity| entity.id()))
    }

    fn apply(
        &self,
        db: &mut D,
        object: &SyncObject,
        context: &ApplyContext<'_, D>,
    ) -> Result<ApplyOutcome> {
        let sync_id = object.sync_id();
        let tombstoned = db.tombstones().find(sync_id)?.is_some();
        let existing = db.repository::<T>()?.read(sync_id)?;
        let local = LocalState {
            modified_on: existing.as_ref().map(|entity| entity.modified_on()),
            tombstoned,
        };

        let resolution = context
            .resolver
            .resolve(object.status(), object.modified_on(), local);

        if resolution.restore_tombstone {
            let removed = db
                .tombstones()
                .remove_where(&|tombstone| tombstone.sync_id == sync_id)?;
            debug!("Restoring {} {} ({} tombstones removed)", T::TYPE_NAME, sync_id, removed);
        }

        match resolution.action {
            ChangeAction::Skip(reason) => {
                debug!("Skipped {} {}: {}", T::TYPE_NAME, sync_id, reason);
                Ok(ApplyOutcome::Skipped(reason))
            }
            ChangeAction::Delete => {
                Self::delete(db, existing, object, context.options.permanent_deletions)
            }
            ChangeAction::Insert => {
                let excluded = context.exclusions.incoming::<T>()?;
                let mut entity: T = from_sync_object_excluding(object, &excluded)?;
                let issues = self.repair(db, &mut entity, context)?;
                if !issues.is_empty() {
                    return Ok(ApplyOutcome::Rejected(issues));
                }
                db.repository::<T>()?.add(entity)?;
                Ok(ApplyOutcome::Applied(SyncStatus::Added))
            }
            ChangeAction::Update => {
                let mut local = existing.ok_or_else(|| {
                    Error::sync(format!("{} {} vanished during update", T::TYPE_NAME, sync_id))
                })?;
                let excluded = context.exclusions.incoming::<T>()?;
                let mut incoming: T = from_sync_object_excluding(object, &excluded)?;
                let issues = self.repair(db, &mut incoming, context)?;
                if !issues.is_empty() {
                    return Ok(ApplyOutcome::Rejected(issues));
                }
                local.apply_update(&incoming, &*context.exclusions.update::<T>()?)?;
                db.repository::<T>()?.update(local)?;
                Ok(ApplyOutcome::Applied(SyncStatus::Modified))
            }
        }
    }

    fn correction(
        &self,
        db: &mut D,
        sync_id: SyncId,
        exclusions: &ExclusionCache,
    ) -> Result<Option<CorrectionEntry>> {
        let Some(entity) = db.repository::<T>()?.read(sync_id)? else {
            return Ok(None);
        };

        let status = if entity.is_deleted() {
            SyncStatus::Deleted
        } else {
            SyncStatus::Modified
        };
        let object = to_sync_object(&entity, status, &*exclusions.outgoing::<T>()?)?;
        let references = self
            .relationships
            .iter()
            .filter_map(|r| r.target_sync_id(&entity).map(|id| (r.target_type(), id)))
            .collect();

        Ok(Some(CorrectionEntry { object, references }))
    }
}

/// Registered sync repositories of a node
///
/// Registration order is the enumeration order. The dependency order used
/// when applying changes defaults to the registration order and can be
/// replaced with an explicit list of type names. Registered types missing
/// from that list follow the listed ones, in registration order.
pub struct SyncRegistry<D> {
    repositories: Vec<Arc<dyn SyncRepository<D>>>,
    index: HashMap<&'static str, usize>,
    order: Option<Vec<String>>,
}

impl<D: SyncableDatabase> SyncRegistry<D> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            repositories: Vec::new(),
            index: HashMap::new(),
            order: None,
        }
    }

    /// Register an entity type
    pub fn register<T: SyncEntity>(&mut self) -> &mut Self {
        self.register_repository(Arc::new(EntitySet::<T>::new()))
    }

    /// Register a repository
    pub fn register_repository(&mut self, repository: Arc<dyn SyncRepository<D>>) -> &mut Self {
        let type_name = repository.type_name();
        if self.index.contains_key(type_name) {
            warn!("Sync type {} registered twice, keeping the first", type_name);
            return self;
        }
        self.index.insert(type_name, self.repositories.len());
        self.repositories.push(repository);
        self
    }

    /// Replace the dependency order, an empty list keeps registration order
    pub fn set_order<I, S>(&mut self, order: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let order: Vec<String> = order.into_iter().map(Into::into).collect();
        self.order = if order.is_empty() { None } else { Some(order) };
        self
    }

    /// Repository for a type name
    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn SyncRepository<D>>> {
        self.index.get(type_name).map(|i| &self.repositories[*i])
    }

    /// Repositories in enumeration order
    pub fn repositories(&self) -> impl Iterator<Item = &Arc<dyn SyncRepository<D>>> {
        self.repositories.iter()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    /// Check if no type is registered
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Position of a type in the dependency order, `None` when unregistered
    pub fn order_of(&self, type_name: &str) -> Option<usize> {
        let registered = self.index.get(type_name).copied()?;
        match &self.order {
            Some(order) => Some(
                order
                    .iter()
                    .position(|name| name == type_name)
                    .unwrap_or(order.len() + registered),
            ),
            None => Some(registered),
        }
    }

    /// Local id of a live entity of any registered type
    pub fn local_id(&self, db: &mut D, type_name: &str, sync_id: SyncId) -> Result<Option<i64>> {
        match self.get(type_name) {
            Some(repository) => repository.local_id(db, sync_id),
            None => Ok(None),
        }
    }
}

impl<D: SyncableDatabase> Default for SyncRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}
