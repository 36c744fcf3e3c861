//! Statically declared relationship descriptors
//!
//! A relationship pairs a cross-node reference (`<name>_sync_id`) with the
//! node-local key (`<name>_id`) that must be filled in before an entity is
//! persisted.

use crate::entity::SyncEntity;
use ferrosync_types::SyncId;
use std::fmt;

/// Reference from `T` to another sync entity type
pub struct Relationship<T> {
    name: &'static str,
    target_type: &'static str,
    id_field: &'static str,
    sync_id_field: &'static str,
    sync_id: fn(&T) -> Option<SyncId>,
    set_id: fn(&mut T, Option<i64>),
}

impl<T> Relationship<T> {
    /// Create a relationship to the type registered as `target_type`
    pub fn new(
        name: &'static str,
        target_type: &'static str,
        id_field: &'static str,
        sync_id_field: &'static str,
        sync_id: fn(&T) -> Option<SyncId>,
        set_id: fn(&mut T, Option<i64>),
    ) -> Self {
        Self {
            name,
            target_type,
            id_field,
            sync_id_field,
            sync_id,
            set_id,
        }
    }

    /// Create a relationship to `U`
    pub fn to<U: SyncEntity>(
        name: &'static str,
        id_field: &'static str,
        sync_id_field: &'static str,
        sync_id: fn(&T) -> Option<SyncId>,
        set_id: fn(&mut T, Option<i64>),
    ) -> Self {
        Self::new(name, U::TYPE_NAME, id_field, sync_id_field, sync_id, set_id)
    }

    /// Relationship name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name of the referenced entity
    pub fn target_type(&self) -> &'static str {
        self.target_type
    }

    /// Serialized name of the local key field
    pub fn id_field(&self) -> &'static str {
        self.id_field
    }

    /// Serialized name of the cross-node reference field
    pub fn sync_id_field(&self) -> &'static str {
        self.sync_id_field
    }

    /// Cross-node reference held by `entity`, if set
    pub fn target_sync_id(&self, entity: &T) -> Option<SyncId> {
        (self.sync_id)(entity)
    }

    /// Store the resolved local key on `entity`
    pub fn set_local_id(&self, entity: &mut T, id: Option<i64>) {
        (self.set_id)(entity, id);
    }
}

impl<T> Clone for Relationship<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Relationship<T> {}

impl<T> fmt::Debug for Relationship<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("name", &self.name)
            .field("target_type", &self.target_type)
            .field("id_field", &self.id_field)
            .field("sync_id_field", &self.sync_id_field)
            .finish()
    }
}
