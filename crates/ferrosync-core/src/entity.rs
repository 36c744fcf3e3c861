//! The sync-entity capability and its JSON helpers

use crate::relationship::Relationship;
use ferrosync_types::{Result, SyncId, SyncObject, SyncStatus, Timestamp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Serialized field names shared by every sync entity
pub mod fields {
    /// Node-local primary key
    pub const ID: &str = "id";
    /// Global identity
    pub const SYNC_ID: &str = "sync_id";
    /// Creation timestamp
    pub const CREATED_ON: &str = "created_on";
    /// Modification timestamp
    pub const MODIFIED_ON: &str = "modified_on";
    /// Soft deletion flag
    pub const IS_DELETED: &str = "is_deleted";
}

/// Extra fields a type keeps out of each direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityExclusions {
    /// Fields never accepted from a peer
    pub incoming: Vec<&'static str>,
    /// Fields never sent to a peer
    pub outgoing: Vec<&'static str>,
    /// Fields never overwritten by an update from a peer
    pub update: Vec<&'static str>,
}

/// A persisted record that takes part in synchronization
///
/// Implementors serialize with the field names in [`fields`] and should use
/// `#[serde(default)]` so that excluded fields fall back to their defaults.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Wire type name, unique across registered types
    const TYPE_NAME: &'static str;

    /// Node-local primary key, `0` until storage assigns one
    fn id(&self) -> i64;

    /// Set the node-local primary key
    fn set_id(&mut self, id: i64);

    /// Global identity
    fn sync_id(&self) -> SyncId;

    /// Set the global identity
    fn set_sync_id(&mut self, sync_id: SyncId);

    /// Creation timestamp
    fn created_on(&self) -> Timestamp;

    /// Modification timestamp
    fn modified_on(&self) -> Timestamp;

    /// Set the modification timestamp
    fn set_modified_on(&mut self, modified_on: Timestamp);

    /// Soft deletion flag
    fn is_deleted(&self) -> bool;

    /// Set the soft deletion flag
    fn set_deleted(&mut self, deleted: bool);

    /// Relationship descriptors, read once when the type is registered
    fn relationships() -> Vec<Relationship<Self>> {
        Vec::new()
    }

    /// Per-type exclusions on top of the defaults
    fn exclusions() -> EntityExclusions {
        EntityExclusions::default()
    }

    /// Copy every field not in `excluded` from `other` into `self`
    fn apply_update(&mut self, other: &Self, excluded: &HashSet<String>) -> Result<()> {
        let mut target = to_map(self)?;
        for (key, value) in to_map(other)? {
            if !excluded.contains(&key) {
                target.insert(key, value);
            }
        }
        *self = serde_json::from_value(Value::Object(target))?;
        Ok(())
    }
}

/// Implement the accessor methods of [`SyncEntity`] for a struct whose
/// fields are named `id`, `sync_id`, `created_on`, `modified_on` and
/// `is_deleted`
#[macro_export]
macro_rules! sync_entity_accessors {
    () => {
        fn id(&self) -> i64 {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
        fn sync_id(&self) -> $crate::types::SyncId {
            self.sync_id
        }
        fn set_sync_id(&mut self, sync_id: $crate::types::SyncId) {
            self.sync_id = sync_id;
        }
        fn created_on(&self) -> $crate::types::Timestamp {
            self.created_on
        }
        fn modified_on(&self) -> $crate::types::Timestamp {
            self.modified_on
        }
        fn set_modified_on(&mut self, modified_on: $crate::types::Timestamp) {
            self.modified_on = modified_on;
        }
        fn is_deleted(&self) -> bool {
            self.is_deleted
        }
        fn set_deleted(&mut self, deleted: bool) {
            self.is_deleted = deleted;
        }
    };
}

/// Serialize an entity into a JSON object
pub fn to_map<T: Serialize>(entity: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(ferrosync_types::Error::serialization(format!(
            "expected a JSON object, found {}",
            kind_name(&other)
        ))),
    }
}

/// Build the wire envelope for an entity, dropping `excluded` fields
pub fn to_sync_object<T: SyncEntity>(
    entity: &T,
    status: SyncStatus,
    excluded: &HashSet<String>,
) -> Result<SyncObject> {
    let mut map = to_map(entity)?;
    map.retain(|key, _| !excluded.contains(key));
    let data = serde_json::to_string(&Value::Object(map))?;
    Ok(SyncObject::new(
        entity.sync_id(),
        T::TYPE_NAME,
        data,
        entity.modified_on(),
        status,
    ))
}

/// Decode an entity from a sync object
pub fn from_sync_object<T: SyncEntity>(object: &SyncObject) -> Result<T> {
    from_sync_object_excluding(object, &HashSet::new())
}

/// Decode an entity, ignoring `excluded` fields of the payload
///
/// The sync id is always taken from the envelope.
pub fn from_sync_object_excluding<T: SyncEntity>(
    object: &SyncObject,
    excluded: &HashSet<String>,
) -> Result<T> {
    let mut map = match serde_json::from_str::<Value>(object.data())? {
        Value::Object(map) => map,
        other => {
            return Err(ferrosync_types::Error::serialization(format!(
                "{} payload is a JSON {}",
                object.type_name(),
                kind_name(&other)
            )))
        }
    };
    map.retain(|key, _| !excluded.contains(key));
    let mut entity: T = serde_json::from_value(Value::Object(map))?;
    entity.set_sync_id(object.sync_id());
    Ok(entity)
}

/// Status an entity is reported with inside a change window
pub fn change_status<T: SyncEntity>(entity: &T, since: Timestamp) -> SyncStatus {
    if entity.is_deleted() {
        SyncStatus::Deleted
    } else if entity.created_on() >= since {
        SyncStatus::Added
    } else {
        SyncStatus::Modified
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}


#[cfg(test)]
mod tests {
    use super::test_entities::*;
    use super::*;

    fn excluded(fields: &[&str]) -> HashSet<String> {
        fields.iter().map(|f| (*f).to_string()).collect()
    }

    #[test]
    fn test_round_trip_keeps_non_excluded_fields() {
        let mut original = folder("Inbox");
        original.id = 42;

        let object = to_sync_object(&original, SyncStatus::Added, &excluded(&["id"])).unwrap();
        let decoded: Folder = from_sync_object(&object).unwrap();

        assert_eq!(decoded.id, 0);
        assert_eq!(decoded.sync_id, original.sync_id);
        assert_eq!(decoded.name, original.name);
        assert_eq!(decoded.modified_on, original.modified_on);
        assert!(!object.data().contains("\"id\""));
    }

    #[test]
    fn test_envelope_sync_id_wins() {
        let original = folder("Inbox");
        let object = to_sync_object(&original, SyncStatus::Added, &HashSet::new()).unwrap();
        let forged = SyncObject::new(
            SyncId::new_v4(),
            "Folder",
            object.data(),
            object.modified_on(),
            SyncStatus::Added,
        );

        let decoded: Folder = from_sync_object(&forged).unwrap();
        assert_eq!(decoded.sync_id, forged.sync_id());
    }

    #[test]
    fn test_apply_update_honors_exclusions() {
        let mut local = folder("Local");
        local.id = 3;
        let mut remote = folder("Remote");
        remote.id = 99;

        local
            .apply_update(&remote, &excluded(&["id", "sync_id", "created_on"]))
            .unwrap();

        assert_eq!(local.id, 3);
        assert_eq!(local.name, "Remote");
        assert_ne!(local.sync_id, remote.sync_id);
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        let object = SyncObject::new(
            SyncId::new_v4(),
            "Folder",
            "[1,2,3]",
            chrono::Utc::now(),
            SyncStatus::Added,
        );

        let error = from_sync_object::<Folder>(&object).unwrap_err();
        assert!(error.to_string().contains("array"));
    }

    #[test]
    fn test_change_status() {
        let mut entity = folder("Inbox");
        let since = entity.created_on - chrono::Duration::seconds(1);
        assert_eq!(change_status(&entity, since), SyncStatus::Added);

        let later = entity.created_on + chrono::Duration::seconds(1);
        assert_eq!(change_status(&entity, later), SyncStatus::Modified);

        entity.is_deleted = true;
        assert_eq!(change_status(&entity, since), SyncStatus::Deleted);
    }
}
