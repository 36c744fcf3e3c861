//! Conflict resolution for incoming changes
//!
//! Decides, from the claimed status of a sync object and what exists locally,
//! whether the object is inserted, updated, deleted or skipped.

use ferrosync_types::{SyncStatus, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Why an incoming object was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// A tombstone exists and this is not a correction pass
    Tombstoned,
    /// The local entity is as new or newer
    Stale,
    /// There is nothing left to delete
    AlreadyDeleted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tombstoned => write!(f, "entity was deleted locally"),
            Self::Stale => write!(f, "local entity is newer"),
            Self::AlreadyDeleted => write!(f, "entity does not exist locally"),
        }
    }
}

/// What to do with an incoming object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    /// Create a new local entity
    Insert,
    /// Overwrite the local entity
    Update,
    /// Remove the local entity
    Delete,
    /// Leave local state untouched
    Skip(SkipReason),
}

/// Outcome of conflict resolution for one object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Action to perform
    pub action: ChangeAction,
    /// Drop the local tombstone first (correction undelete)
    pub restore_tombstone: bool,
}

impl Resolution {
    fn skip(reason: SkipReason) -> Self {
        Self {
            action: ChangeAction::Skip(reason),
            restore_tombstone: false,
        }
    }
}

/// Local facts about the entity an object refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalState {
    /// Modification time of the local entity, when it exists
    pub modified_on: Option<Timestamp>,
    /// Whether a tombstone exists for the sync id
    pub tombstoned: bool,
}

/// Conflict resolver for one application pass
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    correction: bool,
}

impl ConflictResolver {
    /// Resolver for a normal pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver for a correction pass, where incoming state always wins
    pub fn for_corrections() -> Self {
        Self { correction: true }
    }

    /// Check if this is a correction pass
    pub fn is_correction(&self) -> bool {
        self.correction
    }

    /// Reclassify a claimed status against local existence
    pub fn effective_status(claimed: SyncStatus, exists: bool) -> SyncStatus {
        match (claimed, exists) {
            (SyncStatus::Added, true) => SyncStatus::Modified,
            (SyncStatus::Modified, false) => SyncStatus::Added,
            (status, _) => status,
        }
    }

    /// Decide what to do with an object
    pub fn resolve(
        &self,
        claimed: SyncStatus,
        modified_on: Timestamp,
        local: LocalState,
    ) -> Resolution {
        let mut restore_tombstone = false;

        if local.tombstoned {
            if !self.correction {
                return Resolution::skip(SkipReason::Tombstoned);
            }
            if claimed == SyncStatus::Deleted {
                return Resolution::skip(SkipReason::AlreadyDeleted);
            }
            restore_tombstone = true;
        }

        let status = Self::effective_status(claimed, local.modified_on.is_some());
        if status != claimed {
            debug!("Reclassified {:?} change as {:?}", claimed, status);
        }

        let action = match (status, local.modified_on) {
            (SyncStatus::Deleted, Some(_)) => ChangeAction::Delete,
            (SyncStatus::Deleted, None) => ChangeAction::Skip(SkipReason::AlreadyDeleted),
            (SyncStatus::Added, _) => ChangeAction::Insert,
            (SyncStatus::Modified, Some(local_modified)) => {
                if self.correction || modified_on > local_modified {
                    ChangeAction::Update
                } else {
                    ChangeAction::Skip(SkipReason::Stale)
                }
            }
            (SyncStatus::Modified, None) => ChangeAction::Insert,
        };

        Resolution {
            action,
            restore_tombstone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use rstest::rstest;

    fn at(seconds: i64) -> Timestamp {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn missing() -> LocalState {
        LocalState {
            modified_on: None,
            tombstoned: false,
        }
    }

    fn existing(seconds: i64) -> LocalState {
        LocalState {
            modified_on: Some(at(seconds)),
            tombstoned: false,
        }
    }

    #[test]
    fn test_added_on_existing_is_update() {
        let resolution = ConflictResolver::new().resolve(SyncStatus::Added, at(20), existing(10));
        assert_eq!(resolution.action, ChangeAction::Update);
    }

    #[test]
    fn test_modified_on_missing_is_insert() {
        let resolution = ConflictResolver::new().resolve(SyncStatus::Modified, at(20), missing());
        assert_eq!(resolution.action, ChangeAction::Insert);
    }

    #[test]
    fn test_older_update_is_skipped_unless_correction() {
        let normal = ConflictResolver::new().resolve(SyncStatus::Modified, at(5), existing(10));
        assert_eq!(normal.action, ChangeAction::Skip(SkipReason::Stale));

        let equal = ConflictResolver::new().resolve(SyncStatus::Modified, at(10), existing(10));
        assert_eq!(equal.action, ChangeAction::Skip(SkipReason::Stale));

        let correction =
            ConflictResolver::for_corrections().resolve(SyncStatus::Modified, at(5), existing(10));
        assert_eq!(correction.action, ChangeAction::Update);
    }

    #[test]
    fn test_tombstone_handling() {
        let tombstoned = LocalState {
            modified_on: None,
            tombstoned: true,
        };

        let normal = ConflictResolver::new().resolve(SyncStatus::Added, at(1), tombstoned);
        assert_eq!(normal.action, ChangeAction::Skip(SkipReason::Tombstoned));
        assert!(!normal.restore_tombstone);

        let undelete = ConflictResolver::for_corrections().resolve(SyncStatus::Modified, at(1), tombstoned);
        assert_eq!(undelete.action, ChangeAction::Insert);
        assert!(undelete.restore_tombstone);

        let delete = ConflictResolver::for_corrections().resolve(SyncStatus::Deleted, at(1), tombstoned);
        assert_eq!(delete.action, ChangeAction::Skip(SkipReason::AlreadyDeleted));
        assert!(!delete.restore_tombstone);
    }

    #[rstest]
    #[case::existing(Some(9), ChangeAction::Delete)]
    #[case::missing(None, ChangeAction::Skip(SkipReason::AlreadyDeleted))]
    fn test_delete(#[case] local: Option<i64>, #[case] expected: ChangeAction) {
        let state = LocalState {
            modified_on: local.map(at),
            tombstoned: false,
        };
        let resolution = ConflictResolver::new().resolve(SyncStatus::Deleted, at(1), state);
        assert_eq!(resolution.action, expected);
    }

    fn status() -> impl Strategy<Value = SyncStatus> {
        prop_oneof![
            Just(SyncStatus::Added),
            Just(SyncStatus::Modified),
            Just(SyncStatus::Deleted),
        ]
    }

    proptest! {
        #[test]
        fn test_reclassification_matches_existence(claimed in status(), exists in any::<bool>()) {
            let effective = ConflictResolver::effective_status(claimed, exists);
            match effective {
                SyncStatus::Added => prop_assert!(!exists),
                SyncStatus::Modified => prop_assert!(exists),
                SyncStatus::Deleted => prop_assert_eq!(claimed, SyncStatus::Deleted),
            }
        }

        #[test]
        fn test_inserts_only_when_missing(
            claimed in status(),
            local in proptest::option::of(0i64..1_000),
            incoming in 0i64..1_000,
            correction in any::<bool>()
        ) {
            let resolver = if correction { ConflictResolver::for_corrections() } else { ConflictResolver::new() };
            let state = LocalState { modified_on: local.map(at), tombstoned: false };
            let resolution = resolver.resolve(claimed, at(incoming), state);

            if resolution.action == ChangeAction::Insert {
                prop_assert!(local.is_none());
            }
            if resolution.action == ChangeAction::Update {
                prop_assert!(local.is_some());
            }
        }
    }
}
