//! Change enumeration and application for FerroSync
//!
//! This crate holds the node-side half of a bidirectional sync:
//!
//! - **Sync Entities**: A capability trait for persisted records with a global identity
//! - **Relationships**: Declarative foreign keys repaired from sync ids on apply
//! - **Exclusions**: Cached per-type field exclusion sets for each direction
//! - **Conflict Rules**: Timestamp, tombstone and correction handling for incoming changes
//! - **Converters**: Field-by-field reshaping of objects between schemas
//! - **Storage**: Unit-of-work interfaces plus an in-memory provider
//! - **Clients**: Paged enumeration and ordered, batch-first application
//!
//! # Examples
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use ferrosync_core::{LocalSyncClient, MemoryProvider, SyncClient, SyncEntity};
//! use ferrosync_types::{SyncId, SyncOptions, SyncRequest, Timestamp};
//! use serde::{Deserialize, Serialize};
//! use uuid::Uuid;
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct Task {
//!     id: i64,
//!     sync_id: SyncId,
//!     created_on: Timestamp,
//!     modified_on: Timestamp,
//!     is_deleted: bool,
//!     title: String,
//! }
//!
//! impl SyncEntity for Task {
//!     const TYPE_NAME: &'static str = "Task";
//!     ferrosync_core::sync_entity_accessors!();
//! }
//!
//! # fn main() -> ferrosync_types::Result<()> {
//! let provider = MemoryProvider::builder().with_entity::<Task>().build();
//! provider.insert(Task {
//!     sync_id: Uuid::new_v4(),
//!     created_on: Utc::now(),
//!     modified_on: Utc::now(),
//!     title: "write docs".to_string(),
//!     ..Task::default()
//! })?;
//!
//! let client = LocalSyncClient::builder("local", provider)
//!     .register::<Task>()
//!     .build()?;
//! let session = Uuid::new_v4();
//! client.begin_sync(session, &SyncOptions::default())?;
//! let request = SyncRequest::window(Utc::now() - Duration::hours(1), Utc::now() + Duration::hours(1));
//! let page = client.get_changes(session, &request)?;
//! assert_eq!(page.collection.len(), 1);
//! client.end_sync(session)?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub use ferrosync_types as types;

pub mod client;
pub mod conflict;
pub mod converter;
pub mod entity;
pub mod exclusion;
pub mod memory;
pub mod relationship;
pub mod repository;
pub mod storage;

pub use client::{LocalSyncClient, LocalSyncClientBuilder, SyncClient};
pub use conflict::{ChangeAction, ConflictResolver, LocalState, Resolution, SkipReason};
pub use converter::{ConverterSet, MappingDelegate, ObjectConverter, SyncObjectConverter};
pub use entity::{fields, EntityExclusions, SyncEntity};
pub use exclusion::{ExclusionCache, ExclusionDirection, ExclusionStats};
pub use memory::{MemoryDatabase, MemoryProvider, MemoryProviderBuilder};
pub use relationship::Relationship;
pub use repository::{
    ApplyContext, ApplyOutcome, CorrectionEntry, EntitySet, SyncRegistry, SyncRepository,
};
pub use storage::{Repository, SyncDatabaseProvider, SyncableDatabase, TombstoneStore};
