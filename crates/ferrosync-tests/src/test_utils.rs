//! Unified test utilities for FerroSync tests and benchmarks

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ferrosync_core::entity::to_sync_object;
use ferrosync_core::{
    LocalSyncClient, MemoryProvider, Relationship, SyncClient, SyncEntity,
};
use ferrosync_engine::{SyncPair, SyncProfile};
use ferrosync_types::{
    CancellationContext, Result, SessionId, SyncId, SyncObject, SyncOptions, SyncRequest,
    SyncStatus, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Type name of [`Parent`]
pub const PARENT: &str = "Parent";
/// Type name of [`Child`]
pub const CHILD: &str = "Child";

/// Referenced entity with a unique name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parent {
    /// Local key
    pub id: i64,
    /// Global identity
    pub sync_id: SyncId,
    /// Creation time
    pub created_on: Timestamp,
    /// Modification time
    pub modified_on: Timestamp,
    /// Soft deletion flag
    pub is_deleted: bool,
    /// Unique name
    pub name: String,
}

impl SyncEntity for Parent {
    const TYPE_NAME: &'static str = PARENT;
    ferrosync_core::sync_entity_accessors!();
}

/// Entity referencing a [`Parent`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Child {
    /// Local key
    pub id: i64,
    /// Global identity
    pub sync_id: SyncId,
    /// Creation time
    pub created_on: Timestamp,
    /// Modification time
    pub modified_on: Timestamp,
    /// Soft deletion flag
    pub is_deleted: bool,
    /// Payload
    pub label: String,
    /// Local key of the parent
    pub parent_id: Option<i64>,
    /// Global identity of the parent
    pub parent_sync_id: Option<SyncId>,
}

impl SyncEntity for Child {
    const TYPE_NAME: &'static str = CHILD;
    ferrosync_core::sync_entity_accessors!();

    fn relationships() -> Vec<Relationship<Self>> {
        vec![Relationship::to::<Parent>(
            "parent",
            "parent_id",
            "parent_sync_id",
            |child| child.parent_sync_id,
            |child, id| child.parent_id = id,
        )]
    }
}

/// New parent stamped now
pub fn parent(name: &str) -> Parent {
    let now = Utc::now();
    Parent {
        sync_id: Uuid::new_v4(),
        created_on: now,
        modified_on: now,
        name: name.to_string(),
        ..Parent::default()
    }
}

/// New child of `parent` stamped now
pub fn child(label: &str, parent: Option<&Parent>) -> Child {
    let now = Utc::now();
    Child {
        sync_id: Uuid::new_v4(),
        created_on: now,
        modified_on: now,
        label: label.to_string(),
        parent_id: parent.map(|p| p.id),
        parent_sync_id: parent.map(|p| p.sync_id),
        ..Child::default()
    }
}

/// Wire envelope of an entity, leaving out its local keys
pub fn wire<T: SyncEntity>(entity: &T, status: SyncStatus) -> SyncObject {
    let mut excluded = HashSet::new();
    excluded.insert("id".to_string());
    for relationship in T::relationships() {
        excluded.insert(relationship.id_field().to_string());
    }
    match to_sync_object(entity, status, &excluded) {
        Ok(object) => object,
        Err(error) => panic!("fixture entity failed to serialize: {}", error),
    }
}

/// In-memory store with a unique `name` column on [`Parent`]
pub fn store() -> MemoryProvider {
    MemoryProvider::builder()
        .with_entity::<Parent>()
        .with_entity::<Child>()
        .with_unique::<Parent>("name", |parent| parent.name.clone())
        .build()
}

/// In-memory store that sleeps on every unit of work
pub fn slow_store(latency: Duration) -> MemoryProvider {
    MemoryProvider::builder()
        .with_entity::<Parent>()
        .with_entity::<Child>()
        .with_latency(latency)
        .build()
}

/// Client over `provider` that applies parents before children
pub fn node(
    name: &str,
    provider: &MemoryProvider,
    cancellation: &CancellationContext,
) -> Result<LocalSyncClient<MemoryProvider>> {
    LocalSyncClient::builder(name, provider.clone())
        .register::<Parent>()
        .register::<Child>()
        .with_sync_order([PARENT, CHILD])
        .with_cancellation(cancellation.clone())
        .build()
}

/// Open a session with default options
pub fn open_session<C: SyncClient + ?Sized>(client: &C) -> Result<SessionId> {
    let session = Uuid::new_v4();
    client.begin_sync(session, &SyncOptions::default())?;
    Ok(session)
}

/// Window covering every change made so far
pub fn everything() -> SyncRequest {
    SyncRequest::window(DateTime::<Utc>::MIN_UTC, Utc::now() + ChronoDuration::seconds(1))
}

/// Client and server stores shared by every run of a manager
#[derive(Debug, Clone)]
pub struct TwoNodes {
    /// Client store
    pub client: MemoryProvider,
    /// Server store
    pub server: MemoryProvider,
}

impl TwoNodes {
    /// Pair of plain stores
    pub fn new() -> Self {
        Self {
            client: store(),
            server: store(),
        }
    }

    /// Pair whose server is slow
    pub fn with_slow_server(latency: Duration) -> Self {
        Self {
            client: store(),
            server: slow_store(latency),
        }
    }

    /// Build the clients of one run
    pub fn pair(&self, profile: &SyncProfile, cancellation: &CancellationContext) -> Result<SyncPair> {
        let client = node(&format!("{}-client", profile.name), &self.client, cancellation)?;
        let server = node(&format!("{}-server", profile.name), &self.server, cancellation)?;
        Ok(SyncPair {
            client: Arc::new(client),
            server: Arc::new(server),
        })
    }
}

impl Default for TwoNodes {
    fn default() -> Self {
        Self::new()
    }
}
