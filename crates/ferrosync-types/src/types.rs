//! Core data types for FerroSync
//!
//! This module provides the wire envelope ([`SyncObject`]), tombstones,
//! issues, paging requests and the per-run [`SyncOptions`].

use crate::ItemsPerRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Globally unique, cross-node identity of a sync entity
pub type SyncId = uuid::Uuid;

/// Session identifier handed out by `begin_sync`
pub type SessionId = uuid::Uuid;

/// Point in time used for change windows
pub type Timestamp = DateTime<Utc>;

/// Change status carried by a [`SyncObject`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Entity was created
    Added,
    /// Entity was changed
    Modified,
    /// Entity was removed
    Deleted,
}

/// The unit of transmission between two nodes
///
/// Once built a sync object is never mutated; converters produce new
/// objects instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncObject {
    sync_id: SyncId,
    type_name: String,
    data: String,
    modified_on: Timestamp,
    status: SyncStatus,
}

impl SyncObject {
    /// Create a new sync object
    pub fn new(
        sync_id: SyncId,
        type_name: impl Into<String>,
        data: impl Into<String>,
        modified_on: Timestamp,
        status: SyncStatus,
    ) -> Self {
        Self {
            sync_id,
            type_name: type_name.into(),
            data: data.into(),
            modified_on,
            status,
        }
    }

    /// Create a payload-less deletion record
    pub fn deleted(sync_id: SyncId, type_name: impl Into<String>, modified_on: Timestamp) -> Self {
        Self::new(sync_id, type_name, "", modified_on, SyncStatus::Deleted)
    }

    /// Global identity of the entity
    pub fn sync_id(&self) -> SyncId {
        self.sync_id
    }

    /// Wire type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Serialized entity
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Modification timestamp of the entity
    pub fn modified_on(&self) -> Timestamp {
        self.modified_on
    }

    /// Claimed status
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Check if this object describes a deletion
    pub fn is_deleted(&self) -> bool {
        self.status == SyncStatus::Deleted
    }
}

/// Durable marker of a hard deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTombstone {
    /// Local identifier, used as a tie breaker when ordering
    pub id: i64,
    /// Identity of the deleted entity
    pub sync_id: SyncId,
    /// Type of the deleted entity
    pub type_name: String,
    /// When the deletion happened
    pub created_on: Timestamp,
}

impl SyncTombstone {
    /// Synthesize the `Deleted` change record for this tombstone
    pub fn to_sync_object(&self) -> SyncObject {
        SyncObject::deleted(self.sync_id, self.type_name.clone(), self.created_on)
    }
}

/// Failure taxonomy for per-object problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncIssueType {
    /// Referenced entity not found locally, or deleted
    RelationshipConstraint,
    /// Uniqueness or index violation
    ConstraintException,
    /// Whole repository excluded by a filter
    RepositoryFiltered,
    /// Single entity excluded by a filter
    SyncEntityFiltered,
    /// Storage refused the update
    UpdateException,
    /// Client side failure
    ClientException,
    /// Credentials were refused
    Unauthorized,
    /// Client version is not accepted
    ClientNotSupported,
    /// Anything else, including unparseable payloads
    Unknown,
}

impl SyncIssueType {
    /// Filtered objects are skipped on purpose and are not failures
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::RepositoryFiltered | Self::SyncEntityFiltered)
    }
}

impl fmt::Display for SyncIssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A problem applying a single object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIssue {
    /// Sync id of the object that failed
    pub id: SyncId,
    /// Type name of the object that failed
    pub type_name: String,
    /// Classification of the failure
    pub issue_type: SyncIssueType,
    /// Human readable details, empty when details are suppressed
    pub message: String,
}

impl SyncIssue {
    /// Create a new issue
    pub fn new(
        id: SyncId,
        type_name: impl Into<String>,
        issue_type: SyncIssueType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            issue_type,
            message: message.into(),
        }
    }

    /// Issue for an object whose type or payload could not be resolved
    pub fn unknown(object: &SyncObject, message: impl Into<String>) -> Self {
        Self::new(
            object.sync_id(),
            object.type_name(),
            SyncIssueType::Unknown,
            message,
        )
    }

    /// Drop the message, used when the peer did not ask for details
    pub fn without_details(mut self) -> Self {
        self.message.clear();
        self
    }
}

/// Pagination window over the union of changes and tombstones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Inclusive lower bound
    pub since: Timestamp,
    /// Exclusive upper bound
    pub until: Timestamp,
    /// Number of items to skip
    pub skip: usize,
    /// Maximum number of items to return
    pub take: usize,
}

impl SyncRequest {
    /// Create a request for the first page of a window
    pub fn window(since: Timestamp, until: Timestamp) -> Self {
        Self {
            since,
            until,
            skip: 0,
            take: ItemsPerRequest::DEFAULT,
        }
    }

    /// Set the page
    pub fn with_page(mut self, skip: usize, take: usize) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }

    /// Request for the page that follows this one
    pub fn next_page(&self) -> Self {
        self.with_page(self.skip + self.take, self.take)
    }

    /// Check if the window cannot contain any change
    pub fn is_empty_window(&self) -> bool {
        self.since >= self.until || self.take == 0
    }
}

/// Predicate deciding whether an incoming object may be applied
pub type FilterPredicate = Arc<dyn Fn(&SyncObject) -> bool + Send + Sync>;

/// Administrative filter for one repository
///
/// Without a predicate the whole repository is excluded from both
/// enumeration and application.
#[derive(Clone)]
pub struct RepositoryFilter {
    /// Type the filter applies to
    pub type_name: String,
    /// Optional per-object predicate, `false` skips the object
    pub predicate: Option<FilterPredicate>,
}

impl RepositoryFilter {
    /// Exclude a whole repository
    pub fn exclude(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            predicate: None,
        }
    }

    /// Only accept objects matching `predicate`
    pub fn matching<F>(type_name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&SyncObject) -> bool + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            predicate: Some(Arc::new(predicate)),
        }
    }

    /// Check if the filter excludes the whole repository
    pub fn excludes_repository(&self) -> bool {
        self.predicate.is_none()
    }
}

impl fmt::Debug for RepositoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryFilter")
            .field("type_name", &self.type_name)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Options for one sync run
///
/// Each profile owns one instance; it is cloned before every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Upper bound of the last window pulled from the client
    pub last_synced_on_client: Option<Timestamp>,
    /// Upper bound of the last window pulled from the server
    pub last_synced_on_server: Option<Timestamp>,
    /// Page size for change enumeration
    pub items_per_sync_request: ItemsPerRequest,
    /// Hard delete instead of flagging entities as deleted
    pub permanent_deletions: bool,
    /// Include messages in returned issues
    pub include_issue_details: bool,
    /// Free-form values passed to the peer
    pub values: HashMap<String, String>,
    /// Administrative filters
    #[serde(skip)]
    pub repository_filters: Vec<RepositoryFilter>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            last_synced_on_client: None,
            last_synced_on_server: None,
            items_per_sync_request: ItemsPerRequest::default(),
            permanent_deletions: false,
            include_issue_details: true,
            values: HashMap::new(),
            repository_filters: Vec::new(),
        }
    }
}

impl SyncOptions {
    /// Add a free-form value
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Add a repository filter
    pub fn with_filter(mut self, filter: RepositoryFilter) -> Self {
        self.repository_filters.push(filter);
        self
    }

    /// Filters registered for a type
    pub fn filters_for<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a RepositoryFilter> + 'a {
        self.repository_filters
            .iter()
            .filter(move |filter| filter.type_name == type_name)
    }

    /// Check if a repository is excluded entirely
    pub fn is_repository_excluded(&self, type_name: &str) -> bool {
        self.filters_for(type_name)
            .any(RepositoryFilter::excludes_repository)
    }
}

/// A page of results from a service call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResult<T> {
    /// Items in this page
    pub collection: Vec<T>,
    /// Skip used for this page
    pub skip: usize,
    /// Take used for this page
    pub take: usize,
    /// Total items available across all pages
    pub total_count: usize,
    /// Whether another page is available
    pub has_more: bool,
}

impl<T> ServiceResult<T> {
    /// Create a page
    pub fn new(collection: Vec<T>, skip: usize, take: usize, total_count: usize) -> Self {
        let has_more = skip + collection.len() < total_count;
        Self {
            collection,
            skip,
            take,
            total_count,
            has_more,
        }
    }

    /// Create a single page holding every item
    pub fn complete(collection: Vec<T>) -> Self {
        let total = collection.len();
        Self::new(collection, 0, total, total)
    }
}

/// An open sync session on one client
#[derive(Debug, Clone)]
pub struct SyncSession {
    /// Session identifier
    pub session_id: SessionId,
    /// Name of the client that opened the session
    pub client_name: String,
    /// When the session began
    pub started_on: Timestamp,
    /// Options in effect for the session
    pub options: SyncOptions,
}

impl SyncSession {
    /// Open a session
    pub fn new(session_id: SessionId, client_name: impl Into<String>, options: SyncOptions) -> Self {
        Self {
            session_id,
            client_name: client_name.into(),
            started_on: Utc::now(),
            options,
        }
    }
}

/// Counters collected over one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Objects enumerated for the peer
    pub enumerated: u64,
    /// Objects persisted locally
    pub applied: u64,
    /// Objects skipped (older, tombstoned or filtered)
    pub skipped: u64,
    /// Failure issues produced
    pub issues: u64,
    /// Corrections applied
    pub corrections: u64,
    /// Session start
    pub started_on: Option<Timestamp>,
    /// Session end
    pub completed_on: Option<Timestamp>,
}

impl SyncStatistics {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Elapsed time of the session, when finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_on, self.completed_on) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Merge counters from another instance
    pub fn merge(&mut self, other: &SyncStatistics) {
        self.enumerated += other.enumerated;
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.issues += other.issues;
        self.corrections += other.corrections;
    }
}
