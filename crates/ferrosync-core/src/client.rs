//! Change clients
//!
//! A [`SyncClient`] is one side of a sync: it enumerates its changes page by
//! page and applies the changes of its peer. [`LocalSyncClient`] implements
//! it over a storage provider.

use crate::conflict::ConflictResolver;
use crate::converter::ConverterSet;
use crate::entity::SyncEntity;
use crate::exclusion::ExclusionCache;
use crate::repository::{ApplyContext, ApplyOutcome, SyncRegistry, SyncRepository};
use crate::storage::{SyncDatabaseProvider, SyncableDatabase};
use chrono::Utc;
use ferrosync_types::{
    Cancellable, CancellationContext, Error, RepositoryFilter, Result, ServiceResult, SessionId,
    SyncId, SyncIssue, SyncIssueType, SyncObject, SyncOptions, SyncRequest, SyncSession,
    SyncStatistics, SyncTombstone,
};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// One side of a sync
///
/// Calls are blocking; the orchestration layer runs them off the async
/// runtime.
pub trait SyncClient: Send + Sync {
    /// Client name, used in logs and sessions
    fn name(&self) -> &str;

    /// Open a session
    fn begin_sync(&self, session_id: SessionId, options: &SyncOptions) -> Result<SyncSession>;

    /// Enumerate one page of changes
    fn get_changes(
        &self,
        session_id: SessionId,
        request: &SyncRequest,
    ) -> Result<ServiceResult<SyncObject>>;

    /// Apply changes from the peer
    fn apply_changes(
        &self,
        session_id: SessionId,
        changes: &[SyncObject],
    ) -> Result<ServiceResult<SyncIssue>>;

    /// Apply corrections from the peer, bypassing timestamp and tombstone rules
    fn apply_corrections(
        &self,
        session_id: SessionId,
        corrections: &[SyncObject],
    ) -> Result<ServiceResult<SyncIssue>>;

    /// Current local state for the objects the peer failed to apply
    fn get_corrections(
        &self,
        session_id: SessionId,
        issues: &[SyncIssue],
    ) -> Result<ServiceResult<SyncObject>>;

    /// Close a session
    fn end_sync(&self, session_id: SessionId) -> Result<SyncStatistics>;
}

struct SessionState {
    session: SyncSession,
    statistics: SyncStatistics,
}

struct ChangeGroup {
    type_name: String,
    deleted: bool,
    objects: Vec<SyncObject>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ApplyCounters {
    applied: u64,
    skipped: u64,
}

impl ApplyCounters {
    fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied(_) => self.applied += 1,
            ApplyOutcome::Skipped(_) => self.skipped += 1,
            ApplyOutcome::Rejected(_) => {}
        }
    }

    fn merge(&mut self, other: Self) {
        self.applied += other.applied;
        self.skipped += other.skipped;
    }
}

/// Sync client over a local storage provider
pub struct LocalSyncClient<P: SyncDatabaseProvider> {
    name: String,
    provider: P,
    registry: SyncRegistry<P::Database>,
    exclusions: Arc<ExclusionCache>,
    converters: ConverterSet,
    cancellation: CancellationContext,
    sessions: Mutex<HashMap<SessionId, SessionState>>,
}

impl<P: SyncDatabaseProvider> LocalSyncClient<P> {
    /// Start building a client
    pub fn builder(name: impl Into<String>, provider: P) -> LocalSyncClientBuilder<P> {
        LocalSyncClientBuilder::new(name, provider)
    }

    /// Storage provider
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Registered repositories
    pub fn registry(&self) -> &SyncRegistry<P::Database> {
        &self.registry
    }

    /// Shared exclusion cache
    pub fn exclusions(&self) -> &Arc<ExclusionCache> {
        &self.exclusions
    }

    /// Cancellation context checked by this client
    pub fn cancellation(&self) -> &CancellationContext {
        &self.cancellation
    }

    /// Enumerate changes without a session or converters
    ///
    /// Repositories are walked in registration order, then tombstones. A
    /// running `skipped` counter carries the page offset across sources so
    /// that consecutive pages concatenate to the full sequence.
    pub fn enumerate(
        &self,
        options: &SyncOptions,
        request: &SyncRequest,
    ) -> Result<ServiceResult<SyncObject>> {
        if request.is_empty_window() {
            return Ok(ServiceResult::new(Vec::new(), request.skip, request.take, 0));
        }

        let (since, until) = (request.since, request.until);
        let mut db = self.provider.open()?;
        let mut page = Vec::with_capacity(request.take.min(1024));
        let mut skipped = 0;
        let mut total = 0;

        for repository in self.registry.repositories() {
            if options.is_repository_excluded(repository.type_name()) {
                debug!("Repository {} is filtered out", repository.type_name());
                continue;
            }
            let count = repository.change_count(&mut db, since, until)?;
            total += count;
            page_source(&mut page, &mut skipped, count, request, |skip, take| {
                repository.changes(&mut db, since, until, skip, take, &self.exclusions)
            })?;
        }

        let count = db.tombstones().count(since, until)?;
        if options
            .repository_filters
            .iter()
            .any(RepositoryFilter::excludes_repository)
        {
            // Excluded types can sit anywhere in the tombstone window, so the
            // window is filtered in full before paging.
            let kept: Vec<SyncObject> = db
                .tombstones()
                .window(since, until, 0, count)?
                .iter()
                .filter(|tombstone| !options.is_repository_excluded(&tombstone.type_name))
                .map(SyncTombstone::to_sync_object)
                .collect();
            total += kept.len();
            page_source(&mut page, &mut skipped, kept.len(), request, |skip, take| {
                Ok(kept.iter().skip(skip).take(take).cloned().collect())
            })?;
        } else {
            total += count;
            page_source(&mut page, &mut skipped, count, request, |skip, take| {
                Ok(db
                    .tombstones()
                    .window(since, until, skip, take)?
                    .iter()
                    .map(SyncTombstone::to_sync_object)
                    .collect())
            })?;
        }

        Ok(ServiceResult::new(page, request.skip, request.take, total))
    }

    fn lock_sessions(&self) -> Result<MutexGuard<'_, HashMap<SessionId, SessionState>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::sync("Session table lock poisoned"))
    }

    fn session_options(&self, session_id: SessionId) -> Result<SyncOptions> {
        self.lock_sessions()?
            .get(&session_id)
            .map(|state| state.session.options.clone())
            .ok_or_else(|| Error::sync(format!("Session {} is not open", session_id)))
    }

    fn record<F>(&self, session_id: SessionId, update: F) -> Result<()>
    where
        F: FnOnce(&mut SyncStatistics),
    {
        if let Some(state) = self.lock_sessions()?.get_mut(&session_id) {
            update(&mut state.statistics);
        }
        Ok(())
    }

    fn apply(
        &self,
        session_id: SessionId,
        objects: &[SyncObject],
        resolver: ConflictResolver,
    ) -> Result<ServiceResult<SyncIssue>> {
        let options = self.session_options(session_id)?;
        let (converted, mut issues) = self.converters.convert_incoming(objects);
        let mut counters = ApplyCounters::default();

        for group in self.group(converted) {
            self.cancellation.check_cancelled()?;
            let group_issues = self.apply_group(&group, &options, resolver, &mut counters)?;
            issues.extend(group_issues);
        }

        let failures = issues.iter().filter(|i| i.issue_type.is_failure()).count() as u64;
        let correction = resolver.is_correction();
        self.record(session_id, |stats| {
            stats.applied += counters.applied;
            stats.skipped += counters.skipped;
            stats.issues += failures;
            if correction {
                stats.corrections += counters.applied;
            }
        })?;

        info!(
            "{} applied {} of {} {} ({} skipped, {} issues)",
            self.name,
            counters.applied,
            objects.len(),
            if correction { "corrections" } else { "changes" },
            counters.skipped,
            failures
        );

        if !options.include_issue_details {
            issues = issues.into_iter().map(SyncIssue::without_details).collect();
        }
        Ok(ServiceResult::complete(issues))
    }

    /// Group by type and deletion, upserts ascending then deletes descending
    fn group(&self, objects: Vec<SyncObject>) -> Vec<ChangeGroup> {
        let mut groups: Vec<ChangeGroup> = Vec::new();
        for object in objects {
            let deleted = object.is_deleted();
            match groups
                .iter_mut()
                .find(|g| g.deleted == deleted && g.type_name == object.type_name())
            {
                Some(group) => group.objects.push(object),
                None => groups.push(ChangeGroup {
                    type_name: object.type_name().to_string(),
                    deleted,
                    objects: vec![object],
                }),
            }
        }

        let rank = |group: &ChangeGroup| {
            self.registry
                .order_of(&group.type_name)
                .unwrap_or(usize::MAX)
        };
        let (mut upserts, mut deletes): (Vec<_>, Vec<_>) =
            groups.into_iter().partition(|g| !g.deleted);
        upserts.sort_by_key(|g| rank(g));
        deletes.sort_by_key(|g| Reverse(rank(g)));
        upserts.into_iter().chain(deletes).collect()
    }

    fn apply_group(
        &self,
        group: &ChangeGroup,
        options: &SyncOptions,
        resolver: ConflictResolver,
        counters: &mut ApplyCounters,
    ) -> Result<Vec<SyncIssue>> {
        if options.is_repository_excluded(&group.type_name) {
            counters.skipped += group.objects.len() as u64;
            return Ok(group
                .objects
                .iter()
                .map(|o| {
                    SyncIssue::new(
                        o.sync_id(),
                        o.type_name(),
                        SyncIssueType::RepositoryFiltered,
                        format!("repository {} is filtered", o.type_name()),
                    )
                })
                .collect());
        }

        let Some(repository) = self.registry.get(&group.type_name) else {
            warn!("No repository registered for {}", group.type_name);
            return Ok(group
                .objects
                .iter()
                .map(|o| SyncIssue::unknown(o, format!("unknown sync type {}", o.type_name())))
                .collect());
        };

        let mut issues = Vec::new();
        let mut accepted = Vec::with_capacity(group.objects.len());
        for object in &group.objects {
            let allowed = options.filters_for(&group.type_name).all(|filter| {
                filter
                    .predicate
                    .as_ref()
                    .map_or(true, |predicate| predicate(object))
            });
            if allowed {
                accepted.push(object);
            } else {
                counters.skipped += 1;
                issues.push(SyncIssue::new(
                    object.sync_id(),
                    object.type_name(),
                    SyncIssueType::SyncEntityFiltered,
                    "entity is filtered",
                ));
            }
        }
        if accepted.is_empty() {
            return Ok(issues);
        }

        let context = ApplyContext {
            registry: &self.registry,
            exclusions: &self.exclusions,
            options,
            resolver,
        };

        match self.apply_batch(repository.as_ref(), &accepted, &context) {
            Ok(batch) => {
                counters.merge(batch);
                return Ok(issues);
            }
            Err(error) => warn!(
                "Batch of {} {} changes failed, applying individually: {}",
                accepted.len(),
                group.type_name,
                error
            ),
        }

        for object in accepted {
            self.cancellation.check_cancelled()?;
            match self.apply_single(repository.as_ref(), object, &context) {
                Ok(ApplyOutcome::Rejected(found)) => issues.extend(found),
                Ok(outcome) => counters.record(&outcome),
                Err(error) => {
                    if error.is_object_level() {
                        debug!("{} {} rejected: {}", object.type_name(), object.sync_id(), error);
                    } else {
                        warn!("{} {} failed: {}", object.type_name(), object.sync_id(), error);
                    }
                    issues.push(SyncIssue::new(
                        object.sync_id(),
                        object.type_name(),
                        error.issue_type(),
                        error.to_string(),
                    ));
                }
            }
        }

        Ok(issues)
    }

    /// All-or-nothing apply of a group in one unit of work
    fn apply_batch(
        &self,
        repository: &dyn SyncRepository<P::Database>,
        objects: &[&SyncObject],
        context: &ApplyContext<'_, P::Database>,
    ) -> Result<ApplyCounters> {
        let mut db = self.provider.open()?;
        let mut counters = ApplyCounters::default();

        for object in objects {
            let outcome = repository.apply(&mut db, object, context)?;
            if outcome.is_rejected() {
                return Err(Error::sync(format!(
                    "{} {} was rejected",
                    object.type_name(),
                    object.sync_id()
                )));
            }
            counters.record(&outcome);
        }

        db.save_changes()?;
        Ok(counters)
    }

    fn apply_single(
        &self,
        repository: &dyn SyncRepository<P::Database>,
        object: &SyncObject,
        context: &ApplyContext<'_, P::Database>,
    ) -> Result<ApplyOutcome> {
        let mut db = self.provider.open()?;
        let outcome = repository.apply(&mut db, object, context)?;
        if !outcome.is_rejected() {
            db.save_changes()?;
        }
        Ok(outcome)
    }

    fn collect_correction(
        &self,
        db: &mut P::Database,
        type_name: &str,
        sync_id: SyncId,
        seen: &mut HashSet<SyncId>,
        corrections: &mut Vec<SyncObject>,
    ) -> Result<()> {
        if !seen.insert(sync_id) {
            return Ok(());
        }
        let Some(repository) = self.registry.get(type_name) else {
            debug!("No correction for unregistered type {}", type_name);
            return Ok(());
        };

        match repository.correction(db, sync_id, &self.exclusions)? {
            Some(entry) => {
                for (target_type, target) in entry.references {
                    self.collect_correction(db, target_type, target, seen, corrections)?;
                }
                corrections.push(entry.object);
            }
            None => corrections.push(SyncObject::deleted(sync_id, type_name, Utc::now())),
        }
        Ok(())
    }
}

/// Fetch the part of one source that falls into the requested page
fn page_source<F>(
    page: &mut Vec<SyncObject>,
    skipped: &mut usize,
    count: usize,
    request: &SyncRequest,
    fetch: F,
) -> Result<()>
where
    F: FnOnce(usize, usize) -> Result<Vec<SyncObject>>,
{
    if count == 0 || page.len() >= request.take {
        return Ok(());
    }
    if *skipped + count <= request.skip {
        *skipped += count;
        return Ok(());
    }

    let inner_skip = request.skip.saturating_sub(*skipped);
    let take = request.take - page.len();
    let items = fetch(inner_skip, take)?;
    *skipped += inner_skip;
    page.extend(items.into_iter().take(take));
    Ok(())
}

impl<P: SyncDatabaseProvider> SyncClient for LocalSyncClient<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin_sync(&self, session_id: SessionId, options: &SyncOptions) -> Result<SyncSession> {
        let session = SyncSession::new(session_id, self.name.clone(), options.clone());
        let statistics = SyncStatistics {
            started_on: Some(session.started_on),
            ..SyncStatistics::default()
        };
        self.lock_sessions()?.insert(
            session_id,
            SessionState {
                session: session.clone(),
                statistics,
            },
        );
        debug!("{} opened session {}", self.name, session_id);
        Ok(session)
    }

    fn get_changes(
        &self,
        session_id: SessionId,
        request: &SyncRequest,
    ) -> Result<ServiceResult<SyncObject>> {
        let options = self.session_options(session_id)?;
        self.cancellation.check_cancelled()?;

        let page = self.enumerate(&options, request)?;
        let enumerated = page.collection.len() as u64;
        let collection = self.converters.convert_outgoing(page.collection)?;
        self.record(session_id, |stats| stats.enumerated += enumerated)?;

        debug!(
            "{} enumerated {} of {} changes (skip {})",
            self.name, enumerated, page.total_count, request.skip
        );
        Ok(ServiceResult {
            collection,
            ..page
        })
    }

    fn apply_changes(
        &self,
        session_id: SessionId,
        changes: &[SyncObject],
    ) -> Result<ServiceResult<SyncIssue>> {
        self.apply(session_id, changes, ConflictResolver::new())
    }

    fn apply_corrections(
        &self,
        session_id: SessionId,
        corrections: &[SyncObject],
    ) -> Result<ServiceResult<SyncIssue>> {
        self.apply(session_id, corrections, ConflictResolver::for_corrections())
    }

    fn get_corrections(
        &self,
        session_id: SessionId,
        issues: &[SyncIssue],
    ) -> Result<ServiceResult<SyncObject>> {
        self.session_options(session_id)?;
        let mut db = self.provider.open()?;
        let mut seen = HashSet::new();
        let mut corrections = Vec::new();

        for issue in issues.iter().filter(|i| i.issue_type.is_failure()) {
            self.cancellation.check_cancelled()?;
            let type_name = self.converters.local_type_for(&issue.type_name);
            self.collect_correction(&mut db, type_name, issue.id, &mut seen, &mut corrections)?;
        }

        debug!(
            "{} prepared {} corrections for {} issues",
            self.name,
            corrections.len(),
            issues.len()
        );
        let corrections = self.converters.convert_outgoing(corrections)?;
        Ok(ServiceResult::complete(corrections))
    }

    fn end_sync(&self, session_id: SessionId) -> Result<SyncStatistics> {
        let state = self
            .lock_sessions()?
            .remove(&session_id)
            .ok_or_else(|| Error::sync(format!("Session {} is not open", session_id)))?;

        let mut statistics = state.statistics;
        statistics.completed_on = Some(Utc::now());
        debug!("{} closed session {}", self.name, session_id);
        Ok(statistics)
    }
}

/// Builder for [`LocalSyncClient`]
pub struct LocalSyncClientBuilder<P: SyncDatabaseProvider> {
    name: String,
    provider: P,
    registry: SyncRegistry<P::Database>,
    exclusions: Option<Arc<ExclusionCache>>,
    converters: ConverterSet,
    cancellation: CancellationContext,
}

impl<P: SyncDatabaseProvider> LocalSyncClientBuilder<P> {
    fn new(name: impl Into<String>, provider: P) -> Self {
        Self {
            name: name.into(),
            provider,
            registry: SyncRegistry::new(),
            exclusions: None,
            converters: ConverterSet::new(),
            cancellation: CancellationContext::new(),
        }
    }

    /// Register an entity type; registration order is the enumeration order
    pub fn register<T: SyncEntity>(mut self) -> Self {
        self.registry.register::<T>();
        self
    }

    /// Set an explicit dependency order
    pub fn with_sync_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.set_order(order);
        self
    }

    /// Share an exclusion cache
    pub fn with_exclusions(mut self, exclusions: Arc<ExclusionCache>) -> Self {
        self.exclusions = Some(exclusions);
        self
    }

    /// Set the converters
    pub fn with_converters(mut self, converters: ConverterSet) -> Self {
        self.converters = converters;
        self
    }

    /// Set the cancellation context
    pub fn with_cancellation(mut self, cancellation: CancellationContext) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Build the client, activating its converters
    pub fn build(self) -> Result<LocalSyncClient<P>> {
        let exclusions = self.exclusions.unwrap_or_else(ExclusionCache::shared);
        self.converters.activate(&exclusions)?;

        if self.registry.is_empty() {
            warn!("Sync client {} has no registered types", self.name);
        }

        Ok(LocalSyncClient {
            name: self.name,
            provider: self.provider,
            registry: self.registry,
            exclusions,
            converters: self.converters,
            cancellation: self.cancellation,
            sessions: Mutex::new(HashMap::new()),
        })
    }
}
