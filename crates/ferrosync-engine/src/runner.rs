//! One bidirectional sync run
//!
//! A run pulls the server's changes into the client, then pushes the
//! client's changes to the server. After each direction the source is asked
//! for corrections covering every failure the target reported, and the
//! target applies them in correction mode.

use crate::monitor::ProgressReporter;
use crate::profile::SyncProfileStatus;
use chrono::{DateTime, Utc};
use ferrosync_core::SyncClient;
use ferrosync_types::{
    Cancellable, CancellationContext, Error, Result, SessionId, SyncIssue, SyncOptions,
    SyncRequest, SyncStatistics, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResults {
    /// Profile that ran
    pub profile: String,
    /// Final status
    pub status: SyncProfileStatus,
    /// Changes enumerated on the server and sent to the client
    pub pulled: u64,
    /// Changes enumerated on the client and sent to the server
    pub pushed: u64,
    /// Issues left after corrections, from both directions
    pub issues: Vec<SyncIssue>,
    /// Client session statistics
    pub client_statistics: SyncStatistics,
    /// Server session statistics
    pub server_statistics: SyncStatistics,
    /// New client watermark, set when the run completed
    pub last_synced_on_client: Option<Timestamp>,
    /// New server watermark, set when the run completed
    pub last_synced_on_server: Option<Timestamp>,
    /// Wall-clock duration
    pub elapsed: Duration,
    /// Error message of a failed run
    pub error: Option<String>,
}

impl SyncResults {
    /// Results of a run that never got going
    pub fn failed<S: Into<String>, E: Into<String>>(profile: S, error: E) -> Self {
        Self {
            profile: profile.into(),
            status: SyncProfileStatus::Failed,
            pulled: 0,
            pushed: 0,
            issues: Vec::new(),
            client_statistics: SyncStatistics::default(),
            server_statistics: SyncStatistics::default(),
            last_synced_on_client: None,
            last_synced_on_server: None,
            elapsed: Duration::ZERO,
            error: Some(error.into()),
        }
    }

    /// Check if the run completed
    pub fn is_success(&self) -> bool {
        self.status == SyncProfileStatus::Completed
    }
}

#[derive(Debug, Default)]
struct Transfer {
    count: u64,
    issues: Vec<SyncIssue>,
}

/// Runs one profile between a client and a server
pub struct SyncRunner {
    client: Arc<dyn SyncClient>,
    server: Arc<dyn SyncClient>,
    cancellation: CancellationContext,
    reporter: ProgressReporter,
}

impl SyncRunner {
    /// Create a runner
    pub fn new(
        client: Arc<dyn SyncClient>,
        server: Arc<dyn SyncClient>,
        cancellation: CancellationContext,
        reporter: ProgressReporter,
    ) -> Self {
        Self {
            client,
            server,
            cancellation,
            reporter,
        }
    }

    /// Run to a terminal status; errors are folded into the results
    pub fn run(&self, profile: &str, options: &SyncOptions) -> SyncResults {
        let started = Instant::now();
        let session = Uuid::new_v4();

        let mut results = match self.execute(profile, session, options) {
            Ok(results) => results,
            Err(error) => {
                self.abandon(session);
                let mut results = SyncResults::failed(profile, error.to_string());
                if matches!(error, Error::Cancelled) {
                    results.status = SyncProfileStatus::Cancelled;
                    results.error = None;
                }
                results
            }
        };
        results.elapsed = started.elapsed();

        let message = match results.status {
            SyncProfileStatus::Completed => format!(
                "Pulled {} and pushed {} changes with {} issues",
                results.pulled,
                results.pushed,
                results.issues.len()
            ),
            SyncProfileStatus::Cancelled => "Sync cancelled".to_string(),
            _ => results.error.clone().unwrap_or_default(),
        };
        if let Err(error) = self.reporter.finish(results.status, message) {
            warn!("Failed to report final state of {}: {}", profile, error);
        }
        results
    }

    fn execute(&self, profile: &str, session: SessionId, options: &SyncOptions) -> Result<SyncResults> {
        let until = Utc::now();
        self.client.begin_sync(session, options)?;
        self.server.begin_sync(session, options)?;
        debug!(
            "Opened session {} between {} and {}",
            session,
            self.client.name(),
            self.server.name()
        );

        self.reporter.status(
            SyncProfileStatus::Pulling,
            format!("Pulling changes from {}", self.server.name()),
        )?;
        let pull = self.transfer(
            self.server.as_ref(),
            self.client.as_ref(),
            session,
            options.last_synced_on_server,
            until,
            options,
        )?;

        self.reporter.status(
            SyncProfileStatus::Pushing,
            format!("Pushing changes to {}", self.server.name()),
        )?;
        let push = self.transfer(
            self.client.as_ref(),
            self.server.as_ref(),
            session,
            options.last_synced_on_client,
            until,
            options,
        )?;

        let client_statistics = self.client.end_sync(session)?;
        let server_statistics = self.server.end_sync(session)?;

        let mut issues = pull.issues;
        issues.extend(push.issues);
        info!(
            "Sync {} pulled {} and pushed {} changes ({} issues)",
            profile,
            pull.count,
            push.count,
            issues.len()
        );

        Ok(SyncResults {
            profile: profile.to_string(),
            status: SyncProfileStatus::Completed,
            pulled: pull.count,
            pushed: push.count,
            issues,
            client_statistics,
            server_statistics,
            last_synced_on_client: Some(until),
            last_synced_on_server: Some(until),
            elapsed: Duration::ZERO,
            error: None,
        })
    }

    /// Page every change of `source` in `[since, until)` into `target`
    fn transfer(
        &self,
        source: &dyn SyncClient,
        target: &dyn SyncClient,
        session: SessionId,
        since: Option<Timestamp>,
        until: Timestamp,
        options: &SyncOptions,
    ) -> Result<Transfer> {
        let since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut request = SyncRequest::window(since, until)
            .with_page(0, options.items_per_sync_request.get());
        let mut transfer = Transfer::default();

        loop {
            self.cancellation.check_cancelled()?;
            let page = source.get_changes(session, &request)?;
            if page.collection.is_empty() {
                break;
            }

            let applied = target.apply_changes(session, &page.collection)?;
            let count = page.collection.len() as u64;
            transfer.count += count;
            transfer.issues.extend(applied.collection);
            self.reporter.advance(count, page.total_count as u64)?;

            if !page.has_more {
                break;
            }
            request = request.next_page();
        }

        let failures: Vec<SyncIssue> = transfer
            .issues
            .iter()
            .filter(|issue| issue.issue_type.is_failure())
            .cloned()
            .collect();
        if failures.is_empty() {
            return Ok(transfer);
        }

        self.cancellation.check_cancelled()?;
        debug!(
            "{} reported {} failures, requesting corrections from {}",
            target.name(),
            failures.len(),
            source.name()
        );
        let corrections = source.get_corrections(session, &failures)?;
        if corrections.collection.is_empty() {
            return Ok(transfer);
        }
        let remaining = target.apply_corrections(session, &corrections.collection)?;

        transfer.issues.retain(|issue| !issue.issue_type.is_failure());
        transfer.issues.extend(remaining.collection);
        Ok(transfer)
    }

    fn abandon(&self, session: SessionId) {
        for client in [&self.client, &self.server] {
            if let Err(error) = client.end_sync(session) {
                debug!("Session {} on {} not closed: {}", session, client.name(), error);
            }
        }
    }
}
