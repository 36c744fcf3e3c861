//! Single-flight execution of sync profiles
//!
//! A [`SyncManager`] runs at most one profile at a time. A request that
//! finds another profile running either gives up immediately, waits up to a
//! timeout for it to finish, or cancels it and takes over. Whatever happens,
//! the request's post action runs exactly once and its [`SyncHandle`]
//! resolves to a [`SyncOutcome`].

use crate::monitor::{Dispatcher, ImmediateDispatcher, ProgressReporter, SyncState};
use crate::profile::{SyncProfile, SyncProfileStatus};
use crate::runner::{SyncResults, SyncRunner};
use ferrosync_config::Config;
use ferrosync_core::SyncClient;
use ferrosync_types::{Cancellable, CancellationContext, Error, Result, WaitConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// What became of a sync request
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The profile ran to completion or failure
    Ran(SyncResults),
    /// Another profile was running, so this one never started
    SkippedBecauseBusy,
    /// The run was cancelled
    Cancelled,
}

impl SyncOutcome {
    /// Results of the run, if it ran
    pub fn results(&self) -> Option<&SyncResults> {
        match self {
            Self::Ran(results) => Some(results),
            _ => None,
        }
    }
}

/// Resolves once a request reaches its outcome
#[derive(Debug)]
pub struct SyncHandle {
    receiver: oneshot::Receiver<SyncOutcome>,
}

impl SyncHandle {
    fn ready(outcome: SyncOutcome) -> Self {
        let (sender, receiver) = oneshot::channel();
        // The receiver is alive, so this cannot fail
        let _ = sender.send(outcome);
        Self { receiver }
    }

    /// Wait for the outcome
    pub async fn wait(self) -> Result<SyncOutcome> {
        self.receiver
            .await
            .map_err(|_| Error::sync("Sync run ended without an outcome"))
    }
}

/// The two sides of a run
pub struct SyncPair {
    /// Local side, receives pulled changes
    pub client: Arc<dyn SyncClient>,
    /// Remote side, receives pushed changes
    pub server: Arc<dyn SyncClient>,
}

/// Creates the clients of a run
///
/// Clients must check `cancellation` so that a cancel request stops them.
pub trait SyncClientFactory: Send + Sync {
    /// Create the clients for `profile`
    fn create(&self, profile: &SyncProfile, cancellation: &CancellationContext) -> Result<SyncPair>;
}

impl<F> SyncClientFactory for F
where
    F: Fn(&SyncProfile, &CancellationContext) -> Result<SyncPair> + Send + Sync,
{
    fn create(&self, profile: &SyncProfile, cancellation: &CancellationContext) -> Result<SyncPair> {
        self(profile, cancellation)
    }
}

struct ActiveRun {
    name: String,
    cancellation: CancellationContext,
    finished: watch::Receiver<bool>,
}

/// Runs sync profiles one at a time
pub struct SyncManager {
    profiles: Arc<RwLock<HashMap<String, SyncProfile>>>,
    factory: Arc<dyn SyncClientFactory>,
    reporter: ProgressReporter,
    active: Arc<Mutex<Option<ActiveRun>>>,
    poll_interval: Duration,
}

impl SyncManager {
    /// Create a manager without profiles
    pub fn new<F: SyncClientFactory + 'static>(factory: F) -> Self {
        Self {
            profiles: Arc::new(RwLock::new(HashMap::new())),
            factory: Arc::new(factory),
            reporter: ProgressReporter::new(Arc::new(ImmediateDispatcher::new())),
            active: Arc::new(Mutex::new(None)),
            poll_interval: WaitConfig::default().poll_interval,
        }
    }

    /// Create a manager with the profiles and timing of a configuration
    pub fn from_config<F: SyncClientFactory + 'static>(config: &Config, factory: F) -> Self {
        let mut profiles = HashMap::new();
        for profile in SyncProfile::from_config(config) {
            profiles.insert(profile.name.clone(), profile);
        }
        let mut manager =
            Self::new(factory).with_poll_interval(config.manager.wait_config().poll_interval);
        manager.profiles = Arc::new(RwLock::new(profiles));
        manager
    }

    /// Deliver state snapshots through `dispatcher`
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.reporter = ProgressReporter::new(dispatcher);
        self
    }

    /// Set the poll interval used while waiting for another run
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Add or replace a profile
    pub async fn add_profile(&self, profile: SyncProfile) {
        debug!("Registered sync profile {}", profile.name);
        self.profiles
            .write()
            .await
            .insert(profile.name.clone(), profile);
    }

    /// Current copy of a profile
    pub async fn profile(&self, name: &str) -> Option<SyncProfile> {
        self.profiles.read().await.get(name).cloned()
    }

    /// Names of every profile
    pub async fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.profiles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Average duration of completed runs of a profile
    pub async fn average_duration(&self, name: &str) -> Option<Duration> {
        self.profiles
            .read()
            .await
            .get(name)
            .and_then(|profile| profile.timer.as_ref())
            .and_then(|timer| timer.average())
    }

    /// Progress of the current or last run
    pub fn state(&self) -> Result<SyncState> {
        self.reporter.snapshot()
    }

    /// Check if a profile is running
    pub fn is_running(&self) -> bool {
        self.running_profile().is_some()
    }

    /// Name of the running profile
    pub fn running_profile(&self) -> Option<String> {
        self.lock_active()
            .ok()
            .and_then(|active| active.as_ref().map(|run| run.name.clone()))
    }

    /// Request cancellation of the running profile
    ///
    /// Returns `false` when nothing is running.
    pub fn cancel(&self) -> bool {
        match self.lock_active() {
            Ok(active) => match active.as_ref() {
                Some(run) => {
                    info!("Cancelling Sync {}", run.name);
                    run.cancellation.cancel();
                    true
                }
                None => false,
            },
            Err(error) => {
                warn!("Cannot cancel: {}", error);
                false
            }
        }
    }

    /// Run a profile
    ///
    /// When another profile is running and `wait_timeout` is `None`, the
    /// request gives up at once. Otherwise it polls until the active run
    /// finishes or the timeout elapses. If the active run outlives the wait,
    /// `force` cancels it and waits for it to stop; without `force` the
    /// request gives up. A request that gives up calls `post_action` with
    /// [`SyncOutcome::SkippedBecauseBusy`] before returning.
    ///
    /// Unknown profiles are rejected with an error and `post_action` is not
    /// called.
    pub async fn process<F>(
        &self,
        name: &str,
        wait_timeout: Option<Duration>,
        force: bool,
        post_action: F,
    ) -> Result<SyncHandle>
    where
        F: FnOnce(&SyncOutcome) + Send + 'static,
    {
        let profile = self
            .profile(name)
            .await
            .ok_or_else(|| Error::config(format!("Unknown sync profile {}", name)))?;
        let deadline = wait_timeout.map(|timeout| Instant::now() + timeout);

        let (cancellation, done) = loop {
            let (active_name, active_cancellation, mut finished) = {
                let mut active = self.lock_active()?;
                match active.as_ref() {
                    Some(run) => (
                        run.name.clone(),
                        run.cancellation.clone(),
                        run.finished.clone(),
                    ),
                    None => {
                        let cancellation = CancellationContext::new();
                        let (done, finished) = watch::channel(false);
                        *active = Some(ActiveRun {
                            name: profile.name.clone(),
                            cancellation: cancellation.clone(),
                            finished,
                        });
                        info!("Sync {} started", profile.name);
                        break (cancellation, done);
                    }
                }
            };

            if let Some(deadline) = deadline {
                if Instant::now() < deadline {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(self.poll_interval.min(remaining)).await;
                    continue;
                }
            }

            if !force {
                info!(
                    "Sync {} is already running so Sync {} not started.",
                    active_name, profile.name
                );
                let outcome = SyncOutcome::SkippedBecauseBusy;
                post_action(&outcome);
                return Ok(SyncHandle::ready(outcome));
            }

            info!(
                "Sync {} is still running, cancelling it so Sync {} can start",
                active_name, profile.name
            );
            active_cancellation.cancel();
            if finished.wait_for(|stopped| *stopped).await.is_err() {
                debug!("Sync {} ended while being cancelled", active_name);
            }
        };

        Ok(self.spawn(profile, cancellation, done, post_action))
    }

    fn spawn<F>(
        &self,
        profile: SyncProfile,
        cancellation: CancellationContext,
        done: watch::Sender<bool>,
        post_action: F,
    ) -> SyncHandle
    where
        F: FnOnce(&SyncOutcome) + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let factory = Arc::clone(&self.factory);
        let reporter = self.reporter.clone();
        let idle_reporter = self.reporter.clone();
        let profiles = Arc::clone(&self.profiles);
        let active = Arc::clone(&self.active);
        let name = profile.name.clone();

        if let Err(error) = reporter.begin(&name) {
            warn!("Failed to reset sync state: {}", error);
        }

        let job = tokio::task::spawn_blocking(move || {
            let options = profile.options.clone();
            match factory.create(&profile, &cancellation) {
                Ok(pair) => {
                    let runner =
                        SyncRunner::new(pair.client, pair.server, cancellation, reporter.clone());
                    runner.run(&profile.name, &options)
                }
                Err(error) => {
                    let message = format!("Failed to create sync clients: {}", error);
                    if let Err(report) = reporter.finish(SyncProfileStatus::Failed, message.clone()) {
                        warn!("Failed to report state: {}", report);
                    }
                    SyncResults::failed(&profile.name, message)
                }
            }
        });

        tokio::spawn(async move {
            let results = match job.await {
                Ok(results) => results,
                Err(join_error) => SyncResults::failed(&name, join_error.to_string()),
            };

            let outcome = match results.status {
                SyncProfileStatus::Completed => {
                    record_completion(&profiles, &results).await;
                    info!("Sync {} completed in {:?}", name, results.elapsed);
                    SyncOutcome::Ran(results)
                }
                SyncProfileStatus::Cancelled => {
                    info!("Sync {} cancelled", name);
                    SyncOutcome::Cancelled
                }
                _ => {
                    error!(
                        "Sync {} failed: {}",
                        name,
                        results.error.as_deref().unwrap_or("unknown error")
                    );
                    SyncOutcome::Ran(results)
                }
            };

            // Before the slot is released, so a queued run cannot be reset
            if let Err(error) = idle_reporter.idle() {
                warn!("Failed to reset sync state: {}", error);
            }
            match active.lock() {
                Ok(mut slot) => *slot = None,
                Err(poisoned) => *poisoned.into_inner() = None,
            }
            if done.send(true).is_err() {
                trace!("No forced request is waiting for Sync {}", name);
            }

            post_action(&outcome);
            if sender.send(outcome).is_err() {
                debug!("Sync {} handle dropped before completion", name);
            }
        });

        SyncHandle { receiver }
    }

    fn lock_active(&self) -> Result<MutexGuard<'_, Option<ActiveRun>>> {
        self.active
            .lock()
            .map_err(|_| Error::sync("Active sync lock poisoned"))
    }
}

/// Write back the watermarks and duration of a completed run
async fn record_completion(
    profiles: &RwLock<HashMap<String, SyncProfile>>,
    results: &SyncResults,
) {
    let mut profiles = profiles.write().await;
    let Some(profile) = profiles.get_mut(&results.profile) else {
        return;
    };
    profile.options.last_synced_on_client = results.last_synced_on_client;
    profile.options.last_synced_on_server = results.last_synced_on_server;
    if let Some(timer) = profile.timer.as_mut() {
        timer.record(results.elapsed);
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("running", &self.running_profile())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
