//! Progress state and its delivery to the owning task
//!
//! Runs update a shared [`SyncState`] from a blocking worker thread. Every
//! update hands a snapshot to a [`Dispatcher`], which decides where the
//! snapshot is observed: inline on the worker, or on whichever task drains
//! a [`ChannelDispatcher`].

use crate::profile::SyncProfileStatus;
use ferrosync_types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::trace;

/// Progress of the active run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Profile being synced
    pub profile: Option<String>,
    /// Changes transferred so far in the current phase
    pub count: u64,
    /// Changes expected in the current phase
    pub total: u64,
    /// Run status
    pub status: SyncProfileStatus,
    /// Human-readable status line
    pub message: String,
}

impl SyncState {
    /// Completion of the current phase in percent
    pub fn percentage(&self) -> f64 {
        if self.total > 0 {
            (self.count as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Delivers state snapshots to their observer
pub trait Dispatcher: Send + Sync {
    /// Deliver a snapshot
    fn dispatch(&self, state: SyncState);
}

type StateCallback = Box<dyn Fn(&SyncState) + Send + Sync>;

/// Invokes a callback on the updating thread
#[derive(Default)]
pub struct ImmediateDispatcher {
    callback: Option<StateCallback>,
}

impl ImmediateDispatcher {
    /// Dispatcher that drops every snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher calling `callback` for every snapshot
    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }
}

impl Dispatcher for ImmediateDispatcher {
    fn dispatch(&self, state: SyncState) {
        match &self.callback {
            Some(callback) => callback(&state),
            None => trace!("Sync state {} {}/{}", state.status, state.count, state.total),
        }
    }
}

impl fmt::Debug for ImmediateDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmediateDispatcher")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Sends snapshots over a channel to the owning task
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<SyncState>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiver its owner drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncState>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, state: SyncState) {
        if self.sender.send(state).is_err() {
            trace!("Sync state receiver dropped");
        }
    }
}

/// Shared progress state plus its dispatcher
#[derive(Clone)]
pub struct ProgressReporter {
    state: Arc<RwLock<SyncState>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ProgressReporter {
    /// Create a reporter with an idle state
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            state: Arc::new(RwLock::new(SyncState::default())),
            dispatcher,
        }
    }

    /// Current state
    pub fn snapshot(&self) -> Result<SyncState> {
        self.state
            .read()
            .map(|state| state.clone())
            .map_err(|_| Error::sync("Sync state lock poisoned"))
    }

    /// Mutate the state and dispatch the result
    pub fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut SyncState),
    {
        let snapshot = {
            let mut state = self
                .state
                .write()
                .map_err(|_| Error::sync("Sync state lock poisoned"))?;
            change(&mut state);
            state.clone()
        };
        self.dispatcher.dispatch(snapshot);
        Ok(())
    }

    /// Start tracking a new run
    pub fn begin(&self, profile: &str) -> Result<()> {
        self.update(|state| {
            *state = SyncState {
                profile: Some(profile.to_string()),
                status: SyncProfileStatus::Starting,
                message: format!("Starting {}", profile),
                ..SyncState::default()
            };
        })
    }

    /// Enter a new status, resetting the counters
    pub fn status<S: Into<String>>(&self, status: SyncProfileStatus, message: S) -> Result<()> {
        let message = message.into();
        self.update(|state| {
            state.status = status;
            state.message = message;
            state.count = 0;
            state.total = 0;
        })
    }

    /// Record transferred changes
    pub fn advance(&self, transferred: u64, total: u64) -> Result<()> {
        self.update(|state| {
            state.count += transferred;
            state.total = total.max(state.count);
        })
    }

    /// Set the final status, keeping the counters
    pub fn finish<S: Into<String>>(&self, status: SyncProfileStatus, message: S) -> Result<()> {
        let message = message.into();
        self.update(|state| {
            state.status = status;
            state.message = message;
        })
    }

    /// Return to [`SyncProfileStatus::Idle`] once a run has ended
    ///
    /// The profile, message and counters of the finished run are kept.
    pub fn idle(&self) -> Result<()> {
        self.update(|state| state.status = SyncProfileStatus::Idle)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(Arc::new(ImmediateDispatcher::new()))
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_percentage() {
        let state = SyncState {
            count: 25,
            total: 100,
            ..SyncState::default()
        };
        assert_eq!(state.percentage(), 25.0);
        assert_eq!(SyncState::default().percentage(), 0.0);
    }

    #[test]
    fn test_immediate_dispatcher_sees_every_update() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let reporter = ProgressReporter::new(Arc::new(ImmediateDispatcher::with_callback(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )));

        reporter.begin("All").unwrap();
        reporter.status(SyncProfileStatus::Pulling, "Pulling").unwrap();
        reporter.advance(3, 10).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        let state = reporter.snapshot().unwrap();
        assert_eq!(state.profile.as_deref(), Some("All"));
        assert_eq!((state.count, state.total), (3, 10));
    }

    #[tokio::test]
    async fn test_channel_dispatcher_delivers_snapshots() {
        let (dispatcher, mut receiver) = ChannelDispatcher::new();
        let reporter = ProgressReporter::new(Arc::new(dispatcher));

        tokio::task::spawn_blocking(move || {
            reporter.begin("Accounts").unwrap();
            reporter
                .finish(SyncProfileStatus::Completed, "Done")
                .unwrap();
        })
        .await
        .unwrap();

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.status, SyncProfileStatus::Starting);
        assert_eq!(second.status, SyncProfileStatus::Completed);
        assert_eq!(second.message, "Done");
    }

    #[test]
    fn test_idle_keeps_last_run() {
        let reporter = ProgressReporter::default();
        reporter.begin("All").unwrap();
        reporter.advance(4, 4).unwrap();
        reporter.finish(SyncProfileStatus::Cancelled, "Sync cancelled").unwrap();

        reporter.idle().unwrap();

        let state = reporter.snapshot().unwrap();
        assert_eq!(state.status, SyncProfileStatus::Idle);
        assert_eq!(state.message, "Sync cancelled");
        assert_eq!(state.profile.as_deref(), Some("All"));
        assert_eq!(state.count, 4);
    }
}
