//! Sync orchestration for FerroSync
//!
//! This crate runs named sync profiles between a client and a server and
//! reports their progress.
//!
//! # Features
//!
//! - **Profiles**: Independently configured syncs with their own options and timing
//! - **Single Flight**: At most one profile runs per manager, with wait and takeover policies
//! - **Cancellation**: Cooperative cancellation that never pollutes duration averages
//! - **Progress Tracking**: Shared state snapshots delivered through a dispatcher
//! - **Corrections**: Failed changes are re-sent from the source after each direction
//!
//! # Examples
//!
//! ```rust,no_run
//! use ferrosync_engine::{SyncManager, SyncPair, SyncProfile};
//! use ferrosync_types::{CancellationContext, Result};
//!
//! # async fn example(pair: impl Fn() -> SyncPair + Send + Sync + 'static) -> Result<()> {
//! let manager = SyncManager::new(move |_: &SyncProfile, _: &CancellationContext| -> Result<SyncPair> {
//!     Ok(pair())
//! });
//! manager.add_profile(SyncProfile::new("All")).await;
//!
//! let handle = manager
//!     .process("All", None, false, |outcome| println!("{:?}", outcome))
//!     .await?;
//! let _outcome = handle.wait().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod manager;
pub mod monitor;
pub mod profile;
pub mod runner;
pub mod timer;

pub use manager::{SyncClientFactory, SyncHandle, SyncManager, SyncOutcome, SyncPair};
pub use monitor::{ChannelDispatcher, Dispatcher, ImmediateDispatcher, ProgressReporter, SyncState};
pub use profile::{SyncProfile, SyncProfileStatus};
pub use runner::{SyncResults, SyncRunner};
pub use timer::AverageTimer;
