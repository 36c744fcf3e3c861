//! JSON output structures for the FerroSync CLI

use crate::demo::Counts;
use ferrosync_engine::{SyncOutcome, SyncResults};
use serde::Serialize;

/// Complete JSON report of a `simulate` invocation
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Invocation metadata
    pub metadata: ReportMetadata,
    /// One entry per requested profile
    pub runs: Vec<RunReport>,
    /// Client row counts after every run
    pub client: Counts,
    /// Server row counts after every run
    pub server: Counts,
}

/// Invocation metadata
#[derive(Debug, Serialize)]
pub struct ReportMetadata {
    /// FerroSync version
    pub version: String,
    /// Operation name
    pub operation: String,
    /// RFC 3339 start time
    pub timestamp: String,
}

impl ReportMetadata {
    /// Metadata for `operation` starting now
    pub fn new<S: Into<String>>(operation: S) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            operation: operation.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Outcome of one profile request
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunReport {
    /// The profile ran
    Ran {
        /// Run results
        results: SyncResults,
        /// Elapsed time in milliseconds
        elapsed_ms: u128,
    },
    /// Another profile held the slot
    Skipped {
        /// Requested profile
        profile: String,
    },
    /// The run was cancelled
    Cancelled {
        /// Requested profile
        profile: String,
    },
}

impl RunReport {
    /// Report for the outcome of `profile`
    pub fn from_outcome(profile: &str, outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Ran(results) => Self::Ran {
                elapsed_ms: results.elapsed.as_millis(),
                results,
            },
            SyncOutcome::SkippedBecauseBusy => Self::Skipped {
                profile: profile.to_string(),
            },
            SyncOutcome::Cancelled => Self::Cancelled {
                profile: profile.to_string(),
            },
        }
    }
}
