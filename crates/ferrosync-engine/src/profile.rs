//! Sync profiles and their run state

use crate::timer::AverageTimer;
use ferrosync_config::Config;
use ferrosync_types::{SampleLimit, SyncOptions};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncProfileStatus {
    /// No run in progress
    #[default]
    Idle,
    /// Sessions are being opened
    Starting,
    /// Server changes are applied to the client
    Pulling,
    /// Client changes are applied to the server
    Pushing,
    /// The run finished
    Completed,
    /// The run was cancelled
    Cancelled,
    /// The run aborted with an error
    Failed,
}

impl SyncProfileStatus {
    /// Check if the run is in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Check if a run is in progress
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Pulling | Self::Pushing)
    }
}

impl fmt::Display for SyncProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Pulling => "pulling",
            Self::Pushing => "pushing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// A named, independently configured sync
#[derive(Debug, Clone)]
pub struct SyncProfile {
    /// Profile name
    pub name: String,
    /// Options cloned into every run
    pub options: SyncOptions,
    /// Rolling average of completed run durations
    pub timer: Option<AverageTimer>,
}

impl SyncProfile {
    /// Create a profile with default options
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            options: SyncOptions::default(),
            timer: None,
        }
    }

    /// Set the options
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Track the average run duration over `samples` runs
    pub fn with_timer(mut self, samples: SampleLimit) -> Self {
        self.timer = Some(AverageTimer::new(samples));
        self
    }

    /// Every profile declared in a configuration
    pub fn from_config(config: &Config) -> Vec<Self> {
        config
            .profiles
            .iter()
            .map(|profile| {
                let mut built = Self::new(profile.name.clone())
                    .with_options(profile.to_options(&config.sync));
                if profile.track_duration {
                    built = built.with_timer(config.manager.average_samples);
                }
                built
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrosync_config::ProfileConfig;

    #[test]
    fn test_status_classification() {
        assert!(SyncProfileStatus::Pulling.is_active());
        assert!(!SyncProfileStatus::Idle.is_active());
        assert!(SyncProfileStatus::Cancelled.is_terminal());
        assert!(!SyncProfileStatus::Pushing.is_terminal());
        assert_eq!(SyncProfileStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_profiles_from_config() {
        let mut config = Config::default();
        let mut all = ProfileConfig::new("All");
        all.track_duration = true;
        config.profiles.push(all);
        config.profiles.push(ProfileConfig::new("Accounts"));

        let profiles = SyncProfile::from_config(&config);
        assert_eq!(profiles.len(), 2);
        assert!(profiles[0].timer.is_some());
        assert!(profiles[1].timer.is_none());
        assert_eq!(profiles[1].name, "Accounts");
    }
}
