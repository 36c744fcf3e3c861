//! Configuration management system for FerroSync
//!
//! This crate loads the settings of a sync node: enumeration and
//! application defaults, manager timing, logging and named sync profiles.
//!
//! # Features
//!
//! - **Multiple formats**: YAML, TOML and JSON configuration files
//! - **Validation**: Every invalid value is reported with the key it came from
//! - **Environment overrides**: `FERROSYNC__SECTION__KEY` variables win over files
//! - **Profiles**: Named profiles resolve into ready-to-run sync options
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_config::{Config, ConfigBuilder};
//!
//! let config = ConfigBuilder::new()
//!     .with_file("ferrosync.yaml")
//!     .with_env_prefix("FERROSYNC")
//!     .with_override("manager.force", "true")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Page size: {}", config.sync.items_per_request.get());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use ferrosync_types::{
    ItemsPerRequest, RepositoryFilter, SampleLimit, SyncOptions, WaitConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::{validate, ConfigBuilder};
pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigFormat, ConfigLoader, ENV_PREFIX};

/// Main configuration structure for FerroSync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Enumeration and application defaults
    #[serde(default)]
    pub sync: SyncConfig,
    /// Sync manager timing
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Named sync profiles
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

impl Config {
    /// Profile by name
    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    /// Sync options for a named profile, or `None` when it is not configured
    pub fn profile_options(&self, name: &str) -> Option<SyncOptions> {
        self.profile(name).map(|profile| profile.to_options(&self.sync))
    }
}

/// Enumeration and application defaults shared by every profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Page size for change enumeration
    pub items_per_request: ItemsPerRequest,
    /// Hard delete instead of soft delete
    pub permanent_deletions: bool,
    /// Return messages with sync issues
    pub include_issue_details: bool,
    /// Dependency order of entity types, parents first
    pub sync_order: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            items_per_request: ItemsPerRequest::default(),
            permanent_deletions: false,
            include_issue_details: true,
            sync_order: Vec::new(),
        }
    }
}

/// Sync manager timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// How long a request waits for an active run, in milliseconds
    pub wait_timeout_ms: Option<u64>,
    /// Poll interval while waiting, in milliseconds
    pub poll_interval_ms: u64,
    /// Cancel the active run when the wait times out
    pub force: bool,
    /// Samples kept by each profile's average timer
    pub average_samples: SampleLimit,
}

impl ManagerConfig {
    /// Wait behaviour for requests that find another run active
    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig {
            wait_timeout: self.wait_timeout_ms.map(Duration::from_millis),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: None,
            poll_interval_ms: 50,
            force: false,
            average_samples: SampleLimit::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            colored_output: true,
        }
    }
}

/// One named sync profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Profile name, unique per configuration
    pub name: String,
    /// Override of the page size
    pub items_per_request: Option<ItemsPerRequest>,
    /// Override of the deletion mode
    pub permanent_deletions: Option<bool>,
    /// Entity types excluded from this profile
    pub exclude: Vec<String>,
    /// Keep a rolling average of run durations
    pub track_duration: bool,
    /// Free-form values passed to the clients
    pub values: BTreeMap<String, String>,
}

impl ProfileConfig {
    /// Create an empty profile
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Resolve into sync options on top of the shared defaults
    pub fn to_options(&self, defaults: &SyncConfig) -> SyncOptions {
        let mut options = SyncOptions {
            items_per_sync_request: self.items_per_request.unwrap_or(defaults.items_per_request),
            permanent_deletions: self
                .permanent_deletions
                .unwrap_or(defaults.permanent_deletions),
            include_issue_details: defaults.include_issue_details,
            ..SyncOptions::default()
        };
        for (key, value) in &self.values {
            options = options.with_value(key.clone(), value.clone());
        }
        for type_name in &self.exclude {
            options = options.with_filter(RepositoryFilter::exclude(type_name.clone()));
        }
        options
    }
}
