//! Configuration types for FerroSync
//!
//! This module provides type-safe configuration values with validation
//! and serialization support.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Page size for change enumeration with validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsPerRequest(usize);

impl ItemsPerRequest {
    /// Minimum page size
    pub const MIN: usize = 1;
    /// Maximum page size
    pub const MAX: usize = 10_000;
    /// Default page size
    pub const DEFAULT: usize = 600;

    /// Create a new page size with validation
    pub fn new(items: usize) -> Result<Self, String> {
        if items < Self::MIN {
            Err(format!("Items per request {} is below minimum {}", items, Self::MIN))
        } else if items > Self::MAX {
            Err(format!("Items per request {} exceeds maximum {}", items, Self::MAX))
        } else {
            Ok(Self(items))
        }
    }

    /// Get the page size value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for ItemsPerRequest {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Number of samples kept by a rolling average timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleLimit(usize);

impl SampleLimit {
    /// Minimum sample count
    pub const MIN: usize = 1;
    /// Maximum sample count
    pub const MAX: usize = 1_000;
    /// Default sample count
    pub const DEFAULT: usize = 10;

    /// Create a new sample limit with validation
    pub fn new(samples: usize) -> Result<Self, String> {
        if samples < Self::MIN {
            Err(format!("Sample limit {} is below minimum {}", samples, Self::MIN))
        } else if samples > Self::MAX {
            Err(format!("Sample limit {} exceeds maximum {}", samples, Self::MAX))
        } else {
            Ok(Self(samples))
        }
    }

    /// Get the sample limit value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for SampleLimit {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// How long a request waits for an active run to finish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Upper bound on waiting, `None` returns immediately
    pub wait_timeout: Option<Duration>,
    /// Delay between checks while waiting
    pub poll_interval: Duration,
}

impl WaitConfig {
    /// Do not wait at all
    pub fn no_wait() -> Self {
        Self {
            wait_timeout: None,
            ..Self::default()
        }
    }

    /// Wait up to `timeout`
    pub fn wait_for(timeout: Duration) -> Self {
        Self {
            wait_timeout: Some(timeout),
            ..Self::default()
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            wait_timeout: None,
            poll_interval: Duration::from_millis(50),
        }
    }
}
