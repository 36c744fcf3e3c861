//! Core data model and error handling for FerroSync
//!
//! This crate provides the foundational types, error handling, and shared data structures
//! used throughout the FerroSync ecosystem. It includes:
//!
//! - **Error handling**: Structured error types with severity levels and an issue taxonomy
//! - **Core types**: Sync objects, tombstones, issues, paging requests and options
//! - **Traits**: Cooperative cancellation and naming
//! - **Configuration**: Type-safe configuration values with validation
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_types::{Result, SyncObject, SyncId, SyncStatus};
//!
//! fn example_operation() -> Result<SyncObject> {
//!     let object = SyncObject::new(
//!         SyncId::new_v4(),
//!         "Account",
//!         r#"{"name":"Checking"}"#,
//!         chrono::Utc::now(),
//!         SyncStatus::Added,
//!     );
//!     Ok(object)
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{ItemsPerRequest, SampleLimit, WaitConfig};
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use traits::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_merge() {
        let mut stats1 = SyncStatistics::new();
        stats1.applied = 5;
        stats1.issues = 1;

        let mut stats2 = SyncStatistics::new();
        stats2.applied = 3;
        stats2.skipped = 2;

        stats1.merge(&stats2);
        assert_eq!(stats1.applied, 8);
        assert_eq!(stats1.skipped, 2);
        assert_eq!(stats1.issues, 1);
    }

    #[test]
    fn test_error_severity() {
        let storage_error = Error::storage("disk full");
        assert_eq!(storage_error.severity(), ErrorSeverity::Run);
        assert!(storage_error.should_retry());

        let config_error = Error::config("invalid config");
        assert_eq!(config_error.severity(), ErrorSeverity::Fatal);
        assert!(!config_error.should_retry());
    }

    #[test]
    fn test_items_per_request_validation() {
        assert!(ItemsPerRequest::new(100).is_ok());
        assert!(ItemsPerRequest::new(0).is_err());
        assert_eq!(ItemsPerRequest::default().get(), ItemsPerRequest::DEFAULT);
    }
}
