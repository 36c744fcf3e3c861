//! Error types for configuration management

use ferrosync_types::Error as FerrosyncError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything that can go wrong while loading, checking or writing settings
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file could not be read
    #[error("cannot read configuration '{path}': {source}")]
    Read {
        /// File that was requested
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A configuration file could not be written
    #[error("cannot write configuration '{path}': {source}")]
    Write {
        /// Target file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Merging or deserializing the layered sources failed
    #[error("malformed configuration: {message}")]
    Malformed {
        /// Message from the source layer
        message: String,
    },

    /// Settings could not be rendered into the requested format
    #[error("cannot render configuration as {format}: {message}")]
    Render {
        /// Target format name
        format: &'static str,
        /// Serializer message
        message: String,
    },

    /// A required key has no value
    #[error("missing required setting '{key}'")]
    MissingRequired {
        /// Dotted configuration key
        key: String,
    },

    /// A key holds a value outside its allowed range
    #[error("invalid value for '{key}': {message}")]
    InvalidValue {
        /// Dotted configuration key
        key: String,
        /// What is wrong with it
        message: String,
    },

    /// Two profiles share a name
    #[error("profile '{name}' is defined more than once")]
    DuplicateProfile {
        /// Profile name
        name: String,
    },
}

impl ConfigError {
    /// Configuration key the error refers to, when known
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::MissingRequired { key } | Self::InvalidValue { key, .. } => Some(key),
            Self::DuplicateProfile { .. } => Some("profiles"),
            _ => None,
        }
    }

    /// Reading `path` failed
    pub fn read(path: &Path, source: std::io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Writing `path` failed
    pub fn write(path: &Path, source: std::io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Rendering as `format` failed
    pub fn render(format: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Render {
            format,
            message: error.to_string(),
        }
    }

    /// `key` has no value
    pub fn missing_required<S: Into<String>>(key: S) -> Self {
        Self::MissingRequired { key: key.into() }
    }

    /// `key` holds a bad value
    pub fn invalid_value<K: Into<String>, S: Into<String>>(key: K, message: S) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(error: config::ConfigError) -> Self {
        Self::Malformed {
            message: error.to_string(),
        }
    }
}

impl From<ConfigError> for FerrosyncError {
    fn from(error: ConfigError) -> Self {
        FerrosyncError::config(error.to_string())
    }
}
