//! Error types and handling for FerroSync
//!
//! Errors raised inside the engine carry enough structure for two decisions:
//! whether the failure belongs to a single object (and is folded into the
//! [`SyncIssueType`] taxonomy) or to the whole run, and whether a later run
//! may succeed where this one failed.

use crate::SyncIssueType;
use serde::{Deserialize, Serialize};

/// How far the effect of an error reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// One object is rejected; the pass continues and reports an issue
    Object,
    /// The current run stops; the next scheduled run may succeed
    Run,
    /// Nothing will succeed until the node or its credentials change
    Fatal,
}

/// Main error type for FerroSync operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    /// The storage collaborator failed
    #[error("storage failure: {message}")]
    Storage {
        /// Message from the storage layer
        message: String,
    },

    /// An entity or payload could not be encoded or decoded
    #[error("cannot encode or decode payload: {message}")]
    Serialization {
        /// Message from the serializer
        message: String,
    },

    /// A uniqueness or index constraint was violated
    #[error("constraint violated on {type_name}: {message}")]
    Constraint {
        /// Type whose constraint was violated
        type_name: String,
        /// Description of the violated constraint
        message: String,
    },

    /// A referenced entity does not exist locally
    #[error("relationship {name} references missing {target_type}")]
    Relationship {
        /// Name of the relationship
        name: String,
        /// Type of the missing entity
        target_type: String,
    },

    /// The peer refused the credentials of this client
    #[error("peer refused credentials: {message}")]
    Unauthorized {
        /// Message returned by the peer
        message: String,
    },

    /// The peer does not support this client version
    #[error("peer does not support this client: {message}")]
    ClientNotSupported {
        /// Message returned by the peer
        message: String,
    },

    /// A wire type name does not resolve to a registered type
    #[error("unknown sync type {type_name}")]
    UnknownType {
        /// The unresolved type name
        type_name: String,
    },

    /// Settings are missing or inconsistent
    #[error("invalid configuration: {message}")]
    Config {
        /// What is wrong
        message: String,
    },

    /// Session, scheduling or bookkeeping failure inside the engine
    #[error("sync failed: {message}")]
    Sync {
        /// What went wrong
        message: String,
    },

    /// The run observed its cancellation token
    #[error("sync cancelled")]
    Cancelled,
}

/// Coarse category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Storage collaborator failures
    Storage,
    /// Payload and type resolution failures
    Serialization,
    /// Constraint and relationship violations
    Constraint,
    /// Credential and client version refusals
    Client,
    /// Configuration problems
    Config,
    /// Engine bookkeeping failures
    Sync,
    /// Cancellation
    Cancelled,
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Serialization { .. } | Self::UnknownType { .. } => ErrorKind::Serialization,
            Self::Constraint { .. } | Self::Relationship { .. } => ErrorKind::Constraint,
            Self::Unauthorized { .. } | Self::ClientNotSupported { .. } => ErrorKind::Client,
            Self::Config { .. } => ErrorKind::Config,
            Self::Sync { .. } => ErrorKind::Sync,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Reach of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::Serialization | ErrorKind::Constraint => ErrorSeverity::Object,
            ErrorKind::Storage | ErrorKind::Sync | ErrorKind::Cancelled => ErrorSeverity::Run,
            ErrorKind::Client | ErrorKind::Config => ErrorSeverity::Fatal,
        }
    }

    /// Whether the error only rejects the object being applied
    pub fn is_object_level(&self) -> bool {
        self.severity() == ErrorSeverity::Object
    }

    /// Whether a later run could succeed without outside intervention
    ///
    /// Cancellation is deliberate and never retried.
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Sync { .. })
    }

    /// Map this error onto the issue taxonomy reported back to peers
    pub fn issue_type(&self) -> SyncIssueType {
        match self {
            Self::Relationship { .. } => SyncIssueType::RelationshipConstraint,
            Self::Constraint { .. } => SyncIssueType::ConstraintException,
            Self::Storage { .. } | Self::Sync { .. } => SyncIssueType::UpdateException,
            Self::Config { .. } => SyncIssueType::ClientException,
            Self::Unauthorized { .. } => SyncIssueType::Unauthorized,
            Self::ClientNotSupported { .. } => SyncIssueType::ClientNotSupported,
            Self::Serialization { .. } | Self::UnknownType { .. } | Self::Cancelled => {
                SyncIssueType::Unknown
            }
        }
    }

    /// Storage layer failure
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Payload could not be encoded or decoded
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Constraint on `type_name` violated
    pub fn constraint<T: Into<String>, S: Into<String>>(type_name: T, message: S) -> Self {
        Self::Constraint {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Relationship `name` points at a missing `target_type`
    pub fn relationship<N: Into<String>, T: Into<String>>(name: N, target_type: T) -> Self {
        Self::Relationship {
            name: name.into(),
            target_type: target_type.into(),
        }
    }

    /// Peer refused the credentials
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Peer refused this client version
    pub fn client_not_supported<S: Into<String>>(message: S) -> Self {
        Self::ClientNotSupported {
            message: message.into(),
        }
    }

    /// Wire type name not registered
    pub fn unknown_type<S: Into<String>>(type_name: S) -> Self {
        Self::UnknownType {
            type_name: type_name.into(),
        }
    }

    /// Configuration problem
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Engine bookkeeping failure
    pub fn sync<S: Into<String>>(message: S) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}
