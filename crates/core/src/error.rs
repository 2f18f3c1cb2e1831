//! Error types for the multiplex layer
//!
//! This module defines every error raised by routing, sessions, the
//! coordinator and compensation. We use `thiserror` for automatic
//! `Display` and `Error` trait implementations.
//!
//! ## Propagation
//!
//! - Load/save/delete failures abort the current call immediately.
//! - Commit failures are reported as [`StrataError::BackendCommitFailure`]
//!   after compensation ran; compensation problems ride along as
//!   [`CompensationFailure`] records and never replace the cause.
//! - Close failures are aggregated into one [`StrataError::CloseFailure`].

use crate::types::EntityType;
use std::fmt;
use thiserror::Error;

/// Result type alias for multiplex operations
pub type StrataResult<T> = std::result::Result<T, StrataError>;

/// A failure recorded while reversing an already-committed backend
///
/// Never raised on its own; only found attached to a
/// [`StrataError::BackendCommitFailure`].
#[derive(Debug, Clone)]
pub struct CompensationFailure {
    /// Backend whose compensation failed
    pub backend: String,
    /// What went wrong
    pub error: StrataError,
}

impl fmt::Display for CompensationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compensation of '{}' failed: {}", self.backend, self.error)
    }
}

/// Error type for the multiplex layer
#[derive(Debug, Clone, Error)]
pub enum StrataError {
    /// No backend owns the entity type (or any of its supertypes)
    #[error("Unknown entity type: {entity_type}")]
    UnknownEntityType {
        /// Type that could not be routed
        entity_type: EntityType,
    },

    /// Two backends claim the same entity type
    #[error("Entity type {entity_type} is claimed by both '{first}' and '{second}'")]
    AmbiguousOwnership {
        /// Contested type
        entity_type: EntityType,
        /// Backend registered first
        first: String,
        /// Backend whose registration was rejected
        second: String,
    },

    /// Operation not supported in the current mode or by the session
    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation {
        /// Operation that was attempted
        operation: String,
    },

    /// Relation crosses backends and the target session offers no bridge
    #[error(
        "Relation {entity_type}.{relation} crosses from '{source_backend}' to '{target_backend}' and no bridge is available"
    )]
    UnsupportedCrossBackendRelation {
        /// Owning entity type
        entity_type: EntityType,
        /// Relation name
        relation: String,
        /// Backend of the owning entity
        source_backend: String,
        /// Backend of the relation target type
        target_backend: String,
    },

    /// Relation is not declared for the entity type
    #[error("Unknown relation {entity_type}.{relation}")]
    UnknownRelation {
        /// Entity type
        entity_type: EntityType,
        /// Relation name
        relation: String,
    },

    /// A backend's commit failed; compensation has already run
    #[error("Commit failed on backend '{backend}': {cause}")]
    BackendCommitFailure {
        /// Backend whose commit failed
        backend: String,
        /// The original failure
        #[source]
        cause: Box<StrataError>,
        /// Failures recorded while compensating earlier commits
        compensation_failures: Vec<CompensationFailure>,
    },

    /// One or more sessions failed to close
    #[error("{count} session(s) failed to close", count = .failures.len())]
    CloseFailure {
        /// Backend name and close error, in close order
        failures: Vec<(String, StrataError)>,
    },

    /// A backend rejected the transaction
    #[error("Transaction aborted: {reason}")]
    TransactionAborted {
        /// Why the backend aborted
        reason: String,
    },

    /// Wrapper for an unexpected failure during commit
    #[error("Transaction failed: {source}")]
    TransactionFailed {
        /// Underlying failure
        source: Box<StrataError>,
    },

    /// The coordinator is no longer usable
    #[error("Transaction not active: {state}")]
    TransactionNotActive {
        /// Coordinator state when the call was made
        state: String,
    },

    /// Operation invalid in the session's lifecycle state
    #[error("Cannot {operation} session for '{backend}' in state {state}")]
    SessionState {
        /// Backend owning the session
        backend: String,
        /// Current session state
        state: String,
        /// Operation that was attempted
        operation: String,
    },

    /// Entity or resource not found
    #[error("Not found: {what}")]
    NotFound {
        /// What was missing
        what: String,
    },

    /// Caller passed something invalid
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description
        message: String,
    },

    /// Backend storage error
    #[error("Storage error: {message}")]
    Storage {
        /// Description
        message: String,
    },

    /// Internal error (bug or unexpected runtime failure)
    #[error("Internal error: {message}")]
    Internal {
        /// Description
        message: String,
    },
}

impl StrataError {
    /// Create an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        StrataError::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        StrataError::Internal {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        StrataError::NotFound { what: what.into() }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        StrataError::Storage {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(operation: impl Into<String>) -> Self {
        StrataError::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Create a transaction-aborted error
    pub fn aborted(reason: impl Into<String>) -> Self {
        StrataError::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Whether this is a recognized transaction failure
    ///
    /// Recognized failures are surfaced as-is from a failed commit; anything
    /// else is wrapped in [`StrataError::TransactionFailed`] first.
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            StrataError::TransactionAborted { .. }
                | StrataError::TransactionFailed { .. }
                | StrataError::TransactionNotActive { .. }
                | StrataError::BackendCommitFailure { .. }
        )
    }

    /// Compensation failures attached to a commit failure
    pub fn compensation_failures(&self) -> &[CompensationFailure] {
        match self {
            StrataError::BackendCommitFailure {
                compensation_failures,
                ..
            } => compensation_failures,
            _ => &[],
        }
    }

    /// Innermost cause, unwrapping commit failures and wrappers
    pub fn root_cause(&self) -> &StrataError {
        match self {
            StrataError::BackendCommitFailure { cause, .. } => cause.root_cause(),
            StrataError::TransactionFailed { source } => source.root_cause(),
            other => other,
        }
    }
}
