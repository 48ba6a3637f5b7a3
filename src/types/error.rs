//! Error types and handling for assoc-graph
//!
//! This module defines all error types used throughout the system. Graph
//! invariant violations and sync protocol errors get their own enums so callers
//! can tell a broken restore apart from a malformed batch.

use thiserror::Error;

use crate::graph::lifecycle::{stage_name, Stage};
use crate::types::{AssocId, DataKind};

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for assoc-graph
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph invariant violations
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Dump/delta protocol errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid argument passed by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Storage backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal system errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Graph invariant violations
#[derive(Error, Debug)]
pub enum GraphError {
    /// Association not present in this graph
    #[error("Association not found: {id}")]
    AssociationNotFound {
        /// Missing id
        id: AssocId,
    },

    /// Restored sequence number disagrees with the recorded one
    #[error("Sequence mismatch for {id}: recorded {recorded}, received {received}")]
    SequenceMismatch {
        /// Association id
        id: AssocId,
        /// Number already recorded for the id
        recorded: u64,
        /// Number supplied by the caller
        received: u64,
    },

    /// Explicit sequence number above the accepted range
    #[error("Sequence number {received} for {id} is out of range")]
    SequenceOutOfRange {
        /// Association id
        id: AssocId,
        /// Number supplied by the caller
        received: u64,
    },

    /// Association's type chain has no data handler
    #[error("No data handler registered for the type of {id}")]
    NoDataHandler {
        /// Association id
        id: AssocId,
    },

    /// Payload kind not accepted by the handler
    #[error("Payload kind mismatch on {id}: expected {expected}, received {received}")]
    PayloadKind {
        /// Association id
        id: AssocId,
        /// Kind accepted by the handler
        expected: DataKind,
        /// Kind supplied
        received: DataKind,
    },

    /// System associations cannot be destroyed
    #[error("System association cannot be destroyed: {id}")]
    SystemAssociation {
        /// Association id
        id: AssocId,
    },

    /// Storage argument is not a Storage association
    #[error("Expected a Storage association, received {received}")]
    NotAStorage {
        /// Description of what was received
        received: String,
    },

    /// Lifecycle transition outside the table
    #[error("Invalid lifecycle transition from {} to {to}", stage_name(.from))]
    InvalidTransition {
        /// Current stage, `None` before the first mount
        from: Option<Stage>,
        /// Requested stage
        to: Stage,
    },
}

/// Dump/delta protocol errors
#[derive(Error, Debug)]
pub enum SyncError {
    /// Referenced id is neither the root nor stored in the same storage
    #[error("Missing dependency for {id}: {dependency} is not stored")]
    MissingDependency {
        /// Link being applied
        id: AssocId,
        /// Unresolved reference
        dependency: AssocId,
    },

    /// Dependency cycle inside a batch
    #[error("Circular dependency detected at {id}")]
    CircularDependency {
        /// Link revisited while still being processed
        id: AssocId,
    },

    /// Link target does not exist in the graph
    #[error("Unresolvable {field} link on {id}: {target} does not exist")]
    UnresolvedLink {
        /// Association id
        id: AssocId,
        /// Relation field name
        field: &'static str,
        /// Missing target
        target: AssocId,
    },

    /// Incoming `_i` above the accepted range
    #[error("Sequence number {received} on {id} is out of range")]
    SequenceOutOfRange {
        /// Link being applied
        id: AssocId,
        /// Received `_i`
        received: u64,
    },

    /// Delta without the fields its operation requires
    #[error("Malformed delta: {0}")]
    MalformedDelta(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a sync protocol error (soft mode may absorb these)
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Sync(_))
    }

    /// Check if this is a graph invariant violation
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::Graph(_) | Error::InvalidArgument(_))
    }
}
