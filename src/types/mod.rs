//! Type definitions for assoc-graph
//!
//! This module contains all type definitions organized by category.

/// Identifier types
pub mod ids;
/// Association payloads
pub mod data;
/// System-wide error types
pub mod error;
/// Wire schema shared with storage backends
pub mod storage;

// Re-export commonly used types for convenience
pub use ids::AssocId;
pub use data::{Data, DataKind};
pub use error::{Error, GraphError, Result, SyncError};
pub use storage::{DeltaOperation, StorageDelta, StorageDump, StorageLink};
