//! assoc-graph - An In-Memory Associative Graph Store
//!
//! Every piece of data is an association with up to four links (`type`,
//! `from`, `to`, `value`) and an optional typed payload. Graphs emit reactive
//! events on every mutation, and storages project marked associations onto
//! external media through dumps and deltas that converge last-writer-wins.
#![warn(missing_docs)]

// Core foundational modules
pub mod constants;
pub mod core;
pub mod types;

// Main functional modules
pub mod cli;
pub mod delta;
pub mod graph;
pub mod storage;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{Config, GraphConfig, LoggingConfig, SyncConfig};
pub use graph::{Event, EventKind, Field, Graph, Lifecycle, Stage};
pub use storage::{MemoryBackend, Storage, StorageBackend, StorageMarker, StorageOptions};
pub use types::{AssocId, Data, DataKind, Error, Result, StorageDelta, StorageDump, StorageLink};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging and metrics from a configuration
pub fn init(config: &Config) -> Result<()> {
    core::init_logging(&config.logging)?;
    tracing::info!("Initializing {} v{}", NAME, VERSION);

    system::metrics::init_registry();
    Ok(())
}
