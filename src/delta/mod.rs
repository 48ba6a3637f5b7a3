//! Dump/delta engine shared by every storage.
//!
//! Outbound, a storage projects its marked associations into a
//! [`StorageDump`](crate::types::StorageDump). Inbound, dumps and single deltas
//! are applied with:
//! - dependency-aware ordering of each batch
//! - last-writer-wins selection on `_updated_at`
//! - reconciliation that removes stored associations missing from a dump

pub mod dump;
pub mod processor;
pub mod sort;


// Re-export main operations for convenience
pub use dump::generate_dump;
pub use processor::{apply_delta, apply_subscription, merge_dump, restore, ApplyOutcome, Restored, SubscriptionReport};
pub use sort::sort_dump;
