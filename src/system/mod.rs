//! System utilities and monitoring
//!
//! Process-wide metrics shared by every graph and storage.

pub mod metrics;
