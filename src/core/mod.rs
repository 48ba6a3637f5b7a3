//! Core configuration and process setup
//!
//! Configuration loading and logging initialization shared by the library
//! entry point and the command-line tool.

pub mod config;
pub mod logging;

// Re-export commonly used items
pub use config::{load_config_or_default, Config, GraphConfig, LoggingConfig, SyncConfig};
pub use logging::init_logging;
