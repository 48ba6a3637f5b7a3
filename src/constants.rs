//! Global constants used throughout the assoc-graph codebase
//!
//! This module contains compile-time constants that are shared across
//! multiple modules to ensure consistency and avoid magic numbers.

/// Default configuration file looked up by `Config::load`
pub const CONFIG_FILE_NAME: &str = "assoc-graph.toml";

/// Prefix for environment variable overrides (`AG_LOG_LEVEL`, ...)
pub const ENV_PREFIX: &str = "AG_";

/// Separator between the root id and a built-in name in derived system ids
///
/// Built-in associations get ids of the form `<root>:<Name>` so that two
/// graphs constructed with the same root agree on every system id.
pub const SYSTEM_ID_SEPARATOR: char = ':';

/// Built-in type names, in construction order.
///
/// The order is part of the sync contract: sequence numbers of system
/// associations are assigned in this order on every graph.
pub const BUILTIN_TYPES: [&str; 6] = ["String", "Number", "Function", "Array", "Storage", "Lifestate"];

/// Lifestage node names, in construction order (created after `BUILTIN_TYPES`)
pub const LIFESTAGE_NAMES: [&str; 5] = ["Mounting", "Mounted", "Remounting", "Unmounting", "Unmounted"];

/// Sequence number reserved for the graph root
pub const ROOT_SEQUENCE: u64 = 0;

/// Highest sequence number accepted from a dump, delta or explicit restore
///
/// Matches the largest integer a JSON number holds exactly.
pub const MAX_SEQUENCE: u64 = (1 << 53) - 1;

/// Maximum number of sync errors a soft-mode storage keeps
///
/// Older entries are dropped first once the limit is reached.
pub const DEFAULT_MAX_RECORDED_ERRORS: usize = 256;
