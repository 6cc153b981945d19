//! Run statistics for the logger.
//!
//! Transient per-tick errors are absorbed by the engine and only surface
//! here, as counters that the CLI reports and persists between runs.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_stats, create_shared_stats_with_persistence, RunStats, RunStatsSnapshot,
    SharedRunStats,
};
