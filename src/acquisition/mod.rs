//! Channel acquisition for the logger.
//!
//! The engine never talks to the channel-access layer directly; it pulls
//! one logical tick at a time from a [`ReadingSource`] and reads the
//! channels it needs from it.

pub mod feed;
pub mod types;

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

// Re-export commonly used types
pub use feed::FeedSource;
pub use types::{ChannelSpec, Frame, FrameSample, Reading, Severity};

/// Errors reported by a reading source.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// No fresh data arrived within the timeout; readings are stale.
    #[error("no data within {0:?}")]
    Timeout(Duration),

    /// The feed has ended and will never deliver again.
    #[error("reading source exhausted")]
    Exhausted,

    #[error("cannot replay {path}: {reason}")]
    Replay { path: String, reason: String },
}

/// Supplier of channel readings, one logical tick at a time.
pub trait ReadingSource {
    /// Wait up to `timeout` for the next tick and return its timestamp.
    ///
    /// [`AcquisitionError::Timeout`] leaves last-known values in place but
    /// marks them invalid for this tick.
    fn begin_tick(&mut self, timeout: Duration) -> Result<DateTime<Utc>, AcquisitionError>;

    /// Last-known readings for `channels`, in the same order.
    fn acquire(&mut self, channels: &[ChannelSpec]) -> Vec<Reading>;
}
