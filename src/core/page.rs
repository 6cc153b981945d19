//! Captured windows as handed to the persistence layer.
//!
//! A [`CapturePage`] is self-contained: column layout, the trigger that
//! opened the capture, every trigger seen while it was open, and the rows
//! in step order.

use crate::acquisition::Severity;
use crate::core::trigger::TriggerKind;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// The three time views stored with every sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Seconds since the Unix epoch
    pub epoch_secs: f64,
    /// Hours since midnight UTC
    pub time_of_day: f64,
    /// Day of month plus the fraction of the day elapsed
    pub day_of_month: f64,
}

impl Timestamps {
    pub fn from_datetime(t: DateTime<Utc>) -> Self {
        let secs_of_day = f64::from(t.num_seconds_from_midnight())
            + f64::from(t.nanosecond() % 1_000_000_000) / 1e9;
        let hours = secs_of_day / 3600.0;
        Self {
            epoch_secs: t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9,
            time_of_day: hours,
            day_of_month: f64::from(t.day()) + hours / 24.0,
        }
    }
}

/// Why a trigger fired, kept as page metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    /// Index of the trigger in configuration order
    pub trigger: usize,
    pub kind: TriggerKind,
    pub channel: String,
    pub step: u64,
    /// Value the evaluator saw (after the delay line)
    pub value: f64,
    pub severity: Severity,
}

/// What closed the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// The post-event window filled up
    Complete,
    /// The conditions gate failed mid-capture
    ConditionsFailed,
    /// The run reached its quitting time or the feed ended
    QuitTime,
    /// Shutdown was requested
    Shutdown,
}

/// One sample row of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRow {
    pub step: u64,
    pub time: Timestamps,
    /// Values per column, one vector per channel
    pub values: Vec<Vec<f64>>,
    pub post_event: bool,
}

/// Column description of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub elements: usize,
}

/// A finished capture window for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePage {
    pub dataset: String,
    pub columns: Vec<Column>,
    pub anchor_step: u64,
    pub trigger: TriggerRecord,
    /// Triggers that fired on this dataset while the capture was open
    pub pending_triggers: Vec<TriggerRecord>,
    pub reason: FlushReason,
    pub rows: Vec<CaptureRow>,
}

impl CapturePage {
    pub fn post_event_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.post_event).count()
    }

    pub fn steps(&self) -> Vec<u64> {
        self.rows.iter().map(|r| r.step).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_views() {
        let t = Utc.with_ymd_and_hms(2024, 3, 15, 18, 0, 0).unwrap();
        let ts = Timestamps::from_datetime(t);
        assert_eq!(ts.epoch_secs, t.timestamp() as f64);
        assert!((ts.time_of_day - 18.0).abs() < 1e-9);
        assert!((ts.day_of_month - 15.75).abs() < 1e-9);
    }

    #[test]
    fn test_flush_reason_serialization() {
        let json = serde_json::to_string(&FlushReason::ConditionsFailed).unwrap();
        assert_eq!(json, "\"conditions_failed\"");
    }
}
