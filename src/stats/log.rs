//! Atomic run counters with optional persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current run.
#[derive(Debug)]
pub struct RunStats {
    /// Ticks pulled from the reading source
    ticks: AtomicU64,
    /// Ticks suppressed by the inhibit channel
    inhibited_ticks: AtomicU64,
    /// Ticks on which the conditions gate was closed
    conditions_failures: AtomicU64,
    /// Stale or invalid channel readings
    acquisition_errors: AtomicU64,
    /// Trigger firings, including those attached to an open capture
    triggers_fired: AtomicU64,
    /// Captures opened
    captures_opened: AtomicU64,
    /// Pages accepted by the sink
    pages_written: AtomicU64,
    /// Rows inside those pages
    rows_written: AtomicU64,
    /// Rejected page writes (each retried later)
    persist_failures: AtomicU64,
    /// Run start time
    run_start: DateTime<Utc>,
    /// Path for persisting totals
    persist_path: Option<PathBuf>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            inhibited_ticks: AtomicU64::new(0),
            conditions_failures: AtomicU64::new(0),
            acquisition_errors: AtomicU64::new(0),
            triggers_fired: AtomicU64::new(0),
            captures_opened: AtomicU64::new(0),
            pages_written: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            run_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a tally that continues the totals stored at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous run statistics: {}", e);
        }

        stats
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inhibited(&self) {
        self.inhibited_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conditions_failure(&self) {
        self.conditions_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition_errors(&self, count: u64) {
        self.acquisition_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_trigger(&self) {
        self.triggers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_opened(&self) {
        self.captures_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a page accepted by the sink.
    pub fn record_page(&self, rows: u64) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            inhibited_ticks: self.inhibited_ticks.load(Ordering::Relaxed),
            conditions_failures: self.conditions_failures.load(Ordering::Relaxed),
            acquisition_errors: self.acquisition_errors.load(Ordering::Relaxed),
            triggers_fired: self.triggers_fired.load(Ordering::Relaxed),
            captures_opened: self.captures_opened.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            run_start: self.run_start,
            run_duration_secs: (Utc::now() - self.run_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Run Statistics:\n\
             - Ticks: {}\n\
             - Inhibited ticks: {}\n\
             - Conditions failures: {}\n\
             - Stale readings: {}\n\
             - Triggers fired: {}\n\
             - Captures opened: {}\n\
             - Pages written: {} ({} rows)\n\
             - Persist failures: {}\n\
             - Run duration: {} seconds",
            s.ticks,
            s.inhibited_ticks,
            s.conditions_failures,
            s.acquisition_errors,
            s.triggers_fired,
            s.captures_opened,
            s.pages_written,
            s.rows_written,
            s.persist_failures,
            s.run_duration_secs
        )
    }

    /// Save totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let s = self.snapshot();
            let persisted = PersistedStats {
                ticks: s.ticks,
                inhibited_ticks: s.inhibited_ticks,
                conditions_failures: s.conditions_failures,
                acquisition_errors: s.acquisition_errors,
                triggers_fired: s.triggers_fired,
                captures_opened: s.captures_opened,
                pages_written: s.pages_written,
                rows_written: s.rows_written,
                persist_failures: s.persist_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load totals from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let persisted = Self::read(path)?;

                self.ticks.store(persisted.ticks, Ordering::Relaxed);
                self.inhibited_ticks
                    .store(persisted.inhibited_ticks, Ordering::Relaxed);
                self.conditions_failures
                    .store(persisted.conditions_failures, Ordering::Relaxed);
                self.acquisition_errors
                    .store(persisted.acquisition_errors, Ordering::Relaxed);
                self.triggers_fired
                    .store(persisted.triggers_fired, Ordering::Relaxed);
                self.captures_opened
                    .store(persisted.captures_opened, Ordering::Relaxed);
                self.pages_written
                    .store(persisted.pages_written, Ordering::Relaxed);
                self.rows_written
                    .store(persisted.rows_written, Ordering::Relaxed);
                self.persist_failures
                    .store(persisted.persist_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Read persisted totals without creating a tally.
    pub fn read(path: &std::path::Path) -> Result<PersistedStats, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatsSnapshot {
    pub ticks: u64,
    pub inhibited_ticks: u64,
    pub conditions_failures: u64,
    pub acquisition_errors: u64,
    pub triggers_fired: u64,
    pub captures_opened: u64,
    pub pages_written: u64,
    pub rows_written: u64,
    pub persist_failures: u64,
    pub run_start: DateTime<Utc>,
    pub run_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub ticks: u64,
    #[serde(default)]
    pub inhibited_ticks: u64,
    #[serde(default)]
    pub conditions_failures: u64,
    #[serde(default)]
    pub acquisition_errors: u64,
    #[serde(default)]
    pub triggers_fired: u64,
    #[serde(default)]
    pub captures_opened: u64,
    pub pages_written: u64,
    #[serde(default)]
    pub rows_written: u64,
    #[serde(default)]
    pub persist_failures: u64,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared run statistics.
pub type SharedRunStats = Arc<RunStats>;

pub fn create_shared_stats() -> SharedRunStats {
    Arc::new(RunStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedRunStats {
    Arc::new(RunStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = RunStats::new();

        stats.record_tick();
        stats.record_tick();
        stats.record_acquisition_errors(3);
        stats.record_page(7);

        let s = stats.snapshot();
        assert_eq!(s.ticks, 2);
        assert_eq!(s.acquisition_errors, 3);
        assert_eq!(s.pages_written, 1);
        assert_eq!(s.rows_written, 7);
    }

    #[test]
    fn test_summary_format() {
        let summary = RunStats::new().summary();
        assert!(summary.contains("Ticks"));
        assert!(summary.contains("Pages written"));
        assert!(summary.contains("Persist failures"));
    }

    #[test]
    fn test_totals_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.json");

        let first = RunStats::with_persistence(path.clone());
        first.record_tick();
        first.record_capture_opened();
        first.save().unwrap();

        let second = RunStats::with_persistence(path.clone());
        second.record_tick();
        let s = second.snapshot();
        assert_eq!(s.ticks, 2);
        assert_eq!(s.captures_opened, 1);

        assert_eq!(RunStats::read(&path).unwrap().ticks, 1);
    }
}
