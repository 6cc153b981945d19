//! JSON-lines page file.
//!
//! Each page becomes one line wrapped in an envelope carrying the run id,
//! host and write time. The file is opened in append mode right before a
//! page is written and closed right after, so no handle is held between
//! flushes.

use crate::core::page::CapturePage;
use crate::storage::{PersistError, WindowSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One line of the page file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEnvelope {
    pub run_id: Uuid,
    pub host: String,
    pub written_at: DateTime<Utc>,
    pub page: CapturePage,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    run_id: Uuid,
    host: &'a str,
    written_at: DateTime<Utc>,
    page: &'a CapturePage,
}

/// Appends pages to a JSON-lines file.
pub struct JsonlSink {
    path: PathBuf,
    run_id: Uuid,
    host: String,
}

impl JsonlSink {
    /// Create a sink for `path` with a fresh run id.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            path: path.into(),
            run_id: Uuid::new_v4(),
            host,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Read every envelope back from a page file.
    pub fn read_all(path: &Path) -> Result<Vec<PageEnvelope>, PersistError> {
        let content = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(PersistError::from))
            .collect()
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl WindowSink for JsonlSink {
    fn persist(&mut self, page: &CapturePage) -> Result<(), PersistError> {
        let mut line = serde_json::to_vec(&EnvelopeRef {
            run_id: self.run_id,
            host: &self.host,
            written_at: Utc::now(),
            page,
        })?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;
        // A single write keeps the line whole.
        file.write_all(&line).map_err(|e| io_error(&self.path, e))?;
        file.flush().map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Severity;
    use crate::core::page::{CaptureRow, Column, FlushReason, Timestamps, TriggerRecord};
    use crate::core::trigger::TriggerKind;

    fn page(anchor: u64) -> CapturePage {
        CapturePage {
            dataset: "main".to_string(),
            columns: vec![Column {
                name: "x".to_string(),
                elements: 1,
            }],
            anchor_step: anchor,
            trigger: TriggerRecord {
                trigger: 0,
                kind: TriggerKind::Level,
                channel: "x".to_string(),
                step: anchor,
                value: 2.0,
                severity: Severity::NoAlarm,
            },
            pending_triggers: Vec::new(),
            reason: FlushReason::Complete,
            rows: vec![CaptureRow {
                step: anchor,
                time: Timestamps::default(),
                values: vec![vec![2.0]],
                post_event: false,
            }],
        }
    }

    #[test]
    fn test_pages_append_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("pages.jsonl");
        let mut sink = JsonlSink::new(&path);

        sink.persist(&page(5)).unwrap();
        sink.persist(&page(9)).unwrap();

        let envelopes = JsonlSink::read_all(&path).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].page.anchor_step, 5);
        assert_eq!(envelopes[1].page, page(9));
        assert!(envelopes.iter().all(|e| e.run_id == sink.run_id()));
    }

    #[test]
    fn test_unwritable_target_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let mut sink = JsonlSink::new(dir.path());
        let err = sink.persist(&page(1)).unwrap_err();
        assert!(matches!(err, PersistError::Io { .. }));
    }
}
