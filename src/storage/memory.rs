//! In-memory page sink.

use crate::core::page::CapturePage;
use crate::storage::{PersistError, WindowSink};

/// Keeps accepted pages in memory; can be told to reject writes.
#[derive(Debug, Default)]
pub struct MemorySink {
    pages: Vec<CapturePage>,
    reject_next: usize,
    attempts: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects the next `count` writes.
    pub fn rejecting(count: usize) -> Self {
        Self {
            reject_next: count,
            ..Self::default()
        }
    }

    /// Reject the next `count` writes.
    pub fn reject_next(&mut self, count: usize) {
        self.reject_next = count;
    }

    pub fn pages(&self) -> &[CapturePage] {
        &self.pages
    }

    pub fn take_pages(&mut self) -> Vec<CapturePage> {
        std::mem::take(&mut self.pages)
    }

    /// Number of persist calls, accepted or not.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl WindowSink for MemorySink {
    fn persist(&mut self, page: &CapturePage) -> Result<(), PersistError> {
        self.attempts += 1;
        if self.reject_next > 0 {
            self.reject_next -= 1;
            return Err(PersistError::Rejected(format!(
                "{} page at step {}",
                page.dataset, page.anchor_step
            )));
        }
        self.pages.push(page.clone());
        Ok(())
    }
}
