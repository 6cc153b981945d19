//! Persistence of captured pages.
//!
//! The engine hands every finished window to a [`WindowSink`]. A sink must
//! accept many pages over a run, each one self-contained. A rejected page
//! stays with its dataset and is offered again on the next tick.

pub mod jsonl;
pub mod memory;

use crate::core::page::CapturePage;
use thiserror::Error;

pub use jsonl::JsonlSink;
pub use memory::MemorySink;

/// Errors raised while writing a page.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode page: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink rejected page: {0}")]
    Rejected(String),
}

/// Durable destination for captured windows.
pub trait WindowSink {
    fn persist(&mut self, page: &CapturePage) -> Result<(), PersistError>;
}
