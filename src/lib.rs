//! Glitch Logger - trigger-driven capture of monitored channels.
//!
//! The logger samples a set of channels on a fixed cadence, keeps a rolling
//! pre-event history per output stream ("dataset"), and when a trigger fires
//! writes a bounded window of pre- and post-event samples to storage, once
//! per event.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Glitch Logger                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │ Acquisition │──▶│   Inhibit/  │──▶│    Ring     │         │
//! │  │   (feed)    │   │ Conditions  │   │  (per set)  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                                             │                 │
//! │  ┌─────────────┐   ┌─────────────┐          ▼                 │
//! │  │ Delay line  │──▶│  Triggers   │──▶ ┌─────────────┐        │
//! │  └─────────────┘   └─────────────┘    │   Capture   │        │
//! │                                        │ controller  │        │
//! │  ┌─────────────┐   ┌─────────────┐    └─────────────┘        │
//! │  │  Run stats  │◀──│   Storage   │◀─────────┘                │
//! │  └─────────────┘   │  (JSONL)    │                            │
//! │                    └─────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use glitch_logger::{acquisition::FeedSource, core::NoHeartbeat, stats, storage, Config, Engine};
//! use std::path::Path;
//!
//! let config = Config::from_path(Path::new("logger.json")).expect("invalid config");
//! let source = FeedSource::replay_file(Path::new("frames.jsonl")).expect("no recording");
//! let sink = storage::JsonlSink::new(&config.output);
//!
//! let mut engine = Engine::new(&config, source, sink, stats::create_shared_stats())
//!     .expect("engine");
//! engine.run(&mut NoHeartbeat).expect("run");
//! ```

pub mod acquisition;
pub mod config;
pub mod core;
pub mod stats;
pub mod storage;

// Re-export key types at crate root for convenience
pub use acquisition::{AcquisitionError, ChannelSpec, FeedSource, Frame, Reading, ReadingSource, Severity};
pub use config::{Config, ConfigError};
pub use core::{CapturePage, CaptureState, DatasetStatus, Engine, EngineError, TickOutcome};
pub use stats::{RunStats, SharedRunStats};
pub use storage::{JsonlSink, MemorySink, PersistError, WindowSink};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
