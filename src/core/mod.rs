//! Core capture machinery.
//!
//! This module contains:
//! - The ring buffer and per-dataset capture state machine
//! - Trigger evaluators, the delay line and the two gates
//! - The cancellable timer used between ticks
//! - The engine that runs them in order, one tick at a time

pub mod capture;
pub mod delay;
pub mod engine;
pub mod gate;
pub mod page;
pub mod ring;
pub mod timer;
pub mod trigger;

// Re-export commonly used types
pub use capture::{CaptureState, Dataset, DatasetStatus};
pub use engine::{Engine, EngineError, EngineState, TickOutcome};
pub use page::{CapturePage, CaptureRow, Column, FlushReason, Timestamps, TriggerRecord};
pub use timer::{Heartbeat, HeartbeatStatus, NoHeartbeat, ShutdownHandle};
pub use trigger::{is_glitch, is_trigger, Direction, TriggerKind};
