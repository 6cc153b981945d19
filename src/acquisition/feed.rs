//! Channel-backed reading source.
//!
//! A producer thread pushes [`Frame`]s through a bounded crossbeam channel;
//! the source folds them into a table of last-known readings. Channels that
//! a frame does not mention keep their previous value, matching monitor
//! semantics where only changes are delivered.

use crate::acquisition::types::{ChannelSpec, Frame, Reading};
use crate::acquisition::{AcquisitionError, ReadingSource};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Capacity of the frame queue between producer and engine.
const FEED_CAPACITY: usize = 64;

/// A [`ReadingSource`] fed by frames from another thread.
pub struct FeedSource {
    receiver: Receiver<Frame>,
    latest: HashMap<String, Reading>,
    /// True when the last tick received no fresh frame
    stale: bool,
}

impl FeedSource {
    /// Create a source and the sender a producer uses to feed it.
    pub fn new() -> (Self, Sender<Frame>) {
        let (sender, receiver) = bounded(FEED_CAPACITY);
        (Self::from_receiver(receiver), sender)
    }

    /// Wrap an existing frame receiver.
    pub fn from_receiver(receiver: Receiver<Frame>) -> Self {
        Self {
            receiver,
            latest: HashMap::new(),
            stale: false,
        }
    }

    /// Build a source that replays a fixed sequence of frames, then reports
    /// exhaustion.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        let (sender, receiver) = unbounded();
        for frame in frames {
            // The receiver is alive for the whole loop.
            let _ = sender.send(frame);
        }
        Self::from_receiver(receiver)
    }

    /// Replay a JSON-lines frame recording on a background thread.
    pub fn replay_file(path: &Path) -> Result<Self, AcquisitionError> {
        let file = std::fs::File::open(path).map_err(|e| AcquisitionError::Replay {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_reader(
            std::io::BufReader::new(file),
            path.display().to_string(),
        ))
    }

    /// Read JSON-lines frames from `reader` on a background thread.
    ///
    /// Blank lines are skipped; a malformed line ends the feed with a
    /// warning so a truncated recording still yields what precedes it.
    pub fn from_reader<R>(reader: R, label: String) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (source, sender) = Self::new();

        thread::spawn(move || {
            for (lineno, line) in reader.lines().enumerate() {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::warn!("Feed {} stopped at line {}: {}", label, lineno + 1, e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Frame>(&line) {
                    Ok(frame) => {
                        if sender.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Malformed frame in {} line {}: {}", label, lineno + 1, e);
                        break;
                    }
                }
            }
        });

        source
    }

    /// Number of channels that have delivered at least one value.
    pub fn known_channels(&self) -> usize {
        self.latest.len()
    }

    fn merge(&mut self, frame: Frame) {
        for (name, sample) in frame.channels {
            self.latest.insert(name, sample.into_reading());
        }
    }
}

impl ReadingSource for FeedSource {
    fn begin_tick(&mut self, timeout: Duration) -> Result<DateTime<Utc>, AcquisitionError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => {
                let stamp = frame.timestamp.unwrap_or_else(Utc::now);
                self.merge(frame);
                self.stale = false;
                Ok(stamp)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.stale = true;
                Err(AcquisitionError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(AcquisitionError::Exhausted),
        }
    }

    fn acquire(&mut self, channels: &[ChannelSpec]) -> Vec<Reading> {
        channels
            .iter()
            .map(|spec| match self.latest.get(&spec.name) {
                Some(reading) => {
                    let mut reading = reading.clone();
                    reading.valid &= !self.stale;
                    reading
                }
                None => Reading::missing(spec.elements),
            })
            .collect()
    }
}
