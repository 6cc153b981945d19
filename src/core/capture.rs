//! Per-dataset capture controller.
//!
//! Each dataset cycles `Idle -> Capturing -> Flushing -> Idle`. The ring
//! keeps advancing in every state; only the bookkeeping around it changes.
//! At most one capture is open per dataset: triggers that fire while a
//! capture is open or waiting to be written are attached to it as pending
//! records instead of opening a second one.

use crate::acquisition::{ChannelSpec, Reading};
use crate::core::page::{CapturePage, CaptureRow, Column, FlushReason, Timestamps, TriggerRecord};
use crate::core::ring::RingBuffer;
use serde::{Deserialize, Serialize};

/// Externally visible capture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Capturing,
    Flushing,
}

/// An open capture.
#[derive(Debug, Clone)]
struct Session {
    anchor_step: u64,
    trigger: TriggerRecord,
    pending: Vec<TriggerRecord>,
    /// Post-event samples still to take; the capture closes below zero
    points_left: i64,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Capturing(Session),
    /// Page assembled, waiting for the sink to accept it
    Flushing(Box<CapturePage>),
}

/// Read-only snapshot of a dataset for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatus {
    pub name: String,
    pub state: CaptureState,
    pub rows_buffered: usize,
    pub pending_triggers: usize,
    pub trig_before_count: usize,
    pub points_left: Option<i64>,
}

/// A named output stream with its own ring and capture state.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    /// Registry indices of the recorded channels
    channels: Vec<usize>,
    columns: Vec<Column>,
    before: usize,
    after: usize,
    ring: RingBuffer,
    phase: Phase,
    /// Pre-event samples accumulated since the dataset last went idle
    trig_before_count: usize,
}

impl Dataset {
    pub fn new(
        name: &str,
        channels: Vec<usize>,
        specs: &[ChannelSpec],
        before: usize,
        after: usize,
    ) -> Self {
        let elements: Vec<usize> = specs.iter().map(|s| s.elements).collect();
        Self {
            name: name.to_string(),
            channels,
            columns: specs
                .iter()
                .map(|s| Column {
                    name: s.name.clone(),
                    elements: s.elements,
                })
                .collect(),
            before,
            after,
            ring: RingBuffer::new(before + 1 + after, &elements),
            phase: Phase::Idle,
            trig_before_count: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        match self.phase {
            Phase::Idle => CaptureState::Idle,
            Phase::Capturing(_) => CaptureState::Capturing,
            Phase::Flushing(_) => CaptureState::Flushing,
        }
    }

    pub fn before(&self) -> usize {
        self.before
    }

    pub fn after(&self) -> usize {
        self.after
    }

    /// Registry indices of the recorded channels.
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// Advance the ring for a new tick.
    ///
    /// `latest` is the engine's channel table; `None` marks the tick as not
    /// to be stored (conditions failure).
    pub fn record(&mut self, step: u64, time: Timestamps, latest: Option<&[Reading]>) {
        self.ring.advance(step, time);
        if let Some(latest) = latest {
            self.ring
                .store(self.channels.iter().filter_map(|&i| latest.get(i)));
        }
    }

    /// Handle a trigger that fired on this tick. Returns true when it opened
    /// a new capture.
    pub fn on_trigger(&mut self, record: TriggerRecord) -> bool {
        match &mut self.phase {
            Phase::Capturing(session) => {
                session.pending.push(record);
                return false;
            }
            Phase::Flushing(page) => {
                page.pending_triggers.push(record);
                return false;
            }
            Phase::Idle => {}
        }

        tracing::info!(
            "Capture opened on {} at step {} by {:?} trigger on {}",
            self.name,
            record.step,
            record.kind,
            record.channel
        );
        self.phase = Phase::Capturing(Session {
            anchor_step: record.step,
            trigger: record,
            pending: Vec::new(),
            points_left: self.after as i64,
        });
        true
    }

    /// Close out a tick on which a sample was stored.
    ///
    /// Returns true when the capture just moved to `Flushing`.
    pub fn end_tick(&mut self) -> bool {
        let close = match &mut self.phase {
            Phase::Idle => {
                self.trig_before_count = (self.trig_before_count + 1).min(self.before);
                false
            }
            Phase::Capturing(session) => {
                session.points_left -= 1;
                session.points_left < 0
            }
            Phase::Flushing(_) => false,
        };
        if close {
            self.begin_flush(FlushReason::Complete);
        }
        close
    }

    /// Close an open capture early. Returns true if one was open.
    pub fn force_flush(&mut self, reason: FlushReason) -> bool {
        if matches!(self.phase, Phase::Capturing(_)) {
            self.begin_flush(reason);
            true
        } else {
            false
        }
    }

    /// Page waiting for the sink, if any.
    pub fn pending_page(&self) -> Option<&CapturePage> {
        match &self.phase {
            Phase::Flushing(page) => Some(page.as_ref()),
            _ => None,
        }
    }

    /// The sink accepted the pending page: return to idle.
    pub fn finish_flush(&mut self) -> Option<CapturePage> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Flushing(page) => {
                self.trig_before_count = 0;
                Some(*page)
            }
            other => {
                self.phase = other;
                None
            }
        }
    }

    pub fn status(&self) -> DatasetStatus {
        let (pending_triggers, points_left) = match &self.phase {
            Phase::Idle => (0, None),
            Phase::Capturing(s) => (s.pending.len(), Some(s.points_left)),
            Phase::Flushing(p) => (p.pending_triggers.len(), None),
        };
        DatasetStatus {
            name: self.name.clone(),
            state: self.state(),
            rows_buffered: self.ring.buffered(),
            pending_triggers,
            trig_before_count: self.trig_before_count,
            points_left,
        }
    }

    fn begin_flush(&mut self, reason: FlushReason) {
        let Phase::Capturing(session) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };
        let rows = self.assemble_rows(session.anchor_step);
        tracing::debug!(
            "Flushing {} ({:?}): {} rows around step {}",
            self.name,
            reason,
            rows.len(),
            session.anchor_step
        );
        self.phase = Phase::Flushing(Box::new(CapturePage {
            dataset: self.name.clone(),
            columns: self.columns.clone(),
            anchor_step: session.anchor_step,
            trigger: session.trigger,
            pending_triggers: session.pending,
            reason,
            rows,
        }));
    }

    /// Walk the ring oldest-first and keep the warm pre-event history, the
    /// anchor and everything after it.
    fn assemble_rows(&self, anchor: u64) -> Vec<CaptureRow> {
        let filled: Vec<_> = self.ring.chronological().filter(|n| n.has_data).collect();
        let pre = filled.iter().filter(|n| n.step < anchor).count();
        let skip = pre.saturating_sub(self.trig_before_count);

        filled
            .into_iter()
            .skip(skip)
            .map(|node| CaptureRow {
                step: node.step,
                time: node.time,
                values: node.values.clone(),
                post_event: node.step > anchor,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Severity;
    use crate::core::trigger::TriggerKind;

    fn dataset(before: usize, after: usize) -> Dataset {
        Dataset::new("ds", vec![0], &[ChannelSpec::scalar("x")], before, after)
    }

    fn record(step: u64) -> TriggerRecord {
        TriggerRecord {
            trigger: 0,
            kind: TriggerKind::Glitch,
            channel: "x".to_string(),
            step,
            value: 0.0,
            severity: Severity::NoAlarm,
        }
    }

    /// Store one sample; fire a trigger first when `fire` is set.
    fn tick(ds: &mut Dataset, step: u64, fire: bool) -> bool {
        let latest = [Reading::new(vec![step as f64], Severity::NoAlarm)];
        ds.record(step, Timestamps::default(), Some(&latest[..]));
        if fire {
            ds.on_trigger(record(step));
        }
        ds.end_tick()
    }

    #[test]
    fn test_window_around_anchor() {
        let mut ds = dataset(3, 2);
        for step in 90..100 {
            assert!(!tick(&mut ds, step, false));
        }
        assert!(!tick(&mut ds, 100, true));
        assert_eq!(ds.state(), CaptureState::Capturing);
        assert!(!tick(&mut ds, 101, false));
        assert!(tick(&mut ds, 102, false));
        assert_eq!(ds.state(), CaptureState::Flushing);

        let page = ds.pending_page().unwrap();
        assert_eq!(page.steps(), vec![97, 98, 99, 100, 101, 102]);
        let post: Vec<bool> = page.rows.iter().map(|r| r.post_event).collect();
        assert_eq!(post, vec![false, false, false, false, true, true]);
        assert_eq!(page.rows[0].values, vec![vec![97.0]]);

        let page = ds.finish_flush().unwrap();
        assert_eq!(page.reason, FlushReason::Complete);
        assert_eq!(ds.state(), CaptureState::Idle);
        assert_eq!(ds.status().trig_before_count, 0);
    }

    #[test]
    fn test_cold_history_limits_pre_event_rows() {
        let mut ds = dataset(5, 1);
        tick(&mut ds, 1, false);
        tick(&mut ds, 2, true);
        tick(&mut ds, 3, false);
        let page = ds.finish_flush().unwrap();
        assert_eq!(page.steps(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rows_are_not_written_twice() {
        let mut ds = dataset(3, 1);
        for step in 1..=5 {
            tick(&mut ds, step, step == 4);
        }
        let first = ds.finish_flush().unwrap();
        assert_eq!(first.steps(), vec![1, 2, 3, 4, 5]);

        // Trigger again right away: steps 1..=5 must not reappear.
        tick(&mut ds, 6, false);
        tick(&mut ds, 7, true);
        tick(&mut ds, 8, false);
        let second = ds.finish_flush().unwrap();
        assert_eq!(second.steps(), vec![6, 7, 8]);
    }

    #[test]
    fn test_zero_after_flushes_on_anchor_tick() {
        let mut ds = dataset(2, 0);
        tick(&mut ds, 1, false);
        tick(&mut ds, 2, false);
        assert!(tick(&mut ds, 3, true));
        let page = ds.finish_flush().unwrap();
        assert_eq!(page.steps(), vec![1, 2, 3]);
        assert_eq!(page.post_event_rows(), 0);
    }

    #[test]
    fn test_second_trigger_is_pending() {
        let mut ds = dataset(1, 3);
        tick(&mut ds, 1, true);
        assert!(!ds.on_trigger(record(1)));
        tick(&mut ds, 2, true);
        assert_eq!(ds.status().pending_triggers, 2);
        assert_eq!(ds.state(), CaptureState::Capturing);

        ds.force_flush(FlushReason::Shutdown);
        assert!(!ds.on_trigger(record(3)));
        let page = ds.finish_flush().unwrap();
        assert_eq!(page.anchor_step, 1);
        assert_eq!(page.pending_triggers.len(), 3);
        assert_eq!(page.reason, FlushReason::Shutdown);
    }

    #[test]
    fn test_unstored_tick_is_skipped() {
        let mut ds = dataset(2, 3);
        tick(&mut ds, 1, false);
        tick(&mut ds, 2, true);
        ds.record(3, Timestamps::default(), None);
        assert!(ds.force_flush(FlushReason::ConditionsFailed));
        let page = ds.pending_page().unwrap();
        assert_eq!(page.steps(), vec![1, 2]);
        assert_eq!(page.post_event_rows(), 0);
    }

    #[test]
    fn test_force_flush_when_idle_is_noop() {
        let mut ds = dataset(2, 2);
        tick(&mut ds, 1, false);
        assert!(!ds.force_flush(FlushReason::QuitTime));
        assert!(ds.finish_flush().is_none());
        assert_eq!(ds.state(), CaptureState::Idle);
    }
}
