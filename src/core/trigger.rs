//! Trigger evaluators.
//!
//! Three kinds of trigger share one [`TriggerSource`] wrapper that owns the
//! arm/disarm flag, the holdoff timer and the index of the dataset the
//! trigger feeds:
//!
//! - **Glitch**: deviation of a reading from a running baseline
//! - **Level**: directional crossing of a fixed threshold
//! - **Alarm**: change of the channel's severity into a target class
//!
//! Evaluation never fails. An invalid reading leaves the evaluator state
//! untouched and never fires.

use crate::acquisition::{Reading, Severity};
use crate::core::page::TriggerRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Crossing direction for level triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Rising,
    Falling,
    Disabled,
}

/// Discriminant of a trigger, recorded in page metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Glitch,
    Level,
    Alarm,
}

/// Deviation test against a baseline.
///
/// A positive `delta` is an absolute threshold, a negative one is a fraction
/// of the baseline, and zero disables the test.
pub fn is_glitch(value: f64, baseline: f64, delta: f64) -> bool {
    let deviation = (value - baseline).abs();
    if delta > 0.0 {
        deviation > delta
    } else if delta < 0.0 {
        deviation > delta.abs() * baseline
    } else {
        false
    }
}

/// Strict crossing of `level` between two consecutive values.
pub fn is_trigger(previous: f64, current: f64, level: f64, direction: Direction) -> bool {
    match direction {
        Direction::Rising => previous < level && level < current,
        Direction::Falling => current < level && level < previous,
        Direction::Disabled => false,
    }
}

/// Baseline-deviation detector state.
#[derive(Debug, Clone)]
pub struct GlitchState {
    /// Running baseline; seeded by the first valid reading when unset
    pub baseline: Option<f64>,
    pub delta: f64,
    /// Weight `n` of the baseline in the running average
    pub baseline_samples: u32,
    /// Snap the baseline to the glitch value when firing
    pub auto_reset: bool,
}

impl GlitchState {
    fn evaluate(&mut self, value: f64, armed: bool) -> bool {
        let Some(baseline) = self.baseline else {
            self.baseline = Some(value);
            return false;
        };

        let fired = armed && is_glitch(value, baseline, self.delta);
        if fired {
            if self.auto_reset {
                self.baseline = Some(value);
            }
        } else {
            let n = f64::from(self.baseline_samples);
            self.baseline = Some((value + baseline * n) / (n + 1.0));
        }
        fired
    }
}

/// Threshold-crossing detector state.
#[derive(Debug, Clone)]
pub struct LevelState {
    pub level: f64,
    pub direction: Direction,
    pub previous: Option<f64>,
    /// Re-arm on the owning dataset's flush instead of waiting for the
    /// value to cross back (the holdoff applies either way)
    pub auto_arm: bool,
}

impl LevelState {
    /// True once the value is back on the side the crossing started from.
    fn crossed_back(&self, value: f64) -> bool {
        match self.direction {
            Direction::Rising => value < self.level,
            Direction::Falling => value > self.level,
            Direction::Disabled => false,
        }
    }
}

/// Severity-change detector state.
#[derive(Debug, Clone)]
pub struct AlarmState {
    pub targets: Vec<Severity>,
    pub previous: Option<Severity>,
}

/// Variant payload of a trigger source.
#[derive(Debug, Clone)]
pub enum TriggerVariant {
    Glitch(GlitchState),
    Level(LevelState),
    Alarm(AlarmState),
}

impl TriggerVariant {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerVariant::Glitch(_) => TriggerKind::Glitch,
            TriggerVariant::Level(_) => TriggerKind::Level,
            TriggerVariant::Alarm(_) => TriggerKind::Alarm,
        }
    }
}

/// One monitored channel whose events open captures on a dataset.
#[derive(Debug, Clone)]
pub struct TriggerSource {
    /// Registry index of the monitored channel
    pub channel: usize,
    pub channel_name: String,
    /// Index of the owning dataset
    pub dataset: usize,
    pub variant: TriggerVariant,
    /// Quiet period after a flush before the trigger re-arms
    pub holdoff: Duration,
    armed: bool,
    rearm_at: Option<DateTime<Utc>>,
}

impl TriggerSource {
    /// Create an armed trigger source.
    pub fn new(
        channel: usize,
        channel_name: &str,
        dataset: usize,
        variant: TriggerVariant,
        holdoff: Duration,
    ) -> Self {
        Self {
            channel,
            channel_name: channel_name.to_string(),
            dataset,
            variant,
            holdoff,
            armed: true,
            rearm_at: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn kind(&self) -> TriggerKind {
        self.variant.kind()
    }

    /// Evaluate one tick.
    ///
    /// `value` is the (possibly delayed) scalar value; `reading` supplies
    /// validity and severity. Returns a record when the trigger fires.
    pub fn evaluate(
        &mut self,
        index: usize,
        reading: &Reading,
        value: f64,
        step: u64,
    ) -> Option<TriggerRecord> {
        if !reading.valid {
            return None;
        }

        let fired = match &mut self.variant {
            TriggerVariant::Glitch(state) => state.evaluate(value, self.armed),
            TriggerVariant::Level(state) => {
                let previous = state.previous.replace(value);
                if !self.armed
                    && !state.auto_arm
                    && self.rearm_at.is_none()
                    && state.crossed_back(value)
                {
                    self.armed = true;
                }
                match previous {
                    Some(prev) => {
                        self.armed && is_trigger(prev, value, state.level, state.direction)
                    }
                    None => false,
                }
            }
            TriggerVariant::Alarm(state) => {
                let severity = reading.severity;
                match state.previous.replace(severity) {
                    Some(prev) => {
                        self.armed && severity != prev && state.targets.contains(&severity)
                    }
                    None => false,
                }
            }
        };

        if !fired {
            return None;
        }
        self.armed = false;
        Some(TriggerRecord {
            trigger: index,
            kind: self.kind(),
            channel: self.channel_name.clone(),
            step,
            value,
            severity: reading.severity,
        })
    }

    /// Called when the owning dataset has finished writing a page.
    ///
    /// Starts the holdoff. Level triggers without auto-arm still need the
    /// value to cross back over their level once it has run out.
    pub fn on_flush(&mut self, now: DateTime<Utc>) {
        if self.armed {
            return;
        }
        if self.holdoff.is_zero() {
            self.rearm_at = None;
            self.armed = !self.waits_for_cross_back();
        } else {
            self.rearm_at = chrono::Duration::from_std(self.holdoff)
                .ok()
                .and_then(|d| now.checked_add_signed(d));
            // An unrepresentable deadline means the trigger stays down.
        }
    }

    /// Re-arm when a pending holdoff has expired.
    pub fn release_holdoff(&mut self, now: DateTime<Utc>) {
        if let Some(at) = self.rearm_at {
            if now >= at {
                self.armed = !self.waits_for_cross_back();
                self.rearm_at = None;
            }
        }
    }

    fn waits_for_cross_back(&self) -> bool {
        matches!(&self.variant, TriggerVariant::Level(state) if !state.auto_arm)
    }

    /// Whether a holdoff is still counting down.
    pub fn in_holdoff(&self) -> bool {
        self.rearm_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn reading(v: f64) -> Reading {
        Reading::new(vec![v], Severity::NoAlarm)
    }

    fn glitch(delta: f64, n: u32, auto_reset: bool) -> TriggerSource {
        TriggerSource::new(
            0,
            "x",
            0,
            TriggerVariant::Glitch(GlitchState {
                baseline: None,
                delta,
                baseline_samples: n,
                auto_reset,
            }),
            Duration::ZERO,
        )
    }

    fn level(level: f64, direction: Direction, auto_arm: bool) -> TriggerSource {
        TriggerSource::new(
            0,
            "x",
            0,
            TriggerVariant::Level(LevelState {
                level,
                direction,
                previous: None,
                auto_arm,
            }),
            Duration::ZERO,
        )
    }

    fn fire(t: &mut TriggerSource, v: f64, step: u64) -> bool {
        t.evaluate(0, &reading(v), v, step).is_some()
    }

    #[test]
    fn test_is_glitch_randomized() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let v: f64 = rng.gen_range(-100.0..100.0);
            let b: f64 = rng.gen_range(-100.0..100.0);
            let d: f64 = rng.gen_range(-2.0..50.0);
            let dev = (v - b).abs();
            let expected = if d > 0.0 {
                dev > d
            } else if d < 0.0 {
                dev > d.abs() * b
            } else {
                false
            };
            assert_eq!(is_glitch(v, b, d), expected, "v={v} b={b} d={d}");
            assert!(!is_glitch(v, b, 0.0));
        }
    }

    #[test]
    fn test_is_trigger_randomized() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10_000 {
            let prev: f64 = rng.gen_range(-10.0..10.0);
            let curr: f64 = rng.gen_range(-10.0..10.0);
            let level: f64 = rng.gen_range(-10.0..10.0);
            assert_eq!(
                is_trigger(prev, curr, level, Direction::Rising),
                prev < level && level < curr
            );
            assert_eq!(
                is_trigger(prev, curr, level, Direction::Falling),
                curr < level && level < prev
            );
            assert!(!is_trigger(prev, curr, level, Direction::Disabled));
        }
    }

    #[test]
    fn test_fractional_glitch_threshold() {
        // 10% of a baseline of 50
        assert!(is_glitch(56.0, 50.0, -0.1));
        assert!(!is_glitch(54.0, 50.0, -0.1));
    }

    #[test]
    fn test_glitch_baseline_running_average() {
        let mut t = glitch(100.0, 3, false);
        assert!(!fire(&mut t, 4.0, 1));
        assert!(!fire(&mut t, 8.0, 2));
        match &t.variant {
            TriggerVariant::Glitch(s) => assert_eq!(s.baseline, Some(5.0)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_glitch_disarms_and_freezes_baseline() {
        let mut t = glitch(1.0, 10, false);
        fire(&mut t, 1.0, 1);
        assert!(fire(&mut t, 5.0, 2));
        assert!(!t.is_armed());
        match &t.variant {
            TriggerVariant::Glitch(s) => assert_eq!(s.baseline, Some(1.0)),
            _ => unreachable!(),
        }
        // Deviation persists but the trigger stays down
        assert!(!fire(&mut t, 5.0, 3));
        assert!(!fire(&mut t, 5.0, 4));

        t.on_flush(Utc::now());
        assert!(t.is_armed());
    }

    #[test]
    fn test_glitch_auto_reset_snaps_baseline() {
        let mut t = glitch(1.0, 10, true);
        fire(&mut t, 1.0, 1);
        assert!(fire(&mut t, 5.0, 2));
        match &t.variant {
            TriggerVariant::Glitch(s) => assert_eq!(s.baseline, Some(5.0)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_level_rearms_after_crossing_back() {
        let mut t = level(5.0, Direction::Rising, false);
        assert!(!fire(&mut t, 4.0, 1));
        assert!(fire(&mut t, 6.0, 2));
        // Noise above the threshold does not re-trigger
        assert!(!fire(&mut t, 5.1, 3));
        assert!(!fire(&mut t, 6.0, 4));
        // Flush does not re-arm a non-auto level trigger
        t.on_flush(Utc::now());
        assert!(!t.is_armed());
        // Falling back under the level re-arms it
        assert!(!fire(&mut t, 4.0, 5));
        assert!(t.is_armed());
        assert!(fire(&mut t, 7.0, 6));
    }

    #[test]
    fn test_level_auto_arm_rearms_on_flush() {
        let mut t = level(0.0, Direction::Falling, true);
        fire(&mut t, 1.0, 1);
        assert!(fire(&mut t, -1.0, 2));
        assert!(!fire(&mut t, 1.0, 3));
        assert!(!t.is_armed());
        t.on_flush(Utc::now());
        assert!(fire(&mut t, -1.0, 4));
    }

    #[test]
    fn test_alarm_fires_on_change_into_target() {
        let mut t = TriggerSource::new(
            0,
            "x",
            0,
            TriggerVariant::Alarm(AlarmState {
                targets: vec![Severity::Major],
                previous: None,
            }),
            Duration::ZERO,
        );
        let sev = |s| Reading::new(vec![0.0], s);
        // Starting in the target class is not a change
        assert!(t.evaluate(0, &sev(Severity::Major), 0.0, 1).is_none());
        assert!(t.evaluate(0, &sev(Severity::Minor), 0.0, 2).is_none());
        let record = t.evaluate(3, &sev(Severity::Major), 0.0, 3).unwrap();
        assert_eq!(record.kind, TriggerKind::Alarm);
        assert_eq!(record.trigger, 3);
        assert_eq!(record.severity, Severity::Major);
    }

    #[test]
    fn test_invalid_reading_retains_state() {
        let mut t = level(5.0, Direction::Rising, false);
        fire(&mut t, 4.0, 1);
        let mut stale = reading(9.0);
        stale.valid = false;
        assert!(t.evaluate(0, &stale, 9.0, 2).is_none());
        match &t.variant {
            TriggerVariant::Level(s) => assert_eq!(s.previous, Some(4.0)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_holdoff_delays_rearm() {
        let mut t = glitch(1.0, 0, false);
        t.holdoff = Duration::from_secs(5);
        fire(&mut t, 0.0, 1);
        assert!(fire(&mut t, 3.0, 2));

        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        t.on_flush(t0);
        assert!(!t.is_armed());
        assert!(t.in_holdoff());

        t.release_holdoff(t0 + chrono::Duration::seconds(4));
        assert!(!t.is_armed());
        t.release_holdoff(t0 + chrono::Duration::seconds(5));
        assert!(t.is_armed());
    }

    #[test]
    fn test_level_holdoff_and_cross_back_both_required() {
        let mut t = level(5.0, Direction::Rising, false);
        t.holdoff = Duration::from_secs(100);
        fire(&mut t, 1.0, 1);
        assert!(fire(&mut t, 9.0, 2));

        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        t.on_flush(t0);
        assert!(t.in_holdoff());
        // Crossing back inside the holdoff does not re-arm
        for step in 3..8 {
            let v = if step % 2 == 1 { 1.0 } else { 9.0 };
            assert!(!fire(&mut t, v, step));
        }
        assert!(!t.is_armed());

        // Holdoff over, but the value is still above the level
        t.release_holdoff(t0 + chrono::Duration::seconds(100));
        assert!(!t.in_holdoff());
        assert!(!t.is_armed());
        assert!(!fire(&mut t, 9.0, 8));
        assert!(!fire(&mut t, 1.0, 9));
        assert!(t.is_armed());
        assert!(fire(&mut t, 9.0, 10));
    }
}
