//! Conditions and inhibit gating.
//!
//! The conditions gate votes over a set of range-limited channels before
//! any sample is taken. The inhibit gate is a single channel whose non-zero
//! value suppresses a whole tick.

use crate::acquisition::{ChannelSpec, Reading};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the per-channel range tests combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    /// Every tested channel must be in range
    #[default]
    All,
    /// At least one tested channel must be in range
    Any,
}

/// A channel that must sit inside `[lower, upper)`.
#[derive(Debug, Clone)]
pub struct Condition {
    pub channel: ChannelSpec,
    pub lower: f64,
    pub upper: f64,
    /// Wait imposed when this condition is among the failing ones
    pub holdoff: Duration,
}

impl Condition {
    /// A condition with `lower >= upper` takes no part in the vote.
    pub fn is_enabled(&self) -> bool {
        self.lower < self.upper
    }

    /// Range test; an invalid reading is out of range.
    pub fn passes(&self, reading: &Reading) -> bool {
        let v = reading.scalar();
        reading.valid && self.lower <= v && v < self.upper
    }
}

/// Result of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Open,
    /// Closed; wait this long before the next tick
    Closed { wait: Duration },
}

impl GateVerdict {
    pub fn is_open(&self) -> bool {
        matches!(self, GateVerdict::Open)
    }
}

/// Precondition gate over the condition channels.
#[derive(Debug, Clone)]
pub struct ConditionsGate {
    conditions: Vec<Condition>,
    mode: ConditionMode,
    /// Wait for the longest failing holdoff instead of the fixed back-off
    holdoff_on_fail: bool,
    backoff: Duration,
}

impl ConditionsGate {
    pub fn new(
        conditions: Vec<Condition>,
        mode: ConditionMode,
        holdoff_on_fail: bool,
        backoff: Duration,
    ) -> Self {
        Self {
            conditions,
            mode,
            holdoff_on_fail,
            backoff,
        }
    }

    /// True when no condition takes part in the vote.
    pub fn is_empty(&self) -> bool {
        !self.conditions.iter().any(Condition::is_enabled)
    }

    /// Channels to read, one per configured condition.
    pub fn channels(&self) -> Vec<ChannelSpec> {
        self.conditions.iter().map(|c| c.channel.clone()).collect()
    }

    /// Vote over `readings`, given in the order of [`channels`](Self::channels).
    pub fn evaluate(&self, readings: &[Reading]) -> GateVerdict {
        let mut tested = 0usize;
        let mut passed = 0usize;
        let mut longest_failing = Duration::ZERO;

        for (condition, reading) in self.conditions.iter().zip(readings) {
            if !condition.is_enabled() {
                continue;
            }
            tested += 1;
            if condition.passes(reading) {
                passed += 1;
            } else {
                longest_failing = longest_failing.max(condition.holdoff);
            }
        }

        let open = tested == 0
            || match self.mode {
                ConditionMode::All => passed == tested,
                ConditionMode::Any => passed > 0,
            };
        if open {
            return GateVerdict::Open;
        }

        let wait = if self.holdoff_on_fail && !longest_failing.is_zero() {
            longest_failing
        } else {
            self.backoff
        };
        GateVerdict::Closed { wait }
    }
}

/// Single-channel switch that suppresses whole ticks.
#[derive(Debug, Clone)]
pub struct InhibitGate {
    pub channel: ChannelSpec,
}

impl InhibitGate {
    pub fn new(channel: ChannelSpec) -> Self {
        Self { channel }
    }

    /// Non-zero valid readings inhibit; an unreadable switch does not.
    pub fn is_inhibited(&self, reading: &Reading) -> bool {
        reading.valid && reading.scalar() != 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Severity;

    fn cond(name: &str, lower: f64, upper: f64, holdoff_secs: u64) -> Condition {
        Condition {
            channel: ChannelSpec::scalar(name),
            lower,
            upper,
            holdoff: Duration::from_secs(holdoff_secs),
        }
    }

    fn r(v: f64) -> Reading {
        Reading::new(vec![v], Severity::NoAlarm)
    }

    fn gate(mode: ConditionMode, holdoff_on_fail: bool) -> ConditionsGate {
        ConditionsGate::new(
            vec![cond("a", 0.0, 10.0, 3), cond("b", 0.0, 10.0, 7)],
            mode,
            holdoff_on_fail,
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_half_open_range() {
        let c = cond("a", 1.0, 2.0, 0);
        assert!(c.passes(&r(1.0)));
        assert!(c.passes(&r(1.999)));
        assert!(!c.passes(&r(2.0)));
        let mut stale = r(1.5);
        stale.valid = false;
        assert!(!c.passes(&stale));
    }

    #[test]
    fn test_all_mode() {
        let g = gate(ConditionMode::All, false);
        assert!(g.evaluate(&[r(1.0), r(2.0)]).is_open());
        assert_eq!(
            g.evaluate(&[r(1.0), r(20.0)]),
            GateVerdict::Closed {
                wait: Duration::from_millis(500)
            }
        );
    }

    #[test]
    fn test_any_mode() {
        let g = gate(ConditionMode::Any, false);
        assert!(g.evaluate(&[r(1.0), r(20.0)]).is_open());
        assert!(!g.evaluate(&[r(-1.0), r(20.0)]).is_open());
    }

    #[test]
    fn test_holdoff_is_longest_failing() {
        let g = gate(ConditionMode::All, true);
        assert_eq!(
            g.evaluate(&[r(-1.0), r(1.0)]),
            GateVerdict::Closed {
                wait: Duration::from_secs(3)
            }
        );
        assert_eq!(
            g.evaluate(&[r(-1.0), r(11.0)]),
            GateVerdict::Closed {
                wait: Duration::from_secs(7)
            }
        );
    }

    #[test]
    fn test_disabled_conditions_are_ignored() {
        let g = ConditionsGate::new(
            vec![cond("a", 5.0, 5.0, 0), cond("b", 0.0, 1.0, 0)],
            ConditionMode::All,
            false,
            Duration::from_secs(1),
        );
        assert!(!g.is_empty());
        assert!(g.evaluate(&[r(100.0), r(0.5)]).is_open());

        let only_disabled = ConditionsGate::new(
            vec![cond("a", 2.0, 1.0, 0)],
            ConditionMode::All,
            false,
            Duration::from_secs(1),
        );
        assert!(only_disabled.is_empty());
        assert!(only_disabled.evaluate(&[r(100.0)]).is_open());
    }

    #[test]
    fn test_inhibit() {
        let g = InhibitGate::new(ChannelSpec::scalar("inh"));
        assert!(!g.is_inhibited(&r(0.0)));
        assert!(g.is_inhibited(&r(1.0)));
        let mut stale = r(1.0);
        stale.valid = false;
        assert!(!g.is_inhibited(&stale));
    }
}
