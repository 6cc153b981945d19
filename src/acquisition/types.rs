//! Reading types exchanged between the engine and its acquisition source.
//!
//! A reading carries the last-known values, a validity flag and the
//! alarm severity reported for the channel, never connection details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alarm severity classification reported by the status collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    NoAlarm,
    Minor,
    Major,
    Invalid,
}

impl Severity {
    /// Parse a severity name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "no_alarm" | "noalarm" | "none" => Some(Severity::NoAlarm),
            "minor" => Some(Severity::Minor),
            "major" => Some(Severity::Major),
            "invalid" => Some(Severity::Invalid),
            _ => None,
        }
    }
}

/// The state of one channel as seen on one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// One value per element (scalar channels carry exactly one)
    pub values: Vec<f64>,
    /// Whether the channel delivered fresh, valid data this tick
    pub valid: bool,
    /// Alarm severity classification
    pub severity: Severity,
}

impl Reading {
    /// A fresh, valid reading.
    pub fn new(values: Vec<f64>, severity: Severity) -> Self {
        Self {
            values,
            valid: true,
            severity,
        }
    }

    /// A reading for a channel that has never delivered data.
    pub fn missing(elements: usize) -> Self {
        Self {
            values: vec![f64::NAN; elements.max(1)],
            valid: false,
            severity: Severity::Invalid,
        }
    }

    /// First element, used by scalar consumers (triggers, conditions, inhibit).
    pub fn scalar(&self) -> f64 {
        self.values.first().copied().unwrap_or(f64::NAN)
    }
}

/// Identity of a monitored channel: its name and element count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    /// 1 for scalar channels, N for vector channels
    pub elements: usize,
}

impl ChannelSpec {
    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            elements: 1,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.elements == 1
    }
}

/// One channel sample inside a [`Frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameSample {
    /// Bare scalar value with no alarm
    Scalar(f64),
    /// Full sample
    Full {
        values: Vec<f64>,
        #[serde(default)]
        severity: Severity,
        #[serde(default = "default_valid")]
        valid: bool,
    },
}

fn default_valid() -> bool {
    true
}

impl FrameSample {
    /// Convert into a [`Reading`].
    pub fn into_reading(self) -> Reading {
        match self {
            FrameSample::Scalar(v) => Reading::new(vec![v], Severity::NoAlarm),
            FrameSample::Full {
                values,
                severity,
                valid,
            } => Reading {
                values,
                valid,
                severity,
            },
        }
    }
}

/// A batch of channel updates delivered by a producer for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Acquisition time; the receiving source stamps frames that omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Updated channels keyed by name
    pub channels: BTreeMap<String, FrameSample>,
}

impl Frame {
    /// Create an empty frame with the given timestamp.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            channels: BTreeMap::new(),
        }
    }

    /// Add a scalar channel value.
    pub fn with(mut self, channel: &str, value: f64) -> Self {
        self.channels
            .insert(channel.to_string(), FrameSample::Scalar(value));
        self
    }

    /// Add a full channel sample.
    pub fn with_sample(mut self, channel: &str, values: Vec<f64>, severity: Severity) -> Self {
        self.channels.insert(
            channel.to_string(),
            FrameSample::Full {
                values,
                severity,
                valid: true,
            },
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parsing() {
        assert_eq!(Severity::parse("MAJOR"), Some(Severity::Major));
        assert_eq!(Severity::parse(" minor "), Some(Severity::Minor));
        assert_eq!(Severity::parse("no_alarm"), Some(Severity::NoAlarm));
        assert_eq!(Severity::parse("loud"), None);
    }

    #[test]
    fn test_frame_sample_shapes() {
        let json = r#"{"channels":{"a":1.5,"b":{"values":[1.0,2.0],"severity":"major"}}}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        assert!(frame.timestamp.is_none());

        let a = frame.channels["a"].clone().into_reading();
        assert_eq!(a.values, vec![1.5]);
        assert!(a.valid);

        let b = frame.channels["b"].clone().into_reading();
        assert_eq!(b.values, vec![1.0, 2.0]);
        assert_eq!(b.severity, Severity::Major);
    }

    #[test]
    fn test_missing_reading() {
        let r = Reading::missing(3);
        assert!(!r.valid);
        assert_eq!(r.values.len(), 3);
        assert!(r.scalar().is_nan());
    }
}
