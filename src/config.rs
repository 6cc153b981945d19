//! Configuration for the glitch logger.
//!
//! A run is described by one JSON document. Everything structural is
//! checked by [`Config::validate`] before an engine is built; a config that
//! fails validation never starts a run.

use crate::acquisition::{ChannelSpec, Severity};
use crate::core::gate::ConditionMode;
use crate::core::trigger::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Largest ring a dataset may request.
pub const MAX_RING_NODES: usize = 1_000_000;

/// Largest number of values (nodes times channel elements) a ring may hold.
pub const MAX_RING_VALUES: usize = 16_000_000;

/// Main configuration for a logging run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sampling interval
    #[serde(with = "duration_serde", default = "default_interval")]
    pub interval: Duration,

    /// Longest wait for a tick's readings
    #[serde(with = "duration_serde", default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,

    /// Heartbeat period; also the longest uninterrupted sleep
    #[serde(with = "duration_serde", default = "default_ping_interval")]
    pub ping_interval: Duration,

    /// Delay-line depth applied to trigger inputs
    #[serde(default)]
    pub delay: usize,

    /// Stop after this much logical time
    #[serde(
        with = "opt_duration_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_time: Option<Duration>,

    /// Stop after this many samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u64>,

    /// Channel whose non-zero value suppresses ticks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inhibit: Option<String>,

    #[serde(default)]
    pub conditions: ConditionsConfig,

    pub datasets: Vec<DatasetConfig>,

    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,

    /// Page file
    pub output: PathBuf,
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_backoff() -> Duration {
    Duration::from_secs(1)
}

/// Conditions gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionsConfig {
    #[serde(default)]
    pub mode: ConditionMode,
    /// Wait for the longest failing holdoff instead of `backoff`
    #[serde(default)]
    pub holdoff_on_fail: bool,
    #[serde(with = "duration_serde", default = "default_backoff")]
    pub backoff: Duration,
    #[serde(default)]
    pub channels: Vec<ConditionConfig>,
}

impl Default for ConditionsConfig {
    fn default() -> Self {
        Self {
            mode: ConditionMode::All,
            holdoff_on_fail: false,
            backoff: default_backoff(),
            channels: Vec::new(),
        }
    }
}

/// One range-limited condition channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub channel: String,
    pub lower: f64,
    pub upper: f64,
    #[serde(with = "duration_serde", default)]
    pub holdoff: Duration,
}

/// A channel entry: a bare name for scalars or a name with element count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelEntry {
    Name(String),
    Sized { name: String, elements: usize },
}

impl ChannelEntry {
    pub fn spec(&self) -> ChannelSpec {
        match self {
            ChannelEntry::Name(name) => ChannelSpec::scalar(name),
            ChannelEntry::Sized { name, elements } => ChannelSpec {
                name: name.clone(),
                elements: *elements,
            },
        }
    }
}

/// One output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    /// Pre-event samples kept
    pub before: usize,
    /// Post-event samples captured
    pub after: usize,
    pub channels: Vec<ChannelEntry>,
}

/// A trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    Glitch {
        channel: String,
        dataset: String,
        /// Absolute (> 0), fractional (< 0) or disabled (0)
        delta: f64,
        /// Initial baseline; the first reading when omitted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        baseline: Option<f64>,
        #[serde(default = "default_baseline_samples")]
        baseline_samples: u32,
        #[serde(default)]
        auto_reset: bool,
        #[serde(with = "duration_serde", default)]
        holdoff: Duration,
    },
    Level {
        channel: String,
        dataset: String,
        level: f64,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        auto_arm: bool,
        #[serde(with = "duration_serde", default)]
        holdoff: Duration,
    },
    Alarm {
        channel: String,
        dataset: String,
        severities: Vec<Severity>,
        #[serde(with = "duration_serde", default)]
        holdoff: Duration,
    },
}

fn default_baseline_samples() -> u32 {
    10
}

impl TriggerConfig {
    pub fn channel(&self) -> &str {
        match self {
            TriggerConfig::Glitch { channel, .. }
            | TriggerConfig::Level { channel, .. }
            | TriggerConfig::Alarm { channel, .. } => channel,
        }
    }

    pub fn dataset(&self) -> &str {
        match self {
            TriggerConfig::Glitch { dataset, .. }
            | TriggerConfig::Level { dataset, .. }
            | TriggerConfig::Alarm { dataset, .. } => dataset,
        }
    }

    pub fn holdoff(&self) -> Duration {
        match self {
            TriggerConfig::Glitch { holdoff, .. }
            | TriggerConfig::Level { holdoff, .. }
            | TriggerConfig::Alarm { holdoff, .. } => *holdoff,
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        Ok(())
    }

    /// Get the path to the default configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("glitch-logger")
            .join("config.json")
    }

    /// Where run statistics are kept: next to the page file.
    pub fn stats_path(&self) -> PathBuf {
        self.output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .join("stats.json")
    }

    /// A small but complete configuration, used as a template.
    pub fn example() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("glitch-logger");

        Self {
            interval: Duration::from_secs(1),
            acquire_timeout: default_acquire_timeout(),
            ping_interval: default_ping_interval(),
            delay: 0,
            total_time: Some(Duration::from_secs(3600)),
            steps: None,
            inhibit: Some("Logger:inhibit".to_string()),
            conditions: ConditionsConfig {
                mode: ConditionMode::All,
                holdoff_on_fail: true,
                backoff: default_backoff(),
                channels: vec![ConditionConfig {
                    channel: "Beam:current".to_string(),
                    lower: 1.0,
                    upper: 500.0,
                    holdoff: Duration::from_secs(5),
                }],
            },
            datasets: vec![DatasetConfig {
                name: "orbit".to_string(),
                before: 20,
                after: 10,
                channels: vec![
                    ChannelEntry::Name("Beam:current".to_string()),
                    ChannelEntry::Name("Orbit:x".to_string()),
                    ChannelEntry::Sized {
                        name: "Orbit:bpm".to_string(),
                        elements: 8,
                    },
                ],
            }],
            triggers: vec![
                TriggerConfig::Glitch {
                    channel: "Orbit:x".to_string(),
                    dataset: "orbit".to_string(),
                    delta: 0.5,
                    baseline: None,
                    baseline_samples: default_baseline_samples(),
                    auto_reset: false,
                    holdoff: Duration::ZERO,
                },
                TriggerConfig::Level {
                    channel: "Beam:current".to_string(),
                    dataset: "orbit".to_string(),
                    level: 50.0,
                    direction: Direction::Falling,
                    auto_arm: false,
                    holdoff: Duration::from_secs(10),
                },
                TriggerConfig::Alarm {
                    channel: "Orbit:x".to_string(),
                    dataset: "orbit".to_string(),
                    severities: vec![Severity::Major, Severity::Invalid],
                    holdoff: Duration::ZERO,
                },
            ],
            output: data_dir.join("pages.jsonl"),
        }
    }

    /// Every channel the run touches, deduplicated, in first-seen order:
    /// dataset channels, trigger channels, condition channels, inhibit.
    pub fn channel_registry(&self) -> Result<Vec<ChannelSpec>, ConfigError> {
        let mut registry: Vec<ChannelSpec> = Vec::new();
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();

        let mut add = |spec: ChannelSpec| -> Result<(), ConfigError> {
            match seen.get(&spec.name) {
                Some(&i) if registry[i].elements != spec.elements => Err(ConfigError::Invalid(
                    format!(
                        "channel {} declared with {} and {} elements",
                        spec.name, registry[i].elements, spec.elements
                    ),
                )),
                Some(_) => Ok(()),
                None => {
                    seen.insert(spec.name.clone(), registry.len());
                    registry.push(spec);
                    Ok(())
                }
            }
        };

        for dataset in &self.datasets {
            for entry in &dataset.channels {
                add(entry.spec())?;
            }
        }
        for trigger in &self.triggers {
            add(ChannelSpec::scalar(trigger.channel()))?;
        }
        for condition in &self.conditions.channels {
            add(ChannelSpec::scalar(&condition.channel))?;
        }
        if let Some(ref inhibit) = self.inhibit {
            add(ChannelSpec::scalar(inhibit))?;
        }

        Ok(registry)
    }

    /// Structural checks performed before any engine is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.interval.is_zero() {
            return invalid("interval must be positive".to_string());
        }
        if self.datasets.is_empty() {
            return invalid("at least one dataset is required".to_string());
        }

        let mut names = HashSet::new();
        for dataset in &self.datasets {
            if dataset.name.trim().is_empty() {
                return invalid("dataset name must not be empty".to_string());
            }
            if !names.insert(dataset.name.as_str()) {
                return invalid(format!("duplicate dataset {}", dataset.name));
            }
            if dataset.channels.is_empty() {
                return invalid(format!("dataset {} has no channels", dataset.name));
            }
            let nodes = dataset
                .before
                .checked_add(dataset.after)
                .and_then(|n| n.checked_add(1));
            if nodes.map_or(true, |n| n > MAX_RING_NODES) {
                return invalid(format!(
                    "dataset {} ring exceeds {} nodes",
                    dataset.name, MAX_RING_NODES
                ));
            }
            let mut width: usize = 0;
            for entry in &dataset.channels {
                let spec = entry.spec();
                if spec.name.trim().is_empty() || spec.elements == 0 {
                    return invalid(format!(
                        "dataset {} has an empty or zero-width channel",
                        dataset.name
                    ));
                }
                width = width.saturating_add(spec.elements);
            }
            let values = nodes.and_then(|n| n.checked_mul(width));
            if values.map_or(true, |v| v > MAX_RING_VALUES) {
                return invalid(format!(
                    "dataset {} ring exceeds {} stored values",
                    dataset.name, MAX_RING_VALUES
                ));
            }
        }

        // Catches element-count conflicts, including vector trigger channels.
        self.channel_registry()?;

        for trigger in &self.triggers {
            if !names.contains(trigger.dataset()) {
                return invalid(format!(
                    "trigger on {} references unknown dataset {}",
                    trigger.channel(),
                    trigger.dataset()
                ));
            }
            match trigger {
                TriggerConfig::Glitch {
                    delta, baseline, ..
                } => {
                    if !delta.is_finite() || baseline.map_or(false, |b| !b.is_finite()) {
                        return invalid(format!(
                            "glitch trigger on {} has a non-finite parameter",
                            trigger.channel()
                        ));
                    }
                }
                TriggerConfig::Level { level, .. } => {
                    if !level.is_finite() {
                        return invalid(format!(
                            "level trigger on {} has a non-finite level",
                            trigger.channel()
                        ));
                    }
                }
                TriggerConfig::Alarm { severities, .. } => {
                    if severities.is_empty() {
                        return invalid(format!(
                            "alarm trigger on {} has no target severities",
                            trigger.channel()
                        ));
                    }
                }
            }
        }

        for condition in &self.conditions.channels {
            if !condition.lower.is_finite() || !condition.upper.is_finite() {
                return invalid(format!(
                    "condition on {} has a non-finite limit",
                    condition.channel
                ));
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Serde support for optional durations.
mod opt_duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        serde_json::from_str(
            r#"{
                "interval": 0.5,
                "datasets": [{"name": "main", "before": 3, "after": 2, "channels": ["x"]}],
                "triggers": [{"kind": "glitch", "channel": "x", "dataset": "main", "delta": 1.0}],
                "output": "pages.jsonl"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_fill_in() {
        let config = minimal();
        assert_eq!(config.interval, Duration::from_millis(500));
        assert_eq!(config.ping_interval, Duration::from_secs(2));
        assert_eq!(config.conditions.mode, ConditionMode::All);
        assert!(config.total_time.is_none());
        match &config.triggers[0] {
            TriggerConfig::Glitch {
                baseline_samples,
                auto_reset,
                ..
            } => {
                assert_eq!(*baseline_samples, 10);
                assert!(!auto_reset);
            }
            other => panic!("unexpected trigger {other:?}"),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_is_valid_and_round_trips() {
        let example = Config::example();
        example.validate().unwrap();
        let json = serde_json::to_string_pretty(&example).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, example);
    }

    #[test]
    fn test_registry_deduplicates() {
        let registry = Config::example().channel_registry().unwrap();
        let names: Vec<&str> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Beam:current", "Orbit:x", "Orbit:bpm", "Logger:inhibit"]
        );
        assert_eq!(registry[2].elements, 8);
    }

    #[test]
    fn test_rejects_unknown_dataset() {
        let mut config = minimal();
        config.triggers.push(TriggerConfig::Level {
            channel: "x".to_string(),
            dataset: "nope".to_string(),
            level: 1.0,
            direction: Direction::Rising,
            auto_arm: false,
            holdoff: Duration::ZERO,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_vector_trigger_channel() {
        let mut config = minimal();
        config.datasets[0].channels = vec![ChannelEntry::Sized {
            name: "x".to_string(),
            elements: 4,
        }];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("elements"));
    }

    #[test]
    fn test_rejects_structural_errors() {
        let mut config = minimal();
        config.datasets.push(config.datasets[0].clone());
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.datasets[0].channels.clear();
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.datasets.clear();
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.triggers = vec![TriggerConfig::Alarm {
            channel: "x".to_string(),
            dataset: "main".to_string(),
            severities: vec![],
            holdoff: Duration::ZERO,
        }];
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.datasets[0].before = MAX_RING_NODES;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.datasets[0].channels.push(ChannelEntry::Sized {
            name: "wide".to_string(),
            elements: usize::MAX,
        });
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("stored values"));
    }

    #[test]
    fn test_negative_duration_is_a_parse_error() {
        let json = r#"{"interval": -1, "datasets": [], "output": "x"}"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn test_stats_path_next_to_output() {
        let mut config = minimal();
        config.output = PathBuf::from("/var/log/glitch/pages.jsonl");
        assert_eq!(config.stats_path(), PathBuf::from("/var/log/glitch/stats.json"));
    }
}
