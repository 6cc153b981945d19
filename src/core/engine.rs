//! Tick-driven capture engine.
//!
//! [`EngineState`] holds everything built from the configuration: the
//! channel registry with last-known readings, the datasets, the trigger
//! sources, both gates and the per-channel delay lines. [`Engine`] owns that
//! state together with the reading source and the page sink, and advances
//! it one logical tick per [`Engine::run_tick`] call.
//!
//! A tick runs in a fixed order:
//!
//! 1. shutdown check (flush, then stop)
//! 2. next tick from the source; holdoffs that have expired re-arm
//! 3. inhibit gate; an inhibited tick stores nothing
//! 4. conditions gate; a failure stores an empty slot and closes open
//!    captures early
//! 5. readings stored into every dataset's ring
//! 6. delay lines, then trigger evaluation
//! 7. capture bookkeeping, then pages handed to the sink
//! 8. quitting-time check

use crate::acquisition::{AcquisitionError, ChannelSpec, Reading, ReadingSource};
use crate::config::{ChannelEntry, Config, ConfigError, TriggerConfig};
use crate::core::capture::{CaptureState, Dataset, DatasetStatus};
use crate::core::delay::DelayLine;
use crate::core::gate::{Condition, ConditionsGate, GateVerdict, InhibitGate};
use crate::core::page::{FlushReason, Timestamps};
use crate::core::timer::{CancellableTimer, Heartbeat, ShutdownHandle, WaitOutcome};
use crate::core::trigger::{AlarmState, GlitchState, LevelState, TriggerSource, TriggerVariant};
use crate::stats::SharedRunStats;
use crate::storage::WindowSink;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that stop the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Readings were stored; `fired` triggers fired
    Sampled { step: u64, fired: usize },
    /// The inhibit channel suppressed the tick
    Inhibited,
    /// The conditions gate was closed; wait before the next tick
    ConditionsFailed { wait: Duration },
    /// Quitting time reached or the source ended; captures were flushed
    Finished,
    /// Shutdown requested; captures were flushed
    Stopped,
}

impl TickOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TickOutcome::Finished | TickOutcome::Stopped)
    }
}

/// Engine-owned state, built once from a validated configuration.
#[derive(Debug, Clone)]
pub struct EngineState {
    channels: Vec<ChannelSpec>,
    /// Last acquired reading per registry channel
    latest: Vec<Reading>,
    datasets: Vec<Dataset>,
    triggers: Vec<TriggerSource>,
    gate: ConditionsGate,
    gate_channels: Vec<ChannelSpec>,
    inhibit: Option<InhibitGate>,
    /// Delay lines for channels that feed a trigger
    delays: Vec<Option<DelayLine>>,
    step: u64,
    started_at: Option<DateTime<Utc>>,
    last_time: Option<DateTime<Utc>>,
}

fn registry_index(channels: &[ChannelSpec], name: &str) -> Result<usize, EngineError> {
    channels
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| EngineError::Invariant(format!("channel {} missing from registry", name)))
}

impl EngineState {
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        config.validate()?;
        let channels = config.channel_registry()?;

        let mut datasets = Vec::with_capacity(config.datasets.len());
        for dc in &config.datasets {
            let specs: Vec<ChannelSpec> = dc.channels.iter().map(ChannelEntry::spec).collect();
            let indices = specs
                .iter()
                .map(|s| registry_index(&channels, &s.name))
                .collect::<Result<Vec<_>, _>>()?;
            datasets.push(Dataset::new(&dc.name, indices, &specs, dc.before, dc.after));
        }

        let mut triggers = Vec::with_capacity(config.triggers.len());
        for tc in &config.triggers {
            let channel = registry_index(&channels, tc.channel())?;
            let dataset = config
                .datasets
                .iter()
                .position(|d| d.name == tc.dataset())
                .ok_or_else(|| EngineError::Invariant(format!("unknown dataset {}", tc.dataset())))?;
            let variant = match tc {
                TriggerConfig::Glitch {
                    delta,
                    baseline,
                    baseline_samples,
                    auto_reset,
                    ..
                } => TriggerVariant::Glitch(GlitchState {
                    baseline: *baseline,
                    delta: *delta,
                    baseline_samples: *baseline_samples,
                    auto_reset: *auto_reset,
                }),
                TriggerConfig::Level {
                    level,
                    direction,
                    auto_arm,
                    ..
                } => TriggerVariant::Level(LevelState {
                    level: *level,
                    direction: *direction,
                    previous: None,
                    auto_arm: *auto_arm,
                }),
                TriggerConfig::Alarm { severities, .. } => TriggerVariant::Alarm(AlarmState {
                    targets: severities.clone(),
                    previous: None,
                }),
            };
            triggers.push(TriggerSource::new(
                channel,
                tc.channel(),
                dataset,
                variant,
                tc.holdoff(),
            ));
        }

        let conditions = &config.conditions;
        let gate = ConditionsGate::new(
            conditions
                .channels
                .iter()
                .map(|c| Condition {
                    channel: ChannelSpec::scalar(&c.channel),
                    lower: c.lower,
                    upper: c.upper,
                    holdoff: c.holdoff,
                })
                .collect(),
            conditions.mode,
            conditions.holdoff_on_fail,
            conditions.backoff,
        );
        let gate_channels = gate.channels();

        let delays = (0..channels.len())
            .map(|i| {
                triggers
                    .iter()
                    .any(|t| t.channel == i)
                    .then(|| DelayLine::new(config.delay))
            })
            .collect();

        Ok(Self {
            latest: channels.iter().map(|c| Reading::missing(c.elements)).collect(),
            channels,
            datasets,
            triggers,
            gate,
            gate_channels,
            inhibit: config
                .inhibit
                .as_deref()
                .map(|name| InhibitGate::new(ChannelSpec::scalar(name))),
            delays,
            step: 0,
            started_at: None,
            last_time: None,
        })
    }

    /// Steps taken so far (inhibited ticks excluded).
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    pub fn latest(&self) -> &[Reading] {
        &self.latest
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn triggers(&self) -> &[TriggerSource] {
        &self.triggers
    }

    fn any_capturing(&self) -> bool {
        self.datasets
            .iter()
            .any(|d| d.state() == CaptureState::Capturing)
    }
}

/// The capture engine: state plus its two collaborators.
pub struct Engine<S, W> {
    state: EngineState,
    source: S,
    sink: W,
    stats: SharedRunStats,
    shutdown: ShutdownHandle,
    interval: Duration,
    acquire_timeout: Duration,
    ping_interval: Duration,
    total_time: Option<Duration>,
    steps: Option<u64>,
    /// Wait out the sampling interval between ticks
    paced: bool,
    finished: Option<TickOutcome>,
}

impl<S: ReadingSource, W: WindowSink> Engine<S, W> {
    /// Build an engine from a configuration. Fails if the configuration is
    /// invalid; nothing is sampled in that case.
    pub fn new(config: &Config, source: S, sink: W, stats: SharedRunStats) -> Result<Self, EngineError> {
        let state = EngineState::from_config(config)?;
        tracing::info!(
            "Engine ready: {} channels, {} datasets, {} triggers",
            state.channels.len(),
            state.datasets.len(),
            state.triggers.len()
        );
        Ok(Self {
            state,
            source,
            sink,
            stats,
            shutdown: ShutdownHandle::new(),
            interval: config.interval,
            acquire_timeout: config.acquire_timeout,
            ping_interval: config.ping_interval,
            total_time: config.total_time,
            steps: config.steps,
            paced: true,
            finished: None,
        })
    }

    /// Run ticks back to back instead of on the sampling cadence.
    pub fn set_paced(&mut self, paced: bool) {
        self.paced = paced;
    }

    /// Handle for requesting a graceful stop from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn stats(&self) -> &SharedRunStats {
        &self.stats
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }

    pub fn statuses(&self) -> Vec<DatasetStatus> {
        self.state.datasets.iter().map(Dataset::status).collect()
    }

    pub fn dataset_status(&self, index: usize) -> Option<DatasetStatus> {
        self.state.datasets.get(index).map(Dataset::status)
    }

    /// Pages assembled but not yet accepted by the sink.
    pub fn unpersisted_pages(&self) -> usize {
        self.state
            .datasets
            .iter()
            .filter(|d| d.pending_page().is_some())
            .count()
    }

    /// Advance the engine by one tick.
    pub fn run_tick(&mut self) -> Result<TickOutcome, EngineError> {
        if let Some(outcome) = self.finished {
            return Ok(outcome);
        }

        if self.shutdown.is_requested() {
            let now = self.state.last_time.unwrap_or_else(Utc::now);
            tracing::info!("Shutdown requested, flushing open captures");
            return Ok(self.finish(FlushReason::Shutdown, now, TickOutcome::Stopped));
        }

        let now = match self.source.begin_tick(self.acquire_timeout) {
            Ok(t) => t,
            Err(AcquisitionError::Timeout(timeout)) => {
                tracing::debug!("No fresh readings within {:?}", timeout);
                self.stalled_tick_time()
            }
            Err(AcquisitionError::Exhausted) => {
                let now = self.state.last_time.unwrap_or_else(Utc::now);
                tracing::info!("Reading source exhausted after step {}", self.state.step);
                return Ok(self.finish(FlushReason::QuitTime, now, TickOutcome::Finished));
            }
            Err(e) => return Err(e.into()),
        };

        self.stats.record_tick();
        self.state.started_at.get_or_insert(now);
        self.state.last_time = Some(now);
        for trigger in &mut self.state.triggers {
            trigger.release_holdoff(now);
        }

        if self.inhibited() {
            self.stats.record_inhibited();
            tracing::debug!("Tick inhibited");
            // Captures already open still answer to the conditions gate.
            let mut outcome = TickOutcome::Inhibited;
            if self.state.any_capturing() {
                if let GateVerdict::Closed { wait } = self.check_conditions() {
                    self.stats.record_conditions_failure();
                    self.close_captures(FlushReason::ConditionsFailed);
                    outcome = TickOutcome::ConditionsFailed { wait };
                }
            }
            self.persist_flushing(now);
            return Ok(self.check_quit(now).unwrap_or(outcome));
        }

        self.state.step += 1;
        let step = self.state.step;
        let time = Timestamps::from_datetime(now);

        if let GateVerdict::Closed { wait } = self.check_conditions() {
            self.stats.record_conditions_failure();
            for dataset in &mut self.state.datasets {
                dataset.record(step, time, None);
            }
            self.close_captures(FlushReason::ConditionsFailed);
            self.persist_flushing(now);
            return Ok(self
                .check_quit(now)
                .unwrap_or(TickOutcome::ConditionsFailed { wait }));
        }

        let readings = self.source.acquire(&self.state.channels);
        if readings.len() != self.state.channels.len() {
            return Err(EngineError::Invariant(format!(
                "source returned {} readings for {} channels",
                readings.len(),
                self.state.channels.len()
            )));
        }
        let stale = readings.iter().filter(|r| !r.valid).count();
        if stale > 0 {
            self.stats.record_acquisition_errors(stale as u64);
        }
        self.state.latest = readings;

        let state = &mut self.state;
        for dataset in &mut state.datasets {
            dataset.record(step, time, Some(state.latest.as_slice()));
        }

        // One delay-line push per channel, shared by all its triggers.
        let values: Vec<f64> = state
            .latest
            .iter()
            .zip(&mut state.delays)
            .map(|(reading, delay)| match delay {
                Some(line) if reading.valid => line.push(reading.scalar()),
                _ => reading.scalar(),
            })
            .collect();

        let mut fired = 0;
        for (index, trigger) in state.triggers.iter_mut().enumerate() {
            let reading = &state.latest[trigger.channel];
            if let Some(record) = trigger.evaluate(index, reading, values[trigger.channel], step) {
                fired += 1;
                self.stats.record_trigger();
                if state.datasets[trigger.dataset].on_trigger(record) {
                    self.stats.record_capture_opened();
                }
            }
        }

        for dataset in &mut state.datasets {
            dataset.end_tick();
        }
        self.persist_flushing(now);

        Ok(self
            .check_quit(now)
            .unwrap_or(TickOutcome::Sampled { step, fired }))
    }

    /// Drive ticks on the sampling cadence until the run ends.
    ///
    /// Sleeps are chunked by the ping interval and serviced by `heartbeat`;
    /// an abort or timeout from it is treated as a shutdown request.
    pub fn run(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<TickOutcome, EngineError> {
        let mut next = Instant::now();
        loop {
            let outcome = self.run_tick()?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
            if !self.paced {
                continue;
            }

            let now = Instant::now();
            next = match outcome {
                TickOutcome::ConditionsFailed { wait } => now + wait,
                _ => (next + self.interval).max(now),
            };

            let timer = CancellableTimer::until(next, self.ping_interval);
            if let WaitOutcome::Aborted(status) = timer.wait(&self.shutdown, heartbeat) {
                tracing::warn!("Heartbeat returned {:?}, stopping", status);
                self.shutdown.request();
            }
        }
    }

    /// Timestamp for a tick that got no fresh frame: one interval after the
    /// previous tick, so logical time stays on the source's clock.
    fn stalled_tick_time(&self) -> DateTime<Utc> {
        self.state
            .last_time
            .and_then(|last| {
                chrono::Duration::from_std(self.interval)
                    .ok()
                    .and_then(|d| last.checked_add_signed(d))
            })
            .unwrap_or_else(Utc::now)
    }

    fn inhibited(&mut self) -> bool {
        let Some(gate) = &self.state.inhibit else {
            return false;
        };
        self.source
            .acquire(std::slice::from_ref(&gate.channel))
            .first()
            .map_or(false, |r| gate.is_inhibited(r))
    }

    fn check_conditions(&mut self) -> GateVerdict {
        if self.state.gate.is_empty() {
            return GateVerdict::Open;
        }
        let readings = self.source.acquire(&self.state.gate_channels);
        self.state.gate.evaluate(&readings)
    }

    fn close_captures(&mut self, reason: FlushReason) {
        for dataset in &mut self.state.datasets {
            if dataset.force_flush(reason) {
                tracing::info!("Capture on {} closed early: {:?}", dataset.name, reason);
            }
        }
    }

    /// Hand every assembled page to the sink. Accepted pages re-arm the
    /// dataset's triggers; rejected ones stay queued for the next tick.
    fn persist_flushing(&mut self, now: DateTime<Utc>) {
        for index in 0..self.state.datasets.len() {
            let Some(page) = self.state.datasets[index].pending_page() else {
                continue;
            };
            let result = self.sink.persist(page).map(|()| page.rows.len());

            match result {
                Ok(rows) => {
                    if let Some(page) = self.state.datasets[index].finish_flush() {
                        tracing::info!(
                            "Wrote {} page: {} rows around step {} ({:?})",
                            page.dataset,
                            rows,
                            page.anchor_step,
                            page.reason
                        );
                    }
                    for trigger in &mut self.state.triggers {
                        if trigger.dataset == index {
                            trigger.on_flush(now);
                        }
                    }
                    self.stats.record_page(rows as u64);
                }
                Err(e) => {
                    self.stats.record_persist_failure();
                    tracing::warn!(
                        "Failed to persist {} page, will retry: {}",
                        self.state.datasets[index].name,
                        e
                    );
                }
            }
        }
    }

    fn check_quit(&mut self, now: DateTime<Utc>) -> Option<TickOutcome> {
        let steps_done = self.steps.map_or(false, |limit| self.state.step >= limit);
        let time_done = match (self.total_time, self.state.started_at) {
            (Some(total), Some(start)) => (now - start).to_std().map_or(false, |e| e >= total),
            _ => false,
        };
        if !(steps_done || time_done) {
            return None;
        }
        tracing::info!("Quitting time reached at step {}", self.state.step);
        Some(self.finish(FlushReason::QuitTime, now, TickOutcome::Finished))
    }

    fn finish(&mut self, reason: FlushReason, now: DateTime<Utc>, outcome: TickOutcome) -> TickOutcome {
        self.close_captures(reason);
        self.persist_flushing(now);
        let left = self.unpersisted_pages();
        if left > 0 {
            tracing::error!("{} captured pages could not be written", left);
        }
        self.finished = Some(outcome);
        outcome
    }
}
