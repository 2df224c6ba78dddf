//! Real-time media pacing
//!
//! A pacer pulls decoded units from a [`MediaSource`] and hands them to a
//! [`MediaSink`] at the rate their durations dictate. Emission is scheduled
//! against an absolute timeline anchored at the moment the connectivity gate
//! opened, so scheduler jitter on one unit does not accumulate into drift.

use crate::gate::{GateSignal, GateWaiter};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

/// One decoded frame or page, ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUnit {
    /// Encoded payload
    pub payload: Bytes,
    /// Presentation duration
    pub duration: Duration,
}

impl MediaUnit {
    /// Create a unit
    pub fn new(payload: impl Into<Bytes>, duration: Duration) -> Self {
        Self {
            payload: payload.into(),
            duration,
        }
    }
}

/// Fixed container timebase (seconds per unit = numerator / denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    /// Timebase numerator
    pub numerator: u32,
    /// Timebase denominator
    pub denominator: u32,
}

impl Timebase {
    /// Create a timebase; the denominator must be non-zero
    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if denominator == 0 {
            return Err(Error::InvalidConfig(
                "Timebase denominator must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Wall-clock interval of one unit
    pub fn unit_interval(&self) -> Duration {
        let nanos = u128::from(self.numerator) * 1_000_000_000 / u128::from(self.denominator);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Converts a native sample clock (e.g. Ogg granule positions) into durations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingClock {
    last_sample_clock: u64,
    units_per_second: u32,
}

impl PacingClock {
    /// Create a clock running at `units_per_second`
    pub fn new(units_per_second: u32) -> Result<Self> {
        if units_per_second == 0 {
            return Err(Error::InvalidConfig(
                "Clock rate must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            last_sample_clock: 0,
            units_per_second,
        })
    }

    /// Duration covered since the previous sample clock value
    ///
    /// A clock that goes backwards yields a zero duration.
    pub fn advance(&mut self, sample_clock: u64) -> Duration {
        let delta = sample_clock.saturating_sub(self.last_sample_clock);
        self.last_sample_clock = sample_clock;

        let nanos = u128::from(delta) * 1_000_000_000 / u128::from(self.units_per_second);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Restart from sample clock zero (after a source rewind)
    pub fn reset(&mut self) {
        self.last_sample_clock = 0;
    }

    /// Clock rate
    pub fn units_per_second(&self) -> u32 {
        self.units_per_second
    }
}

/// What happens when the source runs dry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PacingPolicy {
    /// Stop at end of input
    #[default]
    Finite,
    /// Rewind the source and keep going
    LoopForever,
}

/// Lazy sequence of media units
#[async_trait]
pub trait MediaSource: Send {
    /// Next unit, or `None` at end of input
    async fn next_unit(&mut self) -> Result<Option<MediaUnit>>;

    /// Rewind to the first unit
    async fn reset(&mut self) -> Result<()> {
        Err(Error::MediaSource(
            "Source does not support rewinding".to_string(),
        ))
    }
}

/// Destination for paced units
#[async_trait]
pub trait MediaSink: Send {
    /// Transmit one unit
    async fn write(&mut self, unit: &MediaUnit) -> Result<()>;
}

/// Why a pacer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaceOutcome {
    /// The source ran out under `Finite`
    Exhausted,
    /// The deadline passed
    DeadlineReached,
    /// The session shut down
    Stopped,
}

/// Summary of one pacer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaceReport {
    /// Track label
    pub label: String,
    /// Why it stopped
    pub outcome: PaceOutcome,
    /// Units handed to the sink
    pub units_sent: u64,
    /// Source rewinds under `LoopForever`
    pub loops: u64,
    /// Time from gate open to stop
    pub elapsed: Duration,
}

/// Paces one track
#[derive(Debug, Clone)]
pub struct Pacer {
    label: String,
    policy: PacingPolicy,
    deadline: Option<Duration>,
}

impl Pacer {
    /// Create a finite pacer without deadline
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            policy: PacingPolicy::Finite,
            deadline: None,
        }
    }

    /// Set the end-of-input policy
    pub fn with_policy(mut self, policy: PacingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the deadline measured from gate open
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Track label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run until exhaustion, deadline or shutdown
    ///
    /// Source and sink errors end this pacer only and are returned as-is.
    pub async fn run<S, K>(
        &self,
        source: &mut S,
        mut gate: GateWaiter,
        sink: &mut K,
    ) -> Result<PaceReport>
    where
        S: MediaSource + ?Sized,
        K: MediaSink + ?Sized,
    {
        debug!(track = %self.label, "Pacer waiting for connectivity");

        if gate.wait_open().await == GateSignal::Shutdown {
            debug!(track = %self.label, "Pacer stopped before connectivity");
            return Ok(self.report(PaceOutcome::Stopped, 0, 0, Duration::ZERO));
        }

        let started = Instant::now();
        let deadline_at = self.deadline.map(|d| started + d);
        let mut next_at = started;
        let mut units_sent = 0u64;
        let mut loops = 0u64;
        let mut since_rewind = 0u64;

        info!(track = %self.label, policy = ?self.policy, "Pacer started");

        loop {
            let next = tokio::select! {
                biased;
                _ = gate.wait_shutdown() => {
                    debug!(track = %self.label, units_sent, "Pacer stopped while reading");
                    return Ok(self.report(PaceOutcome::Stopped, units_sent, loops, started.elapsed()));
                }
                next = source.next_unit() => next,
            };

            let unit = match next {
                Ok(Some(unit)) => unit,
                Ok(None) => match self.policy {
                    PacingPolicy::Finite => {
                        info!(track = %self.label, units_sent, "Media source exhausted");
                        return Ok(self.report(
                            PaceOutcome::Exhausted,
                            units_sent,
                            loops,
                            started.elapsed(),
                        ));
                    }
                    PacingPolicy::LoopForever => {
                        if since_rewind == 0 {
                            return Err(self.fail(Error::MediaSource(
                                "Source produced no units, cannot loop".to_string(),
                            )));
                        }
                        source.reset().await.map_err(|e| self.fail(e))?;
                        loops += 1;
                        since_rewind = 0;
                        debug!(track = %self.label, loops, "Media source rewound");
                        continue;
                    }
                },
                Err(e) => return Err(self.fail(e)),
            };
            since_rewind += 1;
            next_at += unit.duration;

            if let Some(deadline) = deadline_at {
                if next_at > deadline {
                    tokio::select! {
                        biased;
                        _ = gate.wait_shutdown() => {
                            return Ok(self.report(PaceOutcome::Stopped, units_sent, loops, started.elapsed()));
                        }
                        _ = sleep_until(deadline) => {}
                    }
                    info!(track = %self.label, units_sent, "Pacing deadline reached");
                    return Ok(self.report(
                        PaceOutcome::DeadlineReached,
                        units_sent,
                        loops,
                        started.elapsed(),
                    ));
                }
            }

            tokio::select! {
                biased;
                _ = gate.wait_shutdown() => {
                    debug!(track = %self.label, units_sent, "Pacer stopped by shutdown");
                    return Ok(self.report(PaceOutcome::Stopped, units_sent, loops, started.elapsed()));
                }
                _ = sleep_until(next_at) => {}
            }

            let written = tokio::select! {
                biased;
                _ = gate.wait_shutdown() => {
                    debug!(track = %self.label, units_sent, "Pacer stopped while writing");
                    return Ok(self.report(PaceOutcome::Stopped, units_sent, loops, started.elapsed()));
                }
                written = sink.write(&unit) => written,
            };
            written.map_err(|e| self.fail(e))?;
            units_sent += 1;
        }
    }

    /// Run on a new tokio task
    pub fn spawn(
        self,
        mut source: Box<dyn MediaSource>,
        gate: GateWaiter,
        mut sink: Box<dyn MediaSink>,
    ) -> JoinHandle<Result<PaceReport>> {
        tokio::spawn(async move { self.run(source.as_mut(), gate, sink.as_mut()).await })
    }

    fn fail(&self, err: Error) -> Error {
        error!(track = %self.label, "Pacer failed: {}", err);
        err
    }

    fn report(&self, outcome: PaceOutcome, units_sent: u64, loops: u64, elapsed: Duration) -> PaceReport {
        PaceReport {
            label: self.label.clone(),
            outcome,
            units_sent,
            loops,
            elapsed,
        }
    }
}
