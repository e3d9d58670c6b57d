//! Health monitor — the poll loop that turns attempts into one terminal result.
//!
//! Each attempt runs as its own task and reports through a oneshot
//! channel. The monitor races that channel against the startup deadline
//! and, between attempts, waits out the interval against the deadline and
//! the shutdown signal. Only one attempt is in flight at a time.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::checker::Check;
use crate::error::{ProbeError, ProbeOutcome};

/// Polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One attempt, then exit.
    Once,
    /// Retry every `interval` until an attempt passes or `timeout` elapses.
    Startup {
        interval: Duration,
        timeout: Option<Duration>,
    },
    /// Retry every `interval` until an attempt fails.
    Liveness { interval: Duration },
    /// Same policy as liveness; signals the instance can still take traffic.
    Readiness { interval: Duration },
}

impl Mode {
    /// Pick a mode from the configured intervals.
    ///
    /// A zero duration disables the corresponding setting. Startup takes
    /// precedence over liveness, which takes precedence over readiness.
    pub fn from_intervals(
        startup_interval: Duration,
        startup_timeout: Duration,
        liveness_interval: Duration,
        readiness_interval: Duration,
    ) -> Self {
        let enabled = [startup_interval, liveness_interval, readiness_interval]
            .iter()
            .filter(|d| !d.is_zero())
            .count();
        if enabled > 1 {
            warn!(
                ?startup_interval,
                ?liveness_interval,
                ?readiness_interval,
                "multiple intervals configured, using the highest-precedence mode"
            );
        }

        if !startup_interval.is_zero() {
            Mode::Startup {
                interval: startup_interval,
                timeout: (!startup_timeout.is_zero()).then_some(startup_timeout),
            }
        } else if !liveness_interval.is_zero() {
            Mode::Liveness {
                interval: liveness_interval,
            }
        } else if !readiness_interval.is_zero() {
            Mode::Readiness {
                interval: readiness_interval,
            }
        } else {
            Mode::Once
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Once => "once",
            Mode::Startup { .. } => "startup",
            Mode::Liveness { .. } => "liveness",
            Mode::Readiness { .. } => "readiness",
        }
    }
}

/// The single final decision of a monitor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalResult {
    pub exit_code: u8,
    pub message: String,
}

impl TerminalResult {
    pub fn passed() -> Self {
        Self {
            exit_code: 0,
            message: "healthcheck passed".to_string(),
        }
    }

    pub fn failed(err: &ProbeError) -> Self {
        Self {
            exit_code: err.exit_code(),
            message: format!("healthcheck failed: {err}"),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<ProbeOutcome> for TerminalResult {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            Ok(()) => TerminalResult::passed(),
            Err(e) => TerminalResult::failed(&e),
        }
    }
}

/// Which side of a [`race`] finished.
#[derive(Debug, PartialEq, Eq)]
pub enum Raced<T> {
    Completed(T),
    Expired,
}

/// Wait for either an attempt result or a deadline.
///
/// The attempt is polled first, so a result that is ready in the same
/// step as the deadline is kept.
pub async fn race<A, D>(attempt: A, deadline: D) -> Raced<A::Output>
where
    A: Future,
    D: Future<Output = ()>,
{
    tokio::select! {
        biased;
        value = attempt => Raced::Completed(value),
        _ = deadline => Raced::Expired,
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopOn {
    Success,
    Failure,
}

/// Drives a [`Check`] according to a [`Mode`].
pub struct Monitor<C> {
    check: C,
    mode: Mode,
}

impl<C: Check> Monitor<C> {
    pub fn new(check: C, mode: Mode) -> Self {
        Self { check, mode }
    }

    /// Run until the mode's stop condition, deadline, or shutdown.
    ///
    /// `shutdown` is only observed between attempts; an in-flight probe is
    /// never interrupted.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> TerminalResult {
        debug!(mode = self.mode.name(), "health monitor starting");

        match self.mode {
            Mode::Once => self.run_once().await,
            Mode::Startup { interval, timeout } => {
                self.poll(interval, timeout, StopOn::Success, shutdown).await
            }
            Mode::Liveness { interval } | Mode::Readiness { interval } => {
                self.poll(interval, None, StopOn::Failure, shutdown).await
            }
        }
    }

    async fn run_once(&self) -> TerminalResult {
        let outcome = match self.spawn_attempt().await {
            Ok(outcome) => outcome,
            Err(_) => Err(lost_attempt()),
        };
        outcome.into()
    }

    async fn poll(
        &self,
        interval: Duration,
        timeout: Option<Duration>,
        stop_on: StopOn,
        mut shutdown: watch::Receiver<bool>,
    ) -> TerminalResult {
        let started = Instant::now();
        // A timeout too large to represent as an instant never expires.
        let expiry = deadline_elapsed(timeout.and_then(|t| started.checked_add(t)));
        tokio::pin!(expiry);

        let mut last_failure: Option<ProbeError> = None;
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;

            let outcome = match race(self.spawn_attempt(), &mut expiry).await {
                Raced::Completed(Ok(outcome)) => outcome,
                Raced::Completed(Err(_)) => Err(lost_attempt()),
                Raced::Expired => return self.expired(last_failure, started.elapsed()),
            };

            match (stop_on, outcome) {
                (StopOn::Success, Ok(())) => {
                    info!(mode = self.mode.name(), attempt, "health check passed");
                    return TerminalResult::passed();
                }
                (StopOn::Failure, Err(e)) => {
                    info!(mode = self.mode.name(), attempt, error = %e, "health check failed");
                    return TerminalResult::failed(&e);
                }
                (StopOn::Success, Err(e)) => {
                    debug!(attempt, code = e.exit_code(), error = %e, "attempt failed, retrying");
                    last_failure = Some(e);
                }
                (StopOn::Failure, Ok(())) => {
                    debug!(attempt, "attempt passed");
                }
            }

            tokio::select! {
                biased;
                _ = &mut expiry => return self.expired(last_failure, started.elapsed()),
                Ok(()) = shutdown.changed() => return self.interrupted(last_failure, stop_on),
                _ = sleep(interval) => {}
            }
        }
    }

    /// Spawn one attempt; its result arrives on the returned channel.
    fn spawn_attempt(&self) -> oneshot::Receiver<ProbeOutcome> {
        let (tx, rx) = oneshot::channel();
        let attempt = self.check.attempt();
        tokio::spawn(async move {
            // The monitor may have stopped waiting after a deadline.
            let _ = tx.send(attempt.await);
        });
        rx
    }

    fn expired(&self, last_failure: Option<ProbeError>, waited: Duration) -> TerminalResult {
        let err = last_failure.unwrap_or_else(|| self.check.deadline_error(waited));
        info!(waited_ms = waited.as_millis(), error = %err, "startup deadline elapsed");
        TerminalResult::failed(&err)
    }

    fn interrupted(&self, last_failure: Option<ProbeError>, stop_on: StopOn) -> TerminalResult {
        info!(mode = self.mode.name(), "shutdown signal received");
        match (last_failure, stop_on) {
            (Some(err), _) => TerminalResult::failed(&err),
            (None, StopOn::Failure) => TerminalResult::passed(),
            (None, StopOn::Success) => TerminalResult::failed(&ProbeError::Unknown(
                "interrupted before the health check passed".to_string(),
            )),
        }
    }
}

fn lost_attempt() -> ProbeError {
    ProbeError::Unknown("probe attempt ended without reporting a result".to_string())
}
