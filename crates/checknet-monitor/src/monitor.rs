//! Scheduler loop — probe, classify, dispatch, sleep.
//!
//! Errors from the probe or the notifier are contained to the cycle that
//! raised them: they are logged with the current counters and the loop
//! moves on. Nothing inside a cycle can stop the monitor.

use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::classifier::{FailureCategory, Thresholds};
use crate::error::ProbeError;
use crate::machine::{AlertMachine, Dispatch, Observation};
use crate::notifier::Notifier;
use crate::probe::{ProbeResult, Prober};

/// How long [`NetMonitor::run`] keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Run a single cycle and return.
    #[default]
    Once,
    /// Run forever until shutdown is signalled.
    Daemon,
}

/// Outcome of one probe → classify → dispatch cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Local>,
    pub probe: Option<ProbeSummary>,
    pub category: Option<FailureCategory>,
    pub crossed: Option<FailureCategory>,
    pub dispatch: Option<Dispatch>,
    pub errors: Vec<String>,
}

/// Probe result as it appears in a [`CycleReport`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProbeSummary {
    pub reachable: bool,
    pub packets_lost: u32,
    pub avg_latency_ms: f64,
}

impl From<ProbeResult> for ProbeSummary {
    fn from(r: ProbeResult) -> Self {
        Self {
            reachable: r.reachable,
            packets_lost: r.packets_lost,
            avg_latency_ms: r.avg_latency_ms,
        }
    }
}

/// Drives an [`AlertMachine`] from a prober and a notifier.
pub struct NetMonitor {
    prober: Box<dyn Prober>,
    notifier: Box<dyn Notifier>,
    machine: AlertMachine,
    interval: Duration,
    probe_timeout: Duration,
    notify_timeout: Duration,
}

impl NetMonitor {
    /// A monitor with a one minute interval and the default probe (20 s)
    /// and notify (10 s) timeouts.
    pub fn new(prober: Box<dyn Prober>, notifier: Box<dyn Notifier>, thresholds: Thresholds) -> Self {
        Self {
            prober,
            notifier,
            machine: AlertMachine::new(thresholds),
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(20),
            notify_timeout: Duration::from_secs(10),
        }
    }

    /// Sleep between cycles in daemon mode.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Upper bounds on one probe run and one notification attempt.
    pub fn with_timeouts(mut self, probe: Duration, notify: Duration) -> Self {
        self.probe_timeout = probe;
        self.notify_timeout = notify;
        self
    }

    /// The alert state machine driven by this monitor.
    pub fn machine(&self) -> &AlertMachine {
        &self.machine
    }

    /// Sleep between cycles in daemon mode.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle stamped with the current local time.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.run_cycle_at(Local::now()).await
    }

    /// Run one cycle as if it happened at `now`.
    pub async fn run_cycle_at(&mut self, now: DateTime<Local>) -> CycleReport {
        let mut report = CycleReport {
            at: now,
            probe: None,
            category: None,
            crossed: None,
            dispatch: None,
            errors: Vec::new(),
        };

        let mut healthy = false;
        match self.probe().await {
            Ok(result) => {
                debug!(
                    host = self.prober.target(),
                    reachable = result.reachable,
                    lost = result.packets_lost,
                    avg_ms = result.avg_latency_ms,
                    "probe complete"
                );
                let Observation { category, crossed } = self.machine.observe(&result, now);
                healthy = category == FailureCategory::None;
                report.probe = Some(result.into());
                report.category = Some(category);
                report.crossed = crossed;
            }
            Err(e) => {
                error!(
                    host = self.prober.target(),
                    error = %e,
                    counters = ?self.machine.counters(),
                    at = %now.to_rfc3339(),
                    "probe failed, skipping classification"
                );
                report.errors.push(e.to_string());
            }
        }

        match self
            .machine
            .dispatch(healthy, now, self.notifier.as_ref(), self.notify_timeout)
            .await
        {
            Ok(d) => report.dispatch = Some(d),
            Err(e) => {
                error!(
                    error = %e,
                    phase = ?self.machine.phase(),
                    counters = ?self.machine.counters(),
                    at = %now.to_rfc3339(),
                    "notification failed, will retry next cycle"
                );
                report.errors.push(e.to_string());
            }
        }

        report
    }

    async fn probe(&self) -> Result<ProbeResult, ProbeError> {
        tokio::time::timeout(self.probe_timeout, self.prober.probe())
            .await
            .map_err(|_| ProbeError::Timeout(self.probe_timeout))?
    }

    /// Run according to `mode`. In [`RunMode::Once`] the single cycle's
    /// report is returned; in daemon mode the loop runs until `shutdown`
    /// fires and returns `None`.
    pub async fn run(
        &mut self,
        mode: RunMode,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<CycleReport> {
        if mode == RunMode::Once {
            let report = self.run_cycle().await;
            info!("single check complete");
            return Some(report);
        }

        info!(
            host = self.prober.target(),
            interval_secs = self.interval.as_secs(),
            "monitor started in daemon mode"
        );

        loop {
            self.run_cycle().await;

            info!(interval_secs = self.interval.as_secs(), "waiting until next check");
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("monitor shutting down");
                    break;
                }
            }
        }
        None
    }
}
