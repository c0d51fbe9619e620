//! Alert/restore state machine.
//!
//! The machine sits in one of three phases:
//!
//! ```text
//!            crossing                 alert confirmed
//! Counting ───────────► ConfirmingAlert ───────────► ConfirmingRestore
//!    ▲                                                      │
//!    └───────────── restore confirmed (healthy tick) ───────┘
//! ```
//!
//! A phase only advances on *confirmed* delivery. An unconfirmed or failed
//! notification leaves the phase untouched, so the next tick retries the
//! same incident and never sends a second alert for it.

use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use serde::Serialize;
use tracing::{info, warn};

use crate::classifier::{DebounceCounters, FailureCategory, Thresholds};
use crate::error::NotifyError;
use crate::notifier::Notifier;
use crate::probe::ProbeResult;

const SHOWTIME_FORMAT: &str = "%I:%M %p %m-%d-%y";

/// An open incident: why it was raised and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncidentRecord {
    pub reason: FailureCategory,
    pub triggered_at: DateTime<Local>,
}

impl IncidentRecord {
    /// Title and body of the alert notification.
    pub fn alert_message(&self) -> (&'static str, String) {
        let showtime = self.triggered_at.format(SHOWTIME_FORMAT);
        match self.reason {
            FailureCategory::Down => (
                "Network Connection Down",
                format!("The network reported DOWN at {showtime}"),
            ),
            FailureCategory::PacketLoss => (
                "Packet Loss Detected.",
                format!("The network reported PACKET LOSS at {showtime}"),
            ),
            FailureCategory::HighLatency | FailureCategory::None => (
                "High Latency Detected.",
                format!("The network reported HIGH LATENCY at {showtime}"),
            ),
        }
    }

    /// Title and body of the restore notification.
    pub fn restore_message(&self, elapsed: TimeDelta) -> (&'static str, String) {
        let phrase = match self.reason {
            FailureCategory::Down => "Down",
            FailureCategory::PacketLoss => "Losing Packets",
            FailureCategory::HighLatency | FailureCategory::None => "in High Latency",
        };
        (
            "Network Restored",
            format!(
                "Network connection was {phrase} for {}",
                format_elapsed(elapsed)
            ),
        )
    }
}

/// Macro-state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Healthy or debouncing; nothing to deliver.
    Counting,
    /// An alert for this incident is waiting for confirmed delivery.
    ConfirmingAlert(IncidentRecord),
    /// The alert was delivered; waiting for health to return and the
    /// restore notification to be confirmed.
    ConfirmingRestore(IncidentRecord),
}

/// What classification did with one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub category: FailureCategory,
    /// Set when a counter hit the threshold on this tick.
    pub crossed: Option<FailureCategory>,
}

/// What the dispatch step did on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dispatch {
    /// Nothing pending.
    Idle,
    /// Alert confirmed; now awaiting restore.
    AlertDelivered { reason: FailureCategory },
    /// Alert attempted but not confirmed; will retry next tick.
    AlertUnconfirmed { reason: FailureCategory },
    /// Restore confirmed; incident closed.
    RestoreDelivered { reason: FailureCategory, elapsed_secs: i64 },
    /// Restore attempted but not confirmed; will retry on the next healthy tick.
    RestoreUnconfirmed { reason: FailureCategory, elapsed_secs: i64 },
}

/// Debounce counters plus the alert/restore phase, owned by the scheduler
/// loop and mutated once per tick.
#[derive(Debug, Clone)]
pub struct AlertMachine {
    thresholds: Thresholds,
    counters: DebounceCounters,
    phase: Phase,
}

impl AlertMachine {
    /// A machine in [`Phase::Counting`] with all counters at zero.
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            counters: DebounceCounters::default(),
            phase: Phase::Counting,
        }
    }

    /// Thresholds the machine was built with.
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Snapshot of the debounce counters.
    pub fn counters(&self) -> DebounceCounters {
        self.counters
    }

    /// Current phase, including the open incident if there is one.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The open incident, if any.
    pub fn incident(&self) -> Option<&IncidentRecord> {
        match &self.phase {
            Phase::Counting => None,
            Phase::ConfirmingAlert(i) | Phase::ConfirmingRestore(i) => Some(i),
        }
    }

    fn alert_pending_for(&self, reason: FailureCategory) -> bool {
        matches!(self.phase, Phase::ConfirmingAlert(i) if i.reason == reason)
    }

    pub fn down_alert_pending(&self) -> bool {
        self.alert_pending_for(FailureCategory::Down)
    }

    pub fn loss_alert_pending(&self) -> bool {
        self.alert_pending_for(FailureCategory::PacketLoss)
    }

    pub fn lag_alert_pending(&self) -> bool {
        self.alert_pending_for(FailureCategory::HighLatency)
    }

    pub fn awaiting_restore(&self) -> bool {
        matches!(self.phase, Phase::ConfirmingRestore(_))
    }

    /// Classify a probe result and open an incident if a counter just
    /// reached the threshold.
    ///
    /// A crossing while another incident is still open replaces it.
    pub fn observe(&mut self, result: &ProbeResult, now: DateTime<Local>) -> Observation {
        let category = self.counters.observe(result, &self.thresholds);

        let crossed = self.counters.crossing(category, self.thresholds.occurrences);

        if let Some(reason) = crossed {
            if let Some(previous) = self.incident() {
                info!(
                    previous = %previous.reason,
                    %reason,
                    "new threshold crossing replaces open incident"
                );
            }
            warn!(
                %reason,
                counters = ?self.counters,
                triggered_at = %now.to_rfc3339(),
                "threshold reached, raising alert"
            );
            self.phase = Phase::ConfirmingAlert(IncidentRecord {
                reason,
                triggered_at: now,
            });
        }

        Observation { category, crossed }
    }

    /// Deliver whatever the current phase is waiting on.
    ///
    /// `healthy` is whether this tick's probe was fully healthy; the
    /// restore is only attempted on such a tick, with elapsed time taken
    /// from `now`. On `Err` the phase is untouched and the caller retries
    /// on a later tick.
    pub async fn dispatch(
        &mut self,
        healthy: bool,
        now: DateTime<Local>,
        notifier: &dyn Notifier,
        timeout: Duration,
    ) -> Result<Dispatch, NotifyError> {
        match self.phase {
            Phase::Counting => Ok(Dispatch::Idle),
            Phase::ConfirmingAlert(incident) => {
                let (title, body) = incident.alert_message();
                let reason = incident.reason;
                if deliver(notifier, title, &body, timeout).await? {
                    info!(%reason, "alert delivered, awaiting restore");
                    self.phase = Phase::ConfirmingRestore(incident);
                    Ok(Dispatch::AlertDelivered { reason })
                } else {
                    warn!(%reason, "alert not confirmed, will retry next cycle");
                    Ok(Dispatch::AlertUnconfirmed { reason })
                }
            }
            Phase::ConfirmingRestore(_) if !healthy => Ok(Dispatch::Idle),
            Phase::ConfirmingRestore(incident) => {
                let elapsed = (now - incident.triggered_at).max(TimeDelta::zero());
                let (title, body) = incident.restore_message(elapsed);
                let reason = incident.reason;
                let elapsed_secs = elapsed.num_seconds();
                if deliver(notifier, title, &body, timeout).await? {
                    info!(%reason, elapsed_secs, "restore delivered, incident closed");
                    self.phase = Phase::Counting;
                    Ok(Dispatch::RestoreDelivered { reason, elapsed_secs })
                } else {
                    warn!(%reason, "restore not confirmed, will retry next healthy cycle");
                    Ok(Dispatch::RestoreUnconfirmed { reason, elapsed_secs })
                }
            }
        }
    }
}

async fn deliver(
    notifier: &dyn Notifier,
    title: &str,
    body: &str,
    timeout: Duration,
) -> Result<bool, NotifyError> {
    tokio::time::timeout(timeout, notifier.notify(title, body))
        .await
        .map_err(|_| NotifyError::Timeout(timeout))?
}

/// Render a duration as "2 hours, 5 minutes, 1 second".
pub fn format_elapsed(elapsed: TimeDelta) -> String {
    let total = elapsed.num_seconds().max(0);
    let units = [
        (total / 86_400, "day"),
        ((total % 86_400) / 3_600, "hour"),
        ((total % 3_600) / 60, "minute"),
        (total % 60, "second"),
    ];

    let parts: Vec<String> = units
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| {
            if *n == 1 {
                format!("1 {unit}")
            } else {
                format!("{n} {unit}s")
            }
        })
        .collect();

    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(TimeDelta::zero()), "0 seconds");
        assert_eq!(format_elapsed(TimeDelta::seconds(1)), "1 second");
        assert_eq!(format_elapsed(TimeDelta::seconds(3_903)), "1 hour, 5 minutes, 3 seconds");
        assert_eq!(format_elapsed(TimeDelta::seconds(2 * 86_400 + 60)), "2 days, 1 minute");
        assert_eq!(format_elapsed(TimeDelta::seconds(-5)), "0 seconds");
    }

    #[test]
    fn alert_messages_by_reason() {
        let at = Local::now();
        let title = |reason| IncidentRecord { reason, triggered_at: at }.alert_message().0;
        assert_eq!(title(FailureCategory::Down), "Network Connection Down");
        assert_eq!(title(FailureCategory::PacketLoss), "Packet Loss Detected.");
        assert_eq!(title(FailureCategory::HighLatency), "High Latency Detected.");
    }

    #[test]
    fn restore_message_mentions_reason_and_elapsed() {
        let incident = IncidentRecord {
            reason: FailureCategory::PacketLoss,
            triggered_at: Local::now(),
        };
        let (title, body) = incident.restore_message(TimeDelta::seconds(125));
        assert_eq!(title, "Network Restored");
        assert_eq!(body, "Network connection was Losing Packets for 2 minutes, 5 seconds");
    }

    #[test]
    fn observe_opens_incident_on_crossing() {
        let mut m = AlertMachine::new(Thresholds {
            latency_ms: 100.0,
            occurrences: 2,
        });
        let now = Local::now();
        let first = m.observe(&ProbeResult::healthy(150.0), now);
        assert_eq!(first.crossed, None);
        assert_eq!(m.phase(), Phase::Counting);

        let second = m.observe(&ProbeResult::healthy(150.0), now);
        assert_eq!(second.crossed, Some(FailureCategory::HighLatency));
        assert!(m.lag_alert_pending());
        assert_eq!(m.incident().map(|i| i.triggered_at), Some(now));
    }

    #[test]
    fn stale_down_counter_does_not_reopen_incident() {
        let mut m = AlertMachine::new(Thresholds {
            latency_ms: 100.0,
            occurrences: 2,
        });
        let start = Local::now();
        m.observe(&ProbeResult::down(), start);
        let down = m.observe(&ProbeResult::down(), start);
        assert_eq!(down.crossed, Some(FailureCategory::Down));

        // Lag ticks leave the down counter on the threshold until the lag
        // run itself crosses.
        let later = start + TimeDelta::minutes(1);
        let lag = m.observe(&ProbeResult::healthy(150.0), later);
        assert_eq!(lag.crossed, None);
        assert_eq!(m.incident().map(|i| i.triggered_at), Some(start));
        assert!(m.down_alert_pending());

        let lag = m.observe(&ProbeResult::healthy(150.0), later);
        assert_eq!(lag.crossed, Some(FailureCategory::HighLatency));
        assert!(m.lag_alert_pending());
    }
}
