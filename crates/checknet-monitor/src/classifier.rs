//! Debounce classification.
//!
//! Each probe result is mapped to at most one failure category and bumps
//! that category's consecutive-occurrence counter. A fully healthy result
//! clears every counter at once.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::probe::ProbeResult;

/// Failure category of a single probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The target did not answer.
    Down,
    /// Some echo requests were lost.
    PacketLoss,
    /// Mean latency at or above the threshold.
    HighLatency,
    /// Fully healthy.
    None,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::Down => "down",
            FailureCategory::PacketLoss => "packet_loss",
            FailureCategory::HighLatency => "high_latency",
            FailureCategory::None => "none",
        };
        f.write_str(s)
    }
}

/// Thresholds driving classification and alerting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Mean latency (ms) at or above which a tick counts as high latency.
    pub latency_ms: f64,
    /// Consecutive qualifying ticks needed to raise an alert.
    pub occurrences: u32,
}

/// Consecutive-occurrence counters, one per failure category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DebounceCounters {
    /// Consecutive unreachable ticks.
    pub down: u32,
    /// Consecutive ticks with at least one lost packet.
    pub loss: u32,
    /// Consecutive ticks at or above the latency threshold.
    pub lag: u32,
}

impl DebounceCounters {
    /// Classify one probe result and update the matching counter.
    ///
    /// Checks run in fixed order (unreachable, loss, latency), so a tick
    /// contributes to at most one counter. Returns the category; a
    /// [`FailureCategory::None`] return means every counter was reset.
    pub fn observe(&mut self, result: &ProbeResult, thresholds: &Thresholds) -> FailureCategory {
        if !result.reachable {
            self.down += 1;
            warn!(count = self.down, threshold = thresholds.occurrences, "network down detected");
            FailureCategory::Down
        } else if result.packets_lost > 0 {
            self.loss += 1;
            warn!(
                lost = result.packets_lost,
                count = self.loss,
                threshold = thresholds.occurrences,
                "packet loss detected"
            );
            FailureCategory::PacketLoss
        } else if result.avg_latency_ms >= thresholds.latency_ms {
            self.lag += 1;
            warn!(
                latency_ms = result.avg_latency_ms,
                count = self.lag,
                threshold = thresholds.occurrences,
                "latency threshold exceeded"
            );
            FailureCategory::HighLatency
        } else {
            if *self != Self::default() {
                debug!(counters = ?self, "healthy tick, counters reset");
            }
            self.reset();
            FailureCategory::None
        }
    }

    /// Current run length for `category`. Always 0 for
    /// [`FailureCategory::None`].
    pub fn count(&self, category: FailureCategory) -> u32 {
        match category {
            FailureCategory::Down => self.down,
            FailureCategory::PacketLoss => self.loss,
            FailureCategory::HighLatency => self.lag,
            FailureCategory::None => 0,
        }
    }

    /// `Some(category)` when the tick just classified as `category` brought
    /// its counter exactly onto the threshold.
    ///
    /// Only the counter that moved on this tick is checked. Counters of
    /// other categories keep their old values until a healthy tick, and a
    /// stale one sitting on the threshold must not fire again. Equality,
    /// not `>=`: a counter that stays past the threshold does not
    /// re-trigger. It must be reset and climb again.
    pub fn crossing(&self, category: FailureCategory, occurrences: u32) -> Option<FailureCategory> {
        (category != FailureCategory::None && self.count(category) == occurrences)
            .then_some(category)
    }

    /// Zero every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
