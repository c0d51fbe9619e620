//! Probe adapters.
//!
//! A probe sends a small burst of echo requests (ICMP through the system
//! `ping` binary, or plain TCP connects) and summarizes the burst as a
//! single [`ProbeResult`]. Probes hold no state between calls.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ProbeError;

/// Summary of one probe burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    /// Whether the target answered at all.
    pub reachable: bool,
    /// Echo requests that went unanswered.
    pub packets_lost: u32,
    /// Mean round-trip time of the answered requests, in milliseconds.
    pub avg_latency_ms: f64,
}

impl ProbeResult {
    /// Every request answered, with the given mean round-trip time.
    pub fn healthy(avg_latency_ms: f64) -> Self {
        Self {
            reachable: true,
            packets_lost: 0,
            avg_latency_ms,
        }
    }

    /// Nothing answered.
    pub fn down() -> Self {
        Self {
            reachable: false,
            packets_lost: 0,
            avg_latency_ms: 0.0,
        }
    }

    /// Reachable, but `packets_lost` requests went unanswered.
    pub fn lossy(packets_lost: u32, avg_latency_ms: f64) -> Self {
        Self {
            reachable: true,
            packets_lost,
            avg_latency_ms,
        }
    }
}

/// Boxed future alias for probe results.
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<ProbeResult, ProbeError>> + Send + 'a>>;

/// Deadline for one burst when the whole probe call is bounded by
/// `probe_timeout`: four fifths of it, so a burst that runs to its
/// deadline still reports before the cycle timeout cancels it.
pub fn burst_budget(probe_timeout: Duration) -> Duration {
    probe_timeout * 4 / 5
}

/// Executes one health probe against the configured target.
pub trait Prober: Send + Sync {
    /// Send one burst and summarize it. Must finish within the budget
    /// the prober was built with.
    fn probe(&self) -> ProbeFuture<'_>;

    /// Human-readable target, used in log lines.
    fn target(&self) -> &str;
}

/// ICMP probe backed by the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProber {
    host: String,
    count: u32,
    budget: Duration,
}

impl PingProber {
    /// `budget` bounds the whole burst; `ping` gets it as its `-w`
    /// deadline, so a silent host ends as total loss instead of running
    /// into the caller's timeout.
    pub fn new(host: impl Into<String>, count: u32, budget: Duration) -> Self {
        Self {
            host: host.into(),
            count,
            budget,
        }
    }

    /// `-w` and `-W` values, in whole seconds (ping's resolution).
    fn deadline_args(&self) -> (u64, u64) {
        let deadline = self.budget.as_secs().max(1);
        let per_reply = (self.budget / self.count.max(1)).as_secs().clamp(1, deadline);
        (deadline, per_reply)
    }

    async fn run(&self) -> Result<ProbeResult, ProbeError> {
        let (deadline, per_reply) = self.deadline_args();
        let output = Command::new("ping")
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-w")
            .arg(deadline.to_string())
            .arg("-W")
            .arg(per_reply.to_string())
            .arg(&self.host)
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(host = %self.host, status = ?output.status.code(), "ping finished");

        if !output.status.success() && !stdout.contains("received") {
            // Name resolution failures and the like print nothing useful.
            return Ok(ProbeResult::down());
        }
        parse_ping_output(&stdout)
    }
}

impl Prober for PingProber {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(self.run())
    }

    fn target(&self) -> &str {
        &self.host
    }
}

/// Parse the summary block printed by iputils/BSD `ping`.
///
/// ```text
/// 5 packets transmitted, 4 received, 20% packet loss, time 4005ms
/// rtt min/avg/max/mdev = 9.912/10.381/11.022/0.401 ms
/// ```
pub fn parse_ping_output(output: &str) -> Result<ProbeResult, ProbeError> {
    let summary = output
        .lines()
        .find(|l| l.contains("packets transmitted"))
        .ok_or_else(|| ProbeError::Parse("missing packet summary".to_string()))?;

    let mut transmitted = None;
    let mut received = None;
    for part in summary.split(',') {
        let part = part.trim();
        let number = part
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<u32>().ok());
        if part.ends_with("packets transmitted") {
            transmitted = number;
        } else if part.ends_with("received") {
            received = number;
        }
    }
    let transmitted =
        transmitted.ok_or_else(|| ProbeError::Parse(format!("bad summary: {summary}")))?;
    let received = received.ok_or_else(|| ProbeError::Parse(format!("bad summary: {summary}")))?;

    if received == 0 {
        return Ok(ProbeResult::down());
    }

    let avg = output
        .lines()
        .find(|l| l.contains("min/avg/max"))
        .and_then(|l| l.split('=').nth(1))
        .and_then(|stats| stats.trim().split('/').nth(1))
        .and_then(|avg| avg.trim().parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Parse("missing rtt statistics".to_string()))?;

    Ok(ProbeResult {
        reachable: true,
        packets_lost: transmitted.saturating_sub(received),
        avg_latency_ms: avg,
    })
}

/// TCP connect probe, for networks where ICMP is filtered.
///
/// The burst shares one deadline: each connect gets an equal slice of
/// `budget`, and attempts that would start after the deadline count as
/// lost. A blackholed target therefore reports down instead of timing out.
#[derive(Debug, Clone)]
pub struct TcpProber {
    address: String,
    count: u32,
    budget: Duration,
}

impl TcpProber {
    /// `address` is `host:port`.
    pub fn new(address: impl Into<String>, count: u32, budget: Duration) -> Self {
        Self {
            address: address.into(),
            count,
            budget,
        }
    }

    async fn run(&self) -> Result<ProbeResult, ProbeError> {
        let mut rtts = Vec::with_capacity(self.count as usize);
        let mut lost = 0u32;
        let attempt_timeout = self.budget / self.count.max(1);
        let deadline = Instant::now() + self.budget;

        for attempt in 0..self.count {
            let started = Instant::now();
            let remaining = deadline.saturating_duration_since(started);
            if remaining.is_zero() {
                lost += self.count - attempt;
                debug!(address = %self.address, lost, "tcp burst deadline reached");
                break;
            }
            let wait = attempt_timeout.min(remaining);
            match tokio::time::timeout(wait, TcpStream::connect(&self.address)).await {
                Ok(Ok(_stream)) => rtts.push(started.elapsed().as_secs_f64() * 1000.0),
                Ok(Err(e)) => {
                    debug!(error = %e, address = %self.address, "tcp probe connect failed");
                    lost += 1;
                }
                Err(_) => {
                    debug!(address = %self.address, "tcp probe attempt timed out");
                    lost += 1;
                }
            }
        }

        Ok(summarize_attempts(&rtts, lost))
    }
}

impl Prober for TcpProber {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(self.run())
    }

    fn target(&self) -> &str {
        &self.address
    }
}

fn summarize_attempts(rtts: &[f64], lost: u32) -> ProbeResult {
    if rtts.is_empty() {
        return ProbeResult::down();
    }
    let avg = rtts.iter().sum::<f64>() / rtts.len() as f64;
    ProbeResult {
        reachable: true,
        packets_lost: lost,
        avg_latency_ms: avg,
    }
}
