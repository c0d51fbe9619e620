//! checknet-monitor — debounced network health alerting.
//!
//! Turns a stream of noisy probe results into one alert per incident and
//! one matching restore notification, retrying delivery until the
//! notification transport confirms it.
//!
//! # Architecture
//!
//! ```text
//! NetMonitor (scheduler loop, once or daemon)
//!   ├── Prober → ProbeResult          (ping or TCP connect)
//!   ├── AlertMachine
//!   │   ├── DebounceCounters          (down / loss / lag, reset on healthy)
//!   │   └── Phase                     (Counting → ConfirmingAlert → ConfirmingRestore)
//!   └── Notifier → confirmed: bool    (Pushover)
//! ```
//!
//! # Debounce
//!
//! A category must be observed on `threshold` consecutive ticks, with no
//! fully healthy tick in between, before an alert is raised. The crossing is
//! detected by equality, so a condition that persists raises exactly one
//! alert. Simultaneous conditions resolve in the order
//! `Down > PacketLoss > HighLatency`.

pub mod classifier;
pub mod config;
pub mod error;
pub mod machine;
pub mod monitor;
pub mod notifier;
pub mod probe;

pub use classifier::{DebounceCounters, FailureCategory, Thresholds};
pub use config::{CheckConfig, ProbeKind, Settings};
pub use error::{ConfigError, NotifyError, ProbeError};
pub use machine::{AlertMachine, Dispatch, IncidentRecord, Phase};
pub use monitor::{CycleReport, NetMonitor, RunMode};
pub use notifier::{Notifier, PushoverNotifier};
pub use probe::{burst_budget, PingProber, ProbeResult, Prober, TcpProber};
