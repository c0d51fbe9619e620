//! checknetd — the checknet network monitor daemon.
//!
//! Probes a target on a fixed interval and sends a push notification once
//! per incident (down, packet loss, high latency), then a matching restore
//! notification when the connection is healthy again.
//!
//! # Usage
//!
//! ```text
//! checknetd -v run --daemon --host 1.1.1.1 --threshold 5
//! checknetd watchdog            # from cron: restart the daemon if it died
//! ```
//!
//! Exit status: 0 on success, 5 when another instance holds the lock, 1 on
//! any other startup failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use checknet_monitor::config::DEFAULT_CONFIG_PATH;
use checknet_monitor::{
    burst_budget, CheckConfig, ConfigError, NetMonitor, NotifyError, PingProber, ProbeKind, Prober,
    PushoverNotifier, RunMode, Settings, TcpProber,
};

mod lock;
mod logging;
mod watchdog;

use lock::{InstanceLock, LockError};
use watchdog::{RestartArgs, WatchdogError};

const EXIT_ALREADY_RUNNING: u8 = 5;
const EXIT_STARTUP_FAILURE: u8 = 1;

#[derive(Parser)]
#[command(
    name = "checknetd",
    about = "Network connection monitor with debounced push alerts",
    version,
    propagate_version = true
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Append logs to this file instead of stderr.
    #[arg(short = 'f', long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor (one check, or forever with --daemon).
    Run(RunArgs),
    /// Restart the daemon if it is not running.
    Watchdog {
        /// Lock file held by the running daemon.
        #[arg(long)]
        lock_file: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Keep running, checking every interval.
    #[arg(long)]
    daemon: bool,

    /// Host to check.
    #[arg(long)]
    host: Option<String>,

    /// Probe kind: icmp or tcp.
    #[arg(long)]
    probe: Option<ProbeKind>,

    /// Port for tcp probes.
    #[arg(long)]
    port: Option<u16>,

    /// Echo requests per probe.
    #[arg(long)]
    count: Option<u32>,

    /// High latency threshold in ms.
    #[arg(long)]
    latency: Option<f64>,

    /// Consecutive bad checks before alerting.
    #[arg(long)]
    threshold: Option<u32>,

    /// Time between checks, e.g. "1m", "30s".
    #[arg(long)]
    interval: Option<String>,

    /// Single-instance lock file.
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Print the one-shot cycle report as JSON.
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    /// Command-line values override the config file.
    fn apply(&self, config: &mut CheckConfig) {
        let m = &mut config.monitor;
        if let Some(host) = &self.host {
            m.host = Some(host.clone());
        }
        if let Some(probe) = self.probe {
            m.probe = Some(probe);
        }
        if let Some(port) = self.port {
            m.port = Some(port);
        }
        if let Some(count) = self.count {
            m.count = Some(count);
        }
        if let Some(latency) = self.latency {
            m.latency_ms = Some(latency);
        }
        if let Some(threshold) = self.threshold {
            m.threshold = Some(threshold);
        }
        if let Some(interval) = &self.interval {
            m.interval = Some(interval.clone());
        }
        if let Some(lock_file) = &self.lock_file {
            config.daemon.lock_file = Some(lock_file.clone());
        }
    }
}

/// Failures that stop the process before or instead of monitoring.
#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Watchdog(#[from] WatchdogError),

    #[error("cannot build notifier: {0}")]
    Notifier(#[from] NotifyError),

    #[error("cannot serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

impl StartupError {
    fn exit_code(&self) -> u8 {
        match self {
            StartupError::Lock(LockError::AlreadyRunning { .. }) => EXIT_ALREADY_RUNNING,
            _ => EXIT_STARTUP_FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = CheckConfig::load_or_default(&cli.config);
    let log_file = cli.log_file.clone().or_else(|| {
        loaded
            .as_ref()
            .ok()
            .and_then(|c| c.daemon.log_file.clone())
    });
    if let Err(e) = logging::init(cli.verbose, log_file.as_deref()) {
        eprintln!("checknetd: {e:#}");
        return ExitCode::from(EXIT_STARTUP_FAILURE);
    }

    let result = match loaded {
        Ok(config) => dispatch(cli, config, log_file).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match &e {
                StartupError::Lock(LockError::AlreadyRunning { .. }) => {
                    tracing::warn!(error = %e, "process is already running, exiting");
                }
                _ => error!(error = %e, "checknetd failed"),
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn dispatch(
    cli: Cli,
    mut config: CheckConfig,
    log_file: Option<PathBuf>,
) -> Result<(), StartupError> {
    match cli.command {
        Command::Run(args) => {
            args.apply(&mut config);
            let settings = config.resolve()?;
            let mode = if args.daemon {
                RunMode::Daemon
            } else {
                RunMode::Once
            };
            run_monitor(settings, mode, args.json).await
        }
        Command::Watchdog { lock_file } => {
            let lock_file = lock_file
                .or(config.daemon.lock_file)
                .unwrap_or_else(|| PathBuf::from(checknet_monitor::config::DEFAULT_LOCK_FILE));
            let restart = RestartArgs {
                config: Some(cli.config),
                log_file,
                verbosity: cli.verbose,
            };
            watchdog::check(&lock_file, &restart)?;
            Ok(())
        }
    }
}

/// The burst deadline sits inside the monitor's probe timeout, so an
/// unanswered target reports down instead of a timed-out cycle.
fn build_prober(settings: &Settings) -> Box<dyn Prober> {
    let budget = burst_budget(settings.probe_timeout);
    match settings.probe {
        ProbeKind::Icmp => Box::new(PingProber::new(&settings.host, settings.count, budget)),
        ProbeKind::Tcp => {
            let address = if settings.host.contains(':') {
                format!("[{}]:{}", settings.host, settings.port)
            } else {
                format!("{}:{}", settings.host, settings.port)
            };
            Box::new(TcpProber::new(address, settings.count, budget))
        }
    }
}

async fn run_monitor(settings: Settings, mode: RunMode, json: bool) -> Result<(), StartupError> {
    let _lock = InstanceLock::acquire(&settings.lock_file)?;

    let notifier = PushoverNotifier::new(
        settings.app_token.as_str(),
        settings.user_key.as_str(),
        settings.notify_timeout,
    )?;

    info!(
        host = %settings.host,
        probe = ?settings.probe,
        latency_ms = settings.thresholds.latency_ms,
        threshold = settings.thresholds.occurrences,
        "checknet starting"
    );
    if mode == RunMode::Daemon {
        info!("executed in daemon mode, will continue until stopped");
    }

    let mut monitor = NetMonitor::new(
        build_prober(&settings),
        Box::new(notifier),
        settings.thresholds,
    )
    .with_interval(settings.interval)
    .with_timeouts(settings.probe_timeout, settings.notify_timeout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if let Some(report) = monitor.run(mode, shutdown_rx).await {
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        info!("exiting because run without --daemon");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "checknetd", "-vv", "run", "--daemon", "--host", "8.8.8.8", "--latency", "150",
            "--threshold", "3", "--probe", "tcp",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run(args) => {
                assert!(args.daemon);
                assert_eq!(args.host.as_deref(), Some("8.8.8.8"));
                assert_eq!(args.latency, Some(150.0));
                assert_eq!(args.threshold, Some(3));
                assert_eq!(args.probe, Some(ProbeKind::Tcp));
            }
            Command::Watchdog { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "checknetd", "watchdog", "-v", "--log-file", "/tmp/c.log", "--lock-file", "/tmp/c.lock",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/c.log")));
        assert!(matches!(cli.command, Command::Watchdog { lock_file: Some(_) }));
    }

    #[test]
    fn cli_overrides_config_file() {
        let mut config = CheckConfig::parse(
            r#"
[monitor]
host = "1.0.0.1"
threshold = 5
[pushover]
app_token = "a"
user_key = "u"
"#,
        )
        .unwrap();
        let args = RunArgs {
            threshold: Some(2),
            interval: Some("10s".to_string()),
            ..RunArgs::default()
        };
        args.apply(&mut config);

        let settings = config.resolve().unwrap();
        assert_eq!(settings.host, "1.0.0.1");
        assert_eq!(settings.thresholds.occurrences, 2);
        assert_eq!(settings.interval, Duration::from_secs(10));
    }

    #[test]
    fn exit_codes() {
        let held = StartupError::Lock(LockError::AlreadyRunning {
            path: PathBuf::from("/tmp/x"),
            pid: None,
        });
        assert_eq!(held.exit_code(), EXIT_ALREADY_RUNNING);

        let config = StartupError::Config(ConfigError::Missing("pushover.app_token"));
        assert_eq!(config.exit_code(), EXIT_STARTUP_FAILURE);
    }

    #[test]
    fn tcp_prober_brackets_ipv6() {
        let settings = CheckConfig::parse(
            "[monitor]\nhost = \"::1\"\nprobe = \"tcp\"\nport = 80\n[pushover]\napp_token = \"a\"\nuser_key = \"u\"\n",
        )
        .unwrap()
        .resolve()
        .unwrap();
        assert_eq!(build_prober(&settings).target(), "[::1]:80");
    }

    #[tokio::test]
    async fn unanswered_tcp_target_reports_down_before_cycle_timeout() {
        // TEST-NET-1 is never routed; connects hang or fail fast.
        let settings = CheckConfig::parse(
            "[monitor]\nhost = \"192.0.2.1\"\nprobe = \"tcp\"\nport = 9\ncount = 3\nprobe_timeout = \"1s\"\n[pushover]\napp_token = \"a\"\nuser_key = \"u\"\n",
        )
        .unwrap()
        .resolve()
        .unwrap();

        let prober = build_prober(&settings);
        let result = tokio::time::timeout(settings.probe_timeout, prober.probe())
            .await
            .expect("burst outlived the cycle timeout")
            .unwrap();
        assert!(!result.reachable);
    }
}
