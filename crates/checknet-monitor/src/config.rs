//! checknet.toml configuration.
//!
//! Every field is optional in the file; [`CheckConfig::resolve`] fills in
//! defaults and validates the result into [`Settings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::Thresholds;
use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/checknet.toml";
pub const DEFAULT_LOCK_FILE: &str = "/var/tmp/checknet.lock";
/// Smallest probe timeout accepted for ICMP probes.
pub const MIN_ICMP_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub pushover: PushoverConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub host: Option<String>,
    pub probe: Option<ProbeKind>,
    /// Port for TCP probes.
    pub port: Option<u16>,
    /// Echo requests per probe.
    pub count: Option<u32>,
    pub latency_ms: Option<f64>,
    /// Consecutive qualifying ticks before alerting.
    pub threshold: Option<u32>,
    pub interval: Option<String>,
    pub probe_timeout: Option<String>,
    pub notify_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushoverConfig {
    pub app_token: Option<String>,
    pub user_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub lock_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Icmp,
    Tcp,
}

impl std::str::FromStr for ProbeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icmp" | "ping" => Ok(ProbeKind::Icmp),
            "tcp" => Ok(ProbeKind::Tcp),
            other => Err(ConfigError::Invalid {
                field: "probe",
                reason: format!("unknown probe kind {other:?}"),
            }),
        }
    }
}

/// Validated, fully-defaulted settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Target host name or address.
    pub host: String,
    pub probe: ProbeKind,
    /// Port for TCP probes; ignored for ICMP.
    pub port: u16,
    /// Echo requests per probe burst.
    pub count: u32,
    pub thresholds: Thresholds,
    /// Sleep between cycles in daemon mode.
    pub interval: Duration,
    /// Upper bound on one probe burst, including process spawn.
    pub probe_timeout: Duration,
    /// Upper bound on one notification attempt.
    pub notify_timeout: Duration,
    pub app_token: String,
    pub user_key: String,
    pub lock_file: PathBuf,
    pub log_file: Option<PathBuf>,
}

impl CheckConfig {
    /// Read and parse a TOML config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse TOML text. Nothing is validated until [`Self::resolve`].
    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if it exists, otherwise start from an empty config.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply defaults and validate.
    ///
    /// Counts, the threshold, the interval and both timeouts must be
    /// non-zero, the latency threshold positive, and both Pushover
    /// credentials present. ICMP probes need a probe timeout of at least
    /// [`MIN_ICMP_PROBE_TIMEOUT`], because `ping` deadlines are whole
    /// seconds.
    pub fn resolve(self) -> ConfigResult<Settings> {
        let m = self.monitor;

        let count = m.count.unwrap_or(5);
        if count == 0 {
            return Err(ConfigError::Invalid {
                field: "count",
                reason: "must be at least 1".to_string(),
            });
        }

        let occurrences = m.threshold.unwrap_or(5);
        if occurrences == 0 {
            return Err(ConfigError::Invalid {
                field: "threshold",
                reason: "must be at least 1".to_string(),
            });
        }

        let latency_ms = m.latency_ms.unwrap_or(200.0);
        if !(latency_ms.is_finite() && latency_ms > 0.0) {
            return Err(ConfigError::Invalid {
                field: "latency_ms",
                reason: format!("must be positive, got {latency_ms}"),
            });
        }

        let interval = non_zero_duration("interval", m.interval.as_deref().unwrap_or("1m"))?;
        let probe_timeout =
            non_zero_duration("probe_timeout", m.probe_timeout.as_deref().unwrap_or("20s"))?;
        let notify_timeout =
            non_zero_duration("notify_timeout", m.notify_timeout.as_deref().unwrap_or("10s"))?;

        let probe = m.probe.unwrap_or_default();
        if probe == ProbeKind::Icmp && probe_timeout < MIN_ICMP_PROBE_TIMEOUT {
            return Err(ConfigError::Invalid {
                field: "probe_timeout",
                reason: format!(
                    "icmp probes need at least {MIN_ICMP_PROBE_TIMEOUT:?}, got {probe_timeout:?}"
                ),
            });
        }

        let host = m.host.unwrap_or_else(|| "1.1.1.1".to_string());
        if host.trim().is_empty() {
            return Err(ConfigError::Missing("monitor.host"));
        }

        let app_token = non_empty(self.pushover.app_token).ok_or(ConfigError::Missing("pushover.app_token"))?;
        let user_key = non_empty(self.pushover.user_key).ok_or(ConfigError::Missing("pushover.user_key"))?;

        Ok(Settings {
            host,
            probe,
            port: m.port.unwrap_or(443),
            count,
            thresholds: Thresholds {
                latency_ms,
                occurrences,
            },
            interval,
            probe_timeout,
            notify_timeout,
            app_token,
            user_key,
            lock_file: self
                .daemon
                .lock_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_FILE)),
            log_file: self.daemon.log_file,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_zero_duration(field: &'static str, value: &str) -> ConfigResult<Duration> {
    let duration = parse_duration(value)?;
    if duration.is_zero() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

/// Parse a duration string like "5s", "500ms", "1m", "2h".
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let bad = || ConfigError::Duration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| bad())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    } else if let Some(mins) = s.strip_suffix('m') {
        scaled_secs(mins, 60).ok_or_else(bad)
    } else if let Some(hours) = s.strip_suffix('h') {
        scaled_secs(hours, 3600).ok_or_else(bad)
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    }
}

/// `value * unit` seconds, or `None` on a bad number or overflow.
fn scaled_secs(value: &str, unit: u64) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()?
        .checked_mul(unit)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[monitor]
host = "8.8.8.8"
probe = "tcp"
port = 53
count = 3
latency_ms = 150.0
threshold = 4
interval = "30s"
probe_timeout = "5s"
notify_timeout = "500ms"

[pushover]
app_token = "app"
user_key = "user"

[daemon]
lock_file = "/tmp/checknet-test.lock"
log_file = "/tmp/checknet.log"
"#;

    fn with_credentials() -> CheckConfig {
        let mut config = CheckConfig::default();
        config.pushover.app_token = Some("app".to_string());
        config.pushover.user_key = Some("user".to_string());
        config
    }

    #[test]
    fn parse_full_config() {
        let settings = CheckConfig::parse(FULL).unwrap().resolve().unwrap();
        assert_eq!(settings.host, "8.8.8.8");
        assert_eq!(settings.probe, ProbeKind::Tcp);
        assert_eq!(settings.port, 53);
        assert_eq!(settings.count, 3);
        assert_eq!(settings.thresholds.occurrences, 4);
        assert_eq!(settings.thresholds.latency_ms, 150.0);
        assert_eq!(settings.interval, Duration::from_secs(30));
        assert_eq!(settings.notify_timeout, Duration::from_millis(500));
        assert_eq!(settings.lock_file, PathBuf::from("/tmp/checknet-test.lock"));
        assert_eq!(settings.log_file, Some(PathBuf::from("/tmp/checknet.log")));
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let settings = with_credentials().resolve().unwrap();
        assert_eq!(settings.host, "1.1.1.1");
        assert_eq!(settings.probe, ProbeKind::Icmp);
        assert_eq!(settings.count, 5);
        assert_eq!(settings.thresholds.occurrences, 5);
        assert_eq!(settings.thresholds.latency_ms, 200.0);
        assert_eq!(settings.interval, Duration::from_secs(60));
        assert_eq!(settings.probe_timeout, Duration::from_secs(20));
        assert_eq!(settings.notify_timeout, Duration::from_secs(10));
        assert_eq!(settings.lock_file, PathBuf::from(DEFAULT_LOCK_FILE));
    }

    #[test]
    fn missing_credentials_rejected() {
        let err = CheckConfig::default().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("pushover.app_token")));
    }

    #[test]
    fn zero_threshold_rejected() {
        let mut config = with_credentials();
        config.monitor.threshold = Some(0);
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::Invalid { field: "threshold", .. })
        ));
    }

    #[test]
    fn bad_interval_rejected() {
        let mut config = with_credentials();
        config.monitor.interval = Some("soon".to_string());
        assert!(matches!(config.resolve(), Err(ConfigError::Duration(_))));
    }

    #[test]
    fn unknown_probe_kind_rejected() {
        assert!(CheckConfig::parse("[monitor]\nprobe = \"udp\"\n").is_err());
        assert!("udp".parse::<ProbeKind>().is_err());
        assert_eq!("PING".parse::<ProbeKind>().unwrap(), ProbeKind::Icmp);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("ten").is_err());
    }

    #[test]
    fn overflowing_duration_rejected() {
        let huge = format!("{}m", u64::MAX / 2);
        assert!(matches!(parse_duration(&huge), Err(ConfigError::Duration(_))));
        let huge = format!("{}h", u64::MAX / 1000);
        assert!(matches!(parse_duration(&huge), Err(ConfigError::Duration(_))));
        assert!(parse_duration("99999999999999999999s").is_err());
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut config = with_credentials();
        config.monitor.probe_timeout = Some("0s".to_string());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::Invalid { field: "probe_timeout", .. })
        ));

        let mut config = with_credentials();
        config.monitor.notify_timeout = Some("0ms".to_string());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::Invalid { field: "notify_timeout", .. })
        ));
    }

    #[test]
    fn icmp_timeout_needs_whole_seconds() {
        let mut config = with_credentials();
        config.monitor.probe_timeout = Some("1500ms".to_string());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::Invalid { field: "probe_timeout", .. })
        ));

        let mut config = with_credentials();
        config.monitor.probe = Some(ProbeKind::Tcp);
        config.monitor.probe_timeout = Some("1500ms".to_string());
        assert_eq!(config.resolve().unwrap().probe_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn load_or_default_without_file() {
        let config = CheckConfig::load_or_default(Path::new("/nonexistent/checknet.toml")).unwrap();
        assert!(config.monitor.host.is_none());
    }
}
