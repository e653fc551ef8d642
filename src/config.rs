//! Controller configuration
//!
//! Settings come from an optional YAML file; flags and their environment
//! variables override whatever the file says.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Namespace to watch, every namespace when unset
    pub namespace: Option<String>,

    /// How often every cached GameServer is re-delivered to the handler
    #[serde(deserialize_with = "deserialize_duration")]
    pub sync_period: Duration,

    /// Upper bound on reconciles running at the same time
    pub max_concurrent_reconciles: usize,

    /// Attempts made to flip the readiness marker under write conflicts
    pub status_retry_steps: u32,

    #[serde(deserialize_with = "deserialize_duration")]
    pub requeue_base_delay: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub requeue_max_delay: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub cache_sync_interval: Duration,

    pub cache_sync_attempts: u32,

    #[serde(deserialize_with = "deserialize_duration")]
    pub cache_sync_timeout: Duration,

    /// Bind address of the health and metrics server
    pub health_addr: SocketAddr,

    /// Inject the nginx rewrite target on path routed Ingresses
    pub ingress_path_rewrite: bool,

    /// Component name reported on Kubernetes events
    pub reporter: String,

    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            sync_period: Duration::from_secs(15),
            max_concurrent_reconciles: 10,
            status_retry_steps: 5,
            requeue_base_delay: Duration::from_millis(5),
            requeue_max_delay: Duration::from_secs(1000),
            cache_sync_interval: Duration::from_secs(5),
            cache_sync_attempts: 5,
            cache_sync_timeout: Duration::from_secs(15),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 30235)),
            ingress_path_rewrite: false,
            reporter: "octops-gameserver-controller".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::ConfigError(
                "maxConcurrentReconciles must be at least 1".to_string(),
            ));
        }
        if self.sync_period.is_zero() {
            return Err(Error::ConfigError("syncPeriod must be positive".to_string()));
        }
        if self.requeue_base_delay > self.requeue_max_delay {
            return Err(Error::ConfigError(
                "requeueBaseDelay must not exceed requeueMaxDelay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Flags of the `run` subcommand
#[derive(Parser, Debug, Default)]
pub struct ControllerArgs {
    /// YAML config file providing defaults for every other flag
    #[arg(long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Namespace to watch (all namespaces when omitted)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Minimum frequency at which watched GameServers are reconciled, e.g. 15s
    #[arg(long, env = "SYNC_PERIOD", value_parser = parse_duration)]
    pub sync_period: Option<Duration>,

    #[arg(long, env = "MAX_CONCURRENT_RECONCILES")]
    pub max_concurrent_reconciles: Option<usize>,

    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS")]
    pub health_addr: Option<SocketAddr>,

    /// Add nginx rewrite annotations to path routed Ingresses
    #[arg(long, env = "INGRESS_PATH_REWRITE")]
    pub ingress_path_rewrite: bool,

    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

impl ControllerArgs {
    /// Resolve the effective configuration
    pub fn into_config(self) -> Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)?,
            None => ControllerConfig::default(),
        };

        if let Some(namespace) = self.namespace {
            config.namespace = Some(namespace);
        }
        if let Some(period) = self.sync_period {
            config.sync_period = period;
        }
        if let Some(max) = self.max_concurrent_reconciles {
            config.max_concurrent_reconciles = max;
        }
        if let Some(addr) = self.health_addr {
            config.health_addr = addr;
        }
        if self.ingress_path_rewrite {
            config.ingress_path_rewrite = true;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse durations written as `500ms`, `15s`, `1m30s` or `2h`
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    if value.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {value:?}"))?;
        if digits == 0 {
            return Err(format!("invalid duration {value:?}"));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("invalid duration {value:?}: {e}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3600)),
            other => return Err(format!("unknown unit {other:?} in duration {value:?}")),
        };
        total = total.saturating_add(unit);
        rest = &rest[unit_len..];
    }

    Ok(total)
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
