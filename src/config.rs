//! HCL configuration for the sentinel binary
//!
//! Every field has a default, so an empty file (or no file) yields a
//! working local setup. Durations are written as `"5s"` or `"500ms"`.

use crate::emitter::EmitterConfig;
use crate::engine::AlertEngineConfig;
use crate::error::{Result, SentinelError};
use crate::monitor::MonitorConfig;
use crate::provider::nats::NatsConfig;
use crate::shipper::{RetryPolicy, ShipperConfig};
use crate::types::{DeliverPolicy, Topic};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "cache-sentinel.hcl";

/// The built-in defaults, as a config file
pub const DEFAULT_CONFIG_HCL: &str = r#"broker {
  url         = "nats://127.0.0.1:4222"
  stream_name = "CACHE_EVENTS"
}

alerting {
  group               = "alert-consumer-group"
  deliver             = "new"
  heartbeat_threshold = "10s"
  scan_interval       = "5s"
  topics              = ["cache.log.error", "cache.log.warn", "cache.heartbeat", "cache.registration"]
}

shipper {
  group           = "elastic-consumer-group"
  deliver         = "all"
  store_url       = "http://localhost:9200"
  index           = "cache-logs"
  max_retries     = 3
  retry_delay     = "5s"
  request_timeout = "30s"
}

emitter {
  heartbeat_interval = "5s"
  slow_threshold     = "100ms"
  shutdown_pause     = "500ms"
  shutdown_linger    = "2s"
}

shutdown_grace = "5s"
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub shipper: ShipperSettings,
    #[serde(default)]
    pub emitter: EmitterSettings,
    /// Wait for background tasks on shutdown before aborting them
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub stream_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub group: String,
    pub deliver: DeliverPolicy,
    #[serde(with = "duration_serde")]
    pub heartbeat_threshold: Duration,
    #[serde(with = "duration_serde")]
    pub scan_interval: Duration,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShipperSettings {
    pub group: String,
    pub deliver: DeliverPolicy,
    pub store_url: String,
    pub index: String,
    pub max_retries: u32,
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmitterSettings {
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_serde")]
    pub slow_threshold: Duration,
    #[serde(with = "duration_serde")]
    pub shutdown_pause: Duration,
    #[serde(with = "duration_serde")]
    pub shutdown_linger: Duration,
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            alerting: AlertingConfig::default(),
            shipper: ShipperSettings::default(),
            emitter: EmitterSettings::default(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let nats = NatsConfig::default();
        Self {
            url: nats.url,
            stream_name: nats.stream_name,
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        let engine = AlertEngineConfig::default();
        Self {
            group: engine.group,
            deliver: engine.deliver_policy,
            heartbeat_threshold: engine.monitor.threshold,
            scan_interval: engine.monitor.scan_interval,
            topics: engine.topics,
        }
    }
}

impl Default for ShipperSettings {
    fn default() -> Self {
        let shipper = ShipperConfig::default();
        Self {
            group: shipper.group,
            deliver: shipper.deliver_policy,
            store_url: "http://localhost:9200".to_string(),
            index: shipper.index,
            max_retries: shipper.retry.max_attempts,
            retry_delay: shipper.retry.delay,
            request_timeout: Duration::from_secs(30),
            topics: shipper.topics,
        }
    }
}

impl Default for EmitterSettings {
    fn default() -> Self {
        let emitter = EmitterConfig::default();
        Self {
            heartbeat_interval: emitter.heartbeat_interval,
            slow_threshold: emitter.slow_threshold,
            shutdown_pause: emitter.shutdown_pause,
            shutdown_linger: emitter.shutdown_linger,
        }
    }
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        if let Some(v) = s.strip_suffix("ms") {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| format!("invalid duration '{s}': {e}"));
        }
        if let Some(v) = s.strip_suffix('s') {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| format!("invalid duration '{s}': {e}"));
        }
        Err(format!("unknown duration format: '{s}' (use '5s' or '500ms')"))
    }
}

impl SentinelConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| SentinelError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_hcl(&src)
            .map_err(|e| SentinelError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_hcl(src: &str) -> Result<Self> {
        let cfg: SentinelConfig =
            hcl::from_str(src).map_err(|e| SentinelError::Config(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `path` if given, else `./cache-sentinel.hcl` if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("alerting.heartbeat_threshold", self.alerting.heartbeat_threshold),
            ("alerting.scan_interval", self.alerting.scan_interval),
            ("shipper.retry_delay", self.shipper.retry_delay),
            ("shipper.request_timeout", self.shipper.request_timeout),
            ("emitter.heartbeat_interval", self.emitter.heartbeat_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(SentinelError::Config(format!("{name} must be greater than zero")));
            }
        }

        if self.shipper.max_retries == 0 {
            return Err(SentinelError::Config(
                "shipper.max_retries must be at least 1".to_string(),
            ));
        }

        let names = [
            ("alerting.group", &self.alerting.group),
            ("shipper.group", &self.shipper.group),
            ("shipper.index", &self.shipper.index),
            ("broker.stream_name", &self.broker.stream_name),
        ];
        for (name, value) in names {
            if value.trim().is_empty() {
                return Err(SentinelError::Config(format!("{name} cannot be empty")));
            }
        }

        for (name, topics) in [
            ("alerting.topics", &self.alerting.topics),
            ("shipper.topics", &self.shipper.topics),
        ] {
            if topics.is_empty() {
                return Err(SentinelError::Config(format!("{name} cannot be empty")));
            }
            if let Some(unknown) = topics.iter().find(|t| Topic::parse(t).is_none()) {
                return Err(SentinelError::Config(format!(
                    "{name}: unknown topic '{unknown}'"
                )));
            }
        }

        Ok(())
    }

    pub fn nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.broker.url.clone(),
            stream_name: self.broker.stream_name.clone(),
            ..NatsConfig::default()
        }
    }

    pub fn engine_config(&self) -> AlertEngineConfig {
        AlertEngineConfig {
            group: self.alerting.group.clone(),
            deliver_policy: self.alerting.deliver,
            topics: self.alerting.topics.clone(),
            monitor: MonitorConfig {
                threshold: self.alerting.heartbeat_threshold,
                scan_interval: self.alerting.scan_interval,
            },
            shutdown_grace: self.shutdown_grace,
        }
    }

    pub fn shipper_config(&self) -> ShipperConfig {
        ShipperConfig {
            group: self.shipper.group.clone(),
            deliver_policy: self.shipper.deliver,
            topics: self.shipper.topics.clone(),
            index: self.shipper.index.clone(),
            retry: RetryPolicy {
                max_attempts: self.shipper.max_retries,
                delay: self.shipper.retry_delay,
            },
        }
    }

    pub fn emitter_config(&self) -> EmitterConfig {
        EmitterConfig {
            heartbeat_interval: self.emitter.heartbeat_interval,
            slow_threshold: self.emitter.slow_threshold,
            shutdown_pause: self.emitter.shutdown_pause,
            shutdown_linger: self.emitter.shutdown_linger,
            stop_timeout: self.shutdown_grace,
        }
    }
}
