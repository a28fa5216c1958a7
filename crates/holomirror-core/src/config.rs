//! Configuration loading and typed config structures for Holomirror.
//!
//! Configuration is read from an optional YAML file (`holomirror.yaml` by
//! default) whose structure mirrors [`HolomirrorConfig`]. Every field has a
//! default, so an empty file, or no file at all, yields a working
//! configuration. `HOLOMIRROR_*` environment variables override individual
//! values after the file is parsed.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held a value that does not parse.
    #[error("invalid value for {key}: {message}")]
    Env {
        /// The offending variable name.
        key: String,
        /// Parse failure description.
        message: String,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level Holomirror configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HolomirrorConfig {
    /// Bind address of the gateway.
    #[serde(default)]
    pub server: ServerSection,

    /// Per-worker Mirror parameters.
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// Observe/inject channel behaviour.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Metabolism sampling loop parameters.
    #[serde(default)]
    pub metabolism: MetabolismConfig,

    /// Graceful shutdown parameters.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Synthetic demo workers started by the server binary.
    #[serde(default)]
    pub demo: DemoConfig,
}

impl HolomirrorConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Env`] if an override does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without consulting the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply `HOLOMIRROR_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// Recognised keys: `HOLOMIRROR_HOST`, `HOLOMIRROR_PORT`,
    /// `HOLOMIRROR_MAX_HISTORY`, `HOLOMIRROR_BROADCAST_TIMEOUT_MS`,
    /// `HOLOMIRROR_MAX_LAG_EVENTS`, `HOLOMIRROR_DRAIN_TIMEOUT_MS`,
    /// `HOLOMIRROR_AUTH_REQUIRED`, `HOLOMIRROR_AUTH_TOKEN`,
    /// `HOLOMIRROR_HEARTBEAT_SECS`, `HOLOMIRROR_IDLE_TIMEOUT_SECS`,
    /// `HOLOMIRROR_LOG_LEVEL`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOLOMIRROR_HOST") {
            self.server.host = host;
        }
        override_parsed(&lookup, "HOLOMIRROR_PORT", &mut self.server.port)?;
        override_parsed(&lookup, "HOLOMIRROR_MAX_HISTORY", &mut self.mirror.max_history)?;
        override_parsed(
            &lookup,
            "HOLOMIRROR_BROADCAST_TIMEOUT_MS",
            &mut self.mirror.broadcast_timeout_ms,
        )?;
        override_parsed(&lookup, "HOLOMIRROR_MAX_LAG_EVENTS", &mut self.mirror.max_lag_events)?;
        override_parsed(
            &lookup,
            "HOLOMIRROR_DRAIN_TIMEOUT_MS",
            &mut self.shutdown.drain_timeout_ms,
        )?;
        override_parsed(&lookup, "HOLOMIRROR_AUTH_REQUIRED", &mut self.gateway.auth_required)?;
        if let Some(token) = lookup("HOLOMIRROR_AUTH_TOKEN") {
            self.gateway.auth_token = Some(token);
        }
        override_parsed(
            &lookup,
            "HOLOMIRROR_HEARTBEAT_SECS",
            &mut self.gateway.heartbeat_interval_secs,
        )?;
        override_parsed(
            &lookup,
            "HOLOMIRROR_IDLE_TIMEOUT_SECS",
            &mut self.gateway.idle_timeout_secs,
        )?;
        if let Some(level) = lookup("HOLOMIRROR_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Reject combinations that would make the gateway misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mirror.broadcast_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "mirror.broadcast_timeout_ms must be greater than 0".to_owned(),
            ));
        }
        if self.mirror.max_lag_events == 0 {
            return Err(ConfigError::Invalid(
                "mirror.max_lag_events must be greater than 0".to_owned(),
            ));
        }
        if self.metabolism.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "metabolism.interval_ms must be greater than 0".to_owned(),
            ));
        }
        if self.gateway.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.heartbeat_interval_secs must be greater than 0".to_owned(),
            ));
        }
        if self.gateway.auth_required && self.gateway.auth_token.is_none() {
            return Err(ConfigError::Invalid(
                "gateway.auth_required is set but gateway.auth_token is missing".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Parse an override into `slot` when `key` is present.
fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: core::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
            key: key.to_owned(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

/// Gateway bind address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Parameters of one worker's Mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MirrorConfig {
    /// Maximum number of events kept for replay.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Per-send timeout for replay and live fan-out, in milliseconds.
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,

    /// Frames an observer may have queued before further sends block and
    /// time out, which detaches it.
    #[serde(default = "default_max_lag_events")]
    pub max_lag_events: usize,
}

impl MirrorConfig {
    /// The per-send timeout as a [`Duration`].
    pub const fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            max_lag_events: default_max_lag_events(),
        }
    }
}

/// Observe and inject channel behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewaySection {
    /// Send `{"type":"ping"}` after this many seconds without outbound
    /// traffic on an observe socket.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Close an observe socket after this many seconds without inbound
    /// traffic. `0` disables the check.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Whether the inject endpoint requires a bearer token.
    #[serde(default)]
    pub auth_required: bool,

    /// Shared token accepted on the inject endpoint.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl GatewaySection {
    /// Heartbeat window as a [`Duration`].
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Idle disconnect threshold, or `None` when disabled.
    pub const fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_secs))
        }
    }
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            auth_required: false,
            auth_token: None,
        }
    }
}

/// Metabolism sampling loop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MetabolismConfig {
    /// Milliseconds between samples.
    #[serde(default = "default_metabolism_interval_ms")]
    pub interval_ms: u64,

    /// Backlog depth that maps to a pressure of 100.
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: u64,
}

impl MetabolismConfig {
    /// Sampling interval as a [`Duration`].
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for MetabolismConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_metabolism_interval_ms(),
            backlog_capacity: default_backlog_capacity(),
        }
    }
}

/// Graceful shutdown parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for in-flight broadcasts, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl ShutdownConfig {
    /// Drain timeout as a [`Duration`].
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Synthetic demo workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DemoConfig {
    /// Number of synthetic workers to register at startup.
    #[serde(default = "default_demo_workers")]
    pub workers: u32,

    /// Milliseconds a synthetic job takes.
    #[serde(default = "default_job_interval_ms")]
    pub job_interval_ms: u64,
}

impl DemoConfig {
    /// Job duration as a [`Duration`].
    pub const fn job_interval(&self) -> Duration {
        Duration::from_millis(self.job_interval_ms)
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            workers: default_demo_workers(),
            job_interval_ms: default_job_interval_ms(),
        }
    }
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8080
}

const fn default_max_history() -> usize {
    100
}

const fn default_broadcast_timeout_ms() -> u64 {
    100
}

const fn default_max_lag_events() -> usize {
    1000
}

const fn default_heartbeat_interval_secs() -> u64 {
    30
}

const fn default_idle_timeout_secs() -> u64 {
    120
}

const fn default_metabolism_interval_ms() -> u64 {
    1000
}

const fn default_backlog_capacity() -> u64 {
    1000
}

const fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    String::from("info")
}

const fn default_demo_workers() -> u32 {
    1
}

const fn default_job_interval_ms() -> u64 {
    250
}
