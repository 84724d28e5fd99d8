//! Connection descriptors and client configuration

use crate::tls::TlsOptions;
use crate::{Error, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Sentinel backend name asking for automatic selection
pub const AUTO_BACKEND: &str = "auto";

/// The transport implementations a descriptor can be served by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Pooled AMQP connections, single non-blocking get per fetch
    Native,
    /// Plain AMQP connection per operation, bounded consume per fetch
    Amqp,
    /// As `Amqp`, over TLS
    AmqpTls,
    /// Redis list push / result key get
    Redis,
}

impl BackendKind {
    /// Every backend, in no particular order
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Native,
        BackendKind::Amqp,
        BackendKind::AmqpTls,
        BackendKind::Redis,
    ];

    /// Canonical name of the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Amqp => "amqp",
            BackendKind::AmqpTls => "amqp-tls",
            BackendKind::Redis => "redis",
        }
    }

    /// Whether the backend can carry a TLS connection
    pub fn supports_tls(&self) -> bool {
        matches!(self, BackendKind::AmqpTls)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "native" => Ok(BackendKind::Native),
            "amqp" => Ok(BackendKind::Amqp),
            "amqp-tls" | "amqps" => Ok(BackendKind::AmqpTls),
            "redis" => Ok(BackendKind::Redis),
            _ => Err(Error::UnknownBackend(s.to_string())),
        }
    }
}

/// Transport parameters for one broker
///
/// A descriptor is built once and then only read. The routing key of a single
/// submission is passed alongside it rather than written into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub login: String,

    #[serde(default)]
    pub password: String,

    /// AMQP virtual host, or Redis database index
    #[serde(default)]
    pub vhost: String,

    /// Exchange to publish to (the list key for Redis)
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Queue bound to the exchange
    #[serde(default = "default_binding")]
    pub binding: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Backend name, or `auto`
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Publish tasks with delivery mode 2
    #[serde(default)]
    pub persistent_messages: bool,

    /// Result queue expiry in milliseconds, 0 disables it
    #[serde(default)]
    pub result_expire: u64,

    /// Leave fetched results in the broker for repeat reads
    ///
    /// When false, the first handle to fetch a result removes it and any other
    /// handle for the same task keeps seeing "not ready".
    #[serde(default)]
    pub keep_messages_in_queue: bool,

    /// Declare per-task result queues as durable
    #[serde(default = "default_true")]
    pub durable_result_queue: bool,

    /// How long one consume-based fetch waits for a message, in milliseconds
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    #[serde(default, skip_serializing_if = "TlsOptions::is_empty")]
    pub ssl_options: TlsOptions,
}

fn default_exchange() -> String {
    "celery".to_string()
}

fn default_binding() -> String {
    "celery".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_backend() -> String {
    AUTO_BACKEND.to_string()
}

fn default_true() -> bool {
    true
}

fn default_wait_timeout_ms() -> u64 {
    1000
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self {
            host: String::new(),
            login: String::new(),
            password: String::new(),
            vhost: String::new(),
            exchange: default_exchange(),
            binding: default_binding(),
            port: default_port(),
            backend: default_backend(),
            persistent_messages: false,
            result_expire: 0,
            keep_messages_in_queue: false,
            durable_result_queue: default_true(),
            wait_timeout_ms: default_wait_timeout_ms(),
            ssl_options: TlsOptions::default(),
        }
    }
}

impl ConnectionDescriptor {
    /// Create a descriptor with credentials and defaults for everything else
    pub fn new(
        host: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
        vhost: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            login: login.into(),
            password: password.into(),
            vhost: vhost.into(),
            ..Default::default()
        }
    }

    /// Parse a broker URL
    ///
    /// `amqp://` leaves the backend on `auto`, `amqps://` selects the TLS
    /// backend and `redis://` the Redis backend. The path is the vhost (or the
    /// Redis database index).
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| Error::Configuration(format!("invalid broker URL {}: {}", raw, e)))?;

        let (backend, port) = match url.scheme() {
            "amqp" => (AUTO_BACKEND, 5672),
            "amqps" => (BackendKind::AmqpTls.as_str(), 5671),
            "redis" => (BackendKind::Redis.as_str(), 6379),
            other => {
                return Err(Error::Configuration(format!(
                    "unsupported broker URL scheme: {}",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| Error::Configuration(format!("broker URL has no host: {}", raw)))?;

        let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
        let vhost = decode(url.path().strip_prefix('/').unwrap_or(url.path()));

        Ok(Self {
            host: host.to_string(),
            login: decode(url.username()),
            password: decode(url.password().unwrap_or_default()),
            vhost,
            port: url.port().unwrap_or(port),
            backend: backend.to_string(),
            ..Default::default()
        })
    }

    /// Set the exchange
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Set the queue binding
    pub fn binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = binding.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Pin the backend by name
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Publish tasks persistently
    pub fn persistent_messages(mut self, persistent: bool) -> Self {
        self.persistent_messages = persistent;
        self
    }

    /// Set the result queue expiry in milliseconds
    pub fn result_expire(mut self, millis: u64) -> Self {
        self.result_expire = millis;
        self
    }

    /// Keep fetched results in the broker
    pub fn keep_messages_in_queue(mut self, keep: bool) -> Self {
        self.keep_messages_in_queue = keep;
        self
    }

    /// Set the per-fetch wait of the consume-based backend
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set TLS options
    pub fn ssl_options(mut self, options: TlsOptions) -> Self {
        self.ssl_options = options;
        self
    }

    /// The explicitly requested backend name, if any
    pub fn explicit_backend(&self) -> Option<&str> {
        let name = self.backend.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(AUTO_BACKEND) {
            None
        } else {
            Some(name)
        }
    }

    /// Whether the caller asked for an encrypted transport
    pub fn wants_tls(&self) -> bool {
        !self.ssl_options.is_empty()
    }

    /// Result queue TTL, if one is configured
    pub fn result_ttl(&self) -> Option<Duration> {
        (self.result_expire > 0).then(|| Duration::from_millis(self.result_expire))
    }

    /// Bounded wait for one consume-based fetch
    pub fn wait_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Whether a fetched result should be deleted from the broker
    pub fn remove_after_read(&self) -> bool {
        !self.keep_messages_in_queue
    }

    /// Render the AMQP URI for this descriptor
    pub fn amqp_uri(&self) -> String {
        let scheme = if self.wants_tls() { "amqps" } else { "amqp" };
        let vhost = if self.vhost.is_empty() { "/" } else { &self.vhost };
        let encode = |s: &str| utf8_percent_encode(s, NON_ALPHANUMERIC).to_string();

        if self.login.is_empty() {
            format!("{}://{}:{}/{}", scheme, self.host, self.port, encode(vhost))
        } else {
            format!(
                "{}://{}:{}@{}:{}/{}",
                scheme,
                encode(&self.login),
                encode(&self.password),
                self.host,
                self.port,
                encode(vhost)
            )
        }
    }

    /// Render the Redis URL for this descriptor
    pub fn redis_url(&self) -> String {
        let db: u32 = self.vhost.trim_start_matches('/').parse().unwrap_or(0);
        let encode = |s: &str| utf8_percent_encode(s, NON_ALPHANUMERIC).to_string();

        let auth = match (self.login.is_empty(), self.password.is_empty()) {
            (true, true) => String::new(),
            (true, false) => format!(":{}@", encode(&self.password)),
            _ => format!("{}:{}@", encode(&self.login), encode(&self.password)),
        };

        format!("redis://{}{}:{}/{}", auth, self.host, self.port, db)
    }

    /// Human-readable endpoint, without credentials
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.vhost)
    }
}

/// Main configuration for a Celeriac client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CeleriacConfig {
    /// Task broker
    #[serde(default)]
    pub broker: ConnectionDescriptor,

    /// Result backend (uses the broker if not specified)
    #[serde(default)]
    pub backend: Option<ConnectionDescriptor>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl CeleriacConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Configuration(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Merge configuration from file and environment, environment wins
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// The result backend descriptor, defaulting to the broker
    pub fn backend_descriptor(&self) -> &ConnectionDescriptor {
        self.backend.as_ref().unwrap_or(&self.broker)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CELERIAC_BROKER_URL") {
            self.broker = ConnectionDescriptor::from_url(&url)?;
        }
        if let Ok(backend) = std::env::var("CELERIAC_BROKER_BACKEND") {
            self.broker.backend = backend;
        }
        if let Ok(url) = std::env::var("CELERIAC_BACKEND_URL") {
            self.backend = Some(ConnectionDescriptor::from_url(&url)?);
        }
        if let Ok(level) = std::env::var("CELERIAC_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty or compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
