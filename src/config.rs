//! Monitor configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::error::ConfigError;

/// How the change detector discovers changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Scan every key each poll period and diff against the baseline.
    #[default]
    Polling,
    /// Subscribe to set-event notifications and coalesce them per period.
    Notification,
}

/// Compiled key-name filter.
///
/// Matches are anchored at the start of the key name; an empty pattern
/// matches every key.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    regex: Option<Regex>,
}

impl KeyFilter {
    /// Filter that accepts every key.
    pub fn all() -> Self {
        Self { regex: None }
    }

    /// Compile a filter pattern.
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            return Ok(Self::all());
        }
        let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
            ConfigError::InvalidFilter {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self { regex: Some(regex) })
    }

    /// Whether a key is monitored.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.as_ref().map_or(true, |regex| regex.is_match(key))
    }
}

/// Configuration for the whole service.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Store host name.
    pub redis_host: String,
    /// Store port.
    pub redis_port: u16,
    /// Store database index.
    pub redis_db: i64,
    /// Optional store password.
    pub redis_password: Option<String>,
    /// Detection / flush period.
    pub poll_period: Duration,
    /// Key-name filter pattern (empty matches all).
    pub key_filter: String,
    /// Detection strategy.
    pub mode: Mode,
    /// WebSocket listen address.
    pub ws_addr: SocketAddr,
    /// HTTP listen address (`None` disables the HTTP layer).
    pub http_addr: Option<SocketAddr>,
    /// Directory of dashboard assets served over HTTP.
    pub web_root: PathBuf,
    /// Upper bound on a single message write to one client.
    pub send_timeout: Duration,
    /// Time a new connection gets to complete the WebSocket upgrade.
    pub handshake_timeout: Duration,
}

impl MonitorConfig {
    /// Creates a configuration pointing at the given store.
    pub fn new(redis_host: impl Into<String>, redis_port: u16) -> Self {
        Self {
            redis_host: redis_host.into(),
            redis_port,
            redis_db: 0,
            redis_password: None,
            poll_period: Duration::from_millis(50),
            key_filter: String::new(),
            mode: Mode::Polling,
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            http_addr: Some(SocketAddr::from(([0, 0, 0, 0], 8000))),
            web_root: PathBuf::from("web"),
            send_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the database index.
    pub fn with_db(mut self, db: i64) -> Self {
        self.redis_db = db;
        self
    }

    /// Sets the store password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.redis_password = Some(password.into());
        self
    }

    /// Sets the poll period.
    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Sets the key filter pattern.
    pub fn with_key_filter(mut self, pattern: impl Into<String>) -> Self {
        self.key_filter = pattern.into();
        self
    }

    /// Sets the detection mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the WebSocket listen address.
    pub fn with_ws_addr(mut self, addr: SocketAddr) -> Self {
        self.ws_addr = addr;
        self
    }

    /// Sets (or disables) the HTTP listen address.
    pub fn with_http_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.http_addr = addr;
        self
    }

    /// Sets the web asset directory.
    pub fn with_web_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.web_root = root.into();
        self
    }

    /// Sets the per-client send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the upgrade deadline for new connections.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Store connection URL, `redis://[:password@]host:port/db`.
    ///
    /// IPv6 literals are wrapped in brackets.
    pub fn redis_url(&self) -> String {
        let host = if self.redis_host.contains(':') && !self.redis_host.starts_with('[') {
            format!("[{}]", self.redis_host)
        } else {
            self.redis_host.clone()
        };
        match &self.redis_password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(password),
                host,
                self.redis_port,
                self.redis_db
            ),
            None => format!("redis://{}:{}/{}", host, self.redis_port, self.redis_db),
        }
    }

    /// Check the configuration and compile the key filter.
    pub fn validate(&self) -> Result<KeyFilter, ConfigError> {
        if self.poll_period.is_zero() {
            return Err(ConfigError::InvalidPollPeriod);
        }
        KeyFilter::compile(&self.key_filter)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379)
    }
}
