//! Client configuration.
//!
//! A [`ClientConfig`] starts from defaults and is adjusted with `with_*`
//! builders. Deployments can also overlay a YAML file and `TRIBUTARY_*`
//! environment variables on top of the defaults; durations in the overlay
//! are expressed in milliseconds.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tributary_wire::{Credentials, DEFAULT_MAX_FRAME_SIZE};

use crate::error::{ClientError, ClientResult};

/// Environment variable naming a YAML overlay file.
pub const CONFIG_PATH_ENV: &str = "TRIBUTARY_CLIENT_CONFIG";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name announced to the server when the connection is identified.
    pub client_id: String,
    /// Server address (`host:port`).
    pub endpoint: String,
    /// Default credentials, sent on the authentication exchange and with
    /// every operation.
    pub credentials: Option<Credentials>,
    /// Bound on establishing the TCP connection and authenticating.
    pub connect_timeout: Duration,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
    /// Quiet period after which a heartbeat request is sent.
    pub heartbeat_interval: Duration,
    /// How long to wait for any traffic after a heartbeat request before the
    /// connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Time an operation may wait for its reply before it is retried.
    pub operation_timeout: Duration,
    /// Retries per operation after timeouts, reconnects and `NotHandled`.
    pub max_retries: u32,
    /// Maximum number of pending operations.
    pub max_queue_size: usize,
    /// Oldest an operation may be when it is replayed after a reconnect.
    pub max_queue_time: Duration,
    /// Slice size when the caller does not pick one.
    pub default_batch_size: u32,
    /// Largest slice a caller may request.
    pub max_batch_size: u32,
    /// Largest frame body accepted from the server.
    pub max_frame_size: u32,
    /// Whether reads follow link events by default.
    pub resolve_links: bool,
    /// Whether requests must be served by the master node.
    pub require_master: bool,
}

/// Reconnection policy.
///
/// Delays grow exponentially from `base_delay` and are capped at
/// `max_delay`, with jitter applied to each wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum consecutive reconnection attempts; `None` retries forever.
    pub max_reconnections: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_reconnections: Some(10),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "tributary-client".to_string(),
            endpoint: "127.0.0.1:1113".to_string(),
            credentials: None,
            connect_timeout: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_millis(750),
            heartbeat_timeout: Duration::from_millis(1500),
            operation_timeout: Duration::from_secs(7),
            max_retries: 10,
            max_queue_size: 5000,
            max_queue_time: Duration::from_secs(60),
            default_batch_size: 100,
            max_batch_size: 4096,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            resolve_links: true,
            require_master: false,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Sets the client id announced to the server.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the default credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the maximum number of reconnection attempts.
    pub fn with_max_reconnections(mut self, max: u32) -> Self {
        self.reconnect.max_reconnections = Some(max);
        self
    }

    /// Reconnects forever.
    pub fn with_unlimited_reconnections(mut self) -> Self {
        self.reconnect.max_reconnections = None;
        self
    }

    /// Sets the heartbeat interval and timeout.
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_max_queue_time(mut self, time: Duration) -> Self {
        self.max_queue_time = time;
        self
    }

    /// Sets the default and maximum slice sizes.
    pub fn with_batch_sizes(mut self, default_size: u32, max_size: u32) -> Self {
        self.default_batch_size = default_size;
        self.max_batch_size = max_size;
        self
    }

    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_resolve_links(mut self, resolve: bool) -> Self {
        self.resolve_links = resolve;
        self
    }

    pub fn with_require_master(mut self, require: bool) -> Self {
        self.require_master = require;
        self
    }

    /// Checks that the settings are usable.
    pub fn validate(&self) -> ClientResult<()> {
        if self.endpoint.is_empty() {
            return Err(ClientError::Config("endpoint must not be empty".to_string()));
        }
        if self.max_batch_size == 0 || self.max_batch_size > i32::MAX as u32 {
            return Err(ClientError::Config(format!(
                "max_batch_size must be in 1..={}",
                i32::MAX
            )));
        }
        if self.default_batch_size == 0 || self.default_batch_size > self.max_batch_size {
            return Err(ClientError::Config(format!(
                "default_batch_size must be in 1..={}",
                self.max_batch_size
            )));
        }
        if self.max_queue_size == 0 {
            return Err(ClientError::Config("max_queue_size must be positive".to_string()));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_timeout.is_zero() {
            return Err(ClientError::Config(
                "heartbeat interval and timeout must be positive".to_string(),
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(ClientError::Config(
                "operation_timeout must be positive".to_string(),
            ));
        }
        if self.reconnect.base_delay > self.reconnect.max_delay {
            return Err(ClientError::Config(
                "reconnect base_delay exceeds max_delay".to_string(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Overlays
    // ========================================================================

    /// Loads defaults, then the YAML overlay at `config_path` (or the file
    /// named by `TRIBUTARY_CLIENT_CONFIG`), then environment variables.
    pub fn from_env_or_yaml(config_path: Option<&Path>) -> ClientResult<Self> {
        let mut config = Self::default();
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(Into::into));
        if let Some(path) = path {
            let contents = fs::read_to_string(&path).map_err(|e| {
                ClientError::Config(format!("read client config {}: {e}", path.display()))
            })?;
            config = config.overlay_yaml(&contents)?;
        }
        config = config.overlay_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies a YAML overlay to this configuration.
    pub fn overlay_yaml(mut self, contents: &str) -> ClientResult<Self> {
        let overlay: ClientConfigOverride = serde_yaml::from_str(contents)
            .map_err(|e| ClientError::Config(format!("parse client config yaml: {e}")))?;
        overlay.apply(&mut self);
        Ok(self)
    }

    /// Applies `TRIBUTARY_*` variables obtained through `lookup`.
    pub fn overlay_env<F>(mut self, lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TRIBUTARY_ENDPOINT") {
            self.endpoint = value;
        }
        if let Some(value) = lookup("TRIBUTARY_CLIENT_ID") {
            self.client_id = value;
        }
        match (lookup("TRIBUTARY_USERNAME"), lookup("TRIBUTARY_PASSWORD")) {
            (Some(username), Some(password)) => {
                self.credentials = Some(Credentials::new(username, password));
            }
            (None, None) => {}
            _ => {
                return Err(ClientError::Config(
                    "TRIBUTARY_USERNAME and TRIBUTARY_PASSWORD must be set together".to_string(),
                ));
            }
        }
        if let Some(ms) = parse_env(&lookup, "TRIBUTARY_OPERATION_TIMEOUT_MS")? {
            self.operation_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env(&lookup, "TRIBUTARY_CONNECT_TIMEOUT_MS")? {
            self.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(value) = parse_env(&lookup, "TRIBUTARY_MAX_RECONNECTIONS")? {
            self.reconnect.max_reconnections = Some(value);
        }
        if let Some(value) = parse_env(&lookup, "TRIBUTARY_MAX_RETRIES")? {
            self.max_retries = value;
        }
        Ok(self)
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> ClientResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("{key}: invalid value {raw:?}"))),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct ClientConfigOverride {
    client_id: Option<String>,
    endpoint: Option<String>,
    username: Option<String>,
    password: Option<String>,
    connect_timeout_ms: Option<u64>,
    max_reconnections: Option<u32>,
    reconnect_forever: Option<bool>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_timeout_ms: Option<u64>,
    operation_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    max_queue_size: Option<usize>,
    max_queue_time_ms: Option<u64>,
    default_batch_size: Option<u32>,
    max_batch_size: Option<u32>,
    max_frame_size: Option<u32>,
    resolve_links: Option<bool>,
    require_master: Option<bool>,
}

impl ClientConfigOverride {
    fn apply(self, config: &mut ClientConfig) {
        if let Some(value) = self.client_id {
            config.client_id = value;
        }
        if let Some(value) = self.endpoint {
            config.endpoint = value;
        }
        if let Some(username) = self.username {
            config.credentials = Some(Credentials::new(
                username,
                self.password.unwrap_or_default(),
            ));
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(value) = self.max_reconnections {
            config.reconnect.max_reconnections = Some(value);
        }
        if self.reconnect_forever == Some(true) {
            config.reconnect.max_reconnections = None;
        }
        if let Some(ms) = self.reconnect_base_delay_ms {
            config.reconnect.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.reconnect_max_delay_ms {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.heartbeat_timeout_ms {
            config.heartbeat_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.operation_timeout_ms {
            config.operation_timeout = Duration::from_millis(ms);
        }
        if let Some(value) = self.max_retries {
            config.max_retries = value;
        }
        if let Some(value) = self.max_queue_size {
            config.max_queue_size = value;
        }
        if let Some(ms) = self.max_queue_time_ms {
            config.max_queue_time = Duration::from_millis(ms);
        }
        if let Some(value) = self.default_batch_size {
            config.default_batch_size = value;
        }
        if let Some(value) = self.max_batch_size {
            config.max_batch_size = value;
        }
        if let Some(value) = self.max_frame_size {
            config.max_frame_size = value;
        }
        if let Some(value) = self.resolve_links {
            config.resolve_links = value;
        }
        if let Some(value) = self.require_master {
            config.require_master = value;
        }
    }
}
