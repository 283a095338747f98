/// Configuration for the bridge and its transport
use std::time::Duration;

/// Default relay host
pub const DEFAULT_WS_HOST: &str = "localhost";

/// Default relay port
pub const DEFAULT_WS_PORT: u16 = 3055;

/// Tunables of the correlated request channel
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// How long a connection attempt may stay `Connecting` before it is aborted
    pub connect_timeout: Duration,

    /// Timeout window used when a caller does not pass one
    pub request_timeout: Duration,

    /// Renewals of the timeout window before a silent request is rejected
    pub timeout_extensions: u32,

    /// Base interval of the reconnect backoff
    pub base_backoff: Duration,

    /// Upper bound of the reconnect backoff
    pub max_backoff: Duration,

    /// Idle time after which the sweep evicts a pending request
    pub stale_after: Duration,

    /// Minimum time between two sweeps
    pub sweep_interval: Duration,

    /// Settled ids remembered for duplicate detection
    pub settled_history: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            timeout_extensions: crate::transport::DEFAULT_TIMEOUT_EXTENSIONS,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            stale_after: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            settled_history: 256,
        }
    }
}

impl TransportConfig {
    /// Longest a silent request waits for a window of `window`
    pub fn timeout_budget(&self, window: Duration) -> Duration {
        window.saturating_mul(self.timeout_extensions.saturating_add(1))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be greater than 0".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("request_timeout must be greater than 0".to_string());
        }

        if self.base_backoff.is_zero() {
            return Err("base_backoff must be greater than 0".to_string());
        }

        if self.max_backoff < self.base_backoff {
            return Err(format!(
                "max_backoff ({:?}) cannot be smaller than base_backoff ({:?})",
                self.max_backoff, self.base_backoff
            ));
        }

        let budget = self.timeout_budget(self.request_timeout);
        if self.stale_after <= budget {
            return Err(format!(
                "stale_after ({:?}) must exceed the full timeout budget ({:?})",
                self.stale_after, budget
            ));
        }

        Ok(())
    }
}

/// Process-level configuration of the MCP bridge
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Relay host
    pub host: String,

    /// Relay port
    pub port: u16,

    /// Channel joined right after start-up, if any
    pub channel: Option<String>,

    pub transport: TransportConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_WS_HOST.to_string(),
            port: DEFAULT_WS_PORT,
            channel: None,
            transport: TransportConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Build configuration from `DESIGNBRIDGE_*` environment variables
    ///
    /// - `DESIGNBRIDGE_WS_HOST` (default `localhost`)
    /// - `DESIGNBRIDGE_WS_PORT` (default `3055`)
    /// - `DESIGNBRIDGE_CHANNEL` (optional)
    /// - `DESIGNBRIDGE_REQUEST_TIMEOUT_MS` (default `30000`)
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BridgeConfig::from_env`] with an injectable variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(host) = lookup("DESIGNBRIDGE_WS_HOST").filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }

        if let Some(port) = lookup("DESIGNBRIDGE_WS_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|e| format!("Invalid DESIGNBRIDGE_WS_PORT {:?}: {}", port, e))?;
        }

        config.channel = lookup("DESIGNBRIDGE_CHANNEL")
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        if let Some(timeout) = lookup("DESIGNBRIDGE_REQUEST_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|e| {
                format!("Invalid DESIGNBRIDGE_REQUEST_TIMEOUT_MS {:?}: {}", timeout, e)
            })?;
            config.transport.request_timeout = Duration::from_millis(millis);

            // Keep the sweep behind the longer budget
            let budget = config.transport.timeout_budget(config.transport.request_timeout);
            if config.transport.stale_after <= budget {
                config.transport.stale_after = budget + config.transport.request_timeout;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host cannot be empty".to_string());
        }

        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }

        self.transport.validate()
    }
}
