//! Client configuration.
use std::time::Duration;

use crate::error_strategy::ErrorStrategy;
use crate::values::BooleanCastStrategy;

/// Everything needed to reach the remote server.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Base URL of the remote server, including the API prefix
    /// (e.g. `https://flags.example.com/api`).
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl ConnectionInfo {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> ConnectionInfo {
        ConnectionInfo {
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Authentication headers attached to every remote call.
    pub(crate) fn headers(&self) -> [(&'static str, String); 2] {
        [
            ("Flagstream-Client-Id", self.client_id.clone()),
            ("Flagstream-Client-Secret", self.client_secret.clone()),
        ]
    }
}

/// Cache and synchronization behaviour.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether the cache should be used (when possible) to answer queries.
    pub enabled: bool,
    /// Interval at which the background task re-fetches all cached features (poll mode only).
    pub refresh_interval: Duration,
    /// Whether to keep the cache in sync over a server-sent-event connection instead of polling.
    pub use_server_sent_events: bool,
    /// Maximum expected time between two server heartbeats on the streaming connection.
    pub keep_alive_interval: Duration,
}

impl CacheConfig {
    /// Default value for [`CacheConfig::refresh_interval`].
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);
    /// Default value for [`CacheConfig::keep_alive_interval`].
    pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(25);

    pub fn new() -> CacheConfig {
        CacheConfig::default()
    }

    pub fn enabled(mut self, enabled: bool) -> CacheConfig {
        self.enabled = enabled;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> CacheConfig {
        self.refresh_interval = interval;
        self
    }

    pub fn use_server_sent_events(mut self, use_sse: bool) -> CacheConfig {
        self.use_server_sent_events = use_sse;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> CacheConfig {
        self.keep_alive_interval = interval;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            enabled: false,
            refresh_interval: CacheConfig::DEFAULT_REFRESH_INTERVAL,
            use_server_sent_events: false,
            keep_alive_interval: CacheConfig::DEFAULT_KEEP_ALIVE_INTERVAL,
        }
    }
}

/// Configuration shared by the synchronization services and the streaming client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connection: ConnectionInfo,
    pub cache: CacheConfig,
    /// Remote call timeout, overridable per request.
    pub call_timeout: Duration,
    /// Error strategy used when no query or feature level override applies.
    pub error_strategy: ErrorStrategy,
    /// Boolean cast strategy used when no query or feature level override applies.
    pub cast_strategy: BooleanCastStrategy,
}

impl ClientConfig {
    /// Default value for [`ClientConfig::call_timeout`].
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(connection: ConnectionInfo) -> ClientConfig {
        ClientConfig {
            connection,
            cache: CacheConfig::default(),
            call_timeout: ClientConfig::DEFAULT_CALL_TIMEOUT,
            error_strategy: ErrorStrategy::null_value(),
            cast_strategy: BooleanCastStrategy::Lax,
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> ClientConfig {
        self.cache = cache;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> ClientConfig {
        self.call_timeout = timeout;
        self
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> ClientConfig {
        self.error_strategy = strategy;
        self
    }

    pub fn with_cast_strategy(mut self, strategy: BooleanCastStrategy) -> ClientConfig {
        self.cast_strategy = strategy;
        self
    }
}
