//! Client-wide configuration consumed by the configuration context.

use std::collections::HashMap;
use std::time::Duration;

/// Default port for TLS key/value connections.
pub const DEFAULT_TLS_PORT: u16 = 11207;

/// Client-wide configuration shared by every bucket the client opens.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Require encrypted transport for every bucket, regardless of what the
    /// cluster advertises.
    pub use_tls: bool,

    /// TLS port used when a node descriptor does not advertise one.
    pub default_tls_port: u16,

    /// Connection pool settings handed to the pool factory.
    pub pool: PoolConfig,

    /// Retry settings for acquiring a live node.
    pub retry: RetryConfig,

    /// Bucket passwords, keyed by bucket name.
    bucket_passwords: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            use_tls: false,
            default_tls_port: DEFAULT_TLS_PORT,
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            bucket_passwords: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require encrypted transport client-wide.
    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        self
    }

    /// Set the fallback TLS port.
    pub fn with_default_tls_port(mut self, port: u16) -> Self {
        self.default_tls_port = port;
        self
    }

    /// Set connection pool configuration.
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set retry configuration.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Register the password for a bucket.
    pub fn with_bucket_password(
        mut self,
        bucket: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.bucket_passwords.insert(bucket.into(), password.into());
        self
    }

    /// Get the password for a bucket. Unknown buckets use an empty password.
    pub fn password_for(&self, bucket: &str) -> &str {
        self.bucket_passwords
            .get(bucket)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened eagerly.
    pub min_size: usize,

    /// Upper bound on open connections.
    pub max_size: usize,

    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,

    /// Timeout for a single send.
    pub send_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 2,
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_millis(2500),
        }
    }
}

impl PoolConfig {
    /// Create a pool config with the given bounds.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size: max_size.max(min_size),
            ..Default::default()
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

/// Bounded exponential backoff for acquiring a live node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of sampling rounds before giving up.
    pub max_attempts: u32,

    /// Base time unit; round `n` sleeps `backoff_unit * 2^n`.
    pub backoff_unit: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            backoff_unit: Duration::from_millis(1),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with the default round count and a custom unit.
    pub fn with_unit(backoff_unit: Duration) -> Self {
        Self {
            backoff_unit,
            ..Default::default()
        }
    }

    /// Set the number of sampling rounds.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sleep after the given zero-based round.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
    }

    /// The full backoff schedule, one entry per round.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |attempt| self.backoff(attempt))
    }

    /// Total sleep when every round fails.
    pub fn worst_case(&self) -> Duration {
        self.delays().fold(Duration::ZERO, Duration::saturating_add)
    }
}
