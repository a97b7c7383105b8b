//! Client and resource configuration.
//!
//! All option types follow the builder pattern: construct with defaults,
//! then chain `with_*` setters.

use std::time::Duration;

/// Default control-plane port
pub const DEFAULT_PORT: u16 = 9000;
/// Default streaming-broker port
pub const DEFAULT_BROKER_PORT: u16 = 7766;
/// Hard upper bound on reconnection attempts, regardless of configuration
pub const MAX_RECONNECT_CAP: u32 = 9;

/// Strip a leading URL scheme from a host string.
///
/// The control plane is addressed by host/port, but callers often paste a
/// URL. The remainder is not validated.
pub(crate) fn normalize_host(host: &str) -> &str {
    host.strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
}

/// Configuration for establishing a connection to the Foundry platform
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Control-plane host (scheme prefix, if any, is stripped)
    pub host: String,
    /// Control-plane port
    pub port: u16,
    /// Streaming-broker host (defaults to the control-plane host)
    pub broker_host: String,
    /// Streaming-broker port
    pub broker_port: u16,
    /// Application username
    pub username: String,
    /// Connection token issued for this application
    pub connection_token: String,
    /// Enable automatic reconnection on connection loss
    pub reconnect: bool,
    /// Maximum reconnection attempts (capped at [`MAX_RECONNECT_CAP`])
    pub max_reconnect: u32,
    /// Delay between reconnection attempts
    pub reconnect_interval: Duration,
    /// Overall deadline for reaching an active connection
    pub timeout: Duration,
}

impl ConnectOptions {
    /// Create connection options for the given host and credentials.
    ///
    /// The broker host defaults to the control-plane host; override it with
    /// [`with_broker_host`](Self::with_broker_host) for split deployments.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        connection_token: impl Into<String>,
    ) -> Self {
        let host = host.into();
        Self {
            broker_host: host.clone(),
            host,
            port: DEFAULT_PORT,
            broker_port: DEFAULT_BROKER_PORT,
            username: username.into(),
            connection_token: connection_token.into(),
            reconnect: true,
            max_reconnect: 3,
            reconnect_interval: Duration::from_millis(200),
            timeout: Duration::from_secs(15),
        }
    }

    /// Set the control-plane port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the streaming-broker host
    pub fn with_broker_host(mut self, host: impl Into<String>) -> Self {
        self.broker_host = host.into();
        self
    }

    /// Set the streaming-broker port
    pub fn with_broker_port(mut self, port: u16) -> Self {
        self.broker_port = port;
        self
    }

    /// Enable or disable automatic reconnection
    pub fn with_reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = enabled;
        self
    }

    /// Set the maximum number of reconnection attempts
    pub fn with_max_reconnect(mut self, attempts: u32) -> Self {
        self.max_reconnect = attempts;
        self
    }

    /// Set the delay between reconnection attempts
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the overall connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Control-plane host with any scheme prefix stripped
    pub fn normalized_host(&self) -> &str {
        normalize_host(&self.host)
    }

    /// Broker host with any scheme prefix stripped
    pub fn normalized_broker_host(&self) -> &str {
        normalize_host(&self.broker_host)
    }

    /// Configured attempt budget, clamped to the hard cap
    pub fn effective_max_reconnect(&self) -> u32 {
        self.max_reconnect.min(MAX_RECONNECT_CAP)
    }
}

/// Retention policy for a station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Retain messages up to the given age in seconds
    MaxMessageAgeSeconds(u64),
    /// Retain up to the given number of messages
    Messages(u64),
    /// Retain up to the given number of bytes
    Bytes(u64),
}

impl RetentionPolicy {
    /// Control-plane identifier for this retention type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MaxMessageAgeSeconds(_) => "message_age_sec",
            Self::Messages(_) => "messages",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Retention threshold value
    pub fn value(&self) -> u64 {
        match self {
            Self::MaxMessageAgeSeconds(v) | Self::Messages(v) | Self::Bytes(v) => *v,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        // One week of message age
        Self::MaxMessageAgeSeconds(604_800)
    }
}

/// Storage backend for a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    /// Persist messages on disk
    #[default]
    File,
    /// Keep messages in memory only
    Memory,
}

impl StorageKind {
    /// Control-plane identifier for this storage type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Configuration for creating a station
#[derive(Debug, Clone)]
pub struct StationOptions {
    /// Retention policy (default: one week of message age)
    pub retention: RetentionPolicy,
    /// Storage backend (default: file)
    pub storage: StorageKind,
    /// Replica count (default: 1)
    pub replicas: u32,
    /// Enable broker-side message-id deduplication
    pub dedup_enabled: bool,
    /// Time frame during which duplicate message ids are suppressed
    pub dedup_window: Duration,
}

impl Default for StationOptions {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            storage: StorageKind::default(),
            replicas: 1,
            dedup_enabled: false,
            dedup_window: Duration::ZERO,
        }
    }
}

impl StationOptions {
    /// Create station options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retention policy
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Set the storage backend
    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Set the replica count
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Enable deduplication with the given suppression window
    pub fn with_dedup(mut self, enabled: bool, window: Duration) -> Self {
        self.dedup_enabled = enabled;
        self.dedup_window = window;
        self
    }
}

/// Configuration for a consumer session
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Consumer group. When set, the group name becomes the durable name so
    /// instances sharing it coordinate broker-side delivery.
    pub group: Option<String>,
    /// Interval between pull requests (default: 1s)
    pub pull_interval: Duration,
    /// Maximum messages requested per pull (default: 10)
    pub batch_size: usize,
    /// Maximum time a pull waits before returning fewer messages (default: 5s)
    pub batch_max_wait: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            group: None,
            pull_interval: Duration::from_secs(1),
            batch_size: 10,
            batch_max_wait: Duration::from_secs(5),
        }
    }
}

impl ConsumerOptions {
    /// Create consumer options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consumer group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the pull interval
    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    /// Set the pull batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the maximum wait for a partial batch
    pub fn with_batch_max_wait(mut self, wait: Duration) -> Self {
        self.batch_max_wait = wait;
        self
    }
}
