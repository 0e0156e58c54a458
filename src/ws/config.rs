#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for the notification connection.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on the WebSocket upgrade plus the subscribe handshake
    pub connect_timeout: Duration,
    /// Interval for sending PING frames. `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// How long a PING may go unanswered before the connection is considered dead
    pub heartbeat_timeout: Duration,
    /// Reconnection after the frame stream ends. `None` means the bridge
    /// goes idle on the first disconnect and waits for a new session.
    pub reconnect: Option<ReconnectConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL_DURATION),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
            reconnect: None,
        }
    }
}

impl Config {
    /// Enables reconnection with the given policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Overrides the handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Overrides heartbeat cadence; `None` turns heartbeats off.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Option<Duration>, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Initial backoff duration for first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
