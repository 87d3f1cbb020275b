use std::time::Duration;

/// Tunables for a [`crate::DeviceClient`], following the teacher's
/// builder-struct convention (`ConnectionDetails`, `WebSocketConfig`)
/// rather than a config-file crate: every field has a sensible default and
/// a `with_*` setter.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default timeout for `send_and_wait_for_response`, spec section 5.
    pub response_timeout: Duration,
    /// `autoReconnect` interval, spec section 4.1.
    pub reconnect_interval: Duration,
    /// 0 means reconnect indefinitely.
    pub max_reconnect_attempts: usize,
    pub auto_reconnect: bool,

    /// Message Queue Manager defaults, spec section 4.3.
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub default_expiry: Duration,
    /// How often the queue scheduler wakes to sweep retries/expiries.
    pub queue_sweep_interval: Duration,
    /// How many HIGH/CRITICAL entries the scheduler drains per wakeup.
    pub queue_priority_batch: usize,

    /// Validation length limits, spec sections 4.4 and 4.6.
    pub max_device_id_len: usize,
    pub max_command_len: usize,
    pub max_property_name_len: usize,
    pub max_event_name_len: usize,

    /// Bound on how long shutdown waits for outstanding callback workers
    /// before proceeding, spec section 5 ("Shutdown does not join these").
    pub shutdown_grace_period: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_millis(1000),
            max_reconnect_attempts: 0,
            auto_reconnect: true,

            max_retries: 3,
            retry_interval: Duration::from_millis(1000),
            default_expiry: Duration::from_secs(24 * 60 * 60),
            queue_sweep_interval: Duration::from_millis(100),
            queue_priority_batch: 8,

            max_device_id_len: 256,
            max_command_len: 128,
            max_property_name_len: 128,
            max_event_name_len: 128,

            shutdown_grace_period: Duration::from_millis(500),
        }
    }
}

impl ClientConfig {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool, interval: Duration, max_attempts: usize) -> Self {
        self.auto_reconnect = enabled;
        self.reconnect_interval = interval;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_retry_params(mut self, max_retries: u32, retry_interval: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_default_expiry(mut self, expiry: Duration) -> Self {
        self.default_expiry = expiry;
        self
    }
}
