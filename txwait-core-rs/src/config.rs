//! Configuration for the transaction waiter

use std::time::Duration;

use crate::error::ConfigError;

/// Interval at which command acknowledgement used to be sampled
pub const ACK_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Number of samples before giving up on the acknowledgement
pub const ACK_MAX_CHECKS: u32 = 30;

/// Timeout applied when a caller does not supply one
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// How long finished tasks stay in the task store
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(300);

/// Waiter configuration
#[derive(Debug, Clone)]
pub struct WaiterConfig {
    /// Ceiling for the command acknowledgement (3 s)
    pub ack_timeout: Duration,

    /// Transaction-start timeout for callers that do not pass their own
    pub default_start_timeout: Duration,

    /// Capacity of the transaction-started broadcast channel
    pub bus_capacity: usize,

    /// Retention of finished tasks in the task store
    pub task_retention: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            ack_timeout: ACK_CHECK_INTERVAL * ACK_MAX_CHECKS,
            default_start_timeout: DEFAULT_START_TIMEOUT,
            bus_capacity: 256,
            task_retention: DEFAULT_TASK_RETENTION,
        }
    }
}

impl WaiterConfig {
    /// Set the acknowledgement ceiling
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the default transaction-start timeout
    pub fn with_default_start_timeout(mut self, timeout: Duration) -> Self {
        self.default_start_timeout = timeout;
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity.max(1);
        self
    }

    pub fn with_task_retention(mut self, retention: Duration) -> Self {
        self.task_retention = retention;
        self
    }

    /// The acknowledgement ceiling must stay below the start timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_start_timeout(self.default_start_timeout, self.ack_timeout)
    }
}

/// Reject a start timeout that does not outlast the acknowledgement ceiling
pub fn check_start_timeout(start_timeout: Duration, ack_timeout: Duration) -> Result<(), ConfigError> {
    if start_timeout <= ack_timeout {
        return Err(ConfigError::StartTimeoutTooShort {
            start_timeout,
            ack_timeout,
        });
    }
    Ok(())
}
