//! Configuration for the OCPP central-system adapter

use std::time::Duration;

/// Adapter configuration
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// How long a CALL may stay unanswered before the task records an error
    pub request_timeout: Duration,

    /// Capacity of each charge point's outgoing frame queue
    pub outgoing_queue_size: usize,

    /// First transaction id handed out on StartTransaction
    pub first_transaction_id: i32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            outgoing_queue_size: 64,
            first_transaction_id: 1,
        }
    }
}

impl AdapterConfig {
    /// Set the CALL response timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the per charge point queue size
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.outgoing_queue_size = size.max(1);
        self
    }

    /// Set the first transaction id
    pub fn with_first_transaction_id(mut self, id: i32) -> Self {
        self.first_transaction_id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = AdapterConfig::default()
            .with_request_timeout(Duration::from_secs(5))
            .with_queue_size(0)
            .with_first_transaction_id(1000);

        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.outgoing_queue_size, 1);
        assert_eq!(config.first_transaction_id, 1000);
    }
}
