//! Errors raised by the waiting flows

use std::time::Duration;
use thiserror::Error;

use crate::types::{TaskId, WaitKey};

/// Failure to hand a command to the outbound protocol layer
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Charge box not connected: {0}")]
    NotConnected(String),

    #[error("Outgoing queue full for charge box: {0}")]
    QueueFull(String),

    #[error("Failed to encode command: {0}")]
    Encode(String),
}

/// Invalid waiter configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Start timeout {start_timeout:?} must be longer than the acknowledgement ceiling {ack_timeout:?}")]
    StartTimeoutTooShort {
        start_timeout: Duration,
        ack_timeout: Duration,
    },
}

/// Errors of a single waiting flow
///
/// None of these affect other pending flows.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("A wait is already pending under {0}")]
    DuplicateWait(WaitKey),

    #[error("Remote start task {task_id} did not complete within {waited:?}")]
    CommandTimeout { task_id: TaskId, waited: Duration },

    #[error("No result found for charge box: {charge_box_id}")]
    ResultMissing { charge_box_id: String },

    #[error("Remote start failed at {charge_box_id}: {error_message}")]
    CommandRejected {
        charge_box_id: String,
        error_message: String,
    },

    #[error("Remote start was not accepted by {charge_box_id}. Response: {response:?}")]
    CommandNotAccepted {
        charge_box_id: String,
        response: Option<String>,
    },

    #[error("Transaction did not start within {timeout:?} (task {task_id})")]
    TransactionStartTimeout { task_id: TaskId, timeout: Duration },

    #[error("Pending wait for task {0} was dropped without a transaction id")]
    Abandoned(TaskId),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl WaitError {
    /// The command reached the charge box but was not accepted there
    pub fn is_protocol_failure(&self) -> bool {
        matches!(
            self,
            WaitError::ResultMissing { .. }
                | WaitError::CommandRejected { .. }
                | WaitError::CommandNotAccepted { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            WaitError::CommandTimeout { .. } | WaitError::TransactionStartTimeout { .. }
        )
    }
}
