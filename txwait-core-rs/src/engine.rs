//! Remote-start / transaction-start correlation
//!
//! A RemoteStartTransaction command is acknowledged by the charge point without
//! a transaction id, and the StartTransaction that follows carries no reference
//! back to the command. The waiter bridges the two by registering the
//! caller's business key (charge box, id tag, connector) before it blocks and
//! matching every transaction-started notification against the pending keys.
//!
//! ## Flow
//!
//! ```text
//! caller ──► register pending ──► dispatch ──► wait for ack ──► check Accepted
//!                  ▲                                                 │
//!                  │ match + settle                                  ▼
//! inbound ── TransactionStarted ─────────────────────────────► await settle
//! ```
//!
//! Every flow owns a [`CleanupGuard`], so its registry entry is gone by the
//! time the flow returns, errors or is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{check_start_timeout, WaiterConfig};
use crate::dispatch::DispatchClient;
use crate::error::WaitError;
use crate::registry::{CleanupGuard, PendingRegistry, PendingTransaction};
use crate::task_store::{CommunicationTask, TaskStore};
use crate::types::{
    RemoteStartParams, RemoteStartStatus, TaskId, TransactionId, TransactionStarted, WaitKey,
};
use crate::waiter::wait_until_finished;

/// Status literal a charge point answers with when it takes the command
const ACCEPTED: &str = "accepted";

/// Waits for remotely started transactions
pub struct TransactionWaiter {
    config: WaiterConfig,
    task_store: Arc<dyn TaskStore>,
    dispatcher: Arc<dyn DispatchClient>,
    pending: PendingRegistry,
}

impl TransactionWaiter {
    pub fn new(
        config: WaiterConfig,
        task_store: Arc<dyn TaskStore>,
        dispatcher: Arc<dyn DispatchClient>,
    ) -> Self {
        Self {
            config,
            task_store,
            dispatcher,
            pending: PendingRegistry::new(),
        }
    }

    pub fn config(&self) -> &WaiterConfig {
        &self.config
    }

    /// Wait for the transaction started by an already dispatched command
    pub async fn wait_for_transaction_id(
        &self,
        task_id: TaskId,
        params: &RemoteStartParams,
        timeout: Duration,
    ) -> Result<TransactionId, WaitError> {
        debug!(
            "Waiting for transaction ID for task {} on charge box {}",
            task_id, params.charge_box_id
        );

        let (entry, settled) = PendingTransaction::new(params);
        self.pending.insert(WaitKey::Task(task_id), entry.clone())?;
        let _guard = CleanupGuard::new(&self.pending, entry);

        self.await_transaction(task_id, params, settled, timeout).await
    }

    /// Dispatch a remote start and wait for the transaction it produces
    ///
    /// The entry is registered before the command goes out, so a
    /// StartTransaction that overtakes the task id is still matched.
    pub async fn start_and_wait_for_transaction_id(
        &self,
        params: &RemoteStartParams,
        timeout: Duration,
    ) -> Result<TransactionId, WaitError> {
        debug!(
            "Starting and waiting for transaction ID on charge box {} with timeout {:?}",
            params.charge_box_id, timeout
        );

        let (entry, settled) = PendingTransaction::new(params);
        let placeholder = self.pending.next_placeholder();
        self.pending.insert(placeholder, entry.clone())?;
        let _guard = CleanupGuard::new(&self.pending, entry.clone());

        let task_id = self.dispatcher.remote_start_transaction(params)?;
        debug!("Remote start returned task {}, replacing {}", task_id, placeholder);

        if !self.pending.rekey(&placeholder, WaitKey::Task(task_id), &entry)? {
            debug!("Transaction for task {} started before the task id was known", task_id);
        }

        self.await_transaction(task_id, params, settled, timeout).await
    }

    /// Acknowledgement check followed by the wait for the settle cell
    async fn await_transaction(
        &self,
        task_id: TaskId,
        params: &RemoteStartParams,
        settled: oneshot::Receiver<TransactionId>,
        timeout: Duration,
    ) -> Result<TransactionId, WaitError> {
        if let Err(e) = check_start_timeout(timeout, self.config.ack_timeout) {
            warn!("Task {}: {}", task_id, e);
        }

        let task =
            wait_until_finished(self.task_store.as_ref(), task_id, self.config.ack_timeout).await?;
        check_accepted(&task, &params.charge_box_id)?;

        debug!("Remote start was accepted, waiting for actual transaction to start...");

        match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(transaction_id)) => {
                info!(
                    "Task {} on {} started transaction {}",
                    task_id, params.charge_box_id, transaction_id
                );
                Ok(transaction_id)
            }
            Ok(Err(_)) => Err(WaitError::Abandoned(task_id)),
            Err(_) => {
                warn!("Timeout waiting for transaction to start for task {}", task_id);
                Err(WaitError::TransactionStartTimeout { task_id, timeout })
            }
        }
    }

    /// Match a transaction-started notification against the pending waits
    ///
    /// Every matching entry is settled with the event's transaction id and
    /// removed. Returns the number of waits resolved; zero is normal for
    /// transactions started locally at the charge point.
    pub fn on_transaction_started(&self, event: &TransactionStarted) -> usize {
        debug!(
            "Transaction started: {} on charge box '{}', idTag '{}', connector {:?}",
            event.transaction_id, event.charge_box_id, event.id_tag, event.connector_id
        );
        debug!("Current pending transactions: {}", self.pending.len());

        let resolved = self.pending.remove_if(|key, pending| {
            if !pending.matches(event) {
                return false;
            }
            debug!(
                "Completing waiting flow {} with transaction ID {}",
                key, event.transaction_id
            );
            pending.complete(event.transaction_id);
            true
        });

        if resolved.is_empty() {
            debug!(
                "No pending wait for transaction {} on {}",
                event.transaction_id, event.charge_box_id
            );
        }
        debug!(
            "Remaining pending transactions after processing: {}",
            self.pending.len()
        );

        resolved.len()
    }

    /// Status of a remote-start task at one charge box
    pub fn remote_start_status(
        &self,
        task_id: TaskId,
        charge_box_id: &str,
    ) -> Result<RemoteStartStatus, WaitError> {
        let task = self
            .task_store
            .get(task_id)
            .ok_or(WaitError::TaskNotFound(task_id))?;
        let result = task.result_for(charge_box_id).unwrap_or_default();
        let params = task.remote_start_params();

        Ok(RemoteStartStatus {
            task_id,
            charge_box_id: charge_box_id.to_string(),
            connector_id: params.and_then(|p| p.connector_id),
            id_tag: params.map(|p| p.id_tag.clone()),
            finished: task.is_finished(),
            response: result.response,
            error_message: result.error_message,
            awaiting_transaction: self.is_awaiting(task_id),
        })
    }

    /// A flow is currently waiting under this task id
    pub fn is_awaiting(&self, task_id: TaskId) -> bool {
        self.pending.contains(&WaitKey::Task(task_id))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }
}

/// Validate the finished task's outcome at the charge box
///
/// Acceptance is a case-insensitive containment check on the raw response,
/// since the status arrives as a free-form string.
fn check_accepted(task: &CommunicationTask, charge_box_id: &str) -> Result<(), WaitError> {
    let result = task
        .result_for(charge_box_id)
        .ok_or_else(|| WaitError::ResultMissing {
            charge_box_id: charge_box_id.to_string(),
        })?;

    if let Some(error_message) = result.error_message {
        return Err(WaitError::CommandRejected {
            charge_box_id: charge_box_id.to_string(),
            error_message,
        });
    }

    match result.response {
        Some(ref response) if response.to_lowercase().contains(ACCEPTED) => Ok(()),
        response => Err(WaitError::CommandNotAccepted {
            charge_box_id: charge_box_id.to_string(),
            response,
        }),
    }
}
