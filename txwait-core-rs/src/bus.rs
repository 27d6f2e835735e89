//! Transaction-started notification bus
//!
//! The inbound protocol layer publishes here; the waiter consumes through a
//! listener task.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::TransactionWaiter;
use crate::types::TransactionStarted;

/// Fan-out channel of transaction-started events
#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<TransactionStarted>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Never blocks; dropped if nobody listens.
    pub fn publish(&self, event: TransactionStarted) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(
                    "No listener for transaction {} on {}",
                    event.transaction_id, event.charge_box_id
                );
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionStarted> {
        self.tx.subscribe()
    }
}

/// Drive `on_transaction_started` from the bus until it closes
pub fn spawn_listener(
    waiter: Arc<TransactionWaiter>,
    mut rx: broadcast::Receiver<TransactionStarted>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    waiter.on_transaction_started(&event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Transaction listener lagged, {} notifications skipped; {} pending wait(s) may time out",
                        skipped,
                        waiter.pending_count()
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Notification bus closed, listener stopping");
                    break;
                }
            }
        }
    })
}
