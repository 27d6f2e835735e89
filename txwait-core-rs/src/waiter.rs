//! Waits for a dispatched command to be acknowledged

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::WaitError;
use crate::task_store::{CommunicationTask, TaskStore};
use crate::types::TaskId;

/// Suspend until the task is finished or `ceiling` elapses
///
/// Only observes the acknowledgement of the command, not the later
/// transaction start.
pub async fn wait_until_finished(
    store: &dyn TaskStore,
    task_id: TaskId,
    ceiling: Duration,
) -> Result<Arc<CommunicationTask>, WaitError> {
    let task = store.get(task_id).ok_or(WaitError::TaskNotFound(task_id))?;

    if task.is_finished() {
        return Ok(task);
    }

    debug!("Waiting up to {:?} for task {} to finish", ceiling, task_id);

    let mut finished = task.subscribe_finished();
    let signalled = async {
        while !*finished.borrow_and_update() {
            if finished.changed().await.is_err() {
                break;
            }
        }
    };

    let _ = tokio::time::timeout(ceiling, signalled).await;

    if task.is_finished() {
        Ok(task)
    } else {
        warn!("Task {} did not complete within {:?}", task_id, ceiling);
        Err(WaitError::CommandTimeout {
            task_id,
            waited: ceiling,
        })
    }
}
