//! Outbound command dispatch seam

use crate::error::DispatchError;
use crate::types::{RemoteStartParams, TaskId};

/// Hands commands to the outbound protocol layer
///
/// Returns immediately with the id of the task under which the command's
/// execution is tracked; acknowledgement arrives later through the task store.
pub trait DispatchClient: Send + Sync {
    fn remote_start_transaction(&self, params: &RemoteStartParams) -> Result<TaskId, DispatchError>;
}
