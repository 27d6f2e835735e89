//! Core types shared by the waiting flows and the notification path

use serde::{Deserialize, Serialize};

/// Identifier under which a dispatched command's execution is tracked
pub type TaskId = i32;

/// Transaction id assigned by the central system when a charge point starts charging
pub type TransactionId = i32;

/// Connector index on a charge point
pub type ConnectorId = i32;

/// Key of a pending correlation in the registry
///
/// A flow that has not dispatched its command yet has no task id; it registers
/// under a placeholder drawn from the registry's own counter, which never
/// collides with a real task id or with another flow's placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKey {
    Task(TaskId),
    Placeholder(u64),
}

impl WaitKey {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, WaitKey::Placeholder(_))
    }
}

impl std::fmt::Display for WaitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitKey::Task(id) => write!(f, "task:{}", id),
            WaitKey::Placeholder(seq) => write!(f, "placeholder:{}", seq),
        }
    }
}

/// Parameters of a RemoteStartTransaction command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartParams {
    pub charge_box_id: String,
    pub id_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<ConnectorId>,
}

impl RemoteStartParams {
    pub fn new(charge_box_id: impl Into<String>, id_tag: impl Into<String>) -> Self {
        Self {
            charge_box_id: charge_box_id.into(),
            id_tag: id_tag.into(),
            connector_id: None,
        }
    }

    /// Restrict the start to a single connector
    pub fn with_connector(mut self, connector_id: ConnectorId) -> Self {
        self.connector_id = Some(connector_id);
        self
    }
}

/// Raised by the inbound protocol layer once a charge point reports a started transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStarted {
    pub charge_box_id: String,
    pub id_tag: String,
    pub connector_id: Option<ConnectorId>,
    pub transaction_id: TransactionId,
}

/// Outcome of a command at a single charge box
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResult {
    pub response: Option<String>,
    pub error_message: Option<String>,
}

impl RequestResult {
    pub fn response(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            response: None,
            error_message: Some(message.into()),
        }
    }
}

/// Status view of a remote-start task for a single charge box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartStatus {
    pub task_id: TaskId,
    pub charge_box_id: String,
    /// Connector the start was requested for (absent means any)
    pub connector_id: Option<ConnectorId>,
    /// Id tag of the start; absent for tasks that are not remote starts
    pub id_tag: Option<String>,
    pub finished: bool,
    pub response: Option<String>,
    pub error_message: Option<String>,
    /// A caller is still waiting for the transaction to start
    pub awaiting_transaction: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_json_uses_camel_case() {
        let params = RemoteStartParams::new("CP-1", "TAG01").with_connector(2);
        let json = serde_json::to_value(&params).unwrap();

        assert_eq!(json["chargeBoxId"], "CP-1");
        assert_eq!(json["idTag"], "TAG01");
        assert_eq!(json["connectorId"], 2);
    }

    #[test]
    fn test_params_connector_is_optional() {
        let params: RemoteStartParams =
            serde_json::from_str(r#"{"chargeBoxId":"CP-1","idTag":"TAG01"}"#).unwrap();
        assert_eq!(params.connector_id, None);
    }

    #[test]
    fn test_wait_key_display() {
        assert_eq!(WaitKey::Task(42).to_string(), "task:42");
        assert_eq!(WaitKey::Placeholder(7).to_string(), "placeholder:7");
        assert!(WaitKey::Placeholder(0).is_placeholder());
        assert!(!WaitKey::Task(-1).is_placeholder());
    }
}
