//! Central-system side of the OCPP connection
//!
//! Sends commands to connected charge points and interprets what comes back:
//! - CALLRESULT / CALLERROR for an outstanding CALL records the outcome on its task
//! - StartTransaction allocates a transaction id and raises `TransactionStarted`
//! - Heartbeat is answered with the current time
//!
//! Frames to a charge point go through a bounded queue per charge box; the
//! transport that owns the socket drains it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use txwait_core::{
    CommunicationTask, DispatchClient, DispatchError, InMemoryTaskStore, NotificationBus,
    RemoteStartParams, TaskId, TransactionStarted,
};

use crate::config::AdapterConfig;
use crate::ocpp::{
    Action, Call, CallError, CallResult, ErrorCode, OcppError, OcppMessage,
    StartTransactionRequest,
};

/// CALL sent to a charge point and awaiting its answer
struct PendingCall {
    action: Action,
    charge_box_id: String,
    task: Arc<CommunicationTask>,
}

type PendingCalls = Arc<Mutex<HashMap<String, PendingCall>>>;

/// OCPP central system
pub struct CentralSystem {
    config: AdapterConfig,
    task_store: Arc<InMemoryTaskStore>,
    events: NotificationBus,
    connections: RwLock<HashMap<String, mpsc::Sender<OcppMessage>>>,
    pending_calls: PendingCalls,
    next_transaction_id: AtomicI32,
}

impl CentralSystem {
    pub fn new(
        config: AdapterConfig,
        task_store: Arc<InMemoryTaskStore>,
        events: NotificationBus,
    ) -> Self {
        let next_transaction_id = AtomicI32::new(config.first_transaction_id);
        Self {
            config,
            task_store,
            events,
            connections: RwLock::new(HashMap::new()),
            pending_calls: Arc::new(Mutex::new(HashMap::new())),
            next_transaction_id,
        }
    }

    pub fn task_store(&self) -> Arc<InMemoryTaskStore> {
        self.task_store.clone()
    }

    /// Register a charge point connection
    ///
    /// Returns the queue of frames to deliver to it. A reconnect replaces the
    /// previous queue.
    pub fn connect(&self, charge_box_id: impl Into<String>) -> mpsc::Receiver<OcppMessage> {
        let charge_box_id = charge_box_id.into();
        let (tx, rx) = mpsc::channel(self.config.outgoing_queue_size);

        if self.connections.write().insert(charge_box_id.clone(), tx).is_some() {
            info!("Charge box {} reconnected, replacing previous connection", charge_box_id);
        } else {
            info!("Charge box {} connected", charge_box_id);
        }
        rx
    }

    /// Drop a charge point connection and fail its outstanding CALLs
    pub fn disconnect(&self, charge_box_id: &str) {
        if self.connections.write().remove(charge_box_id).is_none() {
            return;
        }
        info!("Charge box {} disconnected", charge_box_id);

        let orphaned: Vec<PendingCall> = {
            let mut pending = self.pending_calls.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, call)| call.charge_box_id == charge_box_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        for call in orphaned {
            call.task
                .add_error(&call.charge_box_id, "Charge box disconnected");
        }
    }

    pub fn is_connected(&self, charge_box_id: &str) -> bool {
        self.connections.read().contains_key(charge_box_id)
    }

    /// Number of CALLs awaiting an answer
    pub fn in_flight(&self) -> usize {
        self.pending_calls.lock().len()
    }

    /// Handle a raw frame from a charge point, returning the reply to send back
    pub fn handle_frame(&self, charge_box_id: &str, bytes: &[u8]) -> Option<OcppMessage> {
        match OcppMessage::parse(bytes) {
            Ok(message) => self.handle_message(charge_box_id, message),
            Err(OcppError::UnknownAction(action)) => {
                warn!("{} sent unsupported action {}", charge_box_id, action);
                OcppMessage::peek_message_id(bytes).map(|id| {
                    OcppMessage::CallError(CallError::new(
                        id,
                        ErrorCode::NotImplemented,
                        format!("Action {} not implemented", action),
                    ))
                })
            }
            Err(e) => {
                warn!("Failed to parse frame from {}: {}", charge_box_id, e);
                None
            }
        }
    }

    /// Handle a parsed message from a charge point
    pub fn handle_message(&self, charge_box_id: &str, message: OcppMessage) -> Option<OcppMessage> {
        match message {
            OcppMessage::Call(call) => Some(self.handle_call(charge_box_id, call)),
            OcppMessage::CallResult(result) => {
                let response = result
                    .payload
                    .get("status")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| result.payload.to_string());
                self.complete_call(charge_box_id, &result.message_id, Ok(response));
                None
            }
            OcppMessage::CallError(error) => {
                self.complete_call(charge_box_id, &error.message_id, Err(error.summary()));
                None
            }
        }
    }

    fn handle_call(&self, charge_box_id: &str, call: Call) -> OcppMessage {
        let reply = match call.action {
            Action::StartTransaction => self.start_transaction(charge_box_id, &call),
            Action::Heartbeat => CallResult::heartbeat(call.message_id.clone()),
            Action::RemoteStartTransaction => {
                return OcppMessage::CallError(CallError::new(
                    call.message_id,
                    ErrorCode::NotSupported,
                    "RemoteStartTransaction is sent by the central system",
                ));
            }
        };

        match reply {
            Ok(result) => OcppMessage::CallResult(result),
            Err(e) => {
                warn!("Rejecting {} from {}: {}", call.action, charge_box_id, e);
                OcppMessage::CallError(CallError::new(
                    call.message_id,
                    ErrorCode::FormationViolation,
                    e.to_string(),
                ))
            }
        }
    }

    fn start_transaction(&self, charge_box_id: &str, call: &Call) -> Result<CallResult, OcppError> {
        let request: StartTransactionRequest = call.parse_payload()?;
        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);

        info!(
            "Transaction {} started on {} connector {} for {}",
            transaction_id, charge_box_id, request.connector_id, request.id_tag
        );

        self.events.publish(TransactionStarted {
            charge_box_id: charge_box_id.to_string(),
            id_tag: request.id_tag,
            connector_id: Some(request.connector_id),
            transaction_id,
        });

        CallResult::start_transaction(call.message_id.clone(), transaction_id)
    }

    /// Record the answer to an outstanding CALL on its task
    fn complete_call(&self, charge_box_id: &str, message_id: &str, outcome: Result<String, String>) {
        let call = self.pending_calls.lock().remove(message_id);
        let Some(call) = call else {
            warn!("{} answered unknown or expired message {}", charge_box_id, message_id);
            return;
        };

        if call.charge_box_id != charge_box_id {
            warn!(
                "Message {} was sent to {} but answered by {}",
                message_id, call.charge_box_id, charge_box_id
            );
        }

        debug!(
            "{} answered {} (task {}): {:?}",
            call.charge_box_id,
            call.action,
            call.task.task_id(),
            outcome
        );

        match outcome {
            Ok(response) => call.task.add_response(&call.charge_box_id, response),
            Err(error) => call.task.add_error(&call.charge_box_id, error),
        }
    }

    /// Fail the CALL's task if no answer arrives within the request timeout
    fn arm_timeout(&self, message_id: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime, CALL {} has no response timeout", message_id);
            return;
        };

        let pending = self.pending_calls.clone();
        let timeout = self.config.request_timeout;
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = pending.lock().remove(&message_id);
            if let Some(call) = expired {
                warn!(
                    "No answer from {} to {} within {:?}",
                    call.charge_box_id, call.action, timeout
                );
                call.task
                    .add_error(&call.charge_box_id, "Timeout waiting for response");
            }
        });
    }
}

impl DispatchClient for CentralSystem {
    fn remote_start_transaction(&self, params: &RemoteStartParams) -> Result<TaskId, DispatchError> {
        let charge_box_id = params.charge_box_id.clone();
        let sender = self
            .connections
            .read()
            .get(&charge_box_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotConnected(charge_box_id.clone()))?;

        let call = Call::remote_start_transaction(&params.id_tag, params.connector_id)
            .map_err(|e| DispatchError::Encode(e.to_string()))?;
        let message_id = call.message_id.clone();

        self.task_store.evict_expired();
        let task = self.task_store.create_remote_start(params);
        let task_id = task.task_id();

        self.pending_calls.lock().insert(
            message_id.clone(),
            PendingCall {
                action: call.action.clone(),
                charge_box_id: charge_box_id.clone(),
                task,
            },
        );

        if let Err(e) = sender.try_send(OcppMessage::Call(call)) {
            self.pending_calls.lock().remove(&message_id);
            self.task_store.remove(task_id);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull(charge_box_id),
                mpsc::error::TrySendError::Closed(_) => DispatchError::NotConnected(charge_box_id),
            });
        }

        self.arm_timeout(message_id);
        info!(
            "RemoteStartTransaction sent to {} for {} (task {})",
            charge_box_id, params.id_tag, task_id
        );

        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use txwait_core::TaskStore;

    use crate::ocpp::RemoteStartStopStatus;

    fn central() -> (CentralSystem, NotificationBus) {
        let events = NotificationBus::new(16);
        let central = CentralSystem::new(
            AdapterConfig::default().with_request_timeout(Duration::from_secs(5)),
            Arc::new(InMemoryTaskStore::new()),
            events.clone(),
        );
        (central, events)
    }

    fn expect_call(rx: &mut mpsc::Receiver<OcppMessage>) -> Call {
        match rx.try_recv() {
            Ok(OcppMessage::Call(call)) => call,
            other => panic!("Expected queued Call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_requires_connection() {
        let (central, _events) = central();
        let err = assert_err!(
            central.remote_start_transaction(&RemoteStartParams::new("CP-1", "TAG01"))
        );
        assert!(matches!(err, DispatchError::NotConnected(_)));
        assert!(central.task_store().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_answer_finishes_task() {
        let (central, _events) = central();
        let mut rx = central.connect("CP-1");

        let params = RemoteStartParams::new("CP-1", "TAG01").with_connector(2);
        let task_id = assert_ok!(central.remote_start_transaction(&params));

        let call = expect_call(&mut rx);
        assert_eq!(call.action, Action::RemoteStartTransaction);
        assert_eq!(central.in_flight(), 1);

        let answer = CallResult::remote_start_transaction(
            call.message_id.clone(),
            RemoteStartStopStatus::Accepted,
        )
        .unwrap();
        let bytes = answer.to_bytes().unwrap();
        assert!(central.handle_frame("CP-1", &bytes).is_none());

        let task = central.task_store().get(task_id).unwrap();
        assert!(task.is_finished());
        assert_eq!(task.result_for("CP-1").unwrap().response.as_deref(), Some("Accepted"));
        assert_eq!(task.remote_start_params(), Some(&params));
        assert_eq!(central.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_evicts_expired_tasks() {
        let events = NotificationBus::new(4);
        let central = CentralSystem::new(
            AdapterConfig::default(),
            Arc::new(InMemoryTaskStore::with_retention(Duration::from_secs(60))),
            events,
        );
        let mut rx = central.connect("CP-1");
        let params = RemoteStartParams::new("CP-1", "TAG01");

        for _ in 0..3 {
            central.remote_start_transaction(&params).unwrap();
            let call = expect_call(&mut rx);
            let answer = CallResult::remote_start_transaction(
                call.message_id,
                RemoteStartStopStatus::Accepted,
            )
            .unwrap();
            central.handle_frame("CP-1", &answer.to_bytes().unwrap());
        }
        assert_eq!(central.task_store().len(), 3);

        tokio::time::sleep(Duration::from_secs(61)).await;
        let task_id = central.remote_start_transaction(&params).unwrap();

        assert_eq!(central.task_store().len(), 1);
        assert!(central.task_store().get(task_id).is_some());
    }

    #[tokio::test]
    async fn test_call_error_recorded_as_error() {
        let (central, _events) = central();
        let mut rx = central.connect("CP-1");
        let task_id = central
            .remote_start_transaction(&RemoteStartParams::new("CP-1", "TAG01"))
            .unwrap();

        let call = expect_call(&mut rx);
        let error = CallError::new(call.message_id, ErrorCode::InternalError, "relay stuck");
        central.handle_frame("CP-1", &error.to_bytes().unwrap());

        let result = central.task_store().get(task_id).unwrap().result_for("CP-1").unwrap();
        assert_eq!(result.error_message.as_deref(), Some("InternalError: relay stuck"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_call_times_out() {
        let (central, _events) = central();
        let _rx = central.connect("CP-1");
        let task_id = central
            .remote_start_transaction(&RemoteStartParams::new("CP-1", "TAG01"))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let task = central.task_store().get(task_id).unwrap();
        assert!(task.is_finished());
        assert_eq!(
            task.result_for("CP-1").unwrap().error_message.as_deref(),
            Some("Timeout waiting for response")
        );
        assert_eq!(central.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_outstanding_calls() {
        let (central, _events) = central();
        let _rx = central.connect("CP-1");
        let task_id = central
            .remote_start_transaction(&RemoteStartParams::new("CP-1", "TAG01"))
            .unwrap();

        central.disconnect("CP-1");

        assert!(!central.is_connected("CP-1"));
        let result = central.task_store().get(task_id).unwrap().result_for("CP-1").unwrap();
        assert_eq!(result.error_message.as_deref(), Some("Charge box disconnected"));
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let events = NotificationBus::new(4);
        let central = CentralSystem::new(
            AdapterConfig::default().with_queue_size(1),
            Arc::new(InMemoryTaskStore::new()),
            events,
        );
        let _rx = central.connect("CP-1");
        let params = RemoteStartParams::new("CP-1", "TAG01");

        assert_ok!(central.remote_start_transaction(&params));
        let err = assert_err!(central.remote_start_transaction(&params));
        assert!(matches!(err, DispatchError::QueueFull(_)));
        assert_eq!(central.in_flight(), 1);
        assert_eq!(central.task_store().len(), 1);
    }

    #[tokio::test]
    async fn test_start_transaction_publishes_event() {
        let (central, events) = central();
        let mut rx = events.subscribe();

        let call = Call::start_transaction(1, "TAG01", 0).unwrap();
        let reply = central.handle_frame("CP-1", &call.to_bytes().unwrap());

        match reply {
            Some(OcppMessage::CallResult(result)) => {
                assert_eq!(result.message_id, call.message_id);
                assert_eq!(result.payload["transactionId"], 1);
            }
            other => panic!("Expected CallResult, got {:?}", other),
        }

        let event = rx.recv().await.unwrap();
        assert_eq!(event.charge_box_id, "CP-1");
        assert_eq!(event.id_tag, "TAG01");
        assert_eq!(event.connector_id, Some(1));
        assert_eq!(event.transaction_id, 1);
    }

    #[tokio::test]
    async fn test_malformed_start_transaction_rejected() {
        let (central, _events) = central();
        let frame = br#"[2, "m-1", "StartTransaction", {"idTag": "TAG01"}]"#;

        match central.handle_frame("CP-1", frame) {
            Some(OcppMessage::CallError(error)) => {
                assert_eq!(error.message_id, "m-1");
                assert_eq!(error.error_code, ErrorCode::FormationViolation);
            }
            other => panic!("Expected CallError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_action_not_implemented() {
        let (central, _events) = central();
        let frame = br#"[2, "m-2", "DataTransfer", {}]"#;

        match central.handle_frame("CP-1", frame) {
            Some(OcppMessage::CallError(error)) => {
                assert_eq!(error.message_id, "m-2");
                assert_eq!(error.error_code, ErrorCode::NotImplemented);
            }
            other => panic!("Expected CallError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_answer_ignored() {
        let (central, _events) = central();
        let frame = br#"[3, "nobody-asked", {"status": "Accepted"}]"#;
        assert!(central.handle_frame("CP-1", frame).is_none());
    }
}
