//! End-to-end remote start through the OCPP central system

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use txwait_adapter_ocpp::{
    AdapterConfig, Call, CallResult, CentralSystem, OcppMessage, RemoteStartStopStatus,
};
use txwait_adapter_ocpp::ocpp::RemoteStartTransactionRequest;
use txwait_core::task_store::spawn_eviction;
use txwait_core::{
    bus, InMemoryTaskStore, NotificationBus, RemoteStartParams, TransactionWaiter, WaitError,
    WaiterConfig,
};

#[derive(Clone, Copy)]
enum Behaviour {
    /// Accept and start charging on the requested (or first) connector
    Charge,
    /// Send StartTransaction before answering the RemoteStartTransaction
    ChargeBeforeAnswer,
    Reject,
    /// Accept but never start
    Idle,
}

/// Minimal charge point: answers frames from its queue through `handle_frame`
fn spawn_charge_point(
    central: Arc<CentralSystem>,
    charge_box_id: &'static str,
    mut rx: mpsc::Receiver<OcppMessage>,
    behaviour: Behaviour,
) {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let OcppMessage::Call(call) = message else {
                continue;
            };
            let request: RemoteStartTransactionRequest = call.parse_payload().unwrap();
            let connector = request.connector_id.unwrap_or(1);

            let status = match behaviour {
                Behaviour::Reject => RemoteStartStopStatus::Rejected,
                _ => RemoteStartStopStatus::Accepted,
            };
            let answer = CallResult::remote_start_transaction(call.message_id.clone(), status)
                .unwrap()
                .to_bytes()
                .unwrap();
            let start = Call::start_transaction(connector, request.id_tag.clone(), 0)
                .unwrap()
                .to_bytes()
                .unwrap();

            match behaviour {
                Behaviour::Charge => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    central.handle_frame(charge_box_id, &answer);
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    central.handle_frame(charge_box_id, &start);
                }
                Behaviour::ChargeBeforeAnswer => {
                    central.handle_frame(charge_box_id, &start);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    central.handle_frame(charge_box_id, &answer);
                }
                Behaviour::Reject | Behaviour::Idle => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    central.handle_frame(charge_box_id, &answer);
                }
            }
        }
    });
}

fn setup() -> (Arc<TransactionWaiter>, Arc<CentralSystem>) {
    setup_with_store(Arc::new(InMemoryTaskStore::new()))
}

fn setup_with_store(store: Arc<InMemoryTaskStore>) -> (Arc<TransactionWaiter>, Arc<CentralSystem>) {
    let config = WaiterConfig::default();
    let events = NotificationBus::new(config.bus_capacity);
    let central = Arc::new(CentralSystem::new(
        AdapterConfig::default().with_first_transaction_id(500),
        store.clone(),
        events.clone(),
    ));

    let waiter = Arc::new(TransactionWaiter::new(config, store, central.clone()));
    bus::spawn_listener(waiter.clone(), events.subscribe());
    (waiter, central)
}

#[tokio::test(start_paused = true)]
async fn test_start_and_wait_over_ocpp() {
    let (waiter, central) = setup();
    let rx = central.connect("CP-1");
    spawn_charge_point(central.clone(), "CP-1", rx, Behaviour::Charge);

    let params = RemoteStartParams::new("CP-1", "TAG01").with_connector(2);
    let tx = waiter
        .start_and_wait_for_transaction_id(&params, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(tx, 500);
    assert_eq!(waiter.pending_count(), 0);
    assert_eq!(central.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_transaction_before_answer() {
    let (waiter, central) = setup();
    let rx = central.connect("CP-1");
    spawn_charge_point(central.clone(), "CP-1", rx, Behaviour::ChargeBeforeAnswer);

    let params = RemoteStartParams::new("CP-1", "TAG01");
    let tx = waiter
        .start_and_wait_for_transaction_id(&params, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(tx, 500);
    assert_eq!(waiter.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_remote_start() {
    let (waiter, central) = setup();
    let rx = central.connect("CP-1");
    spawn_charge_point(central.clone(), "CP-1", rx, Behaviour::Reject);

    let params = RemoteStartParams::new("CP-1", "TAG01");
    let err = waiter
        .start_and_wait_for_transaction_id(&params, Duration::from_secs(10))
        .await
        .unwrap_err();

    match err {
        WaitError::CommandNotAccepted { response, .. } => {
            assert_eq!(response.as_deref(), Some("Rejected"))
        }
        other => panic!("Expected CommandNotAccepted, got {:?}", other),
    }
    assert_eq!(waiter.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_accepted_but_never_started() {
    let (waiter, central) = setup();
    let rx = central.connect("CP-1");
    spawn_charge_point(central.clone(), "CP-1", rx, Behaviour::Idle);

    let params = RemoteStartParams::new("CP-1", "TAG01");
    let err = waiter
        .start_and_wait_for_transaction_id(&params, Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, WaitError::TransactionStartTimeout { .. }));
    assert_eq!(waiter.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_charge_point_hits_ack_ceiling() {
    let (waiter, central) = setup();
    // Connected, but nothing ever drains the queue
    let _rx = central.connect("CP-1");

    let params = RemoteStartParams::new("CP-1", "TAG01");
    let err = waiter
        .start_and_wait_for_transaction_id(&params, Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, WaitError::CommandTimeout { .. }));
    assert_eq!(waiter.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_charge_box() {
    let (waiter, _central) = setup();

    let params = RemoteStartParams::new("CP-404", "TAG01");
    let err = waiter
        .start_and_wait_for_transaction_id(&params, Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, WaitError::Dispatch(_)));
    assert_eq!(waiter.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_status_after_start() {
    let (waiter, central) = setup();
    let rx = central.connect("CP-1");
    spawn_charge_point(central.clone(), "CP-1", rx, Behaviour::Charge);

    let params = RemoteStartParams::new("CP-1", "TAG01").with_connector(2);
    waiter
        .start_and_wait_for_transaction_id(&params, Duration::from_secs(10))
        .await
        .unwrap();

    let status = waiter.remote_start_status(1, "CP-1").unwrap();
    assert_eq!(status.connector_id, Some(2));
    assert_eq!(status.id_tag.as_deref(), Some("TAG01"));
    assert!(status.finished);
    assert_eq!(status.response.as_deref(), Some("Accepted"));
    assert!(!status.awaiting_transaction);
}

#[tokio::test(start_paused = true)]
async fn test_finished_tasks_leave_the_store() {
    let store = Arc::new(InMemoryTaskStore::with_retention(Duration::from_secs(60)));
    let sweeper = spawn_eviction(store.clone(), Duration::from_secs(10));
    let (waiter, central) = setup_with_store(store);
    let rx = central.connect("CP-1");
    spawn_charge_point(central.clone(), "CP-1", rx, Behaviour::Charge);

    let params = RemoteStartParams::new("CP-1", "TAG01");
    for _ in 0..5 {
        waiter
            .start_and_wait_for_transaction_id(&params, Duration::from_secs(10))
            .await
            .unwrap();
    }
    assert_eq!(waiter.pending_count(), 0);
    assert_eq!(central.task_store().len(), 5);

    tokio::time::sleep(Duration::from_secs(75)).await;
    assert!(central.task_store().is_empty());
    sweeper.abort();
}
