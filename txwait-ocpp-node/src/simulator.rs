//! In-process charge point
//!
//! Drains the frames the central system queues for it and answers through
//! `CentralSystem::handle_frame`, the way a WebSocket transport would.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use txwait_adapter_ocpp::ocpp::RemoteStartTransactionRequest;
use txwait_adapter_ocpp::{Action, Call, CallResult, CentralSystem, OcppMessage, RemoteStartStopStatus};

/// How the simulated charge point reacts to RemoteStartTransaction
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub charge_box_id: String,
    /// Delay before answering the command
    pub ack_delay: Duration,
    /// Delay between the answer and StartTransaction
    pub start_delay: Duration,
    /// Random extra delay added to both, up to this much
    pub jitter: Duration,
    /// Answer Rejected instead of Accepted
    pub reject: bool,
    /// Accept but never send StartTransaction
    pub silent: bool,
}

pub fn spawn(
    central: Arc<CentralSystem>,
    mut rx: mpsc::Receiver<OcppMessage>,
    config: SimulatorConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Simulated charge point {} online", config.charge_box_id);

        while let Some(message) = rx.recv().await {
            match message {
                OcppMessage::Call(call) if call.action == Action::RemoteStartTransaction => {
                    let central = central.clone();
                    let config = config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = remote_start(&central, &config, call).await {
                            warn!("{}: remote start failed: {}", config.charge_box_id, e);
                        }
                    });
                }
                other => debug!("{} ignoring {:?}", config.charge_box_id, other),
            }
        }

        info!("Simulated charge point {} offline", config.charge_box_id);
    })
}

async fn remote_start(
    central: &CentralSystem,
    config: &SimulatorConfig,
    call: Call,
) -> Result<(), txwait_adapter_ocpp::OcppError> {
    let request: RemoteStartTransactionRequest = call.parse_payload()?;

    tokio::time::sleep(config.ack_delay + jitter(config.jitter)).await;

    let status = if config.reject {
        RemoteStartStopStatus::Rejected
    } else {
        RemoteStartStopStatus::Accepted
    };
    let answer = CallResult::remote_start_transaction(call.message_id, status)?;
    central.handle_frame(&config.charge_box_id, &answer.to_bytes()?);

    if config.reject || config.silent {
        return Ok(());
    }

    tokio::time::sleep(config.start_delay + jitter(config.jitter)).await;

    let connector = request.connector_id.unwrap_or(1);
    let start = Call::start_transaction(connector, request.id_tag, 0)?;
    if let Some(OcppMessage::CallResult(confirmation)) =
        central.handle_frame(&config.charge_box_id, &start.to_bytes()?)
    {
        debug!(
            "{}: StartTransaction confirmed: {}",
            config.charge_box_id, confirmation.payload
        );
    }

    Ok(())
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}
