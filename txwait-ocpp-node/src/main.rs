//! txwait OCPP node - remote start and wait for the transaction id
//!
//! Wires the transaction waiter to the OCPP central-system adapter and an
//! in-process simulated charge point, then runs one or more
//! start-and-wait flows.
//!
//! # Usage
//!
//! ```bash
//! # One remote start with defaults
//! txwait-ocpp-node --charge-box CP-1 --id-tag TAG01
//!
//! # Ten concurrent starts on connector 2, slow charge point
//! txwait-ocpp-node --connector 2 --concurrent 10 --start-delay-ms 1500
//!
//! # Charge point rejects the command
//! txwait-ocpp-node --reject
//!
//! # Charge point accepts but never starts; expect a timeout after 5 s
//! txwait-ocpp-node --silent --timeout-secs 5
//! ```

mod simulator;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use txwait_adapter_ocpp::{AdapterConfig, CentralSystem};
use txwait_core::task_store::spawn_eviction;
use txwait_core::{bus, InMemoryTaskStore, NotificationBus, RemoteStartParams, TransactionWaiter, WaiterConfig};

use crate::simulator::SimulatorConfig;

/// Remote start with transaction-id correlation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Charge box identity
    #[arg(short, long, default_value = "CP-1")]
    charge_box: String,

    /// Id tag to start the transaction for
    #[arg(short, long, default_value = "TAG01")]
    id_tag: String,

    /// Connector to start on (any connector if omitted)
    #[arg(long)]
    connector: Option<i32>,

    /// Seconds to wait for the transaction to start (must exceed the 3 s ack ceiling)
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Seconds finished tasks stay queryable
    #[arg(long, default_value = "300")]
    task_retention_secs: u64,

    /// Charge point delay before answering RemoteStartTransaction
    #[arg(long, default_value = "200")]
    ack_delay_ms: u64,

    /// Charge point delay between answering and StartTransaction
    #[arg(long, default_value = "800")]
    start_delay_ms: u64,

    /// Random extra delay for the simulated charge point
    #[arg(long, default_value = "100")]
    jitter_ms: u64,

    /// Charge point rejects the command
    #[arg(long)]
    reject: bool,

    /// Charge point accepts but never starts a transaction
    #[arg(long)]
    silent: bool,

    /// Number of concurrent start-and-wait flows
    #[arg(long, default_value = "1")]
    concurrent: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            txwait OCPP Node - Remote Start and Wait          ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Charge box: {:<48} ║", truncate(&args.charge_box, 48));
    println!("║  Id tag:     {:<48} ║", truncate(&args.id_tag, 48));
    println!("║  Connector:  {:<48} ║", args.connector.map_or("any".to_string(), |c| c.to_string()));
    println!("║  Timeout:    {:<48} ║", format!("{}s", args.timeout_secs));
    println!("║  Flows:      {:<48} ║", args.concurrent);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Build components
    let defaults = WaiterConfig::default();
    let bus_capacity = defaults.bus_capacity.max(args.concurrent * 2);
    let waiter_config = defaults
        .with_default_start_timeout(Duration::from_secs(args.timeout_secs))
        .with_task_retention(Duration::from_secs(args.task_retention_secs))
        .with_bus_capacity(bus_capacity);
    waiter_config.validate()?;

    let events = NotificationBus::new(waiter_config.bus_capacity);
    let store = Arc::new(InMemoryTaskStore::with_retention(waiter_config.task_retention));
    let eviction = spawn_eviction(store.clone(), Duration::from_secs(10));
    let central = Arc::new(CentralSystem::new(
        AdapterConfig::default(),
        store.clone(),
        events.clone(),
    ));

    let waiter = Arc::new(TransactionWaiter::new(waiter_config, store, central.clone()));
    let listener = bus::spawn_listener(waiter.clone(), events.subscribe());

    let outgoing = central.connect(&args.charge_box);
    simulator::spawn(
        central.clone(),
        outgoing,
        SimulatorConfig {
            charge_box_id: args.charge_box.clone(),
            ack_delay: Duration::from_millis(args.ack_delay_ms),
            start_delay: Duration::from_millis(args.start_delay_ms),
            jitter: Duration::from_millis(args.jitter_ms),
            reject: args.reject,
            silent: args.silent,
        },
    );

    info!("Starting {} remote start flow(s)...", args.concurrent);

    let mut params = RemoteStartParams::new(&args.charge_box, &args.id_tag);
    params.connector_id = args.connector;

    let flows: Vec<_> = (0..args.concurrent.max(1))
        .map(|flow| {
            let waiter = waiter.clone();
            let params = params.clone();
            tokio::spawn(async move {
                let timeout = waiter.config().default_start_timeout;
                let result = waiter.start_and_wait_for_transaction_id(&params, timeout).await;
                (flow, result)
            })
        })
        .collect();

    let mut failures = 0;
    for handle in flows {
        match handle.await? {
            (flow, Ok(transaction_id)) => {
                info!("Flow {}: transaction {}", flow, transaction_id);
                println!("flow {} -> transaction {}", flow, transaction_id);
            }
            (flow, Err(e)) => {
                failures += 1;
                error!("Flow {} failed: {}", flow, e);
                println!("flow {} -> error: {}", flow, e);
            }
        }
    }

    info!(
        "Done: {} succeeded, {} failed, {} wait(s) still pending",
        args.concurrent.max(1) - failures,
        failures,
        waiter.pending_count()
    );

    central.disconnect(&args.charge_box);
    listener.abort();
    eviction.abort();

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
