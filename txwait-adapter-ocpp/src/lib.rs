//! # txwait OCPP Adapter
//!
//! OCPP 1.6 central-system adapter for the remote-start transaction waiter.
//!
//! The adapter is both ends of the waiter's protocol seams: it dispatches
//! RemoteStartTransaction to a connected charge point (and records the
//! acknowledgement on the task), and it turns the charge point's
//! StartTransaction into a `TransactionStarted` notification.
//!
//! ## Architecture
//!
//! ```text
//!  caller
//!    │ start_and_wait_for_transaction_id
//!    ▼
//! ┌──────────────────────┐  dispatch   ┌──────────────────────┐
//! │  TransactionWaiter   │────────────►│    CentralSystem     │
//! │  (txwait-core)       │             │  ┌────────────────┐  │  OCPP-J
//! │                      │◄── task ────│  │ pending CALLs  │  │◄──────► charge point
//! │                      │   store     │  └────────────────┘  │
//! │                      │◄── bus ─────│  StartTransaction    │
//! └──────────────────────┘             └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use txwait_adapter_ocpp::{AdapterConfig, CentralSystem};
//! use txwait_core::{bus, InMemoryTaskStore, NotificationBus, RemoteStartParams, TransactionWaiter, WaiterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WaiterConfig::default();
//!     let events = NotificationBus::new(config.bus_capacity);
//!     let store = Arc::new(InMemoryTaskStore::new());
//!     let central = Arc::new(CentralSystem::new(AdapterConfig::default(), store.clone(), events.clone()));
//!
//!     let waiter = Arc::new(TransactionWaiter::new(config, store, central.clone()));
//!     bus::spawn_listener(waiter.clone(), events.subscribe());
//!
//!     // The transport registers the charge point and pumps frames
//!     let _outgoing = central.connect("CP-1");
//!
//!     let params = RemoteStartParams::new("CP-1", "TAG01");
//!     let tx = waiter.start_and_wait_for_transaction_id(&params, Duration::from_secs(30)).await?;
//!     println!("transaction {}", tx);
//!     Ok(())
//! }
//! ```

pub mod ocpp;
pub mod config;
pub mod central;

pub use config::AdapterConfig;
pub use central::CentralSystem;

// Re-export key types
pub use ocpp::{
    Action, Call, CallError, CallResult, ErrorCode, OcppError, OcppMessage,
    RemoteStartStopStatus,
};
