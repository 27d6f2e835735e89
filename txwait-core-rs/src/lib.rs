//! # txwait-core
//!
//! Correlates OCPP remote-start commands with the transactions they produce.
//!
//! A central system that sends RemoteStartTransaction only learns whether the
//! charge point took the command; the transaction id arrives later in an
//! unrelated StartTransaction. This crate lets a caller block until that id is
//! known:
//!
//! ```text
//! caller ──► TransactionWaiter ──► DispatchClient ──► charge point
//!                 │    ▲                                   │
//!                 │    └──── TaskStore (acknowledgement) ◄─┤
//!                 ▼                                        │
//!          PendingRegistry ◄── NotificationBus ◄── StartTransaction
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use txwait_core::{
//!     bus, DispatchClient, InMemoryTaskStore, NotificationBus, RemoteStartParams,
//!     TransactionWaiter, WaiterConfig,
//! };
//!
//! # async fn run(dispatcher: Arc<dyn DispatchClient>, store: Arc<InMemoryTaskStore>, events: NotificationBus)
//! #     -> Result<(), txwait_core::WaitError> {
//! let waiter = Arc::new(TransactionWaiter::new(WaiterConfig::default(), store, dispatcher));
//! bus::spawn_listener(waiter.clone(), events.subscribe());
//!
//! let params = RemoteStartParams::new("CP-1", "TAG01").with_connector(1);
//! let transaction_id = waiter
//!     .start_and_wait_for_transaction_id(&params, Duration::from_secs(30))
//!     .await?;
//! # let _ = transaction_id;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod registry;
pub mod task_store;
pub mod waiter;
pub mod dispatch;
pub mod bus;
pub mod engine;

pub use types::*;
pub use error::{ConfigError, DispatchError, WaitError};
pub use config::WaiterConfig;
pub use registry::{CleanupGuard, PendingRegistry, PendingTransaction};
pub use task_store::{CommunicationTask, InMemoryTaskStore, TaskStore};
pub use dispatch::DispatchClient;
pub use bus::NotificationBus;
pub use engine::TransactionWaiter;
