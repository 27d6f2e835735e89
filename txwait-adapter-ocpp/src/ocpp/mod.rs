//! OCPP 1.6 JSON protocol implementation
//!
//! Framing and the payloads of the remote-start flow.

pub mod types;
pub mod messages;

pub use types::*;
pub use messages::*;
