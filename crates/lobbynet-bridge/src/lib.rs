//! The notification bridge between the matchmaking server and the relay.
//!
//! Both directions use the same machinery: the caller holds a
//! [`BridgeClient`], the callee runs a [`BridgeListener`] whose calls
//! arrive on an `mpsc` channel owned by its control task.
//!
//! ```text
//! matchmaking ──NewGame/CloseGame────→ relay       (relay listens on 7398)
//! matchmaking ←─GameConnected/Closed── relay       (matchmaking listens on 7399)
//! ```

mod client;
mod error;
mod message;
mod server;

pub use client::{BridgeClient, DEFAULT_CALL_TIMEOUT};
pub use error::BridgeError;
pub use message::{BridgeRequest, BridgeResponse};
pub use server::{BridgeCall, BridgeListener};
