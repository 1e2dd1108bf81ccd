//! Transport layer for lobbynet.
//!
//! Provides the [`Transport`] and [`Connection`] traits, the
//! length-prefixed [`frame`] format every lobbynet socket speaks, and
//! the TCP implementation used by the matchmaking server, the relay and
//! the bridge between them.

#![allow(async_fn_in_trait)]

mod error;
pub mod frame;
mod tcp;

pub use error::TransportError;
pub use frame::{HEADER_LEN, MAX_FRAME_LEN};
pub use tcp::{TcpConnection, TcpTransport};

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that exchanges framed messages.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame body to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame body from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed, either
    /// by the peer or by a local call to [`close`](Self::close).
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection. Calling this more than once is a no-op.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
