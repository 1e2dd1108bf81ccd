//! One accepted relay connection: a host or a participant.

use std::sync::Arc;

use lobbynet_protocol::wire::disconnect;
use lobbynet_protocol::{Packet, ProtocolError, recv_packet, send_packet};
use lobbynet_transport::{Connection, TcpConnection};
use tokio::sync::mpsc;

/// The relay id reserved for a game's host.
pub const HOST_ID: u32 = 0;

/// What a connection's reader task delivers to its game.
#[derive(Debug)]
pub enum Inbound {
    /// A complete, decoded packet.
    Packet(Packet),
    /// The peer sent something undecodable. Nothing follows.
    Malformed(ProtocolError),
    /// The link closed or broke. Nothing follows.
    Closed,
}

/// A connection attached to a relay game under a numeric id.
#[derive(Clone)]
pub struct RelayConnection {
    id: u32,
    conn: Arc<TcpConnection>,
}

impl RelayConnection {
    pub fn new(id: u32, conn: Arc<TcpConnection>) -> Self {
        Self { id, conn }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Spawns the reader task. Packets arrive on the returned channel in
    /// the order the peer sent them; the channel ends after
    /// [`Inbound::Malformed`] or [`Inbound::Closed`].
    pub fn spawn_reader(&self, capacity: usize) -> mpsc::Receiver<Inbound> {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::clone(&self.conn);
        let id = self.id;
        tokio::spawn(async move {
            loop {
                let item = match recv_packet(&conn).await {
                    Ok(Some(packet)) => Inbound::Packet(packet),
                    Ok(None) => Inbound::Closed,
                    Err(e) if e.is_malformed() => Inbound::Malformed(e),
                    Err(e) => {
                        tracing::debug!(id, error = %e, "relay link broken");
                        Inbound::Closed
                    }
                };
                let last = !matches!(item, Inbound::Packet(_));
                if tx.send(item).await.is_err() || last {
                    break;
                }
            }
            tracing::debug!(id, conn_id = %conn.id(), "relay reader stopped");
        });
        rx
    }

    /// Sends a packet. Failures are logged; the reader task reports the
    /// broken link on its own.
    pub async fn send(&self, packet: &Packet) {
        if let Err(e) = send_packet(&self.conn, packet).await {
            tracing::debug!(
                id = self.id,
                command = packet.command(),
                error = %e,
                "relay send failed"
            );
        }
    }

    /// Best-effort `DISCONNECT <reason>`, then close.
    pub async fn disconnect(&self, reason: &str) {
        self.send(&disconnect(reason)).await;
        self.close().await;
    }

    pub async fn close(&self) {
        let _ = self.conn.close().await;
    }
}
