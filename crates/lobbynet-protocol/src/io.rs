//! Sending and receiving packets over a framed connection.

use lobbynet_transport::{Connection, TcpConnection};

use crate::{Codec, Packet, ProtocolError};

/// Encodes and sends one packet.
///
/// A packet that cannot be encoded is a bug in the code that built it;
/// it is logged at error level and nothing is written.
pub async fn send_packet(
    conn: &TcpConnection,
    packet: &Packet,
) -> Result<(), ProtocolError> {
    let body = match packet.encode() {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(
                conn_id = %conn.id(),
                command = packet.command(),
                error = %e,
                "refusing to send malformed packet"
            );
            return Err(e);
        }
    };
    conn.send(&body).await?;
    Ok(())
}

/// Receives and decodes one packet.
///
/// Returns `Ok(None)` when the connection closed cleanly.
pub async fn recv_packet(
    conn: &TcpConnection,
) -> Result<Option<Packet>, ProtocolError> {
    match conn.recv().await? {
        Some(body) => Packet::decode(&body).map(Some),
        None => Ok(None),
    }
}

/// Encodes `value` with `codec` and sends it as one frame.
pub async fn send_message<C, T>(
    conn: &TcpConnection,
    codec: &C,
    value: &T,
) -> Result<(), ProtocolError>
where
    C: Codec,
    T: serde::Serialize,
{
    let body = codec.encode(value)?;
    conn.send(&body).await?;
    Ok(())
}

/// Receives one frame and decodes it with `codec`.
pub async fn recv_message<C, T>(
    conn: &TcpConnection,
    codec: &C,
) -> Result<Option<T>, ProtocolError>
where
    C: Codec,
    T: serde::de::DeserializeOwned,
{
    match conn.recv().await? {
        Some(body) => codec.decode(&body).map(Some),
        None => Ok(None),
    }
}
