//! The answering side of the bridge.
//!
//! A [`BridgeListener`] accepts bridge connections and turns every
//! request into a [`BridgeCall`] delivered to the owning server's control
//! task. The control task answers through [`BridgeCall::respond`]; the
//! listener writes the answer back on the same connection.

use std::net::SocketAddr;

use lobbynet_protocol::{JsonCodec, recv_message, send_message};
use lobbynet_transport::{
    Connection, TcpConnection, TcpTransport, Transport, TransportError,
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{BridgeRequest, BridgeResponse};

/// One incoming request waiting for its answer.
#[derive(Debug)]
pub struct BridgeCall {
    pub request: BridgeRequest,
    reply: oneshot::Sender<BridgeResponse>,
}

impl BridgeCall {
    /// Answers the call. A caller that already hung up is ignored.
    pub fn respond(self, response: BridgeResponse) {
        let _ = self.reply.send(response);
    }
}

/// Accepts bridge connections until closed or dropped.
pub struct BridgeListener {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
}

impl BridgeListener {
    /// Binds `addr` and starts accepting. Every request is forwarded to
    /// `calls`.
    pub async fn bind(
        addr: &str,
        calls: mpsc::Sender<BridgeCall>,
    ) -> Result<Self, TransportError> {
        let transport = TcpTransport::bind(addr).await?;
        let local_addr =
            transport.local_addr().map_err(TransportError::AcceptFailed)?;
        let (stop, stopped) = watch::channel(false);
        tokio::spawn(accept_loop(transport, calls, stopped));
        tracing::info!(%local_addr, "bridge listening");
        Ok(Self { local_addr, stop })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes open bridge connections.
    pub fn close(&self) {
        self.stop.send_replace(true);
    }
}

impl Drop for BridgeListener {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    mut transport: TcpTransport,
    calls: mpsc::Sender<BridgeCall>,
    mut stopped: watch::Receiver<bool>,
) {
    let serve_stop = stopped.clone();
    loop {
        tokio::select! {
            accepted = transport.accept() => match accepted {
                Ok(conn) => {
                    tokio::spawn(serve(conn, calls.clone(), serve_stop.clone()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "bridge accept failed");
                }
            },
            _ = stopped.wait_for(|stop| *stop) => break,
        }
    }
    tracing::debug!("bridge accept loop stopped");
}

async fn serve(
    conn: TcpConnection,
    calls: mpsc::Sender<BridgeCall>,
    mut stopped: watch::Receiver<bool>,
) {
    let codec = JsonCodec;
    tracing::debug!(
        conn_id = %conn.id(),
        peer = %conn.peer_addr(),
        "bridge peer connected"
    );

    loop {
        let request = tokio::select! {
            received = recv_message::<_, BridgeRequest>(&conn, &codec) => {
                received
            }
            _ = stopped.wait_for(|stop| *stop) => break,
        };
        let request = match request {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(
                    conn_id = %conn.id(),
                    error = %e,
                    "bad bridge request"
                );
                break;
            }
        };

        tracing::debug!(?request, "bridge call received");
        let (reply, answer) = oneshot::channel();
        let response = if calls.send(BridgeCall { request, reply }).await.is_err()
        {
            BridgeResponse::failed("server shutting down")
        } else {
            answer
                .await
                .unwrap_or_else(|_| BridgeResponse::failed("request dropped"))
        };

        if let Err(e) = send_message(&conn, &codec, &response).await {
            tracing::warn!(
                conn_id = %conn.id(),
                error = %e,
                "bridge reply failed"
            );
            break;
        }
    }

    let _ = conn.close().await;
    tracing::debug!(conn_id = %conn.id(), "bridge peer gone");
}
