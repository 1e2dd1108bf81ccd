//! The calling side of the bridge.

use std::time::Duration;

use lobbynet_protocol::{JsonCodec, recv_message, send_message};
use lobbynet_transport::{Connection, TcpConnection, TransportError};
use tokio::sync::Mutex;

use crate::{BridgeError, BridgeRequest, BridgeResponse};

/// How long a call waits for its response by default.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A lazily connected bridge client.
///
/// Nothing is dialed at construction, so the two servers can start in
/// either order. A call that finds the link broken reconnects once and
/// retries once; a second failure is returned to the caller. A call
/// that times out is never resent.
///
/// Calls are serialized: one request and its response occupy the link
/// at a time, so responses always pair with the right request.
pub struct BridgeClient {
    addr: String,
    link: Mutex<Option<TcpConnection>>,
    codec: JsonCodec,
    call_timeout: Duration,
}

impl BridgeClient {
    /// Creates a client for the bridge listener at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            link: Mutex::new(None),
            codec: JsonCodec,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets how long a single attempt waits for its response.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The address this client calls.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Asks the relay to provision a game.
    pub async fn new_game(
        &self,
        name: &str,
        password: &str,
    ) -> Result<(), BridgeError> {
        self.call(&BridgeRequest::NewGame {
            name: name.to_string(),
            password: password.to_string(),
        })
        .await
    }

    /// Asks the relay to drop a game nobody hosts yet.
    pub async fn close_game(
        &self,
        name: &str,
        password: &str,
    ) -> Result<(), BridgeError> {
        self.call(&BridgeRequest::CloseGame {
            name: name.to_string(),
            password: password.to_string(),
        })
        .await
    }

    /// Performs one call.
    ///
    /// # Errors
    /// - [`BridgeError::Unavailable`] if the link was broken and the
    ///   reconnect failed
    /// - [`BridgeError::Rejected`] if the other side answered `Failed`
    /// - [`BridgeError::Timeout`] if no answer arrived; the call is not
    ///   resent
    /// - any transport or protocol error from the retried call
    pub async fn call(&self, request: &BridgeRequest) -> Result<(), BridgeError> {
        let mut link = self.link.lock().await;

        match self.attempt(&mut link, request).await {
            Ok(response) => return response.into_result(),
            Err(e) if e.is_broken_link() => {
                tracing::warn!(
                    addr = %self.addr,
                    game = request.game_name(),
                    error = %e,
                    "bridge link broken, reconnecting"
                );
            }
            Err(BridgeError::Timeout) => {
                // A late reply must not pair with the next call.
                self.drop_link(&mut link).await;
                tracing::warn!(
                    addr = %self.addr,
                    game = request.game_name(),
                    "bridge call timed out"
                );
                return Err(BridgeError::Timeout);
            }
            Err(e) => return Err(e),
        }

        self.drop_link(&mut link).await;
        let conn = self.connect().await.map_err(|source| {
            BridgeError::Unavailable {
                addr: self.addr.clone(),
                source,
            }
        })?;
        *link = Some(conn);

        match self.attempt(&mut link, request).await {
            Ok(response) => response.into_result(),
            Err(e) => {
                if e.is_broken_link() || matches!(e, BridgeError::Timeout) {
                    self.drop_link(&mut link).await;
                }
                tracing::warn!(
                    addr = %self.addr,
                    game = request.game_name(),
                    error = %e,
                    "bridge call failed after retry"
                );
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        link: &mut Option<TcpConnection>,
        request: &BridgeRequest,
    ) -> Result<BridgeResponse, BridgeError> {
        if link.is_none() {
            *link = Some(self.connect().await?);
        }
        let Some(conn) = link.as_ref() else {
            return Err(TransportError::ConnectionClosed(self.addr.clone()).into());
        };

        send_message(conn, &self.codec, request).await?;
        match tokio::time::timeout(
            self.call_timeout,
            recv_message::<_, BridgeResponse>(conn, &self.codec),
        )
        .await
        {
            Ok(Ok(Some(response))) => {
                tracing::debug!(
                    game = request.game_name(),
                    ?response,
                    "bridge call answered"
                );
                Ok(response)
            }
            Ok(Ok(None)) => Err(TransportError::ConnectionClosed(format!(
                "bridge peer {} hung up",
                self.addr
            ))
            .into()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BridgeError::Timeout),
        }
    }

    /// Dials the peer, giving up after the call timeout.
    async fn connect(&self) -> Result<TcpConnection, TransportError> {
        tokio::time::timeout(self.call_timeout, TcpConnection::connect(&self.addr))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::ConnectFailed {
                    addr: self.addr.clone(),
                    source: std::io::ErrorKind::TimedOut.into(),
                })
            })
    }

    async fn drop_link(&self, link: &mut Option<TcpConnection>) {
        if let Some(conn) = link.take() {
            let _ = conn.close().await;
        }
    }
}
