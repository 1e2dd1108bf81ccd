//! TCP transport: a listener that hands out framed connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};

use crate::frame::{read_frame, write_frame};
use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A TCP-based [`Transport`] that listens for incoming connections.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self { listener })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let conn = TcpConnection::from_stream(stream, addr);
        tracing::debug!(id = %conn.id, %addr, "accepted TCP connection");
        Ok(conn)
    }
}

/// A single framed TCP connection.
///
/// Reads and writes are guarded by separate locks: one reader task may
/// sit in [`recv`](Connection::recv) while any number of tasks call
/// [`send`](Connection::send). Writes are serialized so frames from
/// concurrent senders never interleave.
pub struct TcpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
}

impl TcpConnection {
    /// Opens an outbound connection.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let connect_failed = |source| TransportError::ConnectFailed {
            addr: addr.to_string(),
            source,
        };
        let stream =
            TcpStream::connect(addr).await.map_err(connect_failed)?;
        let peer = stream.peer_addr().map_err(connect_failed)?;
        let conn = Self::from_stream(stream, peer);
        tracing::debug!(id = %conn.id, %peer, "opened TCP connection");
        Ok(conn)
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not set TCP_NODELAY");
        }
        let (read, write) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Self {
            id: ConnectionId::new(
                NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            ),
            peer,
            reader: Mutex::new(read),
            writer: Mutex::new(write),
            closed,
        }
    }

    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Returns `true` once [`close`](Connection::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(format!(
                "{} closed locally",
                self.id
            )));
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, data).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        tokio::select! {
            frame = read_frame(&mut *reader) => frame,
            () = wait_closed(&mut closed) => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        tracing::debug!(id = %self.id, peer = %self.peer, "closing connection");
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Resolves once the close flag is raised.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}
