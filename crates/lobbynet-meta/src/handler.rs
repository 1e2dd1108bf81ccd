//! Per-connection session task.
//!
//! Each accepted connection gets one task running [`handle_connection`].
//! It owns the connection's reader channel and keepalive timer; all
//! shared state (the live session set, game records) lives in the
//! control task and is reached through [`Control`] messages.

use std::sync::Arc;

use lobbynet_protocol::wire::{
    MAX_CHAT_LEN, MAX_NAME_LEN, command, disconnect, reason,
};
use lobbynet_protocol::{
    MetaCommand, Packet, ProtocolError, recv_packet, send_packet,
};
use lobbynet_session::{
    Keepalive, KeepaliveAction, LoginRequest, Session, SessionConfig,
    SessionError, unix_secs,
};
use lobbynet_transport::{Connection, ConnectionId, TcpConnection};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

use crate::MetaError;
use crate::server::Control;

/// What the control task asks a session task to do.
#[derive(Debug)]
pub(crate) enum Outbound {
    Packet(Packet),
    /// Send `DISCONNECT <reason>` and end the session.
    Disconnect(&'static str),
}

/// The control task's way of reaching one session.
#[derive(Debug, Clone)]
pub(crate) struct SessionHandle {
    conn_id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub(crate) fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queues a packet. A session that already ended drops it.
    pub(crate) fn send(&self, packet: Packet) {
        let _ = self.outbound.send(Outbound::Packet(packet));
    }

    pub(crate) fn disconnect(&self, reason: &'static str) {
        let _ = self.outbound.send(Outbound::Disconnect(reason));
    }
}

/// Tells the control task the session is gone, even if the task
/// unwinds. `Drop` is synchronous, so the message goes out from a
/// spawned task.
struct LogoutGuard {
    name: String,
    conn_id: ConnectionId,
    control: mpsc::Sender<Control>,
}

impl Drop for LogoutGuard {
    fn drop(&mut self) {
        let logout = Control::Logout {
            name: std::mem::take(&mut self.name),
            conn_id: self.conn_id,
        };
        let control = self.control.clone();
        tokio::spawn(async move {
            let _ = control.send(logout).await;
        });
    }
}

/// Whether the session goes on after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: TcpConnection,
    control: mpsc::Sender<Control>,
    config: Arc<SessionConfig>,
) {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");
    let mut inbound = spawn_reader(Arc::clone(&conn), config.inbound_capacity);

    // --- Step 1: Handshake ---
    let request = match login_packet(&mut inbound, &config).await {
        Ok(Some(request)) => request,
        Ok(None) => {
            tracing::debug!(%conn_id, "closed before LOGIN");
            let _ = conn.close().await;
            return;
        }
        Err(e) => return reject(&conn, &e).await,
    };

    let (outbound_tx, mut outbound) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        conn_id,
        outbound: outbound_tx,
    };
    let session = match admit(&control, request, handle).await {
        Ok(session) => session,
        Err(e) => return reject(&conn, &e).await,
    };
    let _guard = LogoutGuard {
        name: session.name.clone(),
        conn_id,
        control: control.clone(),
    };

    let mut task = SessionTask {
        conn: Arc::clone(&conn),
        name: session.name.clone(),
        control,
        keepalive: Keepalive::start(
            config.ping_interval,
            config.ping_timeout,
            Instant::now(),
        ),
    };
    if let Err(e) = task.welcome(&session, &config.motd).await {
        tracing::debug!(%conn_id, error = %e, "link lost during welcome");
        let _ = conn.close().await;
        return;
    }

    // --- Step 2: Message loop ---
    loop {
        let step = tokio::select! {
            item = inbound.recv() => match item {
                Some(Ok(packet)) => task.dispatch(packet).await,
                Some(Err(e)) => Err(e.into()),
                None => {
                    tracing::info!(name = %task.name, "connection closed");
                    Ok(Flow::Stop)
                }
            },
            Some(out) = outbound.recv() => match out {
                Outbound::Packet(packet) => task.send(&packet).await.map(|()| Flow::Continue),
                Outbound::Disconnect(why) => task.disconnect(why).await,
            },
            () = sleep_until(task.keepalive.deadline()) => task.on_keepalive().await,
        };

        match step {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(MetaError::Protocol(e)) if e.is_malformed() => {
                tracing::warn!(name = %task.name, error = %e, "malformed packet");
                let _ = task.disconnect(reason::INVALID_PACKET).await;
                break;
            }
            Err(e) => {
                tracing::debug!(name = %task.name, error = %e, "session link lost");
                break;
            }
        }
    }

    let _ = conn.close().await;
    tracing::info!(name = %task.name, "session ended");
}

/// Spawns the reader task. The channel ends after a malformed packet or
/// when the link closes.
fn spawn_reader(
    conn: Arc<TcpConnection>,
    capacity: usize,
) -> mpsc::Receiver<Result<Packet, ProtocolError>> {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        loop {
            let item = match recv_packet(&conn).await {
                Ok(Some(packet)) => Ok(packet),
                Ok(None) => break,
                Err(e) if e.is_malformed() => Err(e),
                Err(e) => {
                    tracing::debug!(conn_id = %conn.id(), error = %e, "read failed");
                    break;
                }
            };
            let last = item.is_err();
            if tx.send(item).await.is_err() || last {
                break;
            }
        }
    });
    rx
}

/// Waits for the LOGIN packet. `Ok(None)` means the peer left first.
async fn login_packet(
    inbound: &mut mpsc::Receiver<Result<Packet, ProtocolError>>,
    config: &SessionConfig,
) -> Result<Option<LoginRequest>, SessionError> {
    match tokio::time::timeout(config.login_timeout, inbound.recv()).await {
        Err(_) => Err(SessionError::LoginTimeout),
        Ok(None) => Ok(None),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(Some(Ok(packet))) => Ok(Some(LoginRequest::parse(packet)?)),
    }
}

/// Asks the control task to admit the login.
async fn admit(
    control: &mpsc::Sender<Control>,
    request: LoginRequest,
    handle: SessionHandle,
) -> Result<Session, SessionError> {
    let (reply, answer) = oneshot::channel();
    control
        .send(Control::Login {
            request,
            handle,
            reply,
        })
        .await
        .map_err(|_| SessionError::ShuttingDown)?;
    answer.await.map_err(|_| SessionError::ShuttingDown)?
}

async fn reject(conn: &TcpConnection, err: &SessionError) {
    tracing::info!(conn_id = %conn.id(), error = %err, "login rejected");
    let _ = send_packet(conn, &disconnect(err.reason())).await;
    let _ = conn.close().await;
}

/// State of a logged-in session.
struct SessionTask {
    conn: Arc<TcpConnection>,
    name: String,
    control: mpsc::Sender<Control>,
    keepalive: Keepalive,
}

impl SessionTask {
    /// Sends one packet. A packet that cannot be encoded is dropped
    /// (`send_packet` already logged it) and the session goes on.
    async fn send(&self, packet: &Packet) -> Result<(), MetaError> {
        match send_packet(&self.conn, packet).await {
            Err(e) if !e.is_unencodable() => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Sends `LOGIN`, `TIME` and the message of the day.
    async fn welcome(
        &self,
        session: &Session,
        motd: &str,
    ) -> Result<(), MetaError> {
        self.send(
            &Packet::new(command::LOGIN)
                .with(&session.name)
                .with(session.permission.as_str()),
        )
        .await?;
        self.send(
            &Packet::new(command::TIME).with(unix_secs(session.login_time)),
        )
        .await?;
        if !motd.is_empty() {
            self.send(&Packet::new(command::CHAT).with("*").with(motd))
                .await?;
        }
        Ok(())
    }

    async fn disconnect(&self, why: &'static str) -> Result<Flow, MetaError> {
        tracing::info!(name = %self.name, reason = why, "disconnecting session");
        self.send(&disconnect(why)).await?;
        Ok(Flow::Stop)
    }

    async fn on_keepalive(&mut self) -> Result<Flow, MetaError> {
        match self.keepalive.on_deadline(Instant::now()) {
            KeepaliveAction::SendPing => {
                self.send(&Packet::new(command::PING)).await?;
                Ok(Flow::Continue)
            }
            KeepaliveAction::TimedOut => {
                self.disconnect(reason::CLIENT_TIMEOUT).await
            }
        }
    }

    /// Hands a control message to the control task. A missing control
    /// task means the server is gone.
    async fn forward(&self, msg: Control) -> Result<Flow, MetaError> {
        match self.control.send(msg).await {
            Ok(()) => Ok(Flow::Continue),
            Err(_) => Ok(Flow::Stop),
        }
    }

    async fn dispatch(&mut self, mut packet: Packet) -> Result<Flow, MetaError> {
        let Some(cmd) = MetaCommand::lookup(packet.command()) else {
            tracing::debug!(
                name = %self.name,
                command = packet.command(),
                "ignoring unknown command"
            );
            return Ok(Flow::Continue);
        };

        let player = self.name.clone();
        match cmd {
            MetaCommand::Login => {
                tracing::debug!(name = %self.name, "ignoring repeated LOGIN");
                Ok(Flow::Continue)
            }
            MetaCommand::Ping => {
                self.send(&Packet::new(command::PONG)).await?;
                Ok(Flow::Continue)
            }
            MetaCommand::Pong => {
                if !self.keepalive.on_pong(Instant::now()) {
                    tracing::debug!(name = %self.name, "unsolicited PONG");
                }
                Ok(Flow::Continue)
            }
            MetaCommand::Chat => {
                let text = packet.pop_str_max(MAX_CHAT_LEN)?;
                self.forward(Control::Chat { from: player, text }).await
            }
            MetaCommand::GameOpen => {
                let game = packet.pop_str_max(MAX_NAME_LEN)?;
                let capacity = packet.pop_int()?;
                self.forward(Control::OpenGame {
                    host: player,
                    game,
                    capacity,
                })
                .await
            }
            MetaCommand::GameJoin => {
                let game = packet.pop_str_max(MAX_NAME_LEN)?;
                self.forward(Control::JoinGame { player, game }).await
            }
            MetaCommand::GameLeave => {
                self.forward(Control::LeaveGame { player }).await
            }
            MetaCommand::GamesList => {
                self.forward(Control::ListGames { player }).await
            }
            MetaCommand::Disconnect => {
                let why = packet.pop_opt();
                tracing::info!(name = %self.name, reason = ?why, "client logged out");
                Ok(Flow::Stop)
            }
        }
    }
}
