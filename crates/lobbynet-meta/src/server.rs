//! `MetaServer` builder, control task and accept loop.
//!
//! One control task owns the live session set and the game table. Session
//! tasks, the bridge listener and finished relay provisioning calls all
//! talk to it through channels, so every change to shared state happens
//! in one place and in one order.

use std::net::SocketAddr;
use std::sync::Arc;

use lobbynet_bridge::{
    BridgeCall, BridgeClient, BridgeError, BridgeListener, BridgeRequest,
    BridgeResponse,
};
use lobbynet_protocol::Packet;
use lobbynet_protocol::wire::{command, reason};
use lobbynet_session::{
    InMemoryUsers, LoginRequest, Session, SessionConfig, SessionError,
    SessionManager, UserDatabase,
};
use lobbynet_transport::{
    ConnectionId, TcpTransport, Transport, TransportError,
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::games::{Departure, GameRecord, GameState, GameTable, generate_password};
use crate::handler::{SessionHandle, handle_connection};
use crate::{MetaConfig, MetaError};

/// Requests served by the control task.
pub(crate) enum Control {
    Login {
        request: LoginRequest,
        handle: SessionHandle,
        reply: oneshot::Sender<Result<Session, SessionError>>,
    },
    Logout {
        name: String,
        conn_id: ConnectionId,
    },
    Chat {
        from: String,
        text: String,
    },
    OpenGame {
        host: String,
        game: String,
        capacity: u32,
    },
    JoinGame {
        player: String,
        game: String,
    },
    LeaveGame {
        player: String,
    },
    ListGames {
        player: String,
    },
    Sessions {
        reply: oneshot::Sender<Vec<String>>,
    },
    Games {
        reply: oneshot::Sender<Vec<GameRecord>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// A call to the relay. The relay caller task makes them one at a time,
/// in the order the control task queued them.
enum RelayCall {
    Provision { game: String, password: String },
    Close { game: String, password: String },
}

/// Outcome of a `NewGame` call to the relay.
struct Provisioned {
    game: String,
    password: String,
    result: Result<(), BridgeError>,
}

/// Builder for configuring and starting a matchmaking server.
///
/// # Example
///
/// ```rust,ignore
/// let server = MetaServer::builder()
///     .bind("0.0.0.0:7395")
///     .relay_bridge_addr("10.0.0.6:7398")
///     .relay_public_addr("relay.example.net:7397")
///     .users(accounts)
///     .build()
///     .await?;
/// let handle = server.handle();
/// tokio::spawn(server.run());
/// ```
pub struct MetaServerBuilder {
    config: MetaConfig,
    users: Box<dyn UserDatabase>,
}

impl MetaServerBuilder {
    /// Creates a new builder with default settings and no accounts.
    pub fn new() -> Self {
        Self {
            config: MetaConfig::default(),
            users: Box::new(InMemoryUsers::new()),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: MetaConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address clients connect to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Sets the address the relay's bridge calls arrive on.
    pub fn bridge_bind(mut self, addr: &str) -> Self {
        self.config.bridge_bind = addr.to_string();
        self
    }

    /// Sets where the relay's bridge listener is.
    pub fn relay_bridge_addr(mut self, addr: &str) -> Self {
        self.config.relay_bridge_addr = addr.to_string();
        self
    }

    /// Sets the relay address handed out in `GAME_OPEN` and `GAME_JOIN`.
    pub fn relay_public_addr(mut self, addr: &str) -> Self {
        self.config.relay_public_addr = addr.to_string();
        self
    }

    /// Sets session behavior (keepalive, login timeout, MOTD).
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Sets the registered-account database.
    pub fn users(mut self, users: impl UserDatabase) -> Self {
        self.users = Box::new(users);
        self
    }

    /// Binds both listeners.
    pub async fn build(self) -> Result<MetaServer, MetaError> {
        let transport = TcpTransport::bind(&self.config.bind).await?;
        let local_addr =
            transport.local_addr().map_err(TransportError::AcceptFailed)?;
        let (calls_tx, bridge_calls) = mpsc::channel(32);
        let bridge =
            BridgeListener::bind(&self.config.bridge_bind, calls_tx).await?;
        let (control_tx, control_rx) = mpsc::channel(256);

        Ok(MetaServer {
            transport,
            local_addr,
            bridge,
            bridge_calls,
            relay: BridgeClient::new(self.config.relay_bridge_addr.clone()),
            users: self.users,
            control_tx,
            control_rx,
            config: self.config,
        })
    }
}

impl Default for MetaServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound matchmaking server. Call [`run()`](Self::run) to start it.
pub struct MetaServer {
    transport: TcpTransport,
    local_addr: SocketAddr,
    bridge: BridgeListener,
    bridge_calls: mpsc::Receiver<BridgeCall>,
    relay: BridgeClient,
    users: Box<dyn UserDatabase>,
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    config: MetaConfig,
}

impl MetaServer {
    /// Creates a new builder.
    pub fn builder() -> MetaServerBuilder {
        MetaServerBuilder::new()
    }

    /// The address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address the bridge listener is bound to.
    pub fn bridge_addr(&self) -> SocketAddr {
        self.bridge.local_addr()
    }

    /// A handle for querying and stopping the server from other tasks.
    pub fn handle(&self) -> MetaHandle {
        MetaHandle {
            control: self.control_tx.clone(),
        }
    }

    /// Accepts connections until shut down through a [`MetaHandle`].
    /// Returns after every session has been told to leave and is gone.
    pub async fn run(self) -> Result<(), MetaError> {
        let Self {
            mut transport,
            local_addr,
            bridge,
            bridge_calls,
            relay,
            users,
            control_tx,
            control_rx,
            config,
        } = self;

        let (stop, mut stopped) = watch::channel(false);
        let (provisioned_tx, provisioned) = mpsc::unbounded_channel();
        let (relay_calls, relay_queue) = mpsc::unbounded_channel();
        tokio::spawn(relay_loop(relay, relay_queue, provisioned_tx));
        let task = ControlTask {
            sessions: SessionManager::new(),
            games: GameTable::new(),
            users,
            relay_calls,
            relay_public_addr: config.relay_public_addr.clone(),
            control: control_rx,
            bridge_calls,
            bridge,
            provisioned,
            stop,
            acks: Vec::new(),
        };
        let control = tokio::spawn(task.run());
        let session_config = Arc::new(config.session);

        tracing::info!(%local_addr, "matchmaking server running");
        loop {
            tokio::select! {
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        tokio::spawn(handle_connection(
                            conn,
                            control_tx.clone(),
                            Arc::clone(&session_config),
                        ));
                    }
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
                _ = stopped.wait_for(|stop| *stop) => break,
            }
        }
        drop(transport);

        if let Err(e) = control.await {
            tracing::error!(error = %e, "control task failed");
        }
        tracing::info!("matchmaking server stopped");
        Ok(())
    }
}

/// Cloneable handle to a running matchmaking server.
#[derive(Clone)]
pub struct MetaHandle {
    control: mpsc::Sender<Control>,
}

impl MetaHandle {
    /// Stops accepting, tells every session `DISCONNECT SERVER_SHUTDOWN`
    /// and resolves once they are all gone. Calling it again, or after
    /// the server stopped, returns immediately.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.control.send(Control::Shutdown { ack }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Names of the logged-in sessions, sorted.
    pub async fn sessions(&self) -> Result<Vec<String>, MetaError> {
        let (reply, answer) = oneshot::channel();
        self.request(Control::Sessions { reply }, answer).await
    }

    /// Every game record, ordered by name.
    pub async fn games(&self) -> Result<Vec<GameRecord>, MetaError> {
        let (reply, answer) = oneshot::channel();
        self.request(Control::Games { reply }, answer).await
    }

    async fn request<T>(
        &self,
        msg: Control,
        answer: oneshot::Receiver<T>,
    ) -> Result<T, MetaError> {
        let gone = || MetaError::Session(SessionError::ShuttingDown);
        self.control.send(msg).await.map_err(|_| gone())?;
        answer.await.map_err(|_| gone())
    }
}

/// The control task's state.
struct ControlTask {
    sessions: SessionManager<SessionHandle>,
    games: GameTable,
    users: Box<dyn UserDatabase>,
    relay_calls: mpsc::UnboundedSender<RelayCall>,
    relay_public_addr: String,
    control: mpsc::Receiver<Control>,
    bridge_calls: mpsc::Receiver<BridgeCall>,
    bridge: BridgeListener,
    provisioned: mpsc::UnboundedReceiver<Provisioned>,
    stop: watch::Sender<bool>,
    /// Shutdown callers waiting for the last session to leave.
    acks: Vec<oneshot::Sender<()>>,
}

impl ControlTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(msg) = self.control.recv() => self.handle(msg),
                Some(call) = self.bridge_calls.recv() => {
                    self.handle_bridge_call(call);
                }
                Some(done) = self.provisioned.recv() => {
                    self.handle_provisioned(done);
                }
                else => break,
            }
            if self.drained() {
                break;
            }
        }
        for ack in self.acks.drain(..) {
            let _ = ack.send(());
        }
        tracing::info!("control task finished");
    }

    /// Shutdown was requested and the last session is gone.
    fn drained(&self) -> bool {
        !self.sessions.is_accepting() && self.sessions.is_empty()
    }

    fn handle(&mut self, msg: Control) {
        match msg {
            Control::Login {
                request,
                handle,
                reply,
            } => self.login(request, handle, reply),
            Control::Logout { name, conn_id } => self.logout(&name, conn_id),
            Control::Chat { from, text } => {
                self.seen(&from);
                self.broadcast(&Packet::new(command::CHAT).with(&from).with(text));
            }
            Control::OpenGame {
                host,
                game,
                capacity,
            } => {
                self.seen(&host);
                self.open_game(&host, game, capacity);
            }
            Control::JoinGame { player, game } => {
                self.seen(&player);
                self.join_game(&player, &game);
            }
            Control::LeaveGame { player } => {
                self.seen(&player);
                self.leave_game(&player);
            }
            Control::ListGames { player } => {
                self.seen(&player);
                self.send_to(&player, self.games.games_update());
            }
            Control::Sessions { reply } => {
                let mut names: Vec<String> = self
                    .sessions
                    .iter()
                    .map(|live| live.session.name.clone())
                    .collect();
                names.sort();
                let _ = reply.send(names);
            }
            Control::Games { reply } => {
                let _ = reply.send(self.games.iter().cloned().collect());
            }
            Control::Shutdown { ack } => self.shutdown(ack),
        }
    }

    fn login(
        &mut self,
        request: LoginRequest,
        handle: SessionHandle,
        reply: oneshot::Sender<Result<Session, SessionError>>,
    ) {
        let games_update = self.games.games_update();
        let admitted = self
            .sessions
            .admit(&request, self.users.as_ref(), handle.clone())
            .cloned();
        match &admitted {
            Ok(_) => handle.send(games_update),
            Err(e) => tracing::info!(
                requested = %request.name,
                error = %e,
                "login refused"
            ),
        }
        if let Err(Ok(session)) = reply.send(admitted) {
            // The session task died while we were admitting it.
            self.sessions.remove(&session.name);
        }
    }

    fn logout(&mut self, name: &str, conn_id: ConnectionId) {
        let current = self
            .sessions
            .get(name)
            .is_some_and(|live| live.handle.conn_id() == conn_id);
        if !current {
            return;
        }
        self.sessions.remove(name);
        if self.games.game_of(name).is_some() {
            self.leave_game(name);
        }
    }

    /// Records activity from a session.
    fn seen(&mut self, name: &str) {
        if let Some(live) = self.sessions.get_mut(name) {
            live.session.touch();
        }
    }

    fn send_to(&self, name: &str, packet: Packet) {
        if let Some(live) = self.sessions.get(name) {
            live.handle.send(packet);
        }
    }

    fn broadcast(&self, packet: &Packet) {
        for live in self.sessions.iter() {
            live.handle.send(packet.clone());
        }
    }

    fn broadcast_games(&self) {
        self.broadcast(&self.games.games_update());
    }

    fn open_game(&mut self, host: &str, game: String, capacity: u32) {
        let password = generate_password();
        if let Err(e) = self.games.open(&game, host, capacity, password.clone())
        {
            tracing::info!(%game, %host, error = %e, "game open refused");
            self.send_to(host, failed(command::GAME_OPEN_FAILED, &game, &e));
            return;
        }

        let _ = self.relay_calls.send(RelayCall::Provision { game, password });
    }

    fn handle_provisioned(&mut self, done: Provisioned) {
        let Provisioned {
            game,
            password,
            result,
        } = done;
        let Some(record) = self
            .games
            .get(&game)
            .filter(|record| record.password == password)
        else {
            tracing::debug!(%game, "provisioned game no longer wanted");
            return;
        };
        let host = record.host.clone();

        match result {
            Ok(()) => {
                if let Err(e) = self.games.advance(&game, GameState::Connectable)
                {
                    tracing::warn!(%game, error = %e, "cannot mark game connectable");
                    return;
                }
                self.send_to(
                    &host,
                    Packet::new(command::GAME_OPEN)
                        .with(&game)
                        .with(&self.relay_public_addr)
                        .with(password),
                );
                self.broadcast_games();
            }
            Err(e) => {
                tracing::warn!(%game, error = %e, "relay refused game");
                self.games.remove(&game);
                let e = MetaError::from(e);
                self.send_to(&host, failed(command::GAME_OPEN_FAILED, &game, &e));
            }
        }
    }

    fn join_game(&mut self, player: &str, game: &str) {
        match self.games.join(player, game) {
            Ok(_) => {
                self.send_to(
                    player,
                    Packet::new(command::GAME_JOIN)
                        .with(game)
                        .with(&self.relay_public_addr),
                );
                self.broadcast_games();
            }
            Err(e) => {
                tracing::info!(%game, %player, error = %e, "join refused");
                self.send_to(player, failed(command::GAME_JOIN_FAILED, game, &e));
            }
        }
    }

    fn leave_game(&mut self, player: &str) {
        match self.games.leave(player) {
            Ok(Departure::Left { game }) => {
                tracing::info!(%game, %player, "player left game");
                self.broadcast_games();
            }
            Ok(Departure::Ended(record)) => {
                tracing::info!(
                    game = %record.name,
                    host = %record.host,
                    "host left, game ended"
                );
                // A running game ends when its host leaves the relay.
                if record.state != GameState::Running {
                    let _ = self.relay_calls.send(RelayCall::Close {
                        game: record.name,
                        password: record.password,
                    });
                }
                self.broadcast_games();
            }
            Err(e) => tracing::debug!(%player, error = %e, "leave ignored"),
        }
    }

    fn handle_bridge_call(&mut self, call: BridgeCall) {
        let response = match &call.request {
            BridgeRequest::GameConnected { name } => {
                match self.games.advance(name, GameState::Running) {
                    Ok(_) => {
                        self.broadcast_games();
                        BridgeResponse::Ok
                    }
                    Err(e) => {
                        tracing::warn!(game = %name, error = %e, "unexpected GameConnected");
                        BridgeResponse::failed(e.reason())
                    }
                }
            }
            BridgeRequest::GameClosed { name } => {
                // A record still in setup belongs to a newer game of the
                // same name.
                let provisioned = self
                    .games
                    .get(name)
                    .is_some_and(|record| record.state.is_listed());
                if provisioned && self.games.remove(name).is_some() {
                    self.broadcast_games();
                }
                BridgeResponse::Ok
            }
            other => {
                tracing::warn!(
                    request = ?other,
                    "matchmaking server can't serve this bridge call"
                );
                BridgeResponse::failed("unsupported call")
            }
        };
        call.respond(response);
    }

    fn shutdown(&mut self, ack: oneshot::Sender<()>) {
        self.acks.push(ack);
        if !self.sessions.is_accepting() {
            return;
        }
        tracing::info!(sessions = self.sessions.len(), "matchmaking server shutting down");
        self.sessions.begin_shutdown();
        self.stop.send_replace(true);
        self.bridge.close();
        for live in self.sessions.iter() {
            live.handle.disconnect(reason::SERVER_SHUTDOWN);
        }
    }
}

/// Makes the queued relay calls in order and reports provisioning
/// outcomes back to the control task.
async fn relay_loop(
    relay: BridgeClient,
    mut queue: mpsc::UnboundedReceiver<RelayCall>,
    done: mpsc::UnboundedSender<Provisioned>,
) {
    while let Some(call) = queue.recv().await {
        match call {
            RelayCall::Provision { game, password } => {
                let result = relay.new_game(&game, &password).await;
                let _ = done.send(Provisioned {
                    game,
                    password,
                    result,
                });
            }
            RelayCall::Close { game, password } => {
                if let Err(e) = relay.close_game(&game, &password).await {
                    tracing::warn!(%game, error = %e, "relay game not closed");
                }
            }
        }
    }
}

/// Builds `<command> <game> <reason>`.
fn failed(command: &str, game: &str, err: &MetaError) -> Packet {
    Packet::new(command).with(game).with(err.reason())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_after_server_gone_is_noop() {
        let (control, rx) = mpsc::channel(1);
        drop(rx);
        let handle = MetaHandle { control };
        handle.shutdown().await;
        assert!(handle.sessions().await.is_err());
        assert!(handle.games().await.is_err());
    }

    #[test]
    fn test_failed_reply_carries_reason() {
        let err = MetaError::GameFull("forest".into());
        let packet = failed(command::GAME_JOIN_FAILED, "forest", &err);
        assert_eq!(packet.fields(), ["GAME_JOIN_FAILED", "forest", "GAME_FULL"]);
    }
}
