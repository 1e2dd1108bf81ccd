//! `RelayServer` builder, registry task and accept loop.
//!
//! The registry of live games belongs to one control task. Routing tasks
//! ask it for a game by name, the bridge listener hands it `NewGame`
//! calls, and games report back through [`GameEvent`]s. Outbound bridge
//! notifications go through a single notifier task so the matchmaking
//! server sees them in the order they happened.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use lobbynet_bridge::{
    BridgeCall, BridgeClient, BridgeListener, BridgeRequest, BridgeResponse,
};
use lobbynet_protocol::wire::{command, disconnect};
use lobbynet_protocol::{ProtocolError, recv_packet, send_packet};
use lobbynet_transport::{
    Connection, TcpConnection, TcpTransport, Transport, TransportError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::game::{GameEvent, RelayGameHandle, spawn_game};
use crate::{Hello, RelayConfig, RelayError};

/// Requests served by the registry task.
enum Control {
    Route {
        game: String,
        reply: oneshot::Sender<Option<RelayGameHandle>>,
    },
    ListGames {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Builder for configuring and starting a relay server.
///
/// # Example
///
/// ```rust,ignore
/// let server = RelayServer::builder()
///     .bind("0.0.0.0:7397")
///     .meta_bridge_addr("10.0.0.5:7399")
///     .build()
///     .await?;
/// let handle = server.handle();
/// tokio::spawn(server.run());
/// // later
/// handle.shutdown().await;
/// ```
pub struct RelayServerBuilder {
    config: RelayConfig,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address hosts and participants connect to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Sets the address the bridge listener binds.
    pub fn bridge_bind(mut self, addr: &str) -> Self {
        self.config.bridge_bind = addr.to_string();
        self
    }

    /// Sets where the matchmaking server's bridge listener is.
    pub fn meta_bridge_addr(mut self, addr: &str) -> Self {
        self.config.meta_bridge_addr = addr.to_string();
        self
    }

    /// Sets how long a new connection has to send `HELLO`.
    pub fn hello_timeout(mut self, timeout: Duration) -> Self {
        self.config.hello_timeout = timeout;
        self
    }

    /// Binds both listeners.
    pub async fn build(self) -> Result<RelayServer, RelayError> {
        let transport = TcpTransport::bind(&self.config.bind).await?;
        let local_addr =
            transport.local_addr().map_err(TransportError::AcceptFailed)?;
        let (calls_tx, bridge_calls) = mpsc::channel(32);
        let bridge =
            BridgeListener::bind(&self.config.bridge_bind, calls_tx).await?;
        let (control_tx, control_rx) = mpsc::channel(64);

        Ok(RelayServer {
            transport,
            local_addr,
            bridge,
            bridge_calls,
            meta: BridgeClient::new(self.config.meta_bridge_addr.clone()),
            control_tx,
            control_rx,
            config: self.config,
        })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound relay server. Call [`run()`](Self::run) to start it.
pub struct RelayServer {
    transport: TcpTransport,
    local_addr: SocketAddr,
    bridge: BridgeListener,
    bridge_calls: mpsc::Receiver<BridgeCall>,
    meta: BridgeClient,
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    config: RelayConfig,
}

impl RelayServer {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }

    /// The address hosts and participants connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address the bridge listener is bound to.
    pub fn bridge_addr(&self) -> SocketAddr {
        self.bridge.local_addr()
    }

    /// A handle for querying and stopping the server from other tasks.
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            control: self.control_tx.clone(),
        }
    }

    /// Accepts connections until shut down through a [`RelayHandle`].
    /// Returns after every game has been drained.
    pub async fn run(self) -> Result<(), RelayError> {
        let Self {
            mut transport,
            local_addr,
            bridge,
            bridge_calls,
            meta,
            control_tx,
            control_rx,
            config,
        } = self;

        let (stop, mut stopped) = watch::channel(false);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let notifier = tokio::spawn(notify_loop(meta, notify_rx));

        let registry = Registry {
            games: HashMap::new(),
            next_serial: 1,
            inbound_capacity: config.inbound_capacity,
            events_tx,
            events,
            control: control_rx,
            bridge_calls,
            bridge,
            notify: notify_tx,
            notifier,
            stop,
        };
        let registry = tokio::spawn(registry.run());

        tracing::info!(%local_addr, "relay server running");
        loop {
            tokio::select! {
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        tokio::spawn(route_connection(
                            conn,
                            control_tx.clone(),
                            config.hello_timeout,
                        ));
                    }
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
                _ = stopped.wait_for(|stop| *stop) => break,
            }
        }
        drop(transport);

        if let Err(e) = registry.await {
            tracing::error!(error = %e, "relay registry task failed");
        }
        tracing::info!("relay server stopped");
        Ok(())
    }
}

/// Cloneable handle to a running relay server.
#[derive(Clone)]
pub struct RelayHandle {
    control: mpsc::Sender<Control>,
}

impl RelayHandle {
    /// Stops accepting, shuts every game down and resolves once the
    /// registry is empty. Calling it again, or after the server is gone,
    /// returns immediately.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.control.send(Control::Shutdown { ack }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Names of the live games, sorted.
    pub async fn games(&self) -> Result<Vec<String>, RelayError> {
        let (reply, answer) = oneshot::channel();
        self.control
            .send(Control::ListGames { reply })
            .await
            .map_err(|_| RelayError::Unavailable("relay server".into()))?;
        answer
            .await
            .map_err(|_| RelayError::Unavailable("relay server".into()))
    }

    async fn route(&self, game: &str) -> Result<RelayGameHandle, RelayError> {
        let (reply, answer) = oneshot::channel();
        self.control
            .send(Control::Route {
                game: game.to_string(),
                reply,
            })
            .await
            .map_err(|_| RelayError::Unavailable("relay server".into()))?;
        answer
            .await
            .map_err(|_| RelayError::Unavailable("relay server".into()))?
            .ok_or_else(|| RelayError::GameUnknown(game.to_string()))
    }
}

/// The registry task's state.
struct Registry {
    games: HashMap<String, RelayGameHandle>,
    next_serial: u64,
    inbound_capacity: usize,
    events_tx: mpsc::UnboundedSender<GameEvent>,
    events: mpsc::UnboundedReceiver<GameEvent>,
    control: mpsc::Receiver<Control>,
    bridge_calls: mpsc::Receiver<BridgeCall>,
    bridge: BridgeListener,
    notify: mpsc::UnboundedSender<BridgeRequest>,
    notifier: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl Registry {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(cmd) = self.control.recv() => match cmd {
                    Control::Route { game, reply } => {
                        let _ = reply.send(self.games.get(&game).cloned());
                    }
                    Control::ListGames { reply } => {
                        let mut names: Vec<String> =
                            self.games.keys().cloned().collect();
                        names.sort();
                        let _ = reply.send(names);
                    }
                    Control::Shutdown { ack } => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        return;
                    }
                },
                Some(call) = self.bridge_calls.recv() => {
                    self.handle_bridge_call(call).await;
                }
                Some(event) = self.events.recv() => {
                    self.handle_event(event);
                }
                else => break,
            }
        }
    }

    async fn handle_bridge_call(&mut self, call: BridgeCall) {
        let response = match &call.request {
            BridgeRequest::NewGame { name, password } => {
                self.create_game(name, password)
            }
            BridgeRequest::CloseGame { name, password } => {
                self.close_game(name, password).await
            }
            other => {
                tracing::warn!(
                    request = ?other,
                    "relay can't serve this bridge call"
                );
                BridgeResponse::failed("unsupported call")
            }
        };
        call.respond(response);
    }

    fn create_game(&mut self, name: &str, password: &str) -> BridgeResponse {
        if self.games.contains_key(name) {
            let err = RelayError::NameConflict(name.to_string());
            tracing::warn!(game = %name, error = %err, "game creation refused");
            return BridgeResponse::failed(err.reason());
        }
        let serial = self.next_serial;
        self.next_serial += 1;
        let handle = spawn_game(
            name.to_string(),
            serial,
            password.to_string(),
            self.inbound_capacity,
            self.events_tx.clone(),
        );
        self.games.insert(name.to_string(), handle);
        tracing::info!(game = %name, games = self.games.len(), "game created");
        BridgeResponse::Ok
    }

    /// Drops a game the matchmaking server gave up on before its host
    /// attached, freeing the name at once.
    async fn close_game(&mut self, name: &str, password: &str) -> BridgeResponse {
        let Some(game) = self.games.get(name).cloned() else {
            let err = RelayError::GameUnknown(name.to_string());
            return BridgeResponse::failed(err.reason());
        };
        match game.cancel(password).await {
            Ok(()) => {
                self.games.remove(name);
                tracing::info!(game = %name, games = self.games.len(), "game closed");
                BridgeResponse::Ok
            }
            Err(e) => {
                tracing::warn!(game = %name, error = %e, "game close refused");
                BridgeResponse::failed(e.reason())
            }
        }
    }

    fn handle_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::HostAttached { name, .. } => {
                let _ = self.notify.send(BridgeRequest::GameConnected { name });
            }
            GameEvent::Ended { name, serial } => {
                if self.games.get(&name).is_some_and(|g| g.serial() == serial) {
                    self.games.remove(&name);
                    tracing::info!(
                        game = %name,
                        games = self.games.len(),
                        "game removed"
                    );
                }
                let _ = self.notify.send(BridgeRequest::GameClosed { name });
            }
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!(games = self.games.len(), "relay shutting down");
        self.stop.send_replace(true);
        self.bridge.close();

        let games: Vec<RelayGameHandle> =
            self.games.drain().map(|(_, game)| game).collect();
        join_all(games.iter().map(RelayGameHandle::shutdown)).await;
        for game in &games {
            let _ = self.notify.send(BridgeRequest::GameClosed {
                name: game.name().to_string(),
            });
        }

        // Let the notifier drain what is queued, then stop it.
        let (closed, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.notify, closed));
        if let Err(e) = (&mut self.notifier).await {
            tracing::error!(error = %e, "bridge notifier failed");
        }
        tracing::info!("relay drained");
    }
}

/// Delivers game notifications to the matchmaking server, one at a time.
async fn notify_loop(
    meta: BridgeClient,
    mut queue: mpsc::UnboundedReceiver<BridgeRequest>,
) {
    while let Some(request) = queue.recv().await {
        if let Err(e) = meta.call(&request).await {
            tracing::warn!(
                game = request.game_name(),
                error = %e,
                "matchmaking server not notified"
            );
        }
    }
}

/// Reads the first packet of a fresh connection and hands the
/// connection to the game it names.
async fn route_connection(
    conn: TcpConnection,
    control: mpsc::Sender<Control>,
    hello_timeout: Duration,
) {
    let conn = Arc::new(conn);
    let first =
        match tokio::time::timeout(hello_timeout, recv_packet(&conn)).await {
            Ok(Ok(Some(packet))) => packet,
            Ok(Ok(None)) => return,
            Ok(Err(e)) if e.is_malformed() => {
                return reject(&conn, RelayError::Protocol(e)).await;
            }
            Ok(Err(e)) => {
                tracing::debug!(
                    conn_id = %conn.id(),
                    error = %e,
                    "link lost before HELLO"
                );
                return;
            }
            Err(_) => {
                tracing::debug!(conn_id = %conn.id(), "no HELLO in time");
                let _ = conn.close().await;
                return;
            }
        };

    if first.command() != command::HELLO {
        let e = ProtocolError::UnexpectedCommand(first.command().to_string());
        return reject(&conn, e.into()).await;
    }
    let hello = match Hello::parse(first) {
        Ok(hello) => hello,
        Err(e) => return reject(&conn, e.into()).await,
    };

    let relay = RelayHandle { control };
    let game = match relay.route(&hello.game).await {
        Ok(game) => game,
        Err(e) => return reject(&conn, e).await,
    };

    let host = hello.host;
    let attached = if host {
        game.attach_host(Arc::clone(&conn), hello).await.map(|()| 0)
    } else {
        game.attach_participant(Arc::clone(&conn), hello).await
    };
    match attached {
        Ok(id) => tracing::debug!(
            conn_id = %conn.id(),
            game = game.name(),
            id,
            host,
            "connection routed"
        ),
        Err(e) => reject(&conn, e).await,
    }
}

/// Sends `DISCONNECT <reason>` for `err` and closes the connection.
async fn reject(conn: &TcpConnection, err: RelayError) {
    tracing::debug!(conn_id = %conn.id(), error = %err, "connection rejected");
    let _ = send_packet(conn, &disconnect(err.reason())).await;
    let _ = conn.close().await;
}
