//! Relay game actor: one host, any number of participants, one task.
//!
//! The actor owns every connection of its game. Each connection's reader
//! task feeds a bounded channel; the actor keeps those channels in a
//! [`StreamMap`] keyed by relay id and waits on the map and on its own
//! command channel at once. Attaching or detaching a connection edits
//! the map between two polls, so every wait sees the current set.
//!
//! ```text
//!  host reader ────┐
//!  client 1 reader ┼─→ StreamMap ─┐
//!  client 2 reader ┘              ├─→ actor loop ─→ forward / detach
//!  GameCommand (attach, info, cancel, shutdown) ─┘
//! ```

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use lobbynet_protocol::wire::{PROTOCOL_VERSION, command, reason};
use lobbynet_protocol::{Packet, RelayCommand};
use lobbynet_transport::TcpConnection;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::ReceiverStream;

use crate::connection::{HOST_ID, Inbound, RelayConnection};
use crate::{Hello, RelayError};

/// Something a game reports to the relay server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// The host attached; the matchmaking server should hear about it.
    HostAttached { name: String, serial: u64 },
    /// The host left and the game is over.
    Ended { name: String, serial: u64 },
}

/// Commands sent to a game actor through its channel.
pub(crate) enum GameCommand {
    AttachHost {
        conn: Arc<TcpConnection>,
        hello: Hello,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    AttachParticipant {
        conn: Arc<TcpConnection>,
        hello: Hello,
        reply: oneshot::Sender<Result<u32, RelayError>>,
    },
    Info {
        reply: oneshot::Sender<GameInfo>,
    },
    Cancel {
        password: String,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// A snapshot of a relay game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInfo {
    pub name: String,
    pub host_attached: bool,
    /// Fixed by the host's `HELLO`; `None` until then.
    pub version: Option<u32>,
    pub participants: Vec<u32>,
}

/// Handle to a running game actor. Cheap to clone.
#[derive(Clone)]
pub struct RelayGameHandle {
    name: String,
    serial: u64,
    sender: mpsc::Sender<GameCommand>,
}

impl RelayGameHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinguishes this game from an earlier one with the same name.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Offers a connection as the game's host.
    pub async fn attach_host(
        &self,
        conn: Arc<TcpConnection>,
        hello: Hello,
    ) -> Result<(), RelayError> {
        let (reply, answer) = oneshot::channel();
        self.request(GameCommand::AttachHost { conn, hello, reply })
            .await?;
        answer.await.map_err(|_| self.unavailable())?
    }

    /// Offers a connection as a participant. Returns its relay id.
    pub async fn attach_participant(
        &self,
        conn: Arc<TcpConnection>,
        hello: Hello,
    ) -> Result<u32, RelayError> {
        let (reply, answer) = oneshot::channel();
        self.request(GameCommand::AttachParticipant { conn, hello, reply })
            .await?;
        answer.await.map_err(|_| self.unavailable())?
    }

    pub async fn info(&self) -> Result<GameInfo, RelayError> {
        let (reply, answer) = oneshot::channel();
        self.request(GameCommand::Info { reply }).await?;
        answer.await.map_err(|_| self.unavailable())
    }

    /// Ends a game whose host has not attached yet. No [`GameEvent`] is
    /// sent; the caller already knows the game is gone.
    pub async fn cancel(&self, password: &str) -> Result<(), RelayError> {
        let (reply, answer) = oneshot::channel();
        self.request(GameCommand::Cancel {
            password: password.to_string(),
            reply,
        })
        .await?;
        answer.await.map_err(|_| self.unavailable())?
    }

    /// Disconnects everyone with `RELAY_SHUTDOWN` and waits for the actor
    /// to finish. A game that already ended counts as shut down.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self
            .sender
            .send(GameCommand::Shutdown { ack })
            .await
            .is_ok()
        {
            let _ = done.await;
        }
    }

    async fn request(&self, cmd: GameCommand) -> Result<(), RelayError> {
        self.sender.send(cmd).await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> RelayError {
        RelayError::GameUnknown(self.name.clone())
    }
}

/// The internal game actor state. Runs inside a Tokio task.
struct RelayGame {
    name: String,
    serial: u64,
    password: String,
    version: Option<u32>,
    host: Option<RelayConnection>,
    participants: BTreeMap<u32, RelayConnection>,
    next_id: u32,
    watched: StreamMap<u32, ReceiverStream<Inbound>>,
    inbound_capacity: usize,
    commands: mpsc::Receiver<GameCommand>,
    events: mpsc::UnboundedSender<GameEvent>,
}

impl RelayGame {
    async fn run(mut self) {
        tracing::info!(game = %self.name, "relay game started");

        loop {
            let flow = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        self.close_all(reason::RELAY_SHUTDOWN).await;
                        ControlFlow::Break(())
                    }
                },
                Some((id, inbound)) = self.watched.next(),
                    if !self.watched.is_empty() =>
                {
                    self.handle_inbound(id, inbound).await
                }
            };
            if flow.is_break() {
                break;
            }
        }

        tracing::info!(game = %self.name, "relay game stopped");
    }

    async fn handle_command(&mut self, cmd: GameCommand) -> ControlFlow<()> {
        match cmd {
            GameCommand::AttachHost { conn, hello, reply } => {
                let result = self.attach_host(conn, &hello).await;
                let _ = reply.send(result);
            }
            GameCommand::AttachParticipant { conn, hello, reply } => {
                let result = self.attach_participant(conn, &hello).await;
                let _ = reply.send(result);
            }
            GameCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            GameCommand::Cancel { password, reply } => {
                let result = self.check_cancel(&password);
                let cancelled = result.is_ok();
                let _ = reply.send(result);
                if cancelled {
                    tracing::info!(game = %self.name, "relay game cancelled");
                    return ControlFlow::Break(());
                }
            }
            GameCommand::Shutdown { ack } => {
                tracing::info!(game = %self.name, "relay game shutting down");
                self.close_all(reason::RELAY_SHUTDOWN).await;
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn attach_host(
        &mut self,
        conn: Arc<TcpConnection>,
        hello: &Hello,
    ) -> Result<(), RelayError> {
        if self.host.is_some() {
            return Err(RelayError::HostAlreadyAttached(self.name.clone()));
        }
        if hello.password.as_deref() != Some(self.password.as_str()) {
            return Err(RelayError::WrongPassword(self.name.clone()));
        }
        if hello.version > PROTOCOL_VERSION {
            return Err(RelayError::UnsupportedProtocol {
                got: hello.version,
                expected: PROTOCOL_VERSION,
            });
        }

        let host = RelayConnection::new(HOST_ID, conn);
        host.send(&welcome(HOST_ID)).await;
        self.watch(&host);
        self.host = Some(host);
        self.version = Some(hello.version);
        let _ = self.events.send(GameEvent::HostAttached {
            name: self.name.clone(),
            serial: self.serial,
        });
        tracing::info!(
            game = %self.name,
            version = hello.version,
            "host attached"
        );
        Ok(())
    }

    async fn attach_participant(
        &mut self,
        conn: Arc<TcpConnection>,
        hello: &Hello,
    ) -> Result<u32, RelayError> {
        let (Some(host), Some(version)) = (&self.host, self.version) else {
            return Err(RelayError::HostNotAttached(self.name.clone()));
        };
        if hello.version != version {
            return Err(RelayError::UnsupportedProtocol {
                got: hello.version,
                expected: version,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        let participant = RelayConnection::new(id, conn);
        participant.send(&welcome(id)).await;
        host.send(&Packet::new(command::CONNECT_CLIENT).with(id)).await;
        self.watch(&participant);
        self.participants.insert(id, participant);
        tracing::info!(
            game = %self.name,
            id,
            participants = self.participants.len(),
            "participant attached"
        );
        Ok(id)
    }

    fn check_cancel(&self, password: &str) -> Result<(), RelayError> {
        if password != self.password {
            return Err(RelayError::WrongPassword(self.name.clone()));
        }
        if self.host.is_some() {
            return Err(RelayError::HostAlreadyAttached(self.name.clone()));
        }
        Ok(())
    }

    fn watch(&mut self, conn: &RelayConnection) {
        let reader = conn.spawn_reader(self.inbound_capacity);
        self.watched.insert(conn.id(), ReceiverStream::new(reader));
    }

    async fn handle_inbound(
        &mut self,
        id: u32,
        inbound: Inbound,
    ) -> ControlFlow<()> {
        match inbound {
            Inbound::Packet(packet) => self.dispatch(id, packet).await,
            Inbound::Malformed(e) => {
                tracing::warn!(
                    game = %self.name,
                    id,
                    error = %e,
                    "malformed packet"
                );
                self.detach(id, Some(reason::INVALID_PACKET)).await
            }
            Inbound::Closed => self.detach(id, None).await,
        }
    }

    async fn dispatch(&mut self, id: u32, mut packet: Packet) -> ControlFlow<()> {
        let Some(cmd) = RelayCommand::lookup(packet.command()) else {
            tracing::debug!(
                game = %self.name,
                id,
                command = packet.command(),
                "unknown relay command, ignoring"
            );
            return ControlFlow::Continue(());
        };
        let from_host = id == HOST_ID;
        if (cmd.host_only() && !from_host) || (cmd.participant_only() && from_host)
        {
            tracing::warn!(
                game = %self.name,
                id,
                command = packet.command(),
                "command not allowed for this role, ignoring"
            );
            return ControlFlow::Continue(());
        }

        match cmd {
            RelayCommand::ToClients => {
                let out = Packet::new(command::FROM_HOST)
                    .with_all(packet.take_rest());
                for participant in self.participants.values() {
                    participant.send(&out).await;
                }
            }
            RelayCommand::ToClient => {
                let target = match packet.pop_int::<u32>() {
                    Ok(target) => target,
                    Err(_) => {
                        return self.detach(id, Some(reason::INVALID_PACKET)).await;
                    }
                };
                let out = Packet::new(command::FROM_HOST)
                    .with_all(packet.take_rest());
                match self.participants.get(&target) {
                    Some(participant) => participant.send(&out).await,
                    None => tracing::debug!(
                        game = %self.name,
                        target,
                        "TO_CLIENT for unknown participant"
                    ),
                }
            }
            RelayCommand::DisconnectClient => {
                let target = match packet.pop_int::<u32>() {
                    Ok(target) => target,
                    Err(_) => {
                        return self.detach(id, Some(reason::INVALID_PACKET)).await;
                    }
                };
                self.kick(target).await;
            }
            RelayCommand::ToHost => {
                let out = Packet::new(command::FROM_CLIENT)
                    .with(id)
                    .with_all(packet.take_rest());
                if !out.fits() {
                    tracing::warn!(
                        game = %self.name,
                        id,
                        len = out.frame_len(),
                        "TO_HOST payload too large to forward"
                    );
                    return self.detach(id, Some(reason::INVALID_PACKET)).await;
                }
                if let Some(host) = &self.host {
                    host.send(&out).await;
                }
            }
            RelayCommand::Ping => {
                if let Some(conn) = self.connection(id) {
                    conn.send(&Packet::new(command::PONG)).await;
                }
            }
            RelayCommand::Pong => {}
            RelayCommand::Disconnect => {
                tracing::debug!(game = %self.name, id, "polite disconnect");
                return self.detach(id, None).await;
            }
        }
        ControlFlow::Continue(())
    }

    fn connection(&self, id: u32) -> Option<&RelayConnection> {
        if id == HOST_ID {
            self.host.as_ref()
        } else {
            self.participants.get(&id)
        }
    }

    /// Removes a participant at the host's request.
    async fn kick(&mut self, target: u32) {
        self.watched.remove(&target);
        match self.participants.remove(&target) {
            Some(participant) => {
                participant.disconnect(reason::KICKED).await;
                tracing::info!(game = %self.name, id = target, "participant kicked");
            }
            None => tracing::debug!(
                game = %self.name,
                target,
                "kick for unknown participant"
            ),
        }
    }

    /// Drops a connection, sending `DISCONNECT <notice>` first if given.
    /// Losing the host ends the game.
    async fn detach(&mut self, id: u32, notice: Option<&str>) -> ControlFlow<()> {
        self.watched.remove(&id);

        if id == HOST_ID {
            if let Some(host) = self.host.take() {
                match notice {
                    Some(notice) => host.disconnect(notice).await,
                    None => host.close().await,
                }
            }
            tracing::info!(game = %self.name, "host left, ending game");
            self.close_all(reason::RELAY_SHUTDOWN).await;
            let _ = self.events.send(GameEvent::Ended {
                name: self.name.clone(),
                serial: self.serial,
            });
            return ControlFlow::Break(());
        }

        let Some(participant) = self.participants.remove(&id) else {
            return ControlFlow::Continue(());
        };
        match notice {
            Some(notice) => participant.disconnect(notice).await,
            None => participant.close().await,
        }
        if let Some(host) = &self.host {
            host.send(&Packet::new(command::DISCONNECT_CLIENT).with(id))
                .await;
        }
        tracing::info!(
            game = %self.name,
            id,
            participants = self.participants.len(),
            "participant detached"
        );
        ControlFlow::Continue(())
    }

    /// Disconnects every participant and the host with `reason`.
    async fn close_all(&mut self, reason: &str) {
        self.watched.clear();
        for participant in std::mem::take(&mut self.participants).into_values() {
            participant.disconnect(reason).await;
        }
        if let Some(host) = self.host.take() {
            host.disconnect(reason).await;
        }
    }

    fn info(&self) -> GameInfo {
        GameInfo {
            name: self.name.clone(),
            host_attached: self.host.is_some(),
            version: self.version,
            participants: self.participants.keys().copied().collect(),
        }
    }
}

fn welcome(id: u32) -> Packet {
    Packet::new(command::WELCOME).with(id)
}

/// Spawns a game actor and returns a handle to it.
pub(crate) fn spawn_game(
    name: String,
    serial: u64,
    password: String,
    inbound_capacity: usize,
    events: mpsc::UnboundedSender<GameEvent>,
) -> RelayGameHandle {
    let (tx, rx) = mpsc::channel(16);

    let game = RelayGame {
        name: name.clone(),
        serial,
        password,
        version: None,
        host: None,
        participants: BTreeMap::new(),
        next_id: HOST_ID + 1,
        watched: StreamMap::new(),
        inbound_capacity,
        commands: rx,
        events,
    };

    tokio::spawn(game.run());

    RelayGameHandle {
        name,
        serial,
        sender: tx,
    }
}
