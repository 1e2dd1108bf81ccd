//! Wire constants shared by the matchmaking server, the relay and the
//! bridge between them. Both servers read every port, command name and
//! reason code from here so they can never disagree.

use crate::Packet;

/// Matchmaking server client port.
pub const META_PORT: u16 = 7395;
/// Relay client/host port.
pub const RELAY_PORT: u16 = 7397;
/// Port the relay listens on for bridge calls from the matchmaking server.
pub const RELAY_BRIDGE_PORT: u16 = 7398;
/// Port the matchmaking server listens on for bridge calls from the relay.
pub const META_BRIDGE_PORT: u16 = 7399;

/// Highest protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Lowest protocol version that always carries a login nonce.
pub const NONCE_PROTOCOL_VERSION: u32 = 1;

/// Longest player or game name a client may send. Names are echoed back
/// inside other packets, so they stay small.
pub const MAX_NAME_LEN: usize = 64;

/// Longest chat line a client may send.
pub const MAX_CHAT_LEN: usize = 4096;

/// Command names.
pub mod command {
    pub const LOGIN: &str = "LOGIN";
    pub const PING: &str = "PING";
    pub const PONG: &str = "PONG";
    pub const TIME: &str = "TIME";
    pub const CHAT: &str = "CHAT";
    pub const GAMES_UPDATE: &str = "GAMES_UPDATE";
    pub const GAMES_LIST: &str = "GAMES_LIST";
    pub const GAME_OPEN: &str = "GAME_OPEN";
    pub const GAME_OPEN_FAILED: &str = "GAME_OPEN_FAILED";
    pub const GAME_JOIN: &str = "GAME_JOIN";
    pub const GAME_JOIN_FAILED: &str = "GAME_JOIN_FAILED";
    pub const GAME_LEAVE: &str = "GAME_LEAVE";
    pub const DISCONNECT: &str = "DISCONNECT";

    pub const HELLO: &str = "HELLO";
    pub const WELCOME: &str = "WELCOME";
    pub const CONNECT_CLIENT: &str = "CONNECT_CLIENT";
    pub const DISCONNECT_CLIENT: &str = "DISCONNECT_CLIENT";
    pub const TO_CLIENTS: &str = "TO_CLIENTS";
    pub const TO_CLIENT: &str = "TO_CLIENT";
    pub const FROM_CLIENT: &str = "FROM_CLIENT";
    pub const TO_HOST: &str = "TO_HOST";
    pub const FROM_HOST: &str = "FROM_HOST";
}

/// Reason codes carried by `DISCONNECT` and the `*_FAILED` replies.
pub mod reason {
    pub const WRONG_PASSWORD: &str = "WRONG_PASSWORD";
    pub const ALREADY_LOGGED_IN: &str = "ALREADY_LOGGED_IN";
    pub const CLIENT_TIMEOUT: &str = "CLIENT_TIMEOUT";
    pub const LOGIN_TIMEOUT: &str = "LOGIN_TIMEOUT";
    pub const PROTOCOL_VIOLATION: &str = "PROTOCOL_VIOLATION";
    pub const INVALID_PACKET: &str = "INVALID_PACKET";
    pub const SERVER_SHUTDOWN: &str = "SERVER_SHUTDOWN";
    pub const CLIENT_QUIT: &str = "CLIENT_QUIT";

    pub const RELAY_SHUTDOWN: &str = "RELAY_SHUTDOWN";
    pub const GAME_UNKNOWN: &str = "GAME_UNKNOWN";
    pub const UNSUPPORTED_PROTOCOL: &str = "UNSUPPORTED_PROTOCOL";
    pub const HOST_ALREADY_CONNECTED: &str = "HOST_ALREADY_CONNECTED";
    pub const GAME_NOT_READY: &str = "GAME_NOT_READY";
    pub const KICKED: &str = "KICKED";

    pub const NAME_IN_USE: &str = "NAME_IN_USE";
    pub const RELAY_UNAVAILABLE: &str = "RELAY_UNAVAILABLE";
    pub const ALREADY_IN_GAME: &str = "ALREADY_IN_GAME";
    pub const INVALID_CAPACITY: &str = "INVALID_CAPACITY";
    pub const GAME_FULL: &str = "GAME_FULL";
}

/// Builds a `DISCONNECT <reason>` packet.
pub fn disconnect(reason: &str) -> Packet {
    Packet::new(command::DISCONNECT).with(reason)
}

/// Commands a logged-in client may send to the matchmaking server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    Login,
    Ping,
    Pong,
    Chat,
    GameOpen,
    GameJoin,
    GameLeave,
    GamesList,
    Disconnect,
}

const META_COMMANDS: &[(&str, MetaCommand)] = &[
    (command::LOGIN, MetaCommand::Login),
    (command::PING, MetaCommand::Ping),
    (command::PONG, MetaCommand::Pong),
    (command::CHAT, MetaCommand::Chat),
    (command::GAME_OPEN, MetaCommand::GameOpen),
    (command::GAME_JOIN, MetaCommand::GameJoin),
    (command::GAME_LEAVE, MetaCommand::GameLeave),
    (command::GAMES_LIST, MetaCommand::GamesList),
    (command::DISCONNECT, MetaCommand::Disconnect),
];

impl MetaCommand {
    /// Looks up the handler for a command name.
    pub fn lookup(name: &str) -> Option<Self> {
        META_COMMANDS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, cmd)| *cmd)
    }
}

/// Commands an attached connection may send to a relay game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    ToClients,
    ToClient,
    ToHost,
    DisconnectClient,
    Ping,
    Pong,
    Disconnect,
}

const RELAY_COMMANDS: &[(&str, RelayCommand)] = &[
    (command::TO_CLIENTS, RelayCommand::ToClients),
    (command::TO_CLIENT, RelayCommand::ToClient),
    (command::TO_HOST, RelayCommand::ToHost),
    (command::DISCONNECT_CLIENT, RelayCommand::DisconnectClient),
    (command::PING, RelayCommand::Ping),
    (command::PONG, RelayCommand::Pong),
    (command::DISCONNECT, RelayCommand::Disconnect),
];

impl RelayCommand {
    /// Looks up the handler for a command name.
    pub fn lookup(name: &str) -> Option<Self> {
        RELAY_COMMANDS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, cmd)| *cmd)
    }

    /// Returns `true` if only the host may send this command.
    pub fn host_only(self) -> bool {
        matches!(
            self,
            Self::ToClients | Self::ToClient | Self::DisconnectClient
        )
    }

    /// Returns `true` if only participants may send this command.
    pub fn participant_only(self) -> bool {
        matches!(self, Self::ToHost)
    }
}
