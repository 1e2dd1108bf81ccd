//! Error types for the relay.

use lobbynet_protocol::ProtocolError;
use lobbynet_protocol::wire::reason;
use lobbynet_transport::TransportError;

/// Errors that can occur while routing or running relay games.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No relay game with this name exists.
    #[error("game {0:?} not found")]
    GameUnknown(String),

    /// A game with this name already exists.
    #[error("game {0:?} already exists")]
    NameConflict(String),

    /// The host presented the wrong password.
    #[error("wrong host password for game {0:?}")]
    WrongPassword(String),

    /// The connection speaks a protocol version the game can't accept.
    #[error("protocol version {got} not supported (game speaks {expected})")]
    UnsupportedProtocol { got: u32, expected: u32 },

    /// A second host tried to attach.
    #[error("game {0:?} already has a host")]
    HostAlreadyAttached(String),

    /// A participant arrived before the host.
    #[error("game {0:?} has no host yet")]
    HostNotAttached(String),

    /// The game or the server is gone or shutting down.
    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RelayError {
    /// The reason code sent in the `DISCONNECT` that rejects a
    /// connection because of this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::GameUnknown(_) => reason::GAME_UNKNOWN,
            Self::NameConflict(_) => reason::NAME_IN_USE,
            Self::WrongPassword(_) => reason::WRONG_PASSWORD,
            Self::UnsupportedProtocol { .. } => reason::UNSUPPORTED_PROTOCOL,
            Self::HostAlreadyAttached(_) => reason::HOST_ALREADY_CONNECTED,
            Self::HostNotAttached(_) => reason::GAME_NOT_READY,
            Self::Unavailable(_) => reason::RELAY_SHUTDOWN,
            Self::Protocol(ProtocolError::UnexpectedCommand(_)) => {
                reason::PROTOCOL_VIOLATION
            }
            Self::Protocol(_) | Self::Transport(_) => reason::INVALID_PACKET,
        }
    }
}
