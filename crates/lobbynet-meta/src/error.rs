//! Unified error type for the matchmaking server.

use lobbynet_bridge::BridgeError;
use lobbynet_protocol::ProtocolError;
use lobbynet_protocol::wire::reason;
use lobbynet_session::SessionError;
use lobbynet_transport::TransportError;

/// Top-level error that wraps all crate-specific errors, plus the ways
/// a game record operation can be refused.
///
/// The `#[from]` variants let `?` convert lower-layer errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// A transport-level error (bind, connection, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (malformed packet, unexpected command).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (credentials, duplicate login, timeout).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The relay could not be reached or refused the call.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Another live game already uses this name.
    #[error("game name {0:?} is in use")]
    GameConflict(String),

    #[error("game {0:?} not found")]
    GameUnknown(String),

    #[error("game {0:?} is full")]
    GameFull(String),

    /// The relay side of the game is not provisioned yet.
    #[error("game {0:?} is not ready")]
    GameNotReady(String),

    /// Players take part in at most one game at a time.
    #[error("{player} is already in game {game:?}")]
    AlreadyInGame { player: String, game: String },

    #[error("{0} is not in a game")]
    NotInGame(String),

    #[error("invalid game capacity {0}")]
    InvalidCapacity(u32),
}

impl MetaError {
    /// The reason code reported in a `*_FAILED` reply or `DISCONNECT`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::GameConflict(_) => reason::NAME_IN_USE,
            Self::GameUnknown(_) | Self::NotInGame(_) => reason::GAME_UNKNOWN,
            Self::GameFull(_) => reason::GAME_FULL,
            Self::GameNotReady(_) => reason::GAME_NOT_READY,
            Self::AlreadyInGame { .. } => reason::ALREADY_IN_GAME,
            Self::InvalidCapacity(_) => reason::INVALID_CAPACITY,
            Self::Bridge(BridgeError::Rejected(_)) => reason::NAME_IN_USE,
            Self::Bridge(_) => reason::RELAY_UNAVAILABLE,
            Self::Session(e) => e.reason(),
            Self::Protocol(ProtocolError::UnexpectedCommand(_)) => {
                reason::PROTOCOL_VIOLATION
            }
            Self::Protocol(_) | Self::Transport(_) => reason::INVALID_PACKET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let meta_err: MetaError = err.into();
        assert!(matches!(meta_err, MetaError::Transport(_)));
        assert!(meta_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_session_error_keeps_reason() {
        let meta_err: MetaError = SessionError::WrongPassword("a".into()).into();
        assert_eq!(meta_err.reason(), "WRONG_PASSWORD");
    }

    #[test]
    fn test_bridge_errors_map_to_open_failures() {
        let rejected: MetaError = BridgeError::Rejected("x".into()).into();
        assert_eq!(rejected.reason(), "NAME_IN_USE");
        let timeout: MetaError = BridgeError::Timeout.into();
        assert_eq!(timeout.reason(), "RELAY_UNAVAILABLE");
    }

    #[test]
    fn test_game_errors_reason_codes() {
        assert_eq!(MetaError::GameFull("g".into()).reason(), "GAME_FULL");
        assert_eq!(MetaError::InvalidCapacity(0).reason(), "INVALID_CAPACITY");
        let busy = MetaError::AlreadyInGame {
            player: "a".into(),
            game: "g".into(),
        };
        assert_eq!(busy.reason(), "ALREADY_IN_GAME");
    }
}
