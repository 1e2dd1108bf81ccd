//! Error types for the session layer.

use lobbynet_protocol::{ProtocolError, wire::reason};

/// Errors that can occur while admitting or running a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The account does not exist or the credential did not match.
    #[error("wrong password for {0}")]
    WrongPassword(String),

    /// A registered account tried to log in twice.
    #[error("{0} is already logged in")]
    AlreadyLoggedIn(String),

    /// The requested name is empty.
    #[error("invalid user name {0:?}")]
    InvalidName(String),

    /// The server is shutting down and admits no new sessions.
    #[error("server is shutting down")]
    ShuttingDown,

    /// The client did not complete LOGIN in time.
    #[error("login timed out")]
    LoginTimeout,

    /// A protocol-level failure (malformed LOGIN, broken connection).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// The `DISCONNECT` reason code reported to the client.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::WrongPassword(_) => reason::WRONG_PASSWORD,
            Self::AlreadyLoggedIn(_) => reason::ALREADY_LOGGED_IN,
            Self::InvalidName(_) => reason::PROTOCOL_VIOLATION,
            Self::ShuttingDown => reason::SERVER_SHUTDOWN,
            Self::LoginTimeout => reason::LOGIN_TIMEOUT,
            Self::Protocol(ProtocolError::UnexpectedCommand(_)) => {
                reason::PROTOCOL_VIOLATION
            }
            Self::Protocol(_) => reason::INVALID_PACKET,
        }
    }
}
