//! Error types for the bridge.

use lobbynet_protocol::ProtocolError;
use lobbynet_transport::TransportError;

/// Errors a bridge call can end with.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The link was down and the single reconnect attempt failed.
    #[error("bridge to {addr} unavailable: {source}")]
    Unavailable {
        addr: String,
        #[source]
        source: TransportError,
    },

    /// The other server answered with a failure.
    #[error("bridge call rejected: {0}")]
    Rejected(String),

    /// No answer arrived in time.
    #[error("bridge call timed out")]
    Timeout,

    /// The link failed during the call.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl BridgeError {
    /// Returns `true` if the link failed before the peer could have seen
    /// the request, so the call may be sent again on a new link.
    ///
    /// A timeout is not a broken link: the peer may already have acted
    /// on the request.
    pub fn is_broken_link(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_broken_link(),
            Self::Protocol(e) => e.is_broken_link(),
            Self::Unavailable { .. } => true,
            Self::Timeout | Self::Rejected(_) => false,
        }
    }
}
