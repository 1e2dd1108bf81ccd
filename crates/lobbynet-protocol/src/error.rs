//! Error types for the protocol layer.
//!
//! Each crate in lobbynet defines its own error enum. A `ProtocolError`
//! means a packet could not be built, parsed, or made sense of; the
//! transport underneath may still be perfectly healthy.

use lobbynet_transport::TransportError;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A frame body carried no fields at all.
    #[error("empty packet")]
    EmptyPacket,

    /// A frame body did not end with the NUL field terminator.
    #[error("packet body is missing its final NUL terminator")]
    MissingTerminator,

    /// A field was not valid UTF-8.
    #[error("field {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    /// A field handed to the encoder contains a NUL byte.
    ///
    /// Fields decoded off the wire can never contain one, so this only
    /// happens when server code builds a bad packet.
    #[error("field {0} contains a NUL byte")]
    EmbeddedNul(usize),

    /// The encoded packet does not fit into a single frame.
    #[error("packet of {0} bytes exceeds the maximum frame length")]
    PacketTooLarge(usize),

    /// A field expected to hold an integer did not parse.
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// A field expected to hold a boolean was not `0/1/true/false`.
    #[error("invalid boolean: {0:?}")]
    InvalidBoolean(String),

    /// A field from the peer is longer than the command allows.
    #[error("field of {len} bytes exceeds the limit of {limit}")]
    FieldTooLong { len: usize, limit: usize },

    /// A field was popped past the end of the packet.
    #[error("packet exhausted")]
    PacketExhausted,

    /// The command is not valid in the connection's current state.
    #[error("unexpected command {0:?}")]
    UnexpectedCommand(String),

    /// The underlying connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// JSON serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// JSON deserialization failed.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}

impl ProtocolError {
    /// Returns `true` when the connection itself is gone, as opposed to
    /// the peer having sent something malformed.
    pub fn is_broken_link(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_broken_link())
    }

    /// Returns `true` if a locally built packet could not be encoded.
    /// Nothing was written, so the link is still usable.
    pub fn is_unencodable(&self) -> bool {
        matches!(self, Self::PacketTooLarge(_) | Self::EmbeddedNul(_))
    }

    /// Returns `true` for malformed frames and undecodable fields sent
    /// by the peer.
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_broken_link(),
            Self::EmptyPacket
            | Self::MissingTerminator
            | Self::InvalidUtf8(_)
            | Self::InvalidInteger(_)
            | Self::InvalidBoolean(_)
            | Self::FieldTooLong { .. }
            | Self::PacketExhausted => true,
            #[cfg(feature = "json")]
            Self::Decode(_) => true,
            _ => false,
        }
    }
}
