/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed (locally or by the peer).
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The peer went away in the middle of a frame.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead {
        /// Bytes the frame header announced (header included).
        expected: usize,
        /// Bytes actually received before the stream ended.
        got: usize,
    },

    /// The length field is smaller than the header itself.
    #[error("frame length {0} is shorter than the frame header")]
    FrameTooShort(u16),

    /// An outgoing frame does not fit the 16-bit length field.
    #[error("frame of {0} bytes exceeds the maximum frame length")]
    FrameTooLarge(usize),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Opening an outbound connection failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Returns `true` for errors that mean the link itself is unusable
    /// (as opposed to a malformed frame on a healthy link).
    pub fn is_broken_link(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_)
                | Self::SendFailed(_)
                | Self::ReceiveFailed(_)
                | Self::ShortRead { .. }
                | Self::ConnectFailed { .. }
        )
    }
}
