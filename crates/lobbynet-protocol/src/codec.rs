//! Codec trait and implementations for structured messages.
//!
//! Client traffic uses the NUL-field [`Packet`](crate::Packet) format.
//! The bridge between the two servers exchanges richer request and
//! response documents, and those go through a [`Codec`]: something that
//! turns a `serde` type into a frame body and back.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` so a codec can live inside long-running
/// tasks and be shared between them.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON keeps bridge traffic readable in packet captures and logs. This
/// is behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use lobbynet_protocol::{Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&vec!["forest", "glade"]).unwrap();
/// let names: Vec<String> = codec.decode(&bytes).unwrap();
/// assert_eq!(names, ["forest", "glade"]);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    enum Call {
        Open { name: String },
        Close,
    }

    #[test]
    fn test_json_codec_enum_round_trip() {
        let codec = JsonCodec;
        let bytes = codec
            .encode(&Call::Open { name: "forest".into() })
            .expect("encode");
        assert_eq!(bytes, br#"{"Open":{"name":"forest"}}"#);
        let call: Call = codec.decode(&bytes).expect("decode");
        assert_eq!(call, Call::Open { name: "forest".into() });
    }

    #[test]
    fn test_json_codec_garbage_is_decode_error() {
        let err = JsonCodec.decode::<Call>(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert!(err.is_malformed());
    }
}
