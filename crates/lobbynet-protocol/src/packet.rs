//! The packet: an ordered list of string fields.
//!
//! On the wire a packet body is every field followed by a single NUL
//! byte, the last one included:
//!
//! ```text
//! LOGIN\0 1\0 alice\0 build-42\0 false\0
//! ```
//!
//! The first field is the command name. Integers and booleans travel as
//! their decimal / `true` / `false` spellings and are parsed on demand
//! by the `pop_*` methods, which consume arguments strictly in order.

use std::fmt;
use std::str::FromStr;

use lobbynet_transport::{HEADER_LEN, MAX_FRAME_LEN};

use crate::ProtocolError;

/// A value that can be written as one packet field.
pub trait Field {
    /// Converts the value into its wire spelling.
    fn into_field(self) -> String;
}

impl Field for String {
    fn into_field(self) -> String {
        self
    }
}

impl Field for &str {
    fn into_field(self) -> String {
        self.to_string()
    }
}

impl Field for &String {
    fn into_field(self) -> String {
        self.clone()
    }
}

impl Field for bool {
    fn into_field(self) -> String {
        let word = if self { "true" } else { "false" };
        word.to_string()
    }
}

macro_rules! int_field {
    ($($ty:ty),*) => {
        $(
            impl Field for $ty {
                fn into_field(self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

int_field!(u8, u16, u32, u64, usize, i32, i64);

/// One protocol message.
///
/// A packet always has at least one field (the command). Arguments are
/// read through an internal cursor that starts just after the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    fields: Vec<String>,
    cursor: usize,
}

impl Packet {
    /// Creates a bare command packet.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            fields: vec![command.into()],
            cursor: 1,
        }
    }

    /// Builds a packet from raw fields, the first being the command.
    pub fn from_fields(fields: Vec<String>) -> Result<Self, ProtocolError> {
        if fields.is_empty() {
            return Err(ProtocolError::EmptyPacket);
        }
        Ok(Self { fields, cursor: 1 })
    }

    /// Appends one argument (builder style).
    pub fn with(mut self, field: impl Field) -> Self {
        self.push(field);
        self
    }

    /// Appends several string arguments verbatim (builder style).
    pub fn with_all<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Appends one argument.
    pub fn push(&mut self, field: impl Field) {
        self.fields.push(field.into_field());
    }

    /// The command name.
    pub fn command(&self) -> &str {
        &self.fields[0]
    }

    /// Every field, the command included.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of fields, the command included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always `false`; a packet carries at least its command.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of arguments not yet consumed.
    pub fn remaining(&self) -> usize {
        self.fields.len() - self.cursor
    }

    /// The arguments not yet consumed, without consuming them.
    pub fn rest(&self) -> &[String] {
        &self.fields[self.cursor..]
    }

    /// Consumes the next argument.
    pub fn pop_str(&mut self) -> Result<String, ProtocolError> {
        let field = self
            .fields
            .get(self.cursor)
            .ok_or(ProtocolError::PacketExhausted)?
            .clone();
        self.cursor += 1;
        Ok(field)
    }

    /// Consumes the next argument, refusing one longer than `limit` bytes.
    pub fn pop_str_max(&mut self, limit: usize) -> Result<String, ProtocolError> {
        let field = self.pop_str()?;
        if field.len() > limit {
            return Err(ProtocolError::FieldTooLong {
                len: field.len(),
                limit,
            });
        }
        Ok(field)
    }

    /// Consumes the next argument if there is one.
    pub fn pop_opt(&mut self) -> Option<String> {
        self.pop_str().ok()
    }

    /// Consumes the next argument as a decimal integer.
    pub fn pop_int<T: FromStr>(&mut self) -> Result<T, ProtocolError> {
        let field = self.pop_str()?;
        field
            .parse()
            .map_err(|_| ProtocolError::InvalidInteger(field))
    }

    /// Consumes the next argument as a boolean.
    ///
    /// Accepts `1`/`true` and `0`/`false`.
    pub fn pop_bool(&mut self) -> Result<bool, ProtocolError> {
        let field = self.pop_str()?;
        match field.as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            _ => Err(ProtocolError::InvalidBoolean(field)),
        }
    }

    /// Consumes every remaining argument.
    pub fn take_rest(&mut self) -> Vec<String> {
        let rest = self.fields[self.cursor..].to_vec();
        self.cursor = self.fields.len();
        rest
    }

    /// Length of the frame this packet encodes to, header included.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.fields.iter().map(|f| f.len() + 1).sum::<usize>()
    }

    /// Returns `true` if the packet fits into a single frame.
    pub fn fits(&self) -> bool {
        self.frame_len() <= MAX_FRAME_LEN
    }

    /// Encodes the packet into a frame body.
    ///
    /// # Errors
    /// [`ProtocolError::EmbeddedNul`] if a field contains a NUL byte and
    /// [`ProtocolError::PacketTooLarge`] if the body would not fit in one
    /// frame. Both can only be caused by the code that built the packet.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if !self.fits() {
            return Err(ProtocolError::PacketTooLarge(self.frame_len()));
        }
        let body_len = self.frame_len() - HEADER_LEN;

        let mut body = Vec::with_capacity(body_len);
        for (i, field) in self.fields.iter().enumerate() {
            if field.as_bytes().contains(&0) {
                return Err(ProtocolError::EmbeddedNul(i));
            }
            body.extend_from_slice(field.as_bytes());
            body.push(0);
        }
        Ok(body)
    }

    /// Decodes a frame body.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let Some((&last, fields)) = body.split_last() else {
            return Err(ProtocolError::EmptyPacket);
        };
        if last != 0 {
            return Err(ProtocolError::MissingTerminator);
        }

        let fields = fields
            .split(|b| *b == 0)
            .enumerate()
            .map(|(i, raw)| {
                String::from_utf8(raw.to_vec())
                    .map_err(|_| ProtocolError::InvalidUtf8(i))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_fields(fields)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_field_body() {
        let packet = Packet::decode(b"aaaa\0").expect("decode");
        assert_eq!(packet.fields(), ["aaaa"]);
        assert_eq!(packet.command(), "aaaa");
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn test_decode_discards_trailing_empty_element() {
        let packet = Packet::decode(b"CHAT\0hi there\0").expect("decode");
        assert_eq!(packet.fields(), ["CHAT", "hi there"]);
    }

    #[test]
    fn test_decode_keeps_empty_fields_in_the_middle() {
        let packet = Packet::decode(b"CHAT\0\0x\0").expect("decode");
        assert_eq!(packet.fields(), ["CHAT", "", "x"]);
    }

    #[test]
    fn test_decode_empty_body_rejected() {
        assert!(matches!(
            Packet::decode(b""),
            Err(ProtocolError::EmptyPacket)
        ));
    }

    #[test]
    fn test_decode_unterminated_body_rejected() {
        assert!(matches!(
            Packet::decode(b"PING"),
            Err(ProtocolError::MissingTerminator)
        ));
    }

    #[test]
    fn test_decode_invalid_utf8_rejected() {
        assert!(matches!(
            Packet::decode(b"OK\0\xff\xfe\0"),
            Err(ProtocolError::InvalidUtf8(1))
        ));
    }

    #[test]
    fn test_encode_terminates_every_field() {
        let packet = Packet::new("LOGIN").with("alice").with(1u32);
        assert_eq!(packet.encode().expect("encode"), b"LOGIN\0alice\x001\0");
    }

    #[test]
    fn test_encode_mixed_fields_round_trip() {
        let packet = Packet::new("GAMES_UPDATE")
            .with(2usize)
            .with("forest")
            .with(true)
            .with(-7i64)
            .with("");
        let decoded = Packet::decode(&packet.encode().expect("encode"))
            .expect("decode");
        assert_eq!(decoded, packet);
        assert_eq!(
            decoded.fields(),
            ["GAMES_UPDATE", "2", "forest", "true", "-7", ""]
        );
    }

    #[test]
    fn test_encode_embedded_nul_rejected() {
        let packet = Packet::new("CHAT").with("a\0b");
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::EmbeddedNul(1))
        ));
    }

    #[test]
    fn test_encode_oversized_packet_rejected() {
        let packet = Packet::new("TO_CLIENTS").with("x".repeat(MAX_FRAME_LEN));
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::PacketTooLarge(_))
        ));
    }

    #[test]
    fn test_encode_packet_exactly_at_limit_accepted() {
        // header + "A\0" + payload + "\0" == 65535
        let payload = "x".repeat(MAX_FRAME_LEN - HEADER_LEN - 3);
        let packet = Packet::new("A").with(payload);
        let body = packet.encode().expect("fits exactly");
        assert_eq!(body.len() + HEADER_LEN, MAX_FRAME_LEN);
    }

    #[test]
    fn test_pop_in_order_then_exhausted() {
        let mut packet =
            Packet::decode(b"GAME_OPEN\0forest\x004\0").expect("decode");
        assert_eq!(packet.pop_str().expect("name"), "forest");
        assert_eq!(packet.pop_int::<u32>().expect("capacity"), 4);
        assert!(matches!(
            packet.pop_str(),
            Err(ProtocolError::PacketExhausted)
        ));
    }

    #[test]
    fn test_pop_str_max_rejects_long_field() {
        let mut packet = Packet::new("CHAT").with("hello").with("hi");
        let err = packet.pop_str_max(4).unwrap_err();
        assert!(matches!(err, ProtocolError::FieldTooLong { len: 5, limit: 4 }));
        assert!(err.is_malformed());
        assert_eq!(packet.pop_str_max(4).expect("short field"), "hi");
    }

    #[test]
    fn test_fits_matches_encode() {
        let big = "x".repeat(MAX_FRAME_LEN - HEADER_LEN - "TO_HOST".len() - 2);
        let packet = Packet::new("TO_HOST").with(big.as_str());
        assert_eq!(packet.frame_len(), MAX_FRAME_LEN);
        assert!(packet.fits());
        assert!(packet.encode().is_ok());

        let forwarded = Packet::new("FROM_CLIENT").with(1u32).with(big);
        assert!(!forwarded.fits());
        let err = forwarded.encode().unwrap_err();
        assert!(matches!(err, ProtocolError::PacketTooLarge(_)));
        assert!(err.is_unencodable());
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_pop_int_invalid_rejected() {
        let mut packet = Packet::new("X").with("12a");
        assert!(matches!(
            packet.pop_int::<u32>(),
            Err(ProtocolError::InvalidInteger(s)) if s == "12a"
        ));
    }

    #[test]
    fn test_pop_bool_accepts_words_and_digits() {
        let mut packet = Packet::new("X")
            .with("true")
            .with("1")
            .with("false")
            .with("0");
        assert!(packet.pop_bool().expect("true"));
        assert!(packet.pop_bool().expect("1"));
        assert!(!packet.pop_bool().expect("false"));
        assert!(!packet.pop_bool().expect("0"));
    }

    #[test]
    fn test_pop_bool_rejects_other_tokens() {
        let mut packet = Packet::new("X").with("yes");
        assert!(matches!(
            packet.pop_bool(),
            Err(ProtocolError::InvalidBoolean(s)) if s == "yes"
        ));
    }

    #[test]
    fn test_take_rest_consumes_payload_verbatim() {
        let mut packet = Packet::new("TO_CLIENTS").with("move").with("a b");
        assert_eq!(packet.rest(), ["move", "a b"]);
        assert_eq!(packet.take_rest(), vec!["move", "a b"]);
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn test_from_fields_empty_rejected() {
        assert!(matches!(
            Packet::from_fields(Vec::new()),
            Err(ProtocolError::EmptyPacket)
        ));
    }

    #[test]
    fn test_display_joins_fields() {
        let packet = Packet::new("DISCONNECT").with("CLIENT_TIMEOUT");
        assert_eq!(packet.to_string(), "DISCONNECT CLIENT_TIMEOUT");
    }
}
