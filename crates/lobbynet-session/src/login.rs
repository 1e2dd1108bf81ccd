//! Parsing the LOGIN command.
//!
//! ```text
//! LOGIN <version> <name> <build> <registered> [<nonce>]
//! ```
//!
//! The nonce is only present when the client claims a registered account
//! or speaks protocol version 1 or later. Older anonymous clients stop
//! after the `registered` flag.

use lobbynet_protocol::wire::{NONCE_PROTOCOL_VERSION, command};
use lobbynet_protocol::{Packet, ProtocolError};

/// The fields of a LOGIN packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub protocol_version: u32,
    pub name: String,
    pub build: String,
    pub registered: bool,
    pub nonce: Option<String>,
}

impl LoginRequest {
    /// Parses a LOGIN packet.
    ///
    /// # Errors
    /// [`ProtocolError::UnexpectedCommand`] if the packet is not LOGIN,
    /// or a field decoding error if any field is missing or malformed.
    pub fn parse(mut packet: Packet) -> Result<Self, ProtocolError> {
        if packet.command() != command::LOGIN {
            return Err(ProtocolError::UnexpectedCommand(
                packet.command().to_string(),
            ));
        }

        let protocol_version = packet.pop_int()?;
        let name = packet.pop_str()?;
        let build = packet.pop_str()?;
        let registered = packet.pop_bool()?;
        let nonce = if registered || protocol_version >= NONCE_PROTOCOL_VERSION
        {
            Some(packet.pop_str()?)
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            name,
            build,
            registered,
            nonce,
        })
    }

    /// Builds the packet a client sends. Handy for clients and tests.
    pub fn to_packet(&self) -> Packet {
        let mut packet = Packet::new(command::LOGIN)
            .with(self.protocol_version)
            .with(&self.name)
            .with(&self.build)
            .with(self.registered);
        if let Some(nonce) = &self.nonce {
            packet.push(nonce);
        }
        packet
    }
}
