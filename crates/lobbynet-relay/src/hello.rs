//! The first packet on every relay connection.
//!
//! ```text
//! HELLO <game> <version> <host> [<password>]
//! ```
//!
//! Hosts must carry the password the matchmaking server handed out in
//! `GAME_OPEN`. Participants may omit it.

use lobbynet_protocol::wire::command;
use lobbynet_protocol::{Packet, ProtocolError};

/// A parsed `HELLO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub game: String,
    pub version: u32,
    pub host: bool,
    pub password: Option<String>,
}

impl Hello {
    /// Parses a `HELLO` packet.
    ///
    /// # Errors
    /// [`ProtocolError::UnexpectedCommand`] for any other command, or a
    /// field decoding error. A host without a password is
    /// [`ProtocolError::PacketExhausted`].
    pub fn parse(mut packet: Packet) -> Result<Self, ProtocolError> {
        if packet.command() != command::HELLO {
            return Err(ProtocolError::UnexpectedCommand(
                packet.command().to_string(),
            ));
        }
        let game = packet.pop_str()?;
        let version = packet.pop_int()?;
        let host = packet.pop_bool()?;
        let password = if host {
            Some(packet.pop_str()?)
        } else {
            packet.pop_opt()
        };
        Ok(Self {
            game,
            version,
            host,
            password,
        })
    }

    /// Builds the packet a host or participant sends.
    pub fn to_packet(&self) -> Packet {
        let mut packet = Packet::new(command::HELLO)
            .with(&self.game)
            .with(self.version)
            .with(self.host);
        if let Some(password) = &self.password {
            packet.push(password);
        }
        packet
    }
}
