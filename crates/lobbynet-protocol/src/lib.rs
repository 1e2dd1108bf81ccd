//! Wire protocol for lobbynet.
//!
//! This crate defines the "language" every lobbynet participant speaks:
//!
//! - **Packets** ([`Packet`]): ordered NUL-terminated string fields,
//!   the first being the command name, with typed field decoding.
//! - **Wire constants** ([`wire`]): ports, command names, reason codes
//!   and the command lookup tables both servers dispatch through.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): structured documents
//!   for the server-to-server bridge.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (Packet) → Session / Relay game
//! ```

mod codec;
mod error;
mod io;
mod packet;
pub mod wire;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use io::{recv_message, recv_packet, send_message, send_packet};
pub use packet::{Field, Packet};
pub use wire::{MetaCommand, RelayCommand};
