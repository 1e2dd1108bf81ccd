//! The lobbynet relay.
//!
//! Hosts of games are often not reachable from the internet, so every
//! host and participant connects here instead and the relay forwards
//! their traffic. Each relay game runs as an isolated Tokio task (actor
//! model) that owns all of its connections.
//!
//! # Key types
//!
//! - [`RelayServer`]: accept loop, game registry, bridge listener
//! - [`RelayHandle`]: query or shut down a running server
//! - [`RelayGameHandle`]: send commands to a running game actor
//! - [`Hello`]: the first packet of every relay connection
//! - [`RelayConfig`]: addresses and timeouts

mod config;
mod connection;
mod error;
mod game;
mod hello;
mod server;

pub use config::RelayConfig;
pub use connection::{HOST_ID, Inbound, RelayConnection};
pub use error::RelayError;
pub use game::{GameEvent, GameInfo, RelayGameHandle};
pub use hello::Hello;
pub use server::{RelayHandle, RelayServer, RelayServerBuilder};
