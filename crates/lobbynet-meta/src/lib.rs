//! # lobbynet-meta
//!
//! The matchmaking server: players log in, chat, and open or join games
//! whose traffic is carried by a relay server.
//!
//! The server keeps one task per connection (LOGIN handshake, command
//! dispatch, keepalive) and a single control task that owns the live
//! session set and the [`GameTable`]. Opening a game asks the relay,
//! over the bridge, to provision it; the relay reports back when the
//! host attaches and when the game closes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lobbynet_meta::prelude::*;
//!
//! # async fn start() -> Result<(), MetaError> {
//! let server = MetaServer::builder()
//!     .bind("0.0.0.0:7395")
//!     .users(InMemoryUsers::new())
//!     .build()
//!     .await?;
//! let handle = server.handle();
//! tokio::spawn(server.run());
//! // later
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod games;
mod handler;
mod server;

pub use config::MetaConfig;
pub use error::MetaError;
pub use games::{Departure, GameRecord, GameState, GameTable};
pub use server::{MetaHandle, MetaServer, MetaServerBuilder};

/// Everything needed to embed a matchmaking server.
pub mod prelude {
    pub use crate::{
        GameRecord, GameState, MetaConfig, MetaError, MetaHandle, MetaServer,
        MetaServerBuilder,
    };
    pub use lobbynet_session::{
        InMemoryUsers, Permission, SessionConfig, UserDatabase,
    };
}
