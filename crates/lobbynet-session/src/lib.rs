//! Player sessions for the lobbynet matchmaking server.
//!
//! This crate handles everything about a connection that is not I/O:
//!
//! 1. **Accounts**: the [`UserDatabase`] seam for registered users
//! 2. **Login**: parsing LOGIN ([`LoginRequest`]) and admitting it
//!    into the live set ([`SessionManager`]) under a unique name
//! 3. **Keepalive**: the ping/pong timer cycle ([`Keepalive`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Matchmaking server (above)  ← owns the SessionManager in its control task
//!     ↕
//! Session Layer (this crate)  ← identity, permissions, lifecycle state
//!     ↕
//! Protocol Layer (below)      ← Packet, wire constants
//! ```

mod auth;
mod error;
mod keepalive;
mod login;
mod manager;
mod session;

pub use auth::{InMemoryUsers, UserDatabase};
pub use error::SessionError;
pub use keepalive::{Keepalive, KeepaliveAction};
pub use login::LoginRequest;
pub use manager::{LiveSession, SessionManager, unique_name};
pub use session::{
    Permission, Session, SessionConfig, SessionState, unix_secs,
};
