//! Relay server configuration.

use std::time::Duration;

use lobbynet_protocol::wire::{META_BRIDGE_PORT, RELAY_BRIDGE_PORT, RELAY_PORT};
use serde::{Deserialize, Serialize};

/// Settings for a [`RelayServer`](crate::RelayServer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Where hosts and participants connect.
    pub bind: String,

    /// Where the matchmaking server's bridge calls arrive.
    pub bridge_bind: String,

    /// The matchmaking server's bridge listener.
    pub meta_bridge_addr: String,

    /// How long a fresh connection has to send `HELLO`.
    pub hello_timeout: Duration,

    /// Bound of each connection's inbound packet queue.
    pub inbound_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{RELAY_PORT}"),
            bridge_bind: format!("0.0.0.0:{RELAY_BRIDGE_PORT}"),
            meta_bridge_addr: format!("127.0.0.1:{META_BRIDGE_PORT}"),
            hello_timeout: Duration::from_secs(5),
            inbound_capacity: 64,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `LOBBYNET_RELAY_BIND`,
    /// `LOBBYNET_RELAY_BRIDGE_BIND` and `LOBBYNET_META_BRIDGE_ADDR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the same
    /// variable names as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(bind) = lookup("LOBBYNET_RELAY_BIND") {
            config.bind = bind;
        }
        if let Some(bind) = lookup("LOBBYNET_RELAY_BRIDGE_BIND") {
            config.bridge_bind = bind;
        }
        if let Some(addr) = lookup("LOBBYNET_META_BRIDGE_ADDR") {
            config.meta_bridge_addr = addr;
        }
        config
    }
}
