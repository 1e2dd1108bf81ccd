//! Matchmaking server configuration.

use lobbynet_protocol::wire::{
    META_BRIDGE_PORT, META_PORT, RELAY_BRIDGE_PORT, RELAY_PORT,
};
use lobbynet_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Settings for a [`MetaServer`](crate::MetaServer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Where clients connect.
    pub bind: String,

    /// Where the relay's bridge calls arrive.
    pub bridge_bind: String,

    /// The relay's bridge listener.
    pub relay_bridge_addr: String,

    /// The relay address handed to hosts and joining players.
    pub relay_public_addr: String,

    pub session: SessionConfig,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{META_PORT}"),
            bridge_bind: format!("0.0.0.0:{META_BRIDGE_PORT}"),
            relay_bridge_addr: format!("127.0.0.1:{RELAY_BRIDGE_PORT}"),
            relay_public_addr: format!("127.0.0.1:{RELAY_PORT}"),
            session: SessionConfig::default(),
        }
    }
}

impl MetaConfig {
    /// Defaults overridden by `LOBBYNET_META_BIND`,
    /// `LOBBYNET_META_BRIDGE_BIND`, `LOBBYNET_RELAY_BRIDGE_ADDR`,
    /// `LOBBYNET_RELAY_PUBLIC_ADDR` and `LOBBYNET_MOTD`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let fields = [
            ("LOBBYNET_META_BIND", &mut config.bind),
            ("LOBBYNET_META_BRIDGE_BIND", &mut config.bridge_bind),
            ("LOBBYNET_RELAY_BRIDGE_ADDR", &mut config.relay_bridge_addr),
            ("LOBBYNET_RELAY_PUBLIC_ADDR", &mut config.relay_public_addr),
            ("LOBBYNET_MOTD", &mut config.session.motd),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }
        config
    }
}
