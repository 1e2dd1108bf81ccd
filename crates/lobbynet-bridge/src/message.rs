//! Bridge request and response documents.
//!
//! Each travels as one frame whose body is JSON:
//!
//! ```text
//! → {"NewGame":{"name":"forest","password":"9f…"}}
//! ← "Ok"
//! → {"GameClosed":{"name":"forest"}}
//! ← {"Failed":{"reason":"unknown game"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// A call from one server to the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeRequest {
    /// Matchmaking → relay: provision a relay game.
    NewGame { name: String, password: String },
    /// Matchmaking → relay: drop a provisioned game whose host never
    /// attached. The password picks out which provisioning is meant.
    CloseGame { name: String, password: String },
    /// Relay → matchmaking: the host attached to the relay game.
    GameConnected { name: String },
    /// Relay → matchmaking: the relay game is gone.
    GameClosed { name: String },
}

impl BridgeRequest {
    /// The game this call is about.
    pub fn game_name(&self) -> &str {
        match self {
            Self::NewGame { name, .. }
            | Self::CloseGame { name, .. }
            | Self::GameConnected { name }
            | Self::GameClosed { name } => name,
        }
    }
}

/// The answer to a [`BridgeRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeResponse {
    Ok,
    Failed { reason: String },
}

impl BridgeResponse {
    /// Builds a failure response.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Turns a `Failed` response into [`BridgeError::Rejected`].
    pub fn into_result(self) -> Result<(), BridgeError> {
        match self {
            Self::Ok => Ok(()),
            Self::Failed { reason } => Err(BridgeError::Rejected(reason)),
        }
    }
}
