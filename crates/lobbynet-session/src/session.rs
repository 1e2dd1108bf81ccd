//! Session types: the data structures that represent a player's
//! connection to the matchmaking server.
//!
//! A "session" is the server's record of a connected player. It tracks:
//! - WHO the player is (the name they were admitted under)
//! - WHAT they may do (`Permission`)
//! - WHERE they are in the connection lifecycle (`SessionState`)
//! - WHEN they logged in and when they were last heard from

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
///
/// Game operators can customize these when building the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a connected session may stay quiet before the server
    /// sends `PING`.
    pub ping_interval: Duration,

    /// How long the client has to answer a `PING` with `PONG`.
    pub ping_timeout: Duration,

    /// How long a fresh connection has to send `LOGIN`.
    pub login_timeout: Duration,

    /// Message of the day, sent as a `CHAT` right after login.
    /// Empty means none.
    pub motd: String,

    /// Bound of each connection's inbound packet queue.
    pub inbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(15),
            login_timeout: Duration::from_secs(10),
            motd: String::new(),
            inbound_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

/// What an account is allowed to do.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
pub enum Permission {
    Unregistered,
    Registered,
    Superuser,
}

impl Permission {
    /// The wire spelling used in the `LOGIN` reply.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "UNREGISTERED",
            Self::Registered => "REGISTERED",
            Self::Superuser => "SUPERUSER",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNREGISTERED" => Ok(Self::Unregistered),
            "REGISTERED" => Ok(Self::Registered),
            "SUPERUSER" => Ok(Self::Superuser),
            other => Err(format!("unknown permission {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a session.
///
/// ```text
///   Handshake ──(valid LOGIN)──→ Connected ──(disconnect / timeout)──→ Disconnected
/// ```
///
/// `Disconnected` is terminal. A session never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Handshake,
    Connected,
    Disconnected,
}

impl SessionState {
    /// Returns `true` if moving to `target` is allowed.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Handshake, Self::Connected)
                | (Self::Handshake, Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => write!(f, "Handshake"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One player's session on the matchmaking server.
#[derive(Debug, Clone)]
pub struct Session {
    /// The name the player was admitted under (may carry a numeric
    /// suffix if the requested one was taken).
    pub name: String,

    /// Permission level from the user database.
    pub permission: Permission,

    /// Current lifecycle state.
    pub state: SessionState,

    /// Protocol version announced in LOGIN.
    pub protocol_version: u32,

    /// Client build identifier announced in LOGIN.
    pub build: String,

    /// Wall-clock login time.
    pub login_time: SystemTime,

    /// Last time any packet arrived from this client.
    pub last_seen: Instant,
}

impl Session {
    /// Creates a freshly admitted, connected session.
    pub fn connected(
        name: String,
        permission: Permission,
        protocol_version: u32,
        build: String,
    ) -> Self {
        Self {
            name,
            permission,
            state: SessionState::Connected,
            protocol_version,
            build,
            login_time: SystemTime::now(),
            last_seen: Instant::now(),
        }
    }

    /// Login time as seconds since the Unix epoch.
    pub fn login_unix_secs(&self) -> u64 {
        unix_secs(self.login_time)
    }

    /// Moves to `target` if the transition is allowed. Returns whether
    /// the state changed.
    pub fn transition(&mut self, target: SessionState) -> bool {
        if self.state.can_transition_to(target) {
            self.state = target;
            true
        } else {
            false
        }
    }

    /// Records that the client was heard from.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// How long since the client was last heard from.
    pub fn idle(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Seconds since the Unix epoch, saturating at zero for clocks set
/// before 1970.
pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_transitions() {
        use SessionState::*;
        assert!(Handshake.can_transition_to(Connected));
        assert!(Handshake.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(!Connected.can_transition_to(Handshake));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Disconnected));
    }

    #[test]
    fn test_session_transition_disconnected_is_terminal() {
        let mut session = Session::connected(
            "alice".into(),
            Permission::Registered,
            1,
            "b1".into(),
        );
        assert!(session.transition(SessionState::Disconnected));
        assert!(!session.transition(SessionState::Connected));
        assert_eq!(session.state, SessionState::Disconnected);
    }

    #[test]
    fn test_touch_resets_idle_time() {
        let mut session = Session::connected(
            "alice".into(),
            Permission::Unregistered,
            1,
            "b1".into(),
        );
        std::thread::sleep(Duration::from_millis(50));
        assert!(session.idle() >= Duration::from_millis(50));
        session.touch();
        assert!(session.idle() < Duration::from_millis(50));
    }

    #[test]
    fn test_permission_wire_spelling_round_trips() {
        for p in [
            Permission::Unregistered,
            Permission::Registered,
            Permission::Superuser,
        ] {
            assert_eq!(p.as_str().parse::<Permission>(), Ok(p));
        }
        assert!("ADMIN".parse::<Permission>().is_err());
    }

    #[test]
    fn test_permission_ordering() {
        assert!(Permission::Superuser > Permission::Registered);
        assert!(Permission::Registered > Permission::Unregistered);
    }

    #[test]
    fn test_unix_secs_before_epoch_is_zero() {
        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(unix_secs(before), 0);
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.ping_timeout, Duration::from_secs(15));
        assert!(config.motd.is_empty());
    }
}
