//! The session manager: the set of live, logged-in sessions.
//!
//! This is the central piece of the session layer. It's responsible for:
//! - Admitting a LOGIN (credential check, name allocation)
//! - Tracking which names are in use
//! - Refusing admissions once shutdown has begun
//! - Forgetting sessions when they disconnect
//!
//! # Concurrency note
//!
//! `SessionManager` is NOT thread-safe by itself: it uses a plain
//! `HashMap`. The matchmaking server's control task owns it and every
//! other task reaches it through that task's channel, so admission and
//! removal are naturally serialized.

use std::collections::HashMap;

use lobbynet_protocol::wire::MAX_NAME_LEN;

use crate::{
    LoginRequest, Permission, Session, SessionError, SessionState,
    UserDatabase,
};

/// A live session plus whatever the owner needs to reach it (typically
/// a handle to its connection).
#[derive(Debug)]
pub struct LiveSession<H> {
    pub session: Session,
    pub handle: H,
}

/// Manages all live sessions, keyed by name.
///
/// ## Lifecycle
///
/// ```text
/// admit() ──→ [Connected] ──→ remove() ──→ gone
///    ✗ after begin_shutdown()
/// ```
pub struct SessionManager<H> {
    sessions: HashMap<String, LiveSession<H>>,
    accepting: bool,
}

impl<H> SessionManager<H> {
    /// Creates a new, empty session manager.
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            accepting: true,
        }
    }

    /// Validates a LOGIN and registers the session under its final name.
    ///
    /// Registered logins must name an existing account, present the
    /// matching credential and not already be logged in. Anonymous
    /// logins get the requested name, or the requested name plus the
    /// smallest numeric suffix that collides with neither a live
    /// session nor a registered account.
    ///
    /// # Errors
    /// - [`SessionError::ShuttingDown`] after [`begin_shutdown`](Self::begin_shutdown)
    /// - [`SessionError::InvalidName`] for an empty name or one longer
    ///   than [`MAX_NAME_LEN`]
    /// - [`SessionError::WrongPassword`] for a bad account or credential
    /// - [`SessionError::AlreadyLoggedIn`] for a duplicate registered login
    pub fn admit<D: UserDatabase + ?Sized>(
        &mut self,
        request: &LoginRequest,
        users: &D,
        handle: H,
    ) -> Result<&Session, SessionError> {
        if !self.accepting {
            return Err(SessionError::ShuttingDown);
        }
        if request.name.is_empty() || request.name.len() > MAX_NAME_LEN {
            return Err(SessionError::InvalidName(request.name.clone()));
        }

        let (name, permission) = if request.registered {
            let credential = request.nonce.as_deref().unwrap_or_default();
            if !users.contains_name(&request.name)
                || !users.password_correct(&request.name, credential)
            {
                return Err(SessionError::WrongPassword(request.name.clone()));
            }
            if self.sessions.contains_key(&request.name) {
                return Err(SessionError::AlreadyLoggedIn(
                    request.name.clone(),
                ));
            }
            (request.name.clone(), users.permissions(&request.name))
        } else {
            let name = unique_name(&request.name, |candidate| {
                self.sessions.contains_key(candidate)
                    || users.contains_name(candidate)
            });
            (name, Permission::Unregistered)
        };

        let session = Session::connected(
            name.clone(),
            permission,
            request.protocol_version,
            request.build.clone(),
        );
        tracing::info!(
            %name,
            requested = %request.name,
            %permission,
            "session admitted"
        );
        let entry = self
            .sessions
            .entry(name)
            .insert_entry(LiveSession { session, handle });
        Ok(&entry.into_mut().session)
    }

    /// Removes a session. Returns it if it was live.
    pub fn remove(&mut self, name: &str) -> Option<LiveSession<H>> {
        let mut live = self.sessions.remove(name)?;
        live.session.transition(SessionState::Disconnected);
        tracing::info!(
            %name,
            idle_secs = live.session.idle().as_secs(),
            "session removed"
        );
        Some(live)
    }

    /// Stops admitting new sessions. Idempotent.
    pub fn begin_shutdown(&mut self) {
        self.accepting = false;
    }

    /// Returns `true` until [`begin_shutdown`](Self::begin_shutdown).
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Looks up a live session by name.
    pub fn get(&self, name: &str) -> Option<&LiveSession<H>> {
        self.sessions.get(name)
    }

    /// Looks up a live session by name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut LiveSession<H>> {
        self.sessions.get_mut(name)
    }

    /// Returns `true` if `name` is in use by a live session.
    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Iterates over all live sessions.
    pub fn iter(&self) -> impl Iterator<Item = &LiveSession<H>> {
        self.sessions.values()
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<H> Default for SessionManager<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `requested` if it is free, otherwise `requested` followed by
/// the smallest positive integer that makes it free.
pub fn unique_name(requested: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(requested) {
        return requested.to_string();
    }
    (1u64..)
        .map(|n| format!("{requested}{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| requested.to_string())
}

// =========================================================================
// Tests
// =========================================================================
