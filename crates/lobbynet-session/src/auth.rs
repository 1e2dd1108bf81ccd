//! User database hook for registered accounts.
//!
//! lobbynet doesn't store accounts itself. The matchmaking server asks a
//! [`UserDatabase`] three questions during LOGIN: does this name belong
//! to an account, does the presented credential match it, and what may
//! the account do. Anything that can answer those (a file, a SQL table,
//! an in-memory map in tests) can back the server.

use std::collections::HashMap;

use crate::Permission;

/// Looks up registered accounts by name.
///
/// `Send + Sync + 'static` so one database can be shared by the server's
/// control task for its whole lifetime.
///
/// # Example
///
/// ```rust
/// use lobbynet_session::{Permission, UserDatabase};
///
/// /// Knows exactly one account.
/// struct Admin;
///
/// impl UserDatabase for Admin {
///     fn contains_name(&self, name: &str) -> bool {
///         name == "admin"
///     }
///
///     fn password_correct(&self, name: &str, credential: &str) -> bool {
///         name == "admin" && credential == "hunter2"
///     }
///
///     fn permissions(&self, name: &str) -> Permission {
///         if name == "admin" {
///             Permission::Superuser
///         } else {
///             Permission::Unregistered
///         }
///     }
/// }
/// ```
pub trait UserDatabase: Send + Sync + 'static {
    /// Returns `true` if `name` belongs to a registered account.
    fn contains_name(&self, name: &str) -> bool;

    /// Returns `true` if `credential` (the LOGIN nonce) matches the
    /// stored credential for `name`.
    fn password_correct(&self, name: &str, credential: &str) -> bool;

    /// Returns the permission level of `name`.
    fn permissions(&self, name: &str) -> Permission;
}

/// A [`UserDatabase`] backed by a plain map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUsers {
    users: HashMap<String, (String, Permission)>,
}

impl InMemoryUsers {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an account.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        credential: impl Into<String>,
        permission: Permission,
    ) {
        self.users
            .insert(name.into(), (credential.into(), permission));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_user(
        mut self,
        name: impl Into<String>,
        credential: impl Into<String>,
        permission: Permission,
    ) -> Self {
        self.insert(name, credential, permission);
        self
    }
}

impl UserDatabase for InMemoryUsers {
    fn contains_name(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    fn password_correct(&self, name: &str, credential: &str) -> bool {
        self.users
            .get(name)
            .is_some_and(|(stored, _)| stored == credential)
    }

    fn permissions(&self, name: &str) -> Permission {
        self.users
            .get(name)
            .map_or(Permission::Unregistered, |(_, permission)| *permission)
    }
}
