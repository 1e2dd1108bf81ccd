//! Game records: the matchmaking side of every advertised game.
//!
//! A record is created when a player asks to open a game and lives until
//! its host leaves or the relay reports the game closed.
//!
//! # Invariants
//!
//! - Game names are unique among live records.
//! - A player is in at most one game at a time, as host or participant.
//! - The host is always a member of its own roster.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use rand::Rng;

use lobbynet_protocol::Packet;
use lobbynet_protocol::wire::command;

use crate::MetaError;

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// The lifecycle state of a game record.
///
/// Transitions are strictly ordered, no skipping states:
///
/// ```text
/// InitialSetup → Connectable → Running
/// ```
///
/// - **InitialSetup**: the record exists, the relay game is being
///   provisioned. Not listed, not joinable.
/// - **Connectable**: the relay game exists; the host may attach.
/// - **Running**: the host attached to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    InitialSetup,
    Connectable,
    Running,
}

impl GameState {
    /// Returns the next state, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::InitialSetup => Some(Self::Connectable),
            Self::Connectable => Some(Self::Running),
            Self::Running => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    /// Returns `true` if the game appears in `GAMES_UPDATE` and can be
    /// joined.
    pub fn is_listed(self) -> bool {
        matches!(self, Self::Connectable | Self::Running)
    }

    /// The wire spelling used in `GAMES_UPDATE`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitialSetup => "INITIAL_SETUP",
            Self::Connectable => "CONNECTABLE",
            Self::Running => "RUNNING",
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GameRecord
// ---------------------------------------------------------------------------

/// One advertised game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub name: String,
    pub host: String,
    pub roster: BTreeSet<String>,
    pub capacity: u32,
    pub state: GameState,
    /// The relay host password handed to the host in `GAME_OPEN`.
    pub password: String,
}

impl GameRecord {
    pub fn players(&self) -> usize {
        self.roster.len()
    }

    pub fn is_full(&self) -> bool {
        self.roster.len() >= self.capacity as usize
    }
}

/// What happened when a player left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// A participant left; the game goes on.
    Left { game: String },
    /// The host left; the record is gone.
    Ended(GameRecord),
}

// ---------------------------------------------------------------------------
// GameTable
// ---------------------------------------------------------------------------

/// All live game records, plus which player is in which game.
///
/// Owned by the matchmaking server's control task; not thread-safe by
/// itself.
#[derive(Debug, Default)]
pub struct GameTable {
    games: BTreeMap<String, GameRecord>,

    /// Maps each player to the game they are currently in.
    player_games: HashMap<String, String>,
}

impl GameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record in `InitialSetup` with `host` as its only member.
    ///
    /// # Errors
    /// [`MetaError::InvalidCapacity`], [`MetaError::AlreadyInGame`] or
    /// [`MetaError::GameConflict`].
    pub fn open(
        &mut self,
        name: &str,
        host: &str,
        capacity: u32,
        password: String,
    ) -> Result<&GameRecord, MetaError> {
        if capacity == 0 {
            return Err(MetaError::InvalidCapacity(capacity));
        }
        self.ensure_free(host)?;
        if self.games.contains_key(name) {
            return Err(MetaError::GameConflict(name.to_string()));
        }

        let record = GameRecord {
            name: name.to_string(),
            host: host.to_string(),
            roster: BTreeSet::from([host.to_string()]),
            capacity,
            state: GameState::InitialSetup,
            password,
        };
        self.player_games.insert(host.to_string(), name.to_string());
        tracing::info!(game = %name, %host, capacity, "game record created");
        Ok(self.games.entry(name.to_string()).or_insert(record))
    }

    /// Moves a record one step along its lifecycle.
    ///
    /// # Errors
    /// [`MetaError::GameUnknown`] if there is no such record, or
    /// [`MetaError::GameNotReady`] if `target` is not the next state.
    pub fn advance(
        &mut self,
        name: &str,
        target: GameState,
    ) -> Result<&GameRecord, MetaError> {
        let record = self
            .games
            .get_mut(name)
            .ok_or_else(|| MetaError::GameUnknown(name.to_string()))?;
        if !record.state.can_transition_to(target) {
            return Err(MetaError::GameNotReady(name.to_string()));
        }
        record.state = target;
        tracing::info!(game = %name, state = %target, "game state changed");
        Ok(record)
    }

    /// Adds `player` to a listed game's roster.
    ///
    /// # Errors
    /// [`MetaError::AlreadyInGame`], [`MetaError::GameUnknown`],
    /// [`MetaError::GameNotReady`] or [`MetaError::GameFull`].
    pub fn join(
        &mut self,
        player: &str,
        name: &str,
    ) -> Result<&GameRecord, MetaError> {
        self.ensure_free(player)?;
        let record = self
            .games
            .get_mut(name)
            .ok_or_else(|| MetaError::GameUnknown(name.to_string()))?;
        if !record.state.is_listed() {
            return Err(MetaError::GameNotReady(name.to_string()));
        }
        if record.is_full() {
            return Err(MetaError::GameFull(name.to_string()));
        }

        record.roster.insert(player.to_string());
        self.player_games
            .insert(player.to_string(), name.to_string());
        tracing::info!(
            game = %name,
            %player,
            players = record.players(),
            "player joined game"
        );
        Ok(record)
    }

    /// Removes `player` from their game. A departing host ends it.
    ///
    /// # Errors
    /// [`MetaError::NotInGame`] if the player is in no game.
    pub fn leave(&mut self, player: &str) -> Result<Departure, MetaError> {
        let name = self
            .player_games
            .remove(player)
            .ok_or_else(|| MetaError::NotInGame(player.to_string()))?;

        let is_host = self
            .games
            .get(&name)
            .is_some_and(|record| record.host == player);
        if is_host {
            let record = self
                .remove(&name)
                .ok_or_else(|| MetaError::GameUnknown(name.clone()))?;
            return Ok(Departure::Ended(record));
        }

        if let Some(record) = self.games.get_mut(&name) {
            record.roster.remove(player);
            tracing::info!(
                game = %name,
                %player,
                players = record.players(),
                "player left game"
            );
        }
        Ok(Departure::Left { game: name })
    }

    /// Removes a record and frees all of its members.
    pub fn remove(&mut self, name: &str) -> Option<GameRecord> {
        let record = self.games.remove(name)?;
        for member in &record.roster {
            if self.player_games.get(member).map(String::as_str) == Some(name)
            {
                self.player_games.remove(member);
            }
        }
        tracing::info!(game = %name, "game record removed");
        Some(record)
    }

    pub fn get(&self, name: &str) -> Option<&GameRecord> {
        self.games.get(name)
    }

    /// The game `player` is in, if any.
    pub fn game_of(&self, player: &str) -> Option<&str> {
        self.player_games.get(player).map(String::as_str)
    }

    /// Every record, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &GameRecord> {
        self.games.values()
    }

    /// Listed records, ordered by name.
    pub fn listed(&self) -> impl Iterator<Item = &GameRecord> {
        self.games.values().filter(|record| record.state.is_listed())
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Builds `GAMES_UPDATE <count> {<name> <host> <state> <players> <capacity>}*`.
    pub fn games_update(&self) -> Packet {
        let listed: Vec<&GameRecord> = self.listed().collect();
        let mut packet =
            Packet::new(command::GAMES_UPDATE).with(listed.len());
        for record in listed {
            packet.push(&record.name);
            packet.push(&record.host);
            packet.push(record.state.as_str());
            packet.push(record.players());
            packet.push(record.capacity);
        }
        packet
    }

    fn ensure_free(&self, player: &str) -> Result<(), MetaError> {
        match self.player_games.get(player) {
            Some(game) => Err(MetaError::AlreadyInGame {
                player: player.to_string(),
                game: game.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Generates a relay host password: 16 random bytes as 32 hex digits.
pub fn generate_password() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
