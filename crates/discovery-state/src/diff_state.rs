//! Durable diff-token state.
//!
//! The quota token and the set of numbers committed under it must always
//! change together; every mutation happens in a single SQLite transaction.

use crate::error::StateError;
use discovery_types::E164;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const TOKEN_KEY: &str = "token";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS diff_metadata (
    key   TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS previous_e164 (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    e164 TEXT NOT NULL
);
";

/// The last-seen token and the numbers the enclave already knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffState {
    pub token: Vec<u8>,
    pub known_e164s: BTreeSet<E164>,
}

/// Durable store for the diff token and its committed number set.
#[derive(Clone)]
pub struct DiffStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl DiffStateStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store. State does not survive the process.
    pub fn open_in_memory() -> Result<Self, StateError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StateError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Load the token and the numbers committed under it.
    ///
    /// Returns `None` when no token is stored, or when any stored number
    /// fails validation. A corrupted record means the local state can no
    /// longer be trusted, so the whole snapshot is discarded and the next
    /// round resyncs from scratch.
    pub fn load(&self) -> Result<Option<DiffState>, StateError> {
        let conn = self.conn.lock().expect("diff state lock poisoned");

        let token: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM diff_metadata WHERE key = ?1",
                params![TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let Some(token) = token else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT e164 FROM previous_e164")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut known_e164s = BTreeSet::new();
        for row in rows {
            let raw = row?;
            match raw.parse::<E164>() {
                Ok(e164) => {
                    known_e164s.insert(e164);
                }
                Err(_) => {
                    // Inconsistent local state; force a full resync rather
                    // than silently diverging from the server.
                    warn!("Found malformed stored number; treating diff state as absent");
                    return Ok(None);
                }
            }
        }

        Ok(Some(DiffState { token, known_e164s }))
    }

    /// Persist a replacement token together with the numbers newly committed
    /// under it, atomically.
    ///
    /// `clear_existing` drops all previously stored numbers first; used when
    /// a token is (re)established from empty.
    pub fn save(
        &self,
        new_token: &[u8],
        clear_existing: bool,
        new_e164s: &BTreeSet<E164>,
    ) -> Result<(), StateError> {
        if new_token.is_empty() {
            return Err(StateError::EmptyToken);
        }

        let mut conn = self.conn.lock().expect("diff state lock poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO diff_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![TOKEN_KEY, new_token],
        )?;

        if clear_existing {
            tx.execute("DELETE FROM previous_e164", [])?;
            info!("Clearing all previously committed numbers");
        }

        for e164 in new_e164s {
            tx.execute(
                "INSERT INTO previous_e164 (e164) VALUES (?1)",
                params![e164.to_string()],
            )?;
        }

        tx.commit()?;
        info!("Saved diff token and {} new numbers", new_e164s.len());
        Ok(())
    }

    /// Discard the token. The next `load()` returns `None`, and the next
    /// `save()` clears the number table before writing.
    pub fn reset(&self) -> Result<(), StateError> {
        warn!("Resetting diff token");
        let conn = self.conn.lock().expect("diff state lock poisoned");
        conn.execute(
            "DELETE FROM diff_metadata WHERE key = ?1",
            params![TOKEN_KEY],
        )?;
        Ok(())
    }

    /// Insert a raw row into the number table, bypassing validation.
    #[cfg(test)]
    pub(crate) fn insert_raw_e164(&self, raw: &str) -> Result<(), StateError> {
        let conn = self.conn.lock().expect("diff state lock poisoned");
        conn.execute(
            "INSERT INTO previous_e164 (e164) VALUES (?1)",
            params![raw],
        )?;
        Ok(())
    }
}
