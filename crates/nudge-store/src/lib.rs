//! Storage layer for the nudge work guard.
//!
//! Persists the single [`GuardState`] record as JSON under
//! [`STATE_KEY`] in a small key/value table using `rusqlite`.
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so [`SqliteStore`] keeps
//! it behind a `Mutex`. Every [`SqliteStore::modify`] runs its closure inside
//! one transaction while holding that lock, which makes each named operation
//! an atomic read-modify-write.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE kv (
//!     key TEXT PRIMARY KEY,
//!     value TEXT NOT NULL,      -- JSON, camelCase field names
//!     updated_at TEXT NOT NULL  -- ISO 8601, UTC
//! );
//! ```
//!
//! The record is created with defaults on first open. Unknown JSON fields
//! are ignored and missing ones take their defaults.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use nudge_core::{GuardState, HostError, STATE_KEY, StateStore};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The stored record is not valid JSON for [`GuardState`].
    #[error("invalid state record: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for HostError {
    fn from(err: StoreError) -> Self {
        Self::Store(Box::new(err))
    }
}

/// `StateStore` backed by a SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    revision: watch::Sender<u64>,
}

impl SqliteStore {
    /// Opens a store at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Opens an in-memory store.
    ///
    /// Useful for testing. The data is destroyed when the store is dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Creates the schema and the default record.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        let defaults = serde_json::to_string(&GuardState::default())?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![STATE_KEY, defaults, now_timestamp()],
        )?;
        if inserted > 0 {
            debug!("created default guard state");
        }

        let (revision, _) = watch::channel(0);
        Ok(Self {
            conn: Mutex::new(conn),
            revision,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the current record.
    pub fn state(&self) -> Result<GuardState, StoreError> {
        read_state(&self.conn())
    }

    /// Applies `apply` to the record inside one transaction.
    ///
    /// The row is only rewritten, and subscribers only notified, when the
    /// record actually changed.
    pub fn modify<F, R>(&self, apply: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut GuardState) -> R,
    {
        let (result, changed) = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let mut state = read_state(&tx)?;
            let before = state.clone();
            let result = apply(&mut state);
            let changed = state != before;
            if changed {
                tx.execute(
                    "UPDATE kv SET value = ?2, updated_at = ?3 WHERE key = ?1",
                    params![STATE_KEY, serde_json::to_string(&state)?, now_timestamp()],
                )?;
            }
            tx.commit()?;
            (result, changed)
        };

        if changed {
            self.revision.send_modify(|revision| *revision += 1);
        }
        Ok(result)
    }

    /// When the record was last written, as stored (ISO 8601).
    pub fn updated_at(&self) -> Result<Option<String>, StoreError> {
        let updated = self
            .conn()
            .query_row(
                "SELECT updated_at FROM kv WHERE key = ?1",
                params![STATE_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(updated)
    }
}

impl StateStore for SqliteStore {
    async fn load(&self) -> Result<GuardState, HostError> {
        Ok(self.state()?)
    }

    async fn update<F, R>(&self, apply: F) -> Result<R, HostError>
    where
        F: FnOnce(&mut GuardState) -> R + Send,
        R: Send,
    {
        Ok(self.modify(apply)?)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

fn read_state(conn: &Connection) -> Result<GuardState, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![STATE_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(GuardState::default()),
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn open_in_memory_store() {
        let store = SqliteStore::open_in_memory();
        assert!(store.is_ok());
    }

    #[test]
    fn first_open_seeds_defaults() {
        let store = SqliteStore::open_in_memory().unwrap();
        let state = store.state().unwrap();
        assert_eq!(state, GuardState::default());
        assert!(store.updated_at().unwrap().is_some());
    }

    #[test]
    fn modify_persists_changes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .modify(|s| s.set_target_url("work.example.com"))
            .unwrap()
            .unwrap();
        assert_eq!(store.state().unwrap().target_url(), "https://work.example.com");
    }

    #[test]
    fn unchanged_record_does_not_notify() {
        let store = SqliteStore::open_in_memory().unwrap();
        let changes = store.subscribe();

        store.modify(GuardState::clear_snooze).unwrap();
        assert!(!changes.has_changed().unwrap());

        store.modify(|s| s.set_goal_minutes(45)).unwrap().unwrap();
        assert!(changes.has_changed().unwrap());
    }

    #[test]
    fn failed_validation_leaves_record_untouched() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.modify(|s| s.start_guard(30)).unwrap();
        assert!(result.is_err());
        assert!(!store.state().unwrap().is_guard_active());
    }

    #[test]
    fn record_is_stored_as_camel_case_json() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();
        store.modify(|s| s.snooze(5, now)).unwrap().unwrap();

        let json: String = store
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", [STATE_KEY], |row| {
                row.get(0)
            })
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["isSnoozed"], true);
        assert_eq!(
            value["snoozeUntil"],
            (now + Duration::minutes(5)).timestamp_millis()
        );
    }

    #[test]
    fn corrupt_record_reports_json_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn()
            .execute("UPDATE kv SET value = 'not json' WHERE key = ?1", [STATE_KEY])
            .unwrap();
        assert!(matches!(store.state(), Err(StoreError::Json(_))));

        let host: HostError = store.state().unwrap_err().into();
        assert!(!host.is_transient());
    }
}
