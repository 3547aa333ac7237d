//! Embedded relational store for the brain.
//!
//! One SQLite file (`bakerst.db`) opened once at startup. Writers contend on
//! the connection mutex plus SQLite's 5-second busy timeout; memory-state
//! rows additionally use an optimistic lock version so concurrent observer
//! and reflector passes cannot corrupt the token counters.

mod conversations;
mod handoff;
mod jobs;
mod memory;
mod schedules;
mod schema;
mod secrets;
mod skills;
mod types;

pub use memory::ObserverCommit;
pub use types::*;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use bs_domain::{Error, Result};

/// Handle to the brain's SQLite database. Cheap to share via `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists. Safe to call on every startup.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    /// An in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;

        schema::create_schema(&conn)?;
        schema::run_migrations(&conn);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let out = f(&tx)?;
        tx.commit().map_err(db_err)?;
        Ok(out)
    }
}

/// Current time as an ISO-8601 UTC string, the storage format for every
/// timestamp column.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

/// Truncate to at most `max` bytes without splitting a UTF-8 char.
pub(crate) fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Convert a JSON value into a SQLite value for dynamically built SET
/// clauses. Arrays/objects are stored as JSON text.
pub(crate) fn json_to_sql(v: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sv;
    match v {
        serde_json::Value::Null => Sv::Null,
        serde_json::Value::Bool(b) => Sv::Integer(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sv::Integer(i)
            } else {
                Sv::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Sv::Text(s.clone()),
        other => Sv::Text(other.to_string()),
    }
}
