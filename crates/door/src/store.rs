//! Gateway-side SQLite store for door-policy entries and pairing codes.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use bs_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderStatus {
    Pending,
    Approved,
    Blocked,
}

impl SenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderStatus::Pending => "pending",
            SenderStatus::Approved => "approved",
            SenderStatus::Blocked => "blocked",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SenderStatus::Pending),
            "approved" => Some(SenderStatus::Approved),
            "blocked" => Some(SenderStatus::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorPolicyEntry {
    pub platform: String,
    pub sender_id: String,
    pub status: SenderStatus,
    pub paired_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingChallenge {
    pub code: String,
    pub platform: Option<String>,
    pub expires_at: String,
    pub created_at: String,
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<DoorPolicyEntry> {
    let status: String = row.get("status")?;
    Ok(DoorPolicyEntry {
        platform: row.get("platform")?,
        sender_id: row.get("sender_id")?,
        status: SenderStatus::parse(&status).unwrap_or(SenderStatus::Pending),
        paired_at: row.get("paired_at")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_challenge(row: &Row<'_>) -> rusqlite::Result<PairingChallenge> {
    Ok(PairingChallenge {
        code: row.get("code")?,
        platform: row.get("platform")?,
        expires_at: row.get("expires_at")?,
        created_at: row.get("created_at")?,
    })
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Handle to `gateway.db`.
pub struct DoorStore {
    conn: Mutex<Connection>,
}

impl DoorStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS door_policy (
                platform    TEXT NOT NULL,
                sender_id   TEXT NOT NULL,
                status      TEXT NOT NULL,
                paired_at   TEXT,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (platform, sender_id)
            );
            CREATE TABLE IF NOT EXISTS pairing_challenges (
                code        TEXT PRIMARY KEY,
                platform    TEXT,
                expires_at  TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );",
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Policy entries ─────────────────────────────────────────────

    pub fn get_entry(&self, platform: &str, sender_id: &str) -> Result<Option<DoorPolicyEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM door_policy WHERE platform = ?1 AND sender_id = ?2",
            params![platform, sender_id],
            row_to_entry,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn set_status(
        &self,
        platform: &str,
        sender_id: &str,
        status: SenderStatus,
        paired: bool,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let paired_at = paired.then(now_iso);
        conn.execute(
            "INSERT INTO door_policy (platform, sender_id, status, paired_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(platform, sender_id)
             DO UPDATE SET status = excluded.status,
                           paired_at = COALESCE(excluded.paired_at, paired_at)",
            params![platform, sender_id, status.as_str(), paired_at, now_iso()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// The earliest-approved sender, if any (the landlord).
    pub fn first_approved(&self) -> Result<Option<DoorPolicyEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM door_policy WHERE status = 'approved'
             ORDER BY paired_at, created_at LIMIT 1",
            [],
            row_to_entry,
        )
        .optional()
        .map_err(db_err)
    }

    // ── Pairing challenges ─────────────────────────────────────────

    pub fn purge_expired_challenges(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM pairing_challenges WHERE expires_at < ?1",
            params![now_iso()],
        )
        .map_err(db_err)
    }

    pub fn active_challenge_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM pairing_challenges WHERE expires_at >= ?1",
            params![now_iso()],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    pub fn insert_challenge(&self, challenge: &PairingChallenge) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pairing_challenges (code, platform, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                challenge.code,
                challenge.platform,
                challenge.expires_at,
                challenge.created_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_challenge(&self, code: &str) -> Result<Option<PairingChallenge>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM pairing_challenges WHERE code = ?1",
            params![code],
            row_to_challenge,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn delete_challenge(&self, code: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "DELETE FROM pairing_challenges WHERE code = ?1",
                params![code],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_upsert_keeps_paired_at() {
        let store = DoorStore::open_in_memory().unwrap();
        store
            .set_status("telegram", "X", SenderStatus::Approved, true)
            .unwrap();
        let paired_at = store
            .get_entry("telegram", "X")
            .unwrap()
            .unwrap()
            .paired_at
            .unwrap();

        // A later status flip must not erase the pairing timestamp.
        store
            .set_status("telegram", "X", SenderStatus::Blocked, false)
            .unwrap();
        let entry = store.get_entry("telegram", "X").unwrap().unwrap();
        assert_eq!(entry.status, SenderStatus::Blocked);
        assert_eq!(entry.paired_at.as_deref(), Some(paired_at.as_str()));
    }

    #[test]
    fn expired_challenges_are_purged() {
        let store = DoorStore::open_in_memory().unwrap();
        store
            .insert_challenge(&PairingChallenge {
                code: "OLDCODE1".into(),
                platform: None,
                expires_at: "2000-01-01T00:00:00.000Z".into(),
                created_at: "2000-01-01T00:00:00.000Z".into(),
            })
            .unwrap();
        assert_eq!(store.active_challenge_count().unwrap(), 0);
        assert_eq!(store.purge_expired_challenges().unwrap(), 1);
        assert!(store.get_challenge("OLDCODE1").unwrap().is_none());
    }
}
