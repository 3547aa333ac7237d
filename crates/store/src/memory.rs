//! Memory state, observations, and the versioned observation log.

use rusqlite::{params, OptionalExtension, Row};

use bs_domain::{Error, Result};

use crate::{db_err, json_to_sql, now_iso, MemoryStateRow, ObservationLogRow, ObservationRow, Store};

/// Everything an observer pass writes, committed in one transaction.
#[derive(Debug, Clone)]
pub struct ObserverCommit<'a> {
    pub conversation_id: &'a str,
    pub expected_lock_version: i64,
    pub observation_text: &'a str,
    pub observation_tokens: i64,
    pub tags: Option<&'a str>,
    pub source_from: i64,
    pub source_to: i64,
    pub log_version: i64,
    pub log_text: &'a str,
    pub log_tokens: i64,
    /// Estimated tokens of the observed message range, subtracted from the
    /// unobserved counter.
    pub observed_tokens: i64,
}

/// Columns `update_memory_state` may touch. Dynamic SET clauses are built
/// exclusively from this list; anything else is rejected.
const MEMORY_STATE_COLUMNS: &[&str] = &[
    "observed_cursor_message_id",
    "unobserved_token_count",
    "observation_token_count",
    "last_observer_run",
    "last_reflector_run",
];

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<MemoryStateRow> {
    Ok(MemoryStateRow {
        conversation_id: row.get("conversation_id")?,
        observed_cursor_message_id: row.get("observed_cursor_message_id")?,
        unobserved_token_count: row.get("unobserved_token_count")?,
        observation_token_count: row.get("observation_token_count")?,
        last_observer_run: row.get("last_observer_run")?,
        last_reflector_run: row.get("last_reflector_run")?,
        lock_version: row.get("lock_version")?,
    })
}

fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<ObservationRow> {
    Ok(ObservationRow {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        created_at: row.get("created_at")?,
        text: row.get("text")?,
        token_count: row.get("token_count")?,
        tags: row.get("tags")?,
        source_message_from: row.get("source_message_from")?,
        source_message_to: row.get("source_message_to")?,
    })
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<ObservationLogRow> {
    Ok(ObservationLogRow {
        conversation_id: row.get("conversation_id")?,
        version: row.get("version")?,
        text: row.get("text")?,
        token_count: row.get("token_count")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn memory_state(&self, conversation_id: &str) -> Result<Option<MemoryStateRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM memory_state WHERE conversation_id = ?1",
                params![conversation_id],
                row_to_state,
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Compare-and-swap update of a memory-state row.
    ///
    /// Column names in `updates` are validated against the static allowlist;
    /// the update succeeds only when the row's `lock_version` still equals
    /// `expected_lock_version`, and a successful update increments it.
    /// Returns `true` iff the CAS won.
    pub fn update_memory_state(
        &self,
        conversation_id: &str,
        updates: &[(String, serde_json::Value)],
        expected_lock_version: i64,
    ) -> Result<bool> {
        if updates.is_empty() {
            return Err(Error::Validation("no memory-state updates given".into()));
        }
        let mut set_clauses = Vec::with_capacity(updates.len() + 1);
        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(updates.len() + 2);
        for (column, value) in updates {
            if !MEMORY_STATE_COLUMNS.contains(&column.as_str()) {
                return Err(Error::Validation(format!(
                    "memory_state column '{column}' is not updatable"
                )));
            }
            set_clauses.push(format!("{column} = ?{}", values.len() + 1));
            values.push(json_to_sql(value));
        }
        set_clauses.push("lock_version = lock_version + 1".to_string());

        let sql = format!(
            "UPDATE memory_state SET {} WHERE conversation_id = ?{} AND lock_version = ?{}",
            set_clauses.join(", "),
            values.len() + 1,
            values.len() + 2,
        );
        values.push(rusqlite::types::Value::Text(conversation_id.to_string()));
        values.push(rusqlite::types::Value::Integer(expected_lock_version));

        self.with_conn(|conn| {
            let changed = conn
                .execute(&sql, rusqlite::params_from_iter(values))
                .map_err(db_err)?;
            Ok(changed == 1)
        })
    }

    pub fn insert_observation(
        &self,
        conversation_id: &str,
        text: &str,
        token_count: i64,
        tags: Option<&str>,
        source_message_from: i64,
        source_message_to: i64,
    ) -> Result<ObservationRow> {
        let created_at = now_iso();
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO observations
                     (conversation_id, created_at, text, token_count, tags,
                      source_message_from, source_message_to)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation_id,
                    created_at,
                    text,
                    token_count,
                    tags,
                    source_message_from,
                    source_message_to,
                ],
            )
            .map_err(db_err)?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(ObservationRow {
            id,
            conversation_id: conversation_id.to_string(),
            created_at,
            text: text.to_string(),
            token_count,
            tags: tags.map(|t| t.to_string()),
            source_message_from,
            source_message_to,
        })
    }

    pub fn list_observations(&self, conversation_id: &str) -> Result<Vec<ObservationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM observations WHERE conversation_id = ?1
                     ORDER BY id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![conversation_id], row_to_observation)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    /// The active (highest-version) observation log, if any.
    pub fn latest_observation_log(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ObservationLogRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM observation_log WHERE conversation_id = ?1
                 ORDER BY version DESC LIMIT 1",
                params![conversation_id],
                row_to_log,
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Append (or overwrite, for idempotent retries) one log version.
    /// Older versions are retained.
    pub fn upsert_observation_log(
        &self,
        conversation_id: &str,
        version: i64,
        text: &str,
        token_count: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO observation_log
                     (conversation_id, version, text, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(conversation_id, version)
                 DO UPDATE SET text = excluded.text,
                               token_count = excluded.token_count",
                params![conversation_id, version, text, token_count, now_iso()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Commit a whole observer pass atomically, gated on the lock version.
    ///
    /// Either everything lands (observation row, new log version, cursor and
    /// counter updates) or, when another pass already bumped the lock
    /// version, nothing does and `false` comes back.
    pub fn commit_observer_pass(&self, commit: ObserverCommit<'_>) -> Result<bool> {
        self.with_tx(|tx| {
            let changed = tx
                .execute(
                    "UPDATE memory_state
                     SET observed_cursor_message_id = ?2,
                         unobserved_token_count = MAX(0, unobserved_token_count - ?3),
                         observation_token_count = observation_token_count + ?4,
                         last_observer_run = ?5,
                         lock_version = lock_version + 1
                     WHERE conversation_id = ?1 AND lock_version = ?6",
                    params![
                        commit.conversation_id,
                        commit.source_to,
                        commit.observed_tokens,
                        commit.observation_tokens,
                        now_iso(),
                        commit.expected_lock_version,
                    ],
                )
                .map_err(db_err)?;
            if changed != 1 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO observations
                     (conversation_id, created_at, text, token_count, tags,
                      source_message_from, source_message_to)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    commit.conversation_id,
                    now_iso(),
                    commit.observation_text,
                    commit.observation_tokens,
                    commit.tags,
                    commit.source_from,
                    commit.source_to,
                ],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO observation_log
                     (conversation_id, version, text, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(conversation_id, version)
                 DO UPDATE SET text = excluded.text,
                               token_count = excluded.token_count",
                params![
                    commit.conversation_id,
                    commit.log_version,
                    commit.log_text,
                    commit.log_tokens,
                    now_iso(),
                ],
            )
            .map_err(db_err)?;
            Ok(true)
        })
    }

    /// Commit a reflector pass atomically: record the replaced version,
    /// append the compressed log version, reset the observation counter.
    pub fn commit_reflector_pass(
        &self,
        conversation_id: &str,
        expected_lock_version: i64,
        replaced_version: i64,
        new_version: i64,
        new_text: &str,
        new_tokens: i64,
    ) -> Result<bool> {
        self.with_tx(|tx| {
            let changed = tx
                .execute(
                    "UPDATE memory_state
                     SET observation_token_count = ?2,
                         last_reflector_run = ?3,
                         lock_version = lock_version + 1
                     WHERE conversation_id = ?1 AND lock_version = ?4",
                    params![conversation_id, new_tokens, now_iso(), expected_lock_version],
                )
                .map_err(db_err)?;
            if changed != 1 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO reflections (conversation_id, replaced_version, created_at)
                 VALUES (?1, ?2, ?3)",
                params![conversation_id, replaced_version, now_iso()],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO observation_log
                     (conversation_id, version, text, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(conversation_id, version)
                 DO UPDATE SET text = excluded.text,
                               token_count = excluded.token_count",
                params![conversation_id, new_version, new_text, new_tokens, now_iso()],
            )
            .map_err(db_err)?;
            Ok(true)
        })
    }
}
