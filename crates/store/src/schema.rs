//! Schema creation and additive migrations.
//!
//! `create_schema` is idempotent and runs on every startup. Migrations are
//! `ALTER TABLE ... ADD COLUMN` statements that are attempted blindly; a
//! "duplicate column name" failure means the column already exists and is
//! silently tolerated.

use rusqlite::Connection;

use bs_domain::Result;

use crate::db_err;

pub(crate) fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            job_id       TEXT PRIMARY KEY,
            job_type     TEXT NOT NULL,
            source       TEXT NOT NULL,
            input        TEXT NOT NULL,
            status       TEXT NOT NULL,
            worker_id    TEXT,
            result       TEXT,
            error        TEXT,
            duration_ms  INTEGER,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_created
            ON jobs(created_at DESC);

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            title       TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            role             TEXT NOT NULL,
            content          TEXT NOT NULL,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conv
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS memory_state (
            conversation_id             TEXT PRIMARY KEY
                                        REFERENCES conversations(id),
            observed_cursor_message_id  INTEGER,
            unobserved_token_count      INTEGER NOT NULL DEFAULT 0,
            observation_token_count     INTEGER NOT NULL DEFAULT 0,
            last_observer_run           TEXT,
            last_reflector_run          TEXT,
            lock_version                INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS observations (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id      TEXT NOT NULL REFERENCES conversations(id),
            created_at           TEXT NOT NULL,
            text                 TEXT NOT NULL,
            token_count          INTEGER NOT NULL,
            tags                 TEXT,
            source_message_from  INTEGER NOT NULL,
            source_message_to    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS observation_log (
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            version          INTEGER NOT NULL,
            text             TEXT NOT NULL,
            token_count      INTEGER NOT NULL,
            created_at       TEXT NOT NULL,
            PRIMARY KEY (conversation_id, version)
        );
        CREATE INDEX IF NOT EXISTS idx_obslog_conv
            ON observation_log(conversation_id, version DESC);

        CREATE TABLE IF NOT EXISTS reflections (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id   TEXT NOT NULL REFERENCES conversations(id),
            replaced_version  INTEGER NOT NULL,
            created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS skills (
            id                   TEXT PRIMARY KEY,
            name                 TEXT NOT NULL,
            version              TEXT NOT NULL,
            description          TEXT NOT NULL DEFAULT '',
            tier                 INTEGER NOT NULL,
            transport            TEXT,
            enabled              INTEGER NOT NULL DEFAULT 1,
            config               TEXT NOT NULL DEFAULT '{}',
            stdio_command        TEXT,
            stdio_args           TEXT NOT NULL DEFAULT '[]',
            http_url             TEXT,
            instruction_path     TEXT,
            instruction_content  TEXT,
            owner                TEXT NOT NULL DEFAULT 'system'
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            schedule    TEXT NOT NULL,
            job_type    TEXT NOT NULL,
            config      TEXT NOT NULL DEFAULT '{}',
            enabled     INTEGER NOT NULL DEFAULT 1,
            last_run_at TEXT,
            last_status TEXT,
            last_output TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_schedules_enabled
            ON schedules(enabled);

        CREATE TABLE IF NOT EXISTS handoff_notes (
            id                    TEXT PRIMARY KEY,
            from_version          TEXT NOT NULL,
            to_version            TEXT,
            active_conversations  TEXT NOT NULL,
            pending_schedules     TEXT NOT NULL,
            agent_notes           TEXT,
            created_at            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS secrets (
            name        TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )
    .map_err(db_err)
}

/// Columns added after the initial schema shipped. Each is attempted on
/// every startup; already-present columns fail with "duplicate column name"
/// which is expected and ignored.
const MIGRATIONS: &[&str] = &[
    "ALTER TABLE jobs ADD COLUMN trace_id TEXT",
    "ALTER TABLE skills ADD COLUMN tags TEXT",
    "ALTER TABLE schedules ADD COLUMN consecutive_failures INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE schedules ADD COLUMN cooldown_until TEXT",
];

pub(crate) fn run_migrations(conn: &Connection) {
    for stmt in MIGRATIONS {
        if let Err(e) = conn.execute(stmt, []) {
            let msg = e.to_string();
            if !msg.contains("duplicate column name") {
                tracing::warn!(stmt, error = %msg, "schema migration failed");
            }
        }
    }
}
