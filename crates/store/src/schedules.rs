//! Schedule rows. The scheduler keeps tickers in memory; this module is the
//! durable side (definitions plus last-run bookkeeping).

use rusqlite::{params, OptionalExtension, Row};

use bs_domain::{Error, Result};

use crate::{db_err, json_to_sql, now_iso, truncate_bytes, JobType, ScheduleRow, Store};

/// Longest `last_output` we keep, in bytes.
pub const MAX_LAST_OUTPUT_BYTES: usize = 1024;

/// Longest schedule name we accept.
pub const MAX_NAME_CHARS: usize = 200;

/// Columns `update_schedule_row` may touch.
const SCHEDULE_COLUMNS: &[&str] = &[
    "name",
    "schedule",
    "job_type",
    "config",
    "enabled",
    "last_run_at",
    "last_status",
    "last_output",
    "consecutive_failures",
    "cooldown_until",
];

fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<ScheduleRow> {
    let job_type: String = row.get("job_type")?;
    let config: String = row.get("config")?;
    Ok(ScheduleRow {
        id: row.get("id")?,
        name: row.get("name")?,
        schedule: row.get("schedule")?,
        job_type: JobType::parse(&job_type).unwrap_or(JobType::Command),
        config: serde_json::from_str(&config).unwrap_or(serde_json::json!({})),
        enabled: row.get::<_, i64>("enabled")? != 0,
        last_run_at: row.get("last_run_at")?,
        last_status: row.get("last_status")?,
        last_output: row.get("last_output")?,
        consecutive_failures: row.get("consecutive_failures")?,
        cooldown_until: row.get("cooldown_until")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    pub fn insert_schedule(&self, schedule: &ScheduleRow) -> Result<()> {
        if schedule.name.chars().count() > MAX_NAME_CHARS {
            return Err(Error::Validation(format!(
                "schedule name exceeds {MAX_NAME_CHARS} characters"
            )));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO schedules (id, name, schedule, job_type, config, enabled,
                                        last_run_at, last_status, last_output,
                                        consecutive_failures, cooldown_until,
                                        created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    schedule.id,
                    schedule.name,
                    schedule.schedule,
                    schedule.job_type.as_str(),
                    schedule.config.to_string(),
                    schedule.enabled as i64,
                    schedule.last_run_at,
                    schedule.last_status,
                    schedule
                        .last_output
                        .as_deref()
                        .map(|o| truncate_bytes(o, MAX_LAST_OUTPUT_BYTES)),
                    schedule.consecutive_failures,
                    schedule.cooldown_until,
                    schedule.created_at,
                    schedule.updated_at,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM schedules WHERE id = ?1",
                params![id],
                row_to_schedule,
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn list_schedules(&self) -> Result<Vec<ScheduleRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM schedules ORDER BY created_at")
                .map_err(db_err)?;
            let rows = stmt.query_map([], row_to_schedule).map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    pub fn list_enabled_schedules(&self) -> Result<Vec<ScheduleRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM schedules WHERE enabled = 1 ORDER BY created_at")
                .map_err(db_err)?;
            let rows = stmt.query_map([], row_to_schedule).map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    /// Partial update with an allowlisted dynamic SET clause. `last_output`
    /// is truncated to [`MAX_LAST_OUTPUT_BYTES`] before storage. Returns
    /// `false` when the schedule does not exist.
    pub fn update_schedule_row(
        &self,
        id: &str,
        updates: &[(String, serde_json::Value)],
    ) -> Result<bool> {
        if updates.is_empty() {
            return Err(Error::Validation("no schedule updates given".into()));
        }
        let mut set_clauses = Vec::with_capacity(updates.len() + 1);
        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(updates.len() + 1);
        for (column, value) in updates {
            if !SCHEDULE_COLUMNS.contains(&column.as_str()) {
                return Err(Error::Validation(format!(
                    "schedules column '{column}' is not updatable"
                )));
            }
            if column == "name" {
                if let Some(name) = value.as_str() {
                    if name.chars().count() > MAX_NAME_CHARS {
                        return Err(Error::Validation(format!(
                            "schedule name exceeds {MAX_NAME_CHARS} characters"
                        )));
                    }
                }
            }
            let value = if column == "last_output" {
                match value.as_str() {
                    Some(s) => serde_json::Value::String(truncate_bytes(s, MAX_LAST_OUTPUT_BYTES)),
                    None => value.clone(),
                }
            } else {
                value.clone()
            };
            set_clauses.push(format!("{column} = ?{}", values.len() + 1));
            values.push(json_to_sql(&value));
        }
        set_clauses.push(format!("updated_at = ?{}", values.len() + 1));
        values.push(rusqlite::types::Value::Text(now_iso()));

        let sql = format!(
            "UPDATE schedules SET {} WHERE id = ?{}",
            set_clauses.join(", "),
            values.len() + 1,
        );
        values.push(rusqlite::types::Value::Text(id.to_string()));

        self.with_conn(|conn| {
            let changed = conn
                .execute(&sql, rusqlite::params_from_iter(values))
                .map_err(db_err)?;
            Ok(changed == 1)
        })
    }

    pub fn delete_schedule(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM schedules WHERE id = ?1", params![id])
                .map_err(db_err)?;
            Ok(changed == 1)
        })
    }
}
