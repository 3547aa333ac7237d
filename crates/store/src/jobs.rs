//! Job rows. Created by the dispatcher, mutated only by the status
//! subscriber, never deleted.

use rusqlite::{params, OptionalExtension, Row};

use bs_domain::{Error, Result};

use crate::{db_err, now_iso, JobRow, JobStatus, JobType, Store};

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    let job_type: String = row.get("job_type")?;
    let status: String = row.get("status")?;
    let input: String = row.get("input")?;
    Ok(JobRow {
        job_id: row.get("job_id")?,
        job_type: JobType::parse(&job_type).unwrap_or(JobType::Command),
        source: row.get("source")?,
        input: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Dispatched),
        worker_id: row.get("worker_id")?,
        result: row.get("result")?,
        error: row.get("error")?,
        duration_ms: row.get("duration_ms")?,
        trace_id: row.get("trace_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    pub fn insert_job(&self, job: &JobRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, job_type, source, input, status, worker_id,
                                   result, error, duration_ms, trace_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    job.job_id,
                    job.job_type.as_str(),
                    job.source,
                    job.input.to_string(),
                    job.status.as_str(),
                    job.worker_id,
                    job.result,
                    job.error,
                    job.duration_ms,
                    job.trace_id,
                    job.created_at,
                    job.updated_at,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM jobs WHERE job_id = ?1",
                params![job_id],
                row_to_job,
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<JobRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_job)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    /// Apply a status update, enforcing monotonicity: a terminal row is
    /// immutable, and a status may never move backwards. Returns `true` iff
    /// the row changed.
    pub fn apply_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        worker_id: Option<&str>,
        result: Option<&str>,
        error: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<bool> {
        self.with_tx(|tx| {
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM jobs WHERE job_id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            let current = match current {
                Some(s) => JobStatus::parse(&s)
                    .ok_or_else(|| Error::Store(format!("corrupt status '{s}'")))?,
                None => return Err(Error::NotFound(format!("job {job_id}"))),
            };

            if current.is_terminal() || status.rank() <= current.rank() {
                tracing::debug!(
                    job_id,
                    current = current.as_str(),
                    incoming = status.as_str(),
                    "ignoring non-monotonic job status update"
                );
                return Ok(false);
            }

            tx.execute(
                "UPDATE jobs
                 SET status = ?2,
                     worker_id = COALESCE(?3, worker_id),
                     result = COALESCE(?4, result),
                     error = COALESCE(?5, error),
                     duration_ms = COALESCE(?6, duration_ms),
                     updated_at = ?7
                 WHERE job_id = ?1",
                params![
                    job_id,
                    status.as_str(),
                    worker_id,
                    result,
                    error,
                    duration_ms,
                    now_iso(),
                ],
            )
            .map_err(db_err)?;
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> JobRow {
        JobRow {
            job_id: id.into(),
            job_type: JobType::Command,
            source: "test".into(),
            input: serde_json::json!({"command": "echo hi"}),
            status: JobStatus::Dispatched,
            worker_id: None,
            result: None,
            error: None,
            duration_ms: None,
            trace_id: Some("t1".into()),
            created_at: now_iso(),
            updated_at: now_iso(),
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.insert_job(&job("j1")).unwrap();
        let got = store.get_job("j1").unwrap().unwrap();
        assert_eq!(got.status, JobStatus::Dispatched);
        assert_eq!(got.trace_id.as_deref(), Some("t1"));
        assert_eq!(got.input["command"], "echo hi");
    }

    #[test]
    fn status_progresses_monotonically() {
        let store = Store::open_in_memory().unwrap();
        store.insert_job(&job("j1")).unwrap();

        assert!(store
            .apply_job_status("j1", JobStatus::Received, Some("w1"), None, None, None)
            .unwrap());
        assert!(store
            .apply_job_status("j1", JobStatus::Running, Some("w1"), None, None, None)
            .unwrap());
        // Backwards update ignored.
        assert!(!store
            .apply_job_status("j1", JobStatus::Received, Some("w2"), None, None, None)
            .unwrap());

        assert!(store
            .apply_job_status("j1", JobStatus::Completed, Some("w1"), Some("ok"), None, Some(42))
            .unwrap());

        // Terminal rows are immutable.
        assert!(!store
            .apply_job_status("j1", JobStatus::Failed, Some("w1"), None, Some("boom"), Some(1))
            .unwrap());

        let got = store.get_job("j1").unwrap().unwrap();
        assert_eq!(got.status, JobStatus::Completed);
        assert_eq!(got.result.as_deref(), Some("ok"));
        assert_eq!(got.duration_ms, Some(42));
        assert!(got.error.is_none());
    }

    #[test]
    fn unknown_job_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .apply_job_status("missing", JobStatus::Running, None, None, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn list_orders_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let mut a = job("a");
        a.created_at = "2026-01-01T00:00:00Z".into();
        let mut b = job("b");
        b.created_at = "2026-01-02T00:00:00Z".into();
        store.insert_job(&a).unwrap();
        store.insert_job(&b).unwrap();
        let jobs = store.list_jobs(10).unwrap();
        assert_eq!(jobs[0].job_id, "b");
        assert_eq!(jobs[1].job_id, "a");
    }
}
