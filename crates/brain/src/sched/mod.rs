//! Scheduler: persistent cron triggers that dispatch jobs.
//!
//! Rows live in the store; each enabled schedule gets an in-memory ticker
//! task that sleeps until the next cron occurrence and dispatches through
//! the normal dispatcher path (`source = "schedule:<id>"`). Repeated
//! failures put a schedule into exponential cooldown.

pub mod cron;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use bs_domain::trace::TraceEvent;
use bs_domain::{Error, Result};
use bs_store::{now_iso, JobType, ScheduleRow, Store};

use crate::jobs::dispatcher::{DispatchParams, Dispatcher};

use self::cron::{cron_next, validate_cron};

/// Cooldown after `n` consecutive failures: 2^(n-1) minutes, capped at 24 h.
fn cooldown_minutes(consecutive_failures: i64) -> i64 {
    let n = consecutive_failures.clamp(1, 11) as u32;
    (1i64 << (n - 1)).min(24 * 60)
}

#[derive(Debug, Clone)]
pub struct CreateSchedule {
    pub name: String,
    pub schedule: String,
    pub job_type: JobType,
    pub config: Value,
    pub enabled: bool,
}

pub struct Scheduler {
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    tickers: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            tickers: Mutex::new(HashMap::new()),
        }
    }

    /// Read every row and register tickers for the enabled ones.
    pub fn load_at_startup(&self) -> Result<usize> {
        let schedules = self.store.list_schedules()?;
        let mut registered = 0usize;
        for schedule in &schedules {
            if schedule.enabled {
                self.register_ticker(schedule.id.clone());
                registered += 1;
            }
        }
        tracing::info!(total = schedules.len(), registered, "schedules loaded");
        Ok(registered)
    }

    pub fn list(&self) -> Result<Vec<ScheduleRow>> {
        self.store.list_schedules()
    }

    pub fn get(&self, id: &str) -> Result<Option<ScheduleRow>> {
        self.store.get_schedule(id)
    }

    pub fn create(&self, params: CreateSchedule) -> Result<ScheduleRow> {
        validate_cron(&params.schedule)?;
        let row = ScheduleRow {
            id: Uuid::new_v4().to_string(),
            name: params.name,
            schedule: params.schedule,
            job_type: params.job_type,
            config: params.config,
            enabled: params.enabled,
            last_run_at: None,
            last_status: None,
            last_output: None,
            consecutive_failures: 0,
            cooldown_until: None,
            created_at: now_iso(),
            updated_at: now_iso(),
        };
        self.store.insert_schedule(&row)?;
        if row.enabled {
            self.register_ticker(row.id.clone());
        }
        Ok(row)
    }

    /// Partial update. The ticker is re-registered to pick up cron or
    /// enablement changes.
    pub fn update(
        &self,
        id: &str,
        updates: &[(String, Value)],
    ) -> Result<Option<ScheduleRow>> {
        if let Some((_, cron_value)) = updates.iter().find(|(col, _)| col == "schedule") {
            if let Some(expr) = cron_value.as_str() {
                validate_cron(expr)?;
            }
        }
        if !self.store.update_schedule_row(id, updates)? {
            return Ok(None);
        }
        self.cancel_ticker(id);
        let row = self.store.get_schedule(id)?;
        if let Some(row) = &row {
            if row.enabled {
                self.register_ticker(row.id.clone());
            }
        }
        Ok(row)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.cancel_ticker(id);
        self.store.delete_schedule(id)
    }

    /// Manual one-shot fire. Returns the dispatched job id.
    pub async fn trigger(&self, id: &str) -> Result<String> {
        fire_schedule(&self.store, &self.dispatcher, id).await
    }

    /// Cancel all tickers (shutdown path).
    pub fn shutdown(&self) {
        let mut tickers = self.tickers.lock();
        for (_, handle) in tickers.drain() {
            handle.abort();
        }
    }

    fn register_ticker(&self, id: String) {
        let store = self.store.clone();
        let dispatcher = self.dispatcher.clone();
        let ticker_id = id.clone();
        let handle = tokio::spawn(async move {
            run_ticker(store, dispatcher, ticker_id).await;
        });
        if let Some(previous) = self.tickers.lock().insert(id, handle) {
            previous.abort();
        }
    }

    fn cancel_ticker(&self, id: &str) {
        if let Some(handle) = self.tickers.lock().remove(id) {
            handle.abort();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ticker and fire path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_ticker(store: Arc<Store>, dispatcher: Arc<Dispatcher>, id: String) {
    loop {
        let row = match store.get_schedule(&id) {
            Ok(Some(row)) if row.enabled => row,
            Ok(_) => break,
            Err(e) => {
                tracing::warn!(schedule_id = %id, error = %e, "ticker read failed, stopping");
                break;
            }
        };

        let now = Utc::now();
        let Some(next) = cron_next(&row.schedule, &now) else {
            tracing::warn!(schedule_id = %id, cron = %row.schedule, "no next occurrence");
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        // Re-read: the schedule may have been disabled or deleted mid-sleep.
        let row = match store.get_schedule(&id) {
            Ok(Some(row)) if row.enabled => row,
            _ => break,
        };
        if let Some(cooldown) = &row.cooldown_until {
            if cooldown.as_str() > now_iso().as_str() {
                tracing::debug!(schedule_id = %id, until = %cooldown, "in cooldown, skipping fire");
                continue;
            }
        }

        if let Err(e) = fire_schedule(&store, &dispatcher, &id).await {
            tracing::warn!(schedule_id = %id, error = %e, "scheduled fire failed");
        }
    }
}

/// Dispatch one run of a schedule and record the outcome on its row.
pub(crate) async fn fire_schedule(
    store: &Arc<Store>,
    dispatcher: &Arc<Dispatcher>,
    id: &str,
) -> Result<String> {
    let row = store
        .get_schedule(id)?
        .ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;

    let config = &row.config;
    let params = DispatchParams {
        job_type: row.job_type,
        source: format!("schedule:{id}"),
        job: config.get("job").and_then(|v| v.as_str()).map(String::from),
        command: config
            .get("command")
            .and_then(|v| v.as_str())
            .map(String::from),
        url: config.get("url").and_then(|v| v.as_str()).map(String::from),
        method: config
            .get("method")
            .and_then(|v| v.as_str())
            .map(String::from),
        headers: config
            .get("headers")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        vars: config.get("vars").cloned(),
        timeout_secs: config.get("timeout_secs").and_then(|v| v.as_u64()),
    };

    match dispatcher.dispatch(params).await {
        Ok(dispatch) => {
            TraceEvent::ScheduleFired {
                schedule_id: id.to_string(),
                job_id: dispatch.job_id.clone(),
            }
            .emit();
            store.update_schedule_row(
                id,
                &[
                    ("last_run_at".to_string(), serde_json::json!(now_iso())),
                    ("last_status".to_string(), serde_json::json!("dispatched")),
                    (
                        "last_output".to_string(),
                        serde_json::json!(format!("job {}", dispatch.job_id)),
                    ),
                    ("consecutive_failures".to_string(), serde_json::json!(0)),
                    ("cooldown_until".to_string(), serde_json::Value::Null),
                ],
            )?;
            Ok(dispatch.job_id)
        }
        Err(e) => {
            let failures = row.consecutive_failures + 1;
            let cooldown =
                Utc::now() + chrono::Duration::minutes(cooldown_minutes(failures));
            store.update_schedule_row(
                id,
                &[
                    ("last_run_at".to_string(), serde_json::json!(now_iso())),
                    ("last_status".to_string(), serde_json::json!("failed")),
                    ("last_output".to_string(), serde_json::json!(e.to_string())),
                    (
                        "consecutive_failures".to_string(),
                        serde_json::json!(failures),
                    ),
                    (
                        "cooldown_until".to_string(),
                        serde_json::json!(
                            cooldown.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                        ),
                    ),
                ],
            )?;
            Err(e)
        }
    }
}
