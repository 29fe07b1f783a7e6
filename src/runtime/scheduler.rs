/// Cron schedule service
///
/// Schedules live apart from workflow definitions: each names a workflow, a cron
/// expression and an IANA timezone. A repeated tokio-cron-scheduler job polls
/// `tick`, which starts a run for every enabled schedule whose `next_run` has
/// passed and then moves `next_run` past the current instant. Missed slots are
/// never back-filled.

use crate::error::{EngineError, EngineResult};
use crate::runtime::engine::{Engine, RunOutcome};
use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{sqlite::SqlitePool, Row};
use std::{
    collections::HashMap,
    str::FromStr,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub workflow_name: String,
    pub cron_expression: String,
    pub timezone: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Body of a create-schedule request
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub workflow_name: String,
    #[serde(alias = "cron")]
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

impl ScheduleRequest {
    pub fn new(workflow_name: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            cron_expression: cron_expression.into(),
            timezone: default_timezone(),
            enabled: true,
        }
    }

    pub fn in_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}

/// Parse a 5, 6 or 7 field expression or an `@` shorthand
///
/// Five-field expressions get a leading `0` seconds field.
pub fn parse_cron(expression: &str) -> EngineResult<cron::Schedule> {
    let trimmed = expression.trim();
    let normalized = if trimmed.starts_with('@') {
        trimmed.to_string()
    } else {
        match trimmed.split_whitespace().count() {
            5 => format!("0 {}", trimmed),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(EngineError::InvalidSchedule(format!(
                    "cron expression '{}' has {} fields, expected 5, 6 or 7",
                    trimmed, n
                )))
            }
        }
    };

    cron::Schedule::from_str(&normalized)
        .map_err(|e| EngineError::InvalidSchedule(format!("invalid cron expression '{}': {}", trimmed, e)))
}

pub fn parse_timezone(name: &str) -> EngineResult<Tz> {
    Tz::from_str(name).map_err(|e| EngineError::InvalidSchedule(format!("unknown timezone '{}': {}", name, e)))
}

/// First fire time strictly after `instant`
fn next_after(cron: &cron::Schedule, tz: Tz, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.after(&instant.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

struct ScheduleEntry {
    schedule: Schedule,
    cron: cron::Schedule,
    tz: Tz,
}

impl ScheduleEntry {
    fn parse(schedule: Schedule) -> EngineResult<Self> {
        let cron = parse_cron(&schedule.cron_expression)?;
        let tz = parse_timezone(&schedule.timezone)?;
        Ok(Self { schedule, cron, tz })
    }

    fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_after(&self.cron, self.tz, instant)
    }
}

pub struct SchedulerService {
    engine: Engine,
    entries: RwLock<HashMap<String, ScheduleEntry>>,
    storage: Option<ScheduleStorage>,
    poll_interval: Duration,
    jobs: RwLock<Option<JobScheduler>>,
}

impl SchedulerService {
    pub fn new(engine: Engine, storage: Option<ScheduleStorage>) -> Self {
        Self {
            engine,
            entries: RwLock::new(HashMap::new()),
            storage,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jobs: RwLock::new(None),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Reload persisted schedules; unparseable rows are skipped
    pub async fn load_from_storage(&self) -> EngineResult<usize> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };

        let schedules = storage.load_all().await?;
        let mut entries = self.entries.write().await;
        for schedule in schedules {
            let id = schedule.id.clone();
            match ScheduleEntry::parse(schedule) {
                Ok(entry) => {
                    entries.insert(id, entry);
                }
                Err(e) => tracing::warn!("⚠️ Skipping stored schedule {}: {}", id, e),
            }
        }

        tracing::info!("📂 Loaded {} schedules from storage", entries.len());
        Ok(entries.len())
    }

    pub async fn create_schedule(&self, request: ScheduleRequest) -> EngineResult<Schedule> {
        self.create_schedule_at(request, Utc::now()).await
    }

    /// Register a schedule as if created at `now`
    pub async fn create_schedule_at(&self, request: ScheduleRequest, now: DateTime<Utc>) -> EngineResult<Schedule> {
        if self.engine.workflows().get_workflow(&request.workflow_name).is_none() {
            return Err(EngineError::WorkflowNotFound(request.workflow_name));
        }

        let cron = parse_cron(&request.cron_expression)?;
        let tz = parse_timezone(&request.timezone)?;
        let schedule = Schedule {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_name: request.workflow_name,
            cron_expression: request.cron_expression,
            timezone: request.timezone,
            enabled: request.enabled,
            next_run: next_after(&cron, tz, now),
            last_run: None,
            created_at: now,
        };

        self.persist(&schedule).await?;
        self.entries.write().await.insert(
            schedule.id.clone(),
            ScheduleEntry {
                schedule: schedule.clone(),
                cron,
                tz,
            },
        );

        tracing::info!(
            "⏰ Scheduled workflow {} ({} {}), next run {:?}",
            schedule.workflow_name,
            schedule.cron_expression,
            schedule.timezone,
            schedule.next_run
        );
        Ok(schedule)
    }

    pub async fn delete_schedule(&self, id: &str) -> EngineResult<()> {
        if self.entries.write().await.remove(id).is_none() {
            return Err(EngineError::ScheduleNotFound(id.to_string()));
        }
        if let Some(storage) = &self.storage {
            storage.delete(id).await?;
        }
        tracing::info!("🗑️ Removed schedule {}", id);
        Ok(())
    }

    pub async fn enable(&self, id: &str) -> EngineResult<Schedule> {
        self.enable_at(id, Utc::now()).await
    }

    /// Re-enable and recompute `next_run` from `now`
    pub async fn enable_at(&self, id: &str, now: DateTime<Utc>) -> EngineResult<Schedule> {
        let schedule = self
            .modify(id, |entry| {
                entry.schedule.enabled = true;
                entry.schedule.next_run = entry.next_after(now);
            })
            .await?;
        self.persist(&schedule).await?;
        Ok(schedule)
    }

    pub async fn disable(&self, id: &str) -> EngineResult<Schedule> {
        let schedule = self
            .modify(id, |entry| entry.schedule.enabled = false)
            .await?;
        self.persist(&schedule).await?;
        Ok(schedule)
    }

    pub async fn get_schedule(&self, id: &str) -> EngineResult<Schedule> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|entry| entry.schedule.clone())
            .ok_or_else(|| EngineError::ScheduleNotFound(id.to_string()))
    }

    /// Oldest first
    pub async fn list_schedules(&self) -> Vec<Schedule> {
        let mut schedules: Vec<Schedule> = self
            .entries
            .read()
            .await
            .values()
            .map(|entry| entry.schedule.clone())
            .collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        schedules
    }

    pub async fn tick(&self) -> Vec<String> {
        self.tick_at(Utc::now()).await
    }

    /// Start runs for every due schedule; returns the started run ids
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let due: Vec<(Schedule, DateTime<Utc>)> = {
            let mut entries = self.entries.write().await;
            let mut due = Vec::new();
            for entry in entries.values_mut() {
                let Some(scheduled_at) = entry.schedule.next_run else {
                    continue;
                };
                if !entry.schedule.enabled || scheduled_at > now {
                    continue;
                }
                entry.schedule.last_run = Some(now);
                entry.schedule.next_run = entry.next_after(now);
                due.push((entry.schedule.clone(), scheduled_at));
            }
            due
        };

        let mut started = Vec::with_capacity(due.len());
        for (schedule, scheduled_at) in due {
            if let Err(e) = self.persist(&schedule).await {
                tracing::error!("❌ Failed to persist schedule {}: {}", schedule.id, e);
            }

            let payload = json!({
                "triggered": "schedule",
                "scheduledAt": scheduled_at.to_rfc3339(),
                "scheduleId": schedule.id,
            });
            match self.engine.start_workflow(&schedule.workflow_name, payload).await {
                Ok(run_id) => {
                    tracing::info!("🔔 Schedule {} started run {} of {}", schedule.id, run_id, schedule.workflow_name);
                    self.watch_run(schedule.id.clone(), run_id.clone());
                    started.push(run_id);
                }
                Err(e) => {
                    tracing::error!("❌ Schedule {} could not start {}: {}", schedule.id, schedule.workflow_name, e);
                }
            }
        }
        started
    }

    /// Start the polling job
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let scheduler = JobScheduler::new().await?;
        let service: Weak<Self> = Arc::downgrade(self);

        let job = Job::new_repeated_async(self.poll_interval, move |_uuid, _lock| {
            let service = service.clone();
            Box::pin(async move {
                if let Some(service) = service.upgrade() {
                    service.tick().await;
                }
            })
        })?;
        scheduler.add(job).await?;
        scheduler.start().await?;

        *self.jobs.write().await = Some(scheduler);
        tracing::info!("⏰ Scheduler polling every {:?}", self.poll_interval);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Some(mut scheduler) = self.jobs.write().await.take() {
            scheduler.shutdown().await?;
            tracing::info!("⏹️ Scheduler stopped");
        }
        Ok(())
    }

    async fn modify(&self, id: &str, f: impl FnOnce(&mut ScheduleEntry)) -> EngineResult<Schedule> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::ScheduleNotFound(id.to_string()))?;
        f(entry);
        Ok(entry.schedule.clone())
    }

    async fn persist(&self, schedule: &Schedule) -> EngineResult<()> {
        if let Some(storage) = &self.storage {
            storage.save(schedule).await?;
        }
        Ok(())
    }

    /// Log the outcome of a scheduled run; failures never disable the schedule
    fn watch_run(&self, schedule_id: String, run_id: String) {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            match engine.wait_for_run(&run_id).await {
                Ok(RunOutcome::Failed { failed_step, error, .. }) => {
                    tracing::error!(
                        "❌ Scheduled run {} (schedule {}) failed at {:?}: {}",
                        run_id,
                        schedule_id,
                        failed_step,
                        error
                    );
                }
                Ok(outcome) => {
                    tracing::debug!("✅ Scheduled run {} finished: {}", run_id, outcome.status());
                }
                Err(e) => tracing::warn!("⚠️ Lost track of scheduled run {}: {}", run_id, e),
            }
        });
    }
}

/// SQLite persistence for schedules
#[derive(Debug, Clone)]
pub struct ScheduleStorage {
    pool: SqlitePool,
}

impl ScheduleStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                timezone TEXT NOT NULL,
                enabled BOOLEAN NOT NULL,
                next_run TEXT,
                last_run TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (id, workflow_name, cron_expression, timezone, enabled, next_run, last_run, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                next_run = excluded.next_run,
                last_run = excluded.last_run
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.workflow_name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.enabled)
        .bind(schedule.next_run.map(|t| t.to_rfc3339()))
        .bind(schedule.last_run.map(|t| t.to_rfc3339()))
        .bind(schedule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn load_all(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(
            "SELECT id, workflow_name, cron_expression, timezone, enabled, next_run, last_run, created_at \
             FROM schedules ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut schedules = Vec::with_capacity(rows.len());
        for row in rows {
            let next_run: Option<String> = row.try_get("next_run")?;
            let last_run: Option<String> = row.try_get("last_run")?;
            let created_at: String = row.try_get("created_at")?;
            schedules.push(Schedule {
                id: row.try_get("id")?,
                workflow_name: row.try_get("workflow_name")?,
                cron_expression: row.try_get("cron_expression")?,
                timezone: row.try_get("timezone")?,
                enabled: row.try_get("enabled")?,
                next_run: next_run.as_deref().map(parse_timestamp).transpose()?,
                last_run: last_run.as_deref().map(parse_timestamp).transpose()?,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(schedules)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
