//! Scheduled-task lifecycle (spec §4.7 "Scheduled task", §6).
//!
//! Validation and per-user limits live here; the actual fire-on-cron
//! mechanism belongs to the durable runtime (out of scope per spec §1) and
//! is only invoked through this module's contract.

use std::collections::HashMap;

use async_trait::async_trait;
use orc_types::error::OrchestraError;
use orc_types::schedule::{Schedule, ScheduleExecution, ScheduleStatus};
use orc_types::task::TaskStatus;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("cron expression `{0}` must have exactly 5 space-separated fields")]
    WrongFieldCount(String),
    #[error("cron field `{field}` at position {position} is invalid: {reason}")]
    InvalidField { field: String, position: usize, reason: String },
    #[error("schedule interval shorter than the configured minimum of {0}s")]
    IntervalTooShort(u64),
    #[error("user `{user_id}` already has {count} schedules, at the configured cap of {cap}")]
    PerUserCapExceeded { user_id: String, count: usize, cap: u32 },
    #[error("schedule `{0}` not found")]
    NotFound(Uuid),
}

impl From<ScheduleError> for OrchestraError {
    fn from(err: ScheduleError) -> Self {
        OrchestraError::Validation(err.to_string())
    }
}

const FIELD_RANGES: [(usize, usize); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 7)];

/// Validates standard 5-field cron syntax (`minute hour day-of-month month
/// day-of-week`), accepting `*`, single values, ranges (`a-b`), steps
/// (`*/n` or `a-b/n`), and comma lists of any of those, each checked
/// against its field's valid range.
pub fn validate_cron(expr: &str) -> Result<(), ScheduleError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::WrongFieldCount(expr.to_string()));
    }
    for (position, (field, (min, max))) in fields.iter().zip(FIELD_RANGES).enumerate() {
        validate_field(field, min, max).map_err(|reason| ScheduleError::InvalidField {
            field: field.to_string(),
            position,
            reason,
        })?;
    }
    Ok(())
}

fn validate_field(field: &str, min: usize, max: usize) -> Result<(), String> {
    for part in field.split(',') {
        validate_field_part(part, min, max)?;
    }
    Ok(())
}

fn validate_field_part(part: &str, min: usize, max: usize) -> Result<(), String> {
    let (range_part, step_part) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };

    if let Some(step) = step_part {
        step.parse::<usize>().map_err(|_| format!("step `{step}` is not a number"))?;
    }

    if range_part == "*" {
        return Ok(());
    }

    if let Some((start, end)) = range_part.split_once('-') {
        let start: usize = start.parse().map_err(|_| format!("range start `{start}` is not a number"))?;
        let end: usize = end.parse().map_err(|_| format!("range end `{end}` is not a number"))?;
        if start > end {
            return Err(format!("range `{range_part}` has start greater than end"));
        }
        if start < min || end > max {
            return Err(format!("range `{range_part}` outside valid bounds {min}-{max}"));
        }
        return Ok(());
    }

    let value: usize = range_part.parse().map_err(|_| format!("value `{range_part}` is not a number"))?;
    if value < min || value > max {
        return Err(format!("value `{value}` outside valid bounds {min}-{max}"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ScheduleLimits {
    pub min_interval_secs: u64,
    pub max_schedules_per_user: u32,
}

impl Default for ScheduleLimits {
    fn default() -> Self {
        Self { min_interval_secs: 60, max_schedules_per_user: 50 }
    }
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn insert(&self, schedule: Schedule) -> Result<(), ScheduleError>;
    async fn get(&self, id: Uuid) -> Result<Schedule, ScheduleError>;
    async fn list_for_user(&self, user_id: &str) -> Vec<Schedule>;
    async fn update(&self, schedule: Schedule) -> Result<(), ScheduleError>;
    async fn record_execution(&self, execution: ScheduleExecution) -> Result<(), ScheduleError>;
}

#[derive(Default)]
pub struct InMemoryScheduleRepository {
    schedules: RwLock<HashMap<Uuid, Schedule>>,
    executions: RwLock<HashMap<Uuid, Vec<ScheduleExecution>>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn executions_for(&self, schedule_id: Uuid) -> Vec<ScheduleExecution> {
        self.executions.read().await.get(&schedule_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn insert(&self, schedule: Schedule) -> Result<(), ScheduleError> {
        self.schedules.write().await.insert(schedule.id, schedule);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Schedule, ScheduleError> {
        self.schedules.read().await.get(&id).cloned().ok_or(ScheduleError::NotFound(id))
    }

    async fn list_for_user(&self, user_id: &str) -> Vec<Schedule> {
        self.schedules
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.status != ScheduleStatus::Deleted)
            .cloned()
            .collect()
    }

    async fn update(&self, schedule: Schedule) -> Result<(), ScheduleError> {
        let mut schedules = self.schedules.write().await;
        if !schedules.contains_key(&schedule.id) {
            return Err(ScheduleError::NotFound(schedule.id));
        }
        schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn record_execution(&self, execution: ScheduleExecution) -> Result<(), ScheduleError> {
        self.executions.write().await.entry(execution.schedule_id).or_default().push(execution);
        Ok(())
    }
}

/// `create_schedule` (spec §6): validates the cron expression and the
/// per-user cap before ever touching the repository.
pub async fn create_schedule(
    repo: &dyn ScheduleRepository,
    limits: &ScheduleLimits,
    user_id: &str,
    tenant_id: &str,
    cron_expr: &str,
    task_template: HashMap<String, serde_json::Value>,
    max_budget_usd: f64,
) -> Result<Schedule, ScheduleError> {
    validate_cron(cron_expr)?;

    let existing = repo.list_for_user(user_id).await;
    if existing.len() >= limits.max_schedules_per_user as usize {
        return Err(ScheduleError::PerUserCapExceeded {
            user_id: user_id.to_string(),
            count: existing.len(),
            cap: limits.max_schedules_per_user,
        });
    }

    let now = chrono::Utc::now();
    let schedule = Schedule {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        tenant_id: tenant_id.to_string(),
        cron_expr: cron_expr.to_string(),
        task_template,
        max_budget_usd,
        status: ScheduleStatus::Active,
        created_at: now,
        updated_at: now,
    };
    repo.insert(schedule.clone()).await?;
    Ok(schedule)
}

pub async fn pause_schedule(repo: &dyn ScheduleRepository, id: Uuid) -> Result<(), ScheduleError> {
    set_status(repo, id, ScheduleStatus::Paused).await
}

pub async fn resume_schedule(repo: &dyn ScheduleRepository, id: Uuid) -> Result<(), ScheduleError> {
    set_status(repo, id, ScheduleStatus::Active).await
}

/// Soft delete (spec §6: "`delete` (soft)").
pub async fn delete_schedule(repo: &dyn ScheduleRepository, id: Uuid) -> Result<(), ScheduleError> {
    set_status(repo, id, ScheduleStatus::Deleted).await
}

async fn set_status(repo: &dyn ScheduleRepository, id: Uuid, status: ScheduleStatus) -> Result<(), ScheduleError> {
    let mut schedule = repo.get(id).await?;
    schedule.status = status;
    schedule.updated_at = chrono::Utc::now();
    repo.update(schedule).await
}

/// Records the outcome of one schedule fire (spec §4.7, §6).
pub async fn record_schedule_execution(
    repo: &dyn ScheduleRepository,
    schedule_id: Uuid,
    status: TaskStatus,
    cost_usd: f64,
    started_at: chrono::DateTime<chrono::Utc>,
) -> Result<(), ScheduleError> {
    repo.record_execution(ScheduleExecution {
        id: Uuid::new_v4(),
        schedule_id,
        status,
        cost_usd,
        started_at,
        completed_at: Some(chrono::Utc::now()),
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_cron_is_valid() {
        assert!(validate_cron("* * * * *").is_ok());
    }

    #[test]
    fn typical_daily_cron_is_valid() {
        assert!(validate_cron("30 9 * * 1-5").is_ok());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(matches!(validate_cron("* * *"), Err(ScheduleError::WrongFieldCount(_))));
    }

    #[test]
    fn out_of_range_minute_is_rejected() {
        assert!(validate_cron("60 * * * *").is_err());
    }

    #[test]
    fn step_syntax_is_accepted() {
        assert!(validate_cron("*/15 * * * *").is_ok());
    }

    #[tokio::test]
    async fn per_user_cap_is_enforced() {
        let repo = InMemoryScheduleRepository::new();
        let limits = ScheduleLimits { min_interval_secs: 60, max_schedules_per_user: 1 };
        create_schedule(&repo, &limits, "user-1", "tenant-1", "* * * * *", HashMap::new(), 1.0)
            .await
            .unwrap();
        let second = create_schedule(&repo, &limits, "user-1", "tenant-1", "* * * * *", HashMap::new(), 1.0).await;
        assert!(matches!(second, Err(ScheduleError::PerUserCapExceeded { .. })));
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected_before_touching_repository() {
        let repo = InMemoryScheduleRepository::new();
        let limits = ScheduleLimits::default();
        let result = create_schedule(&repo, &limits, "user-1", "tenant-1", "bad cron", HashMap::new(), 1.0).await;
        assert!(result.is_err());
        assert!(repo.list_for_user("user-1").await.is_empty());
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_status() {
        let repo = InMemoryScheduleRepository::new();
        let limits = ScheduleLimits::default();
        let schedule = create_schedule(&repo, &limits, "user-1", "tenant-1", "* * * * *", HashMap::new(), 1.0)
            .await
            .unwrap();
        pause_schedule(&repo, schedule.id).await.unwrap();
        assert_eq!(repo.get(schedule.id).await.unwrap().status, ScheduleStatus::Paused);
        resume_schedule(&repo, schedule.id).await.unwrap();
        assert_eq!(repo.get(schedule.id).await.unwrap().status, ScheduleStatus::Active);
    }

    #[tokio::test]
    async fn soft_deleted_schedules_are_excluded_from_listing() {
        let repo = InMemoryScheduleRepository::new();
        let limits = ScheduleLimits::default();
        let schedule = create_schedule(&repo, &limits, "user-1", "tenant-1", "* * * * *", HashMap::new(), 1.0)
            .await
            .unwrap();
        delete_schedule(&repo, schedule.id).await.unwrap();
        assert!(repo.list_for_user("user-1").await.is_empty());
    }

    #[tokio::test]
    async fn execution_is_recorded_against_its_schedule() {
        let repo = InMemoryScheduleRepository::new();
        let limits = ScheduleLimits::default();
        let schedule = create_schedule(&repo, &limits, "user-1", "tenant-1", "* * * * *", HashMap::new(), 1.0)
            .await
            .unwrap();
        record_schedule_execution(&repo, schedule.id, TaskStatus::Completed, 0.02, chrono::Utc::now())
            .await
            .unwrap();
        assert_eq!(repo.executions_for(schedule.id).await.len(), 1);
    }
}
