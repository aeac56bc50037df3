//! File-backed schedule repository, same atomic-write-then-rename pattern
//! as `orc_session::FileSessionRepository` but for the whole schedule table
//! at once, since schedules are few and read together on every CLI launch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orc_schedule::{ScheduleError, ScheduleRepository};
use orc_types::schedule::{Schedule, ScheduleExecution, ScheduleStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileContents {
    schedules: HashMap<Uuid, Schedule>,
    executions: HashMap<Uuid, Vec<ScheduleExecution>>,
}

pub struct FileScheduleRepository {
    path: PathBuf,
    state: RwLock<FileContents>,
}

impl FileScheduleRepository {
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileContents::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, state: RwLock::new(state) })
    }

    async fn persist(&self, state: &FileContents) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_string_pretty(state)?).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn executions_for(&self, schedule_id: Uuid) -> Vec<ScheduleExecution> {
        self.state.read().await.executions.get(&schedule_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ScheduleRepository for FileScheduleRepository {
    async fn insert(&self, schedule: Schedule) -> Result<(), ScheduleError> {
        let mut state = self.state.write().await;
        state.schedules.insert(schedule.id, schedule);
        self.persist(&state).await.map_err(|err| ScheduleError::InvalidField {
            field: "storage".to_string(),
            position: 0,
            reason: err.to_string(),
        })
    }

    async fn get(&self, id: Uuid) -> Result<Schedule, ScheduleError> {
        self.state.read().await.schedules.get(&id).cloned().ok_or(ScheduleError::NotFound(id))
    }

    async fn list_for_user(&self, user_id: &str) -> Vec<Schedule> {
        self.state
            .read()
            .await
            .schedules
            .values()
            .filter(|s| s.user_id == user_id && s.status != ScheduleStatus::Deleted)
            .cloned()
            .collect()
    }

    async fn update(&self, schedule: Schedule) -> Result<(), ScheduleError> {
        let mut state = self.state.write().await;
        if !state.schedules.contains_key(&schedule.id) {
            return Err(ScheduleError::NotFound(schedule.id));
        }
        state.schedules.insert(schedule.id, schedule);
        self.persist(&state).await.map_err(|err| ScheduleError::InvalidField {
            field: "storage".to_string(),
            position: 0,
            reason: err.to_string(),
        })
    }

    async fn record_execution(&self, execution: ScheduleExecution) -> Result<(), ScheduleError> {
        let mut state = self.state.write().await;
        state.executions.entry(execution.schedule_id).or_default().push(execution);
        self.persist(&state).await.map_err(|err| ScheduleError::InvalidField {
            field: "storage".to_string(),
            position: 0,
            reason: err.to_string(),
        })
    }
}
