//! Session and checkpoint repositories (spec §4.8).
//!
//! Raw persistence (relational store, KV cache) is explicitly out of scope;
//! this crate exposes the narrow repository traits a workflow or activity
//! actually needs, with a file-backed implementation in the teacher's
//! `atomic_write`-then-`rename` style so a crash never leaves a half-written
//! session or checkpoint file on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orc_types::checkpoint::Checkpoint;
use orc_types::error::OrchestraError;
use orc_types::session::Session;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no session found for id `{0}`")]
    NotFound(String),
    #[error("no checkpoint available for workflow `{0}`")]
    NoCheckpoint(String),
}

impl From<SessionStoreError> for OrchestraError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound(id) => OrchestraError::Validation(format!("session not found: {id}")),
            other => OrchestraError::Internal(other.to_string()),
        }
    }
}

/// Converts an empty caller-supplied id to `None` at the storage boundary
/// (spec §4.8: "empty-UUID strings convert to null at the storage
/// boundary").
pub fn normalize_caller_id(raw: &str) -> Option<&str> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, user_id: &str, external_id: Option<String>) -> Result<Session, SessionStoreError>;
    /// Resolves a caller-supplied id against the dual-id invariant,
    /// filtered by `user_id`, and returns the matching non-deleted session.
    async fn find(&self, user_id: &str, caller_id: &str) -> Result<Session, SessionStoreError>;
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError>;
    async fn soft_delete(&self, user_id: &str, caller_id: &str) -> Result<(), SessionStoreError>;
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, user_id: &str, external_id: Option<String>) -> Result<Session, SessionStoreError> {
        let session = Session::new(user_id, external_id);
        self.sessions.write().await.insert(session.internal_id, session.clone());
        Ok(session)
    }

    async fn find(&self, user_id: &str, caller_id: &str) -> Result<Session, SessionStoreError> {
        let caller_id = normalize_caller_id(caller_id).ok_or_else(|| SessionStoreError::NotFound(caller_id.to_string()))?;
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|session| session.user_id == user_id && !session.deleted && session.matches(caller_id))
            .cloned()
            .ok_or_else(|| SessionStoreError::NotFound(caller_id.to_string()))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.sessions.write().await.insert(session.internal_id, session.clone());
        Ok(())
    }

    async fn soft_delete(&self, user_id: &str, caller_id: &str) -> Result<(), SessionStoreError> {
        let mut session = self.find(user_id, caller_id).await?;
        session.deleted = true;
        self.save(&session).await
    }
}

/// File-backed session store, one JSON file per session under `base_dir`,
/// written atomically (write to a temp path, then rename).
pub struct FileSessionRepository {
    base_dir: PathBuf,
    index: RwLock<HashMap<Uuid, Session>>,
}

impl FileSessionRepository {
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self, SessionStoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                let raw = tokio::fs::read_to_string(entry.path()).await?;
                let session: Session = serde_json::from_str(&raw)?;
                index.insert(session.internal_id, session);
            }
        }
        Ok(Self { base_dir, index: RwLock::new(index) })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    async fn persist(&self, session: &Session) -> Result<(), SessionStoreError> {
        let path = self.path_for(session.internal_id);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for FileSessionRepository {
    async fn create(&self, user_id: &str, external_id: Option<String>) -> Result<Session, SessionStoreError> {
        let session = Session::new(user_id, external_id);
        self.persist(&session).await?;
        self.index.write().await.insert(session.internal_id, session.clone());
        Ok(session)
    }

    async fn find(&self, user_id: &str, caller_id: &str) -> Result<Session, SessionStoreError> {
        let caller_id = normalize_caller_id(caller_id).ok_or_else(|| SessionStoreError::NotFound(caller_id.to_string()))?;
        let index = self.index.read().await;
        index
            .values()
            .find(|session| session.user_id == user_id && !session.deleted && session.matches(caller_id))
            .cloned()
            .ok_or_else(|| SessionStoreError::NotFound(caller_id.to_string()))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.persist(session).await?;
        self.index.write().await.insert(session.internal_id, session.clone());
        Ok(())
    }

    async fn soft_delete(&self, user_id: &str, caller_id: &str) -> Result<(), SessionStoreError> {
        let mut session = self.find(user_id, caller_id).await?;
        session.deleted = true;
        self.save(&session).await
    }
}

/// Checkpoint history per workflow, newest last. `restore` falls back to
/// the previous checkpoint on corruption, and reports when none remain so
/// the caller can fall back to full event replay (spec §4.8).
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn store(&self, checkpoint: Checkpoint) -> Result<(), SessionStoreError>;
    async fn restore_latest(&self, workflow_id: &str) -> Result<Vec<u8>, SessionStoreError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointRepository {
    history: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn store(&self, checkpoint: Checkpoint) -> Result<(), SessionStoreError> {
        self.history
            .write()
            .await
            .entry(checkpoint.workflow_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    /// Tries each checkpoint newest-first, falling back to the previous one
    /// whenever the checksum fails to validate.
    async fn restore_latest(&self, workflow_id: &str) -> Result<Vec<u8>, SessionStoreError> {
        let history = self.history.read().await;
        let checkpoints = history
            .get(workflow_id)
            .ok_or_else(|| SessionStoreError::NoCheckpoint(workflow_id.to_string()))?;
        for checkpoint in checkpoints.iter().rev() {
            if let Ok(raw) = checkpoint.decode() {
                return Ok(raw);
            }
        }
        Err(SessionStoreError::NoCheckpoint(workflow_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dual_id_lookup_resolves_external_id() {
        let repo = InMemorySessionRepository::new();
        let session = repo.create("user-1", Some("ext-1".to_string())).await.unwrap();
        let by_internal = repo.find("user-1", &session.internal_id.to_string()).await.unwrap();
        let by_external = repo.find("user-1", "ext-1").await.unwrap();
        assert_eq!(by_internal.internal_id, session.internal_id);
        assert_eq!(by_external.internal_id, session.internal_id);
    }

    #[tokio::test]
    async fn empty_caller_id_never_resolves() {
        let repo = InMemorySessionRepository::new();
        repo.create("user-1", None).await.unwrap();
        assert!(repo.find("user-1", "").await.is_err());
    }

    #[tokio::test]
    async fn lookup_is_scoped_to_verified_user() {
        let repo = InMemorySessionRepository::new();
        let session = repo.create("user-1", Some("ext-1".to_string())).await.unwrap();
        assert!(repo.find("user-2", &session.internal_id.to_string()).await.is_err());
    }

    #[tokio::test]
    async fn soft_delete_hides_session_from_lookup() {
        let repo = InMemorySessionRepository::new();
        let session = repo.create("user-1", None).await.unwrap();
        repo.soft_delete("user-1", &session.internal_id.to_string()).await.unwrap();
        assert!(repo.find("user-1", &session.internal_id.to_string()).await.is_err());
    }

    #[tokio::test]
    async fn file_repository_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileSessionRepository::open(dir.path()).await.unwrap();
        let session = repo.create("user-1", Some("ext-1".to_string())).await.unwrap();

        let reopened = FileSessionRepository::open(dir.path()).await.unwrap();
        let found = reopened.find("user-1", "ext-1").await.unwrap();
        assert_eq!(found.internal_id, session.internal_id);
    }

    #[tokio::test]
    async fn checkpoint_restore_falls_back_to_previous_on_corruption() {
        let repo = InMemoryCheckpointRepository::new();
        let good = Checkpoint::encode("wf-1", 1, b"good state").unwrap();
        let mut bad = Checkpoint::encode("wf-1", 2, b"newer state").unwrap();
        bad.snapshot.push(0xFF);

        repo.store(good).await.unwrap();
        repo.store(bad).await.unwrap();

        let restored = repo.restore_latest("wf-1").await.unwrap();
        assert_eq!(restored, b"good state");
    }

    #[tokio::test]
    async fn no_checkpoint_history_is_reported_distinctly() {
        let repo = InMemoryCheckpointRepository::new();
        assert!(matches!(
            repo.restore_latest("wf-unknown").await,
            Err(SessionStoreError::NoCheckpoint(_))
        ));
    }
}
