use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a [`Task`] (spec §3). Transitions are monotone except
/// `Paused <-> Running`; terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition under the monotonicity
    /// invariant in spec §3 / §8 ("terminal stickiness").
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (a, b) if a == b => true,
            (TaskStatus::Paused, TaskStatus::Running) | (TaskStatus::Running, TaskStatus::Paused) => {
                true
            }
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Running, TaskStatus::Completed)
            | (TaskStatus::Running, TaskStatus::Failed)
            | (TaskStatus::Running, TaskStatus::Cancelled)
            | (TaskStatus::Paused, TaskStatus::Cancelled)
            | (TaskStatus::Pending, TaskStatus::Cancelled)
            | (TaskStatus::Pending, TaskStatus::Failed) => true,
            _ => false,
        }
    }
}

/// A submitted unit of work (spec §3). Created by the router, mutated only
/// by the owning workflow and control endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub user_id: String,
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub status: TaskStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Task {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            workflow_id: None,
            user_id: user_id.into(),
            session_id: session_id.into(),
            query: query.into(),
            context: HashMap::new(),
            status: TaskStatus::Pending,
            created_at: chrono::Utc::now(),
            completed_at: None,
            result: None,
            metadata: HashMap::new(),
        }
    }

    /// Apply a status transition, rejecting illegal moves per the
    /// monotonicity invariant (spec §3, §8).
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), crate::OrchestraError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::OrchestraError::Validation(format!(
                "illegal task transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(chrono::Utc::now());
        }
        Ok(())
    }
}

/// A decomposed unit of work inside a [`Task`]'s DAG (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Blocked,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub parent_task_id: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    pub assigned_role: String,
    pub strategy: String,
    #[serde(default)]
    pub budget_max_tokens: Option<u64>,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Subtask {
    pub fn new(parent_task_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_task_id: parent_task_id.into(),
            description: description.into(),
            depends_on: HashSet::new(),
            assigned_role: "worker".to_string(),
            strategy: "dag".to_string(),
            budget_max_tokens: None,
            status: SubtaskStatus::Pending,
            result: None,
        }
    }
}

/// Validates that `depends_on` edges over `subtasks` form a DAG (spec §3,
/// §8 "DAG acyclicity"). Mirrors the teacher's `TaskScheduler::detect_cycle`.
pub fn detect_cycle(subtasks: &[Subtask]) -> Option<Vec<String>> {
    let by_id: HashMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();

    fn dfs<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Subtask>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        if path.iter().any(|p| p == id) {
            path.push(id.to_string());
            return true;
        }
        if visited.contains(id) {
            return false;
        }
        visited.insert(id.to_string());
        path.push(id.to_string());
        if let Some(subtask) = by_id.get(id) {
            for dep in &subtask.depends_on {
                if dfs(dep.as_str(), by_id, visited, path) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    for subtask in subtasks {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if dfs(&subtask.id, &by_id, &mut visited, &mut path) {
            return Some(path);
        }
    }
    None
}

/// Validates a decomposition's dependency edges reference known subtask ids
/// and contain no cycle, rejecting with [`OrchestraError::Validation`]
/// otherwise (spec §8 "DAG acyclicity").
pub fn validate_dag(subtasks: &[Subtask]) -> Result<(), crate::OrchestraError> {
    let ids: HashSet<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
    for subtask in subtasks {
        for dep in &subtask.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(crate::OrchestraError::Validation(format!(
                    "subtask `{}` depends on unknown subtask `{}`",
                    subtask.id, dep
                )));
            }
        }
    }
    if let Some(cycle) = detect_cycle(subtasks) {
        return Err(crate::OrchestraError::Validation(format!(
            "dependency cycle detected: {}",
            cycle.join(" -> ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        let mut task = Task::new("u1", "s1", "hello");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.transition(TaskStatus::Running).is_err());
        assert!(task.transition(TaskStatus::Failed).is_err());
    }

    #[test]
    fn pause_resume_round_trips() {
        let mut task = Task::new("u1", "s1", "hello");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Paused).unwrap();
        task.transition(TaskStatus::Running).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn acyclic_dag_is_accepted() {
        let mut a = Subtask::new("t1", "a");
        let mut c = Subtask::new("t1", "c");
        let b = Subtask::new("t1", "b");
        c.depends_on.insert(a.id.clone());
        c.depends_on.insert(b.id.clone());
        a.depends_on.clear();
        assert!(validate_dag(&[a, b, c]).is_ok());
    }

    #[test]
    fn cyclic_dag_is_rejected() {
        let mut a = Subtask::new("t1", "a");
        let mut b = Subtask::new("t1", "b");
        a.depends_on.insert(b.id.clone());
        b.depends_on.insert(a.id.clone());
        assert!(validate_dag(&[a, b]).is_err());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut a = Subtask::new("t1", "a");
        a.depends_on.insert("does-not-exist".to_string());
        assert!(validate_dag(&[a]).is_err());
    }
}
