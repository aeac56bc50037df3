use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bounded event vocabulary exposed over `subscribe` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowPausing,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCancelling,
    WorkflowCancelled,
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    AgentProgress,
    RoleAssigned,
    ToolInvoked,
    ToolObservation,
    ToolResult,
    ToolError,
    ThreadMessageDelta,
    ThreadMessageCompleted,
    Usage,
    BudgetThreshold,
    Synthesis,
    Reflection,
    ApprovalRequested,
    ApprovalDecision,
    TeamRecruited,
    TeamStatus,
    TeamRetired,
    Error,
    Done,
}

impl EventType {
    /// Persistent events (status transitions, usage, approvals, terminal
    /// events) are written to the durable log (spec §4.2). Ephemeral
    /// events (token deltas, progress beats) need not be.
    pub fn default_persistent(self) -> bool {
        !matches!(
            self,
            EventType::ThreadMessageDelta | EventType::AgentProgress
        )
    }
}

/// One event in a workflow's ordered stream (spec §3, §4.2, §6). `seq` is
/// strictly increasing and densely allocated per `workflow_id` by the bus,
/// never set by the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub workflow_id: String,
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub payload: HashMap<String, Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub persistent: bool,
}

/// Builder used by activities/workflows to publish an event without
/// knowing the bus-assigned `seq` ahead of time.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub agent_id: Option<String>,
    pub message: Option<String>,
    pub payload: HashMap<String, Value>,
    pub persistent: Option<bool>,
}

impl EventDraft {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            agent_id: None,
            message: None,
            payload: HashMap::new(),
            persistent: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn into_event(self, workflow_id: impl Into<String>, seq: u64) -> WorkflowEvent {
        let persistent = self
            .persistent
            .unwrap_or_else(|| self.event_type.default_persistent());
        WorkflowEvent {
            workflow_id: workflow_id.into(),
            seq,
            event_type: self.event_type,
            agent_id: self.agent_id,
            message: self.message,
            payload: self.payload,
            timestamp: chrono::Utc::now(),
            persistent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_delta_events_default_ephemeral() {
        let event = EventDraft::new(EventType::ThreadMessageDelta).into_event("wf-1", 1);
        assert!(!event.persistent);
    }

    #[test]
    fn status_events_default_persistent() {
        let event = EventDraft::new(EventType::WorkflowCompleted).into_event("wf-1", 2);
        assert!(event.persistent);
    }
}
