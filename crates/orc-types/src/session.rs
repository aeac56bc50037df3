use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
}

/// A conversation session (spec §3). Dual-lookup invariant: any
/// caller-supplied id must resolve by `internal_id` OR `context.external_id`.
/// History is append-only; deletion is a soft `deleted` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub internal_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub user_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurn>,
    #[serde(default)]
    pub deleted: bool,
}

impl Session {
    pub fn new(user_id: impl Into<String>, external_id: Option<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            internal_id: Uuid::new_v4(),
            external_id,
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            context: HashMap::new(),
            conversation_history: Vec::new(),
            deleted: false,
        }
    }

    /// Dual-id match used by every endpoint that accepts a caller-supplied
    /// session id (spec §3, §4.8, §8 "dual session lookup"). Matches either
    /// the stringified internal UUID or `context.external_id`. An empty
    /// string never matches anything (spec §4.8 "empty-UUID strings convert
    /// to null at the storage boundary").
    pub fn matches(&self, caller_id: &str) -> bool {
        if caller_id.is_empty() {
            return false;
        }
        if self.internal_id.to_string() == caller_id {
            return true;
        }
        self.external_id.as_deref() == Some(caller_id)
    }

    pub fn append(&mut self, role: MessageRole, content: impl Into<String>, token_count: Option<u32>) {
        self.conversation_history.push(HistoryTurn {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
            token_count,
        });
        self.updated_at = chrono::Utc::now();
    }

    /// Keep the most recent turns whose cumulative `token_count` (unknown
    /// counts treated as `avg_unknown_tokens`) stays within `max_tokens`.
    /// Resolves the Open Question in SPEC_FULL.md §1-9: the core provides
    /// this as a convenience, it does not assume the model adapter will.
    pub fn windowed_history(&self, max_tokens: u32, avg_unknown_tokens: u32) -> Vec<&HistoryTurn> {
        let mut budget = max_tokens as i64;
        let mut kept = Vec::new();
        for turn in self.conversation_history.iter().rev() {
            let cost = turn.token_count.unwrap_or(avg_unknown_tokens) as i64;
            if budget - cost < 0 && !kept.is_empty() {
                break;
            }
            budget -= cost;
            kept.push(turn);
        }
        kept.reverse();
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dual_lookup_matches_internal_or_external() {
        let session = Session::new("u1", Some("ext-42".to_string()));
        assert!(session.matches(&session.internal_id.to_string()));
        assert!(session.matches("ext-42"));
        assert!(!session.matches("ext-43"));
        assert!(!session.matches(""));
    }

    #[test]
    fn windowed_history_keeps_most_recent_within_budget() {
        let mut session = Session::new("u1", None);
        for i in 0..5 {
            session.append(MessageRole::User, format!("turn {i}"), Some(100));
        }
        let window = session.windowed_history(250, 100);
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].content, "turn 4");
    }

    #[test]
    fn windowed_history_always_keeps_at_least_one_turn() {
        let mut session = Session::new("u1", None);
        session.append(MessageRole::User, "huge", Some(10_000));
        let window = session.windowed_history(10, 10);
        assert_eq!(window.len(), 1);
    }
}
