use serde::{Deserialize, Serialize};

use crate::OrchestraError;

/// Result of one agent's execution of a role (spec §3). Token counters are
/// non-negative; `total_tokens` is computed, never stored independently, so
/// it cannot drift from `input_tokens + output_tokens`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub agent_id: String,
    pub role: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
    pub provider: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub output: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

impl AgentExecutionResult {
    /// `input_tokens + output_tokens`, rejecting overflow (spec §3, §7
    /// `OverflowError`).
    pub fn total_tokens(&self) -> Result<u64, OrchestraError> {
        self.input_tokens
            .checked_add(self.output_tokens)
            .ok_or_else(|| OrchestraError::Overflow(format!("agent {} token total overflow", self.agent_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AgentExecutionResult {
        AgentExecutionResult {
            agent_id: "a1".into(),
            role: "worker".into(),
            input_tokens: 10,
            output_tokens: 20,
            model: "m".into(),
            provider: "p".into(),
            cost_usd: 0.0,
            duration_ms: 1,
            success: true,
            error: None,
            output: String::new(),
            citations: vec![],
        }
    }

    #[test]
    fn total_tokens_sums() {
        assert_eq!(base().total_tokens().unwrap(), 30);
    }

    #[test]
    fn total_tokens_detects_overflow() {
        let mut r = base();
        r.input_tokens = u64::MAX;
        r.output_tokens = 1;
        assert!(r.total_tokens().is_err());
    }
}
