use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution mode override recognized in `context["mode"]` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Simple,
    Standard,
    Complex,
}

/// Strategy tag recognized in `context["cognitive_strategy"]` (spec §4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveStrategy {
    React,
    Research,
    Exploratory,
    Scientific,
    Debate,
    Swarm,
    Browser,
}

/// Request payload for `submit(task)` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

impl SubmitRequest {
    pub fn mode(&self) -> Option<Mode> {
        self.context
            .get("mode")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn cognitive_strategy(&self) -> Option<CognitiveStrategy> {
        self.context
            .get("cognitive_strategy")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn allowed_tools(&self) -> AllowedTools {
        match self.context.get("allowed_tools") {
            None => AllowedTools::RoleDefaults,
            Some(Value::Array(items)) if items.is_empty() => AllowedTools::Disabled,
            Some(Value::Array(items)) => AllowedTools::Allowlist(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Some(_) => AllowedTools::RoleDefaults,
        }
    }

    pub fn force_research(&self) -> bool {
        self.context
            .get("force_research")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn decompose(&self) -> bool {
        self.context
            .get("decompose")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// `allowed_tools` semantics (spec §6): omitted means role defaults, an
/// empty list disables tools entirely, a populated list is an allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedTools {
    RoleDefaults,
    Disabled,
    Allowlist(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub status: crate::TaskStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResultMetadata {
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub model: String,
    pub provider: String,
    pub model_used: String,
    pub num_agents: u32,
}

impl TaskResultMetadata {
    /// Aggregates per-agent results into one summary (spec §6: "`metadata`
    /// is always populated by aggregating per-agent results").
    pub fn aggregate(results: &[crate::AgentExecutionResult]) -> Self {
        let mut metadata = TaskResultMetadata {
            num_agents: results.len() as u32,
            ..Default::default()
        };
        for result in results {
            metadata.cost_usd += result.cost_usd;
            metadata.input_tokens += result.input_tokens;
            metadata.output_tokens += result.output_tokens;
            metadata.total_tokens += result.input_tokens + result.output_tokens;
            metadata.model = result.model.clone();
            metadata.provider = result.provider.clone();
            metadata.model_used = result.model.clone();
        }
        metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: crate::TaskStatus,
    pub output: String,
    pub metadata: TaskResultMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req_with_context(context: HashMap<String, Value>) -> SubmitRequest {
        SubmitRequest {
            user_id: "u1".into(),
            session_id: None,
            query: "hi".into(),
            context,
            task_type: None,
        }
    }

    #[test]
    fn allowed_tools_defaults_when_omitted() {
        let req = req_with_context(HashMap::new());
        assert_eq!(req.allowed_tools(), AllowedTools::RoleDefaults);
    }

    #[test]
    fn allowed_tools_disabled_on_empty_list() {
        let mut ctx = HashMap::new();
        ctx.insert("allowed_tools".to_string(), json!([]));
        assert_eq!(req_with_context(ctx).allowed_tools(), AllowedTools::Disabled);
    }

    #[test]
    fn allowed_tools_is_allowlist_when_populated() {
        let mut ctx = HashMap::new();
        ctx.insert("allowed_tools".to_string(), json!(["search", "fetch"]));
        assert_eq!(
            req_with_context(ctx).allowed_tools(),
            AllowedTools::Allowlist(vec!["search".to_string(), "fetch".to_string()])
        );
    }

    #[test]
    fn metadata_aggregates_across_agents() {
        let results = vec![
            crate::AgentExecutionResult {
                agent_id: "a".into(),
                role: "worker".into(),
                input_tokens: 10,
                output_tokens: 5,
                model: "m1".into(),
                provider: "p1".into(),
                cost_usd: 0.01,
                duration_ms: 1,
                success: true,
                error: None,
                output: String::new(),
                citations: vec![],
            },
            crate::AgentExecutionResult {
                agent_id: "b".into(),
                role: "worker".into(),
                input_tokens: 20,
                output_tokens: 15,
                model: "m2".into(),
                provider: "p2".into(),
                cost_usd: 0.02,
                duration_ms: 1,
                success: true,
                error: None,
                output: String::new(),
                citations: vec![],
            },
        ];
        let metadata = TaskResultMetadata::aggregate(&results);
        assert_eq!(metadata.num_agents, 2);
        assert_eq!(metadata.total_tokens, 50);
        assert!((metadata.cost_usd - 0.03).abs() < 1e-9);
    }
}
