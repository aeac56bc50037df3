//! Layered configuration for the orchestration core.
//!
//! Precedence is `defaults < file < environment`, mirroring the host's
//! `ConfigStore` layering (global/project/managed/env/runtime/cli) but
//! collapsed to the two layers this core actually needs: a YAML file and
//! `ORCHESTRA__SECTION__KEY`-style environment overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub catalog_path: Option<String>,
    pub fallback_usd_per_token: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            fallback_usd_per_token: 2e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub default_task_limit: u64,
    pub default_session_limit: u64,
    pub task_hard_limit: bool,
    pub session_hard_limit: bool,
    pub warning_threshold: f64,
    pub backpressure_threshold: f64,
    pub backpressure_delays_ms: Vec<u64>,
    pub backpressure_max_delay_ms: u64,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_success_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
    pub idempotency_ttl_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_task_limit: 100_000,
            default_session_limit: 1_000_000,
            task_hard_limit: true,
            session_hard_limit: false,
            warning_threshold: 0.8,
            backpressure_threshold: 0.8,
            backpressure_delays_ms: vec![50, 300, 750, 1500],
            backpressure_max_delay_ms: 5_000,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 2,
            circuit_breaker_cooldown_secs: 30,
            idempotency_ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    pub ring_size: usize,
    pub heartbeat_interval_secs: u64,
    pub subscriber_lag_threshold: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            ring_size: 256,
            heartbeat_interval_secs: 15,
            subscriber_lag_threshold: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefaultsConfig {
    pub react_max_iterations: u32,
    pub research_max_iterations: u32,
    pub research_coverage_threshold: f64,
    pub exploratory_branch_factor: u32,
    pub exploratory_max_depth: u32,
    pub debate_rounds: u32,
    pub debate_min_agents: u32,
    pub debate_max_agents: u32,
    pub reflection_max_iterations: u32,
    pub dag_max_parallel: usize,
    pub llm_parallel: usize,
    pub tool_parallel: usize,
    pub strict_contract_json: bool,
}

impl Default for WorkflowDefaultsConfig {
    fn default() -> Self {
        Self {
            react_max_iterations: 5,
            research_max_iterations: 3,
            research_coverage_threshold: 0.8,
            exploratory_branch_factor: 3,
            exploratory_max_depth: 5,
            debate_rounds: 3,
            debate_min_agents: 2,
            debate_max_agents: 4,
            reflection_max_iterations: 3,
            dag_max_parallel: 4,
            llm_parallel: 3,
            tool_parallel: 2,
            strict_contract_json: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub min_interval_secs: u64,
    pub max_schedules_per_user: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 60,
            max_schedules_per_user: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestraConfig {
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub workflows: WorkflowDefaultsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl OrchestraConfig {
    /// Loads defaults, merges a YAML file (if it exists) over them, then
    /// merges `ORCHESTRA__SECTION__KEY=value` environment variables over
    /// the result.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut merged = serde_json::to_value(OrchestraConfig::default())?;
        if let Ok(raw) = tokio::fs::read_to_string(path.as_ref()).await {
            let file_value: Value = serde_yaml::from_str(&raw)?;
            merge_json(&mut merged, file_value);
        }
        merge_json(&mut merged, env_layer());
        Ok(serde_json::from_value(merged)?)
    }

    pub fn from_defaults() -> Self {
        Self::default()
    }
}

fn env_layer() -> Value {
    let mut sections: HashMap<String, HashMap<String, Value>> = HashMap::new();
    for (key, raw) in std::env::vars() {
        let Some(rest) = key.strip_prefix("ORCHESTRA__") else {
            continue;
        };
        let Some((section, field)) = rest.split_once("__") else {
            continue;
        };
        let value = parse_env_value(&raw);
        sections
            .entry(section.to_lowercase())
            .or_default()
            .insert(field.to_lowercase(), value);
    }
    let mut root = serde_json::Map::new();
    for (section, fields) in sections {
        root.insert(section, Value::Object(fields.into_iter().collect()));
    }
    Value::Object(root)
}

fn parse_env_value(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge_json(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let config = OrchestraConfig::load("/nonexistent/path.yaml").await.unwrap();
        assert_eq!(config.budget.default_task_limit, 100_000);
    }

    #[tokio::test]
    async fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "budget:\n  default_task_limit: 5000\n")
            .await
            .unwrap();
        let config = OrchestraConfig::load(&path).await.unwrap();
        assert_eq!(config.budget.default_task_limit, 5000);
        assert_eq!(config.budget.default_session_limit, 1_000_000);
    }

    #[tokio::test]
    async fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "budget:\n  default_task_limit: 5000\n")
            .await
            .unwrap();
        std::env::set_var("ORCHESTRA__BUDGET__DEFAULT_TASK_LIMIT", "9000");
        let config = OrchestraConfig::load(&path).await.unwrap();
        std::env::remove_var("ORCHESTRA__BUDGET__DEFAULT_TASK_LIMIT");
        assert_eq!(config.budget.default_task_limit, 9000);
    }
}
