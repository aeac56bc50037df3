//! Admission control, usage recording, and per-user circuit breaking.
//!
//! Mirrors the layered deny-code style of the host's `SpawnPolicy::evaluate`
//! (check each rule in order, return on the first violation) applied to
//! token budgets instead of agent spawn edges.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use orc_pricing::{ModelTier, PricingCatalog};
use orc_types::budget::{PressureLevel, TokenBudget};
use orc_types::usage::UsageRecord;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BackpressureSchedule {
    pub threshold: f64,
    pub delays_ms: Vec<u64>,
    pub max_delay_ms: u64,
}

impl Default for BackpressureSchedule {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            delays_ms: vec![50, 300, 750, 1500],
            max_delay_ms: 5_000,
        }
    }
}

impl BackpressureSchedule {
    /// Step function over `[threshold, 1]`; saturates at `max_delay_ms`
    /// once usage reaches or exceeds 100%.
    pub fn delay_for(&self, ratio: f64) -> Option<u64> {
        if ratio < self.threshold {
            return None;
        }
        if ratio >= 1.0 {
            return Some(self.max_delay_ms);
        }
        let span = 1.0 - self.threshold;
        let progressed = (ratio - self.threshold) / span;
        let steps = self.delays_ms.len();
        let index = ((progressed * steps as f64) as usize).min(steps - 1);
        Some(self.delays_ms[index])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
        }
    }
}

struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }

    fn poll(&mut self, config: &CircuitBreakerConfig) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= config.cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                }
            }
        }
        self.state
    }

    fn on_success(&mut self, config: &CircuitBreakerConfig) {
        self.consecutive_failures = 0;
        match self.state {
            CircuitState::HalfOpen => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.opened_at = None;
                }
            }
            CircuitState::Closed => {}
            CircuitState::Open => {}
        }
    }

    fn on_failure(&mut self, config: &CircuitBreakerConfig) {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                self.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BudgetError {
    #[error("token counter overflow recording usage for session {0}")]
    Overflow(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionResult {
    pub can_proceed: bool,
    pub require_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub warnings: Vec<String>,
    pub estimated_cost: f64,
    pub remaining_task: i64,
    pub remaining_session: i64,
    pub backpressure_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backpressure_delay_ms: Option<u64>,
    pub circuit_open: bool,
    pub pressure: PressureLevel,
}

#[derive(Debug, Clone)]
pub struct BudgetManagerConfig {
    pub default_task_limit: u64,
    pub default_session_limit: u64,
    pub task_hard_limit: bool,
    pub session_hard_limit: bool,
    pub backpressure: BackpressureSchedule,
    pub circuit_breaker: CircuitBreakerConfig,
    pub idempotency_ttl: Duration,
}

impl Default for BudgetManagerConfig {
    fn default() -> Self {
        Self {
            default_task_limit: 100_000,
            default_session_limit: 1_000_000,
            task_hard_limit: true,
            session_hard_limit: false,
            backpressure: BackpressureSchedule::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            idempotency_ttl: Duration::from_secs(3_600),
        }
    }
}

struct IdempotencyEntry {
    recorded_at: Instant,
}

/// Guards admission and usage recording behind the lock order the
/// concurrency model requires: budget state, then circuit breakers, then
/// idempotency set. Each is its own lock so a long-held read on one never
/// blocks the others out of order.
pub struct BudgetManager {
    config: BudgetManagerConfig,
    pricing: PricingCatalog,
    task_budgets: RwLock<HashMap<String, TokenBudget>>,
    session_budgets: RwLock<HashMap<String, TokenBudget>>,
    circuits: RwLock<HashMap<String, CircuitBreaker>>,
    idempotency: RwLock<HashMap<String, IdempotencyEntry>>,
}

impl BudgetManager {
    pub fn new(config: BudgetManagerConfig, pricing: PricingCatalog) -> Self {
        Self {
            config,
            pricing,
            task_budgets: RwLock::new(HashMap::new()),
            session_budgets: RwLock::new(HashMap::new()),
            circuits: RwLock::new(HashMap::new()),
            idempotency: RwLock::new(HashMap::new()),
        }
    }

    pub async fn admit(
        &self,
        user_id: &str,
        session_id: &str,
        task_id: &str,
        estimated_tokens: u64,
    ) -> AdmissionResult {
        {
            let mut circuits = self.circuits.write().await;
            let breaker = circuits.entry(user_id.to_string()).or_insert_with(CircuitBreaker::new);
            if breaker.poll(&self.config.circuit_breaker) == CircuitState::Open {
                tracing::warn!(user_id, "admission denied: circuit breaker open");
                return AdmissionResult {
                    can_proceed: false,
                    require_approval: false,
                    reason: Some("circuit breaker open for user".to_string()),
                    warnings: vec![],
                    estimated_cost: 0.0,
                    remaining_task: 0,
                    remaining_session: 0,
                    backpressure_active: false,
                    backpressure_delay_ms: None,
                    circuit_open: true,
                    pressure: PressureLevel::Critical,
                };
            }
        }

        let mut task_budgets = self.task_budgets.write().await;
        let task_budget = task_budgets
            .entry(task_id.to_string())
            .or_insert_with(|| TokenBudget::new(self.config.default_task_limit, self.config.task_hard_limit));

        let mut session_budgets = self.session_budgets.write().await;
        let session_budget = session_budgets.entry(session_id.to_string()).or_insert_with(|| {
            TokenBudget::new(self.config.default_session_limit, self.config.session_hard_limit)
        });

        let model = self.pricing.priority_one_model(ModelTier::Medium).unwrap_or("unknown");
        let estimated_cost = self.pricing.estimate(model, estimated_tokens);

        let mut warnings = Vec::new();
        let mut can_proceed = true;
        let mut reason = None;

        if task_budget.would_exceed(estimated_tokens) {
            can_proceed = false;
            reason = Some("projected task usage exceeds hard limit".to_string());
        } else if session_budget.would_exceed(estimated_tokens) {
            can_proceed = false;
            reason = Some("projected session usage exceeds hard limit".to_string());
        }

        let task_ratio_after =
            (task_budget.used.saturating_add(estimated_tokens)) as f64 / task_budget.limit.max(1) as f64;
        if task_ratio_after >= task_budget.warning_threshold {
            warnings.push("approaching task token budget".to_string());
        }

        let pressure = PressureLevel::from_ratio(task_ratio_after.min(1.0));
        let backpressure_delay_ms = self.config.backpressure.delay_for(task_ratio_after);
        let require_approval = can_proceed && task_budget.require_approval;

        if let Some(reason) = &reason {
            tracing::warn!(task_id, session_id, reason, "admission denied");
        }

        AdmissionResult {
            can_proceed,
            require_approval,
            reason,
            warnings,
            estimated_cost,
            remaining_task: task_budget.limit as i64 - task_budget.used as i64,
            remaining_session: session_budget.limit as i64 - session_budget.used as i64,
            backpressure_active: backpressure_delay_ms.is_some(),
            backpressure_delay_ms,
            circuit_open: false,
            pressure,
        }
    }

    /// Records one usage event, guarded by idempotency. Returns `Ok(true)`
    /// if this call actually applied the usage, `Ok(false)` if it was a
    /// duplicate within the TTL window.
    pub async fn record(&self, usage: UsageRecord) -> Result<bool, BudgetError> {
        if let Some(key) = usage.idempotency_key.as_deref() {
            let mut idempotency = self.idempotency.write().await;
            self.sweep_expired(&mut idempotency);
            if idempotency.contains_key(key) {
                return Ok(false);
            }
        }

        let total = usage.total_tokens();

        {
            let mut task_budgets = self.task_budgets.write().await;
            if let Some(task_id) = usage.task_id.as_deref() {
                let budget = task_budgets
                    .entry(task_id.to_string())
                    .or_insert_with(|| TokenBudget::new(self.config.default_task_limit, self.config.task_hard_limit));
                budget.used = budget
                    .used
                    .checked_add(total)
                    .ok_or_else(|| BudgetError::Overflow(usage.session_id.clone()))?;
                budget.actual_cost += usage.cost_usd;
            }
        }
        {
            let mut session_budgets = self.session_budgets.write().await;
            let budget = session_budgets.entry(usage.session_id.clone()).or_insert_with(|| {
                TokenBudget::new(self.config.default_session_limit, self.config.session_hard_limit)
            });
            budget.used = budget
                .used
                .checked_add(total)
                .ok_or_else(|| BudgetError::Overflow(usage.session_id.clone()))?;
            budget.actual_cost += usage.cost_usd;
        }

        if let Some(key) = usage.idempotency_key {
            let mut idempotency = self.idempotency.write().await;
            idempotency.insert(key, IdempotencyEntry { recorded_at: Instant::now() });
        }

        tracing::debug!(user_id = usage.user_id, session_id = usage.session_id, total, cost_usd = usage.cost_usd, "usage recorded");
        Ok(true)
    }

    /// Overwrites a task's token ceiling, replacing whatever `admit` would
    /// otherwise lazily seed from `default_task_limit`. Used to size a
    /// schedule's per-run cap before its first admission check.
    pub async fn set_task_limit(&self, task_id: &str, limit: u64) {
        let mut task_budgets = self.task_budgets.write().await;
        task_budgets.insert(task_id.to_string(), TokenBudget::new(limit, true));
    }

    pub async fn record_failure(&self, user_id: &str) {
        let mut circuits = self.circuits.write().await;
        let breaker = circuits.entry(user_id.to_string()).or_insert_with(CircuitBreaker::new);
        breaker.on_failure(&self.config.circuit_breaker);
        if breaker.state == CircuitState::Open {
            tracing::warn!(user_id, "circuit breaker opened after repeated failures");
        }
    }

    pub async fn record_success(&self, user_id: &str) {
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(user_id.to_string())
            .or_insert_with(CircuitBreaker::new)
            .on_success(&self.config.circuit_breaker);
    }

    fn sweep_expired(&self, idempotency: &mut HashMap<String, IdempotencyEntry>) {
        let ttl = self.config.idempotency_ttl;
        idempotency.retain(|_, entry| entry.recorded_at.elapsed() < ttl);
    }

    pub fn new_idempotency_key(workflow_id: &str, activity_index: u64) -> String {
        format!("{workflow_id}:{activity_index}")
    }
}

fn new_usage_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_pricing::ModelPrice;

    fn manager() -> BudgetManager {
        let pricing = PricingCatalog::new(vec![ModelPrice {
            provider: "anthropic".into(),
            model: "claude-medium".into(),
            tier: ModelTier::Medium,
            input_per_1k: 0.003,
            output_per_1k: 0.015,
        }]);
        BudgetManager::new(
            BudgetManagerConfig {
                default_task_limit: 100,
                default_session_limit: 10_000,
                task_hard_limit: true,
                session_hard_limit: false,
                ..BudgetManagerConfig::default()
            },
            pricing,
        )
    }

    fn usage(session: &str, task: &str, tokens: u64, key: Option<&str>) -> UsageRecord {
        UsageRecord {
            id: new_usage_id(),
            user_id: "user-1".into(),
            session_id: session.into(),
            task_id: Some(task.into()),
            agent_id: "agent-1".into(),
            model: "claude-medium".into(),
            provider: "anthropic".into(),
            input_tokens: tokens / 2,
            output_tokens: tokens - tokens / 2,
            cost_usd: 0.01,
            timestamp: chrono::Utc::now(),
            idempotency_key: key.map(String::from),
        }
    }

    #[tokio::test]
    async fn admits_when_within_limit() {
        let manager = manager();
        let result = manager.admit("user-1", "session-1", "task-1", 10).await;
        assert!(result.can_proceed);
    }

    #[tokio::test]
    async fn denies_when_hard_limit_exceeded() {
        let manager = manager();
        let result = manager.admit("user-1", "session-1", "task-1", 500).await;
        assert!(!result.can_proceed);
        assert!(result.reason.is_some());
    }

    #[tokio::test]
    async fn backpressure_engages_at_threshold() {
        let manager = manager();
        // Pushes projected ratio to exactly the 0.8 threshold (80/100).
        let result = manager.admit("user-1", "session-1", "task-1", 80).await;
        assert!(result.backpressure_active);
        let below = manager.admit("user-1", "session-1", "task-2", 79).await;
        assert!(!below.backpressure_active);
    }

    #[tokio::test]
    async fn idempotent_record_applies_usage_exactly_once() {
        let manager = manager();
        let first = manager.record(usage("session-1", "task-1", 50, Some("K"))).await.unwrap();
        let second = manager.record(usage("session-1", "task-1", 50, Some("K"))).await.unwrap();
        assert!(first);
        assert!(!second);

        let admission = manager.admit("user-1", "session-1", "task-1", 0).await;
        assert_eq!(admission.remaining_task, 50);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures() {
        let manager = manager();
        for _ in 0..5 {
            manager.record_failure("user-1").await;
        }
        let result = manager.admit("user-1", "session-1", "task-1", 1).await;
        assert!(result.circuit_open);
        assert!(!result.can_proceed);
    }

    #[test]
    fn idempotency_key_is_derived_from_workflow_and_step() {
        let key = BudgetManager::new_idempotency_key("wf-1", 3);
        assert_eq!(key, "wf-1:3");
    }
}
