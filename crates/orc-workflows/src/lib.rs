//! Deterministic, replay-safe strategy workflows (spec §4.7).
//!
//! Each function here is the workflow body the durable runtime would drive:
//! every side effect goes through an activity call (`orc_activities`), every
//! timer goes through `Clock` rather than a bare `tokio::time::sleep`, and
//! every event goes through `EventBus::publish`. None of that is optional —
//! it's what makes replaying the same history twice produce the same
//! decisions (spec §8 "deterministic replay").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orc_activities::{
    decompose_task, execute_agent, synthesize, with_retries, ActivityError, AgentRequest, LlmRequest,
    ModelProvider, ModelTierRequest, ToolRunner,
};
use orc_budget::BudgetManager;
use orc_degradation::{fallback, should_return_partial, FallbackAction, HealthSnapshot, Operation};
use orc_eventbus::EventBus;
use orc_pricing::PricingCatalog;
use orc_types::agent::AgentExecutionResult;
use orc_types::error::OrchestraError;
use orc_types::event::{EventDraft, EventType};
use orc_types::task::{Subtask, SubtaskStatus};
use orc_types::wire::{TaskResult, TaskResultMetadata};
use orc_types::TaskStatus;

/// Abstracts the durable runtime's timer primitive so workflow code never
/// calls `tokio::time::sleep` (or the system clock) directly; a replay with
/// a `DeterministicClock` takes the same branches as the live run.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// A clock that never actually waits and returns a fixed instant, so
/// crash-recovery and replay-determinism tests run as ordinary unit tests
/// (spec §10.4).
pub struct DeterministicClock {
    pub fixed_now: chrono::DateTime<chrono::Utc>,
}

impl DeterministicClock {
    pub fn new(fixed_now: chrono::DateTime<chrono::Utc>) -> Self {
        Self { fixed_now }
    }
}

#[async_trait]
impl Clock for DeterministicClock {
    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.fixed_now
    }
}

/// Everything a strategy workflow needs, bundled so the eight strategy
/// functions below take one argument instead of eight. Cheap to clone: the
/// shared collaborators are all behind `Arc`, and the activity-key counter
/// is shared across clones so concurrent branches of the same workflow
/// never reuse a key.
#[derive(Clone)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub user_id: String,
    pub session_id: String,
    pub task_id: String,
    pub provider: Arc<dyn ModelProvider>,
    pub tools: Arc<dyn ToolRunner>,
    pub budget: Arc<BudgetManager>,
    pub pricing: Arc<PricingCatalog>,
    pub events: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
    step: Arc<AtomicU64>,
}

impl WorkflowContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<dyn ToolRunner>,
        budget: Arc<BudgetManager>,
        pricing: Arc<PricingCatalog>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            task_id: task_id.into(),
            provider,
            tools,
            budget,
            pricing,
            events,
            clock,
            step: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Next `workflow_id:step` activity key; monotone and stable across a
    /// replay because the same sequence of activities is re-issued in the
    /// same order.
    pub fn next_activity_key(&self) -> String {
        let step = self.step.fetch_add(1, Ordering::SeqCst);
        format!("{}:{}", self.workflow_id, step)
    }

    pub async fn publish(&self, draft: EventDraft) {
        self.events.publish(&self.workflow_id, draft).await;
    }

    fn llm_request(&self, tier: ModelTierRequest, system_prompt: Option<String>, prompt: String, max_tokens: u32) -> LlmRequest {
        LlmRequest {
            activity_key: self.next_activity_key(),
            tier,
            system_prompt,
            messages: vec![("user".to_string(), prompt)],
            max_tokens,
            structured: false,
        }
    }

    async fn run_agent(&self, agent_id: &str, role: &str, request: LlmRequest) -> Result<AgentExecutionResult, ActivityError> {
        self.publish(EventDraft::new(EventType::AgentStarted).with_agent(agent_id)).await;
        let outcome = execute_agent(
            self.provider.as_ref(),
            self.budget.as_ref(),
            self.pricing.as_ref(),
            AgentRequest {
                activity_key: request.activity_key.clone(),
                user_id: self.user_id.clone(),
                session_id: self.session_id.clone(),
                task_id: self.task_id.clone(),
                agent_id: agent_id.to_string(),
                role: role.to_string(),
                llm: request,
            },
        )
        .await;
        match &outcome {
            Ok(_) => self.publish(EventDraft::new(EventType::AgentCompleted).with_agent(agent_id)).await,
            Err(err) => {
                self.publish(EventDraft::new(EventType::AgentFailed).with_agent(agent_id).with_message(err.to_string()))
                    .await
            }
        }
        outcome
    }
}

/// Emits `BUDGET_THRESHOLD` ahead of `WORKFLOW_FAILED` when the failure was
/// a budget denial, then the terminal failure event (spec §4.9).
async fn emit_failure(ctx: &WorkflowContext, err: &ActivityError) {
    if let ActivityError::Orchestra(OrchestraError::BudgetDenied(reason)) = err {
        ctx.publish(EventDraft::new(EventType::BudgetThreshold).with_message(reason.clone())).await;
    }
    ctx.publish(EventDraft::new(EventType::WorkflowFailed).with_message(err.to_string())).await;
}

fn failed_result(err: &ActivityError) -> TaskResult {
    tracing::warn!(error = %err, "workflow step failed");
    TaskResult {
        status: TaskStatus::Failed,
        output: String::new(),
        metadata: TaskResultMetadata::default(),
        citations: None,
    }
}

fn completed_result(output: String, results: &[AgentExecutionResult], citations: Option<Vec<String>>) -> TaskResult {
    TaskResult {
        status: TaskStatus::Completed,
        output,
        metadata: TaskResultMetadata::aggregate(results),
        citations,
    }
}

/// Simple strategy (spec §4.7): a single agent call end to end.
pub async fn run_simple(ctx: &WorkflowContext, query: &str) -> TaskResult {
    ctx.publish(EventDraft::new(EventType::WorkflowStarted)).await;

    let request = ctx.llm_request(ModelTierRequest::Medium, None, query.to_string(), 2_000);
    let result = match ctx.run_agent("agent-1", "worker", request).await {
        Ok(result) => result,
        Err(err) => {
            emit_failure(ctx, &err).await;
            return failed_result(&err);
        }
    };

    ctx.publish(EventDraft::new(EventType::WorkflowCompleted)).await;
    completed_result(result.output.clone(), std::slice::from_ref(&result), None)
}

async fn execute_subtask(ctx: &WorkflowContext, subtask: &Subtask) -> Result<AgentExecutionResult, ActivityError> {
    let max_tokens = subtask.budget_max_tokens.unwrap_or(2_000).min(u32::MAX as u64) as u32;
    let request = ctx.llm_request(ModelTierRequest::Medium, None, subtask.description.clone(), max_tokens);
    ctx.run_agent(&subtask.id, &subtask.assigned_role, request).await
}

/// Shared frontier-execution loop behind both DAG and Supervisor: repeatedly
/// runs every subtask whose dependencies are satisfied, up to `max_parallel`
/// concurrently, until nothing is left runnable.
async fn run_graph(ctx: &WorkflowContext, mut subtasks: HashMap<String, Subtask>, max_parallel: usize, health: &HealthSnapshot) -> TaskResult {
    ctx.publish(EventDraft::new(EventType::WorkflowStarted)).await;

    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_parallel.max(1)));
    let mut results: Vec<AgentExecutionResult> = Vec::new();
    let mut any_failed = false;
    let total = subtasks.len();

    loop {
        let frontier: Vec<String> = subtasks
            .values()
            .filter(|subtask| {
                subtask.status == SubtaskStatus::Pending
                    && subtask.depends_on.iter().all(|dep| {
                        subtasks.get(dep).map(|d| d.status == SubtaskStatus::Completed).unwrap_or(false)
                    })
            })
            .map(|subtask| subtask.id.clone())
            .collect();

        if frontier.is_empty() {
            break;
        }

        for id in &frontier {
            subtasks.get_mut(id).unwrap().status = SubtaskStatus::Running;
        }

        let mut pending = Vec::with_capacity(frontier.len());
        for id in &frontier {
            let subtask = subtasks.get(id).unwrap().clone();
            let ctx = ctx.clone();
            let permit = semaphore.clone();
            pending.push(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                execute_subtask(&ctx, &subtask).await
            });
        }

        let outcomes = futures::future::join_all(pending).await;
        for (id, outcome) in frontier.iter().zip(outcomes) {
            match outcome {
                Ok(result) => {
                    subtasks.get_mut(id).unwrap().status = SubtaskStatus::Completed;
                    results.push(result);
                }
                Err(_) => {
                    subtasks.get_mut(id).unwrap().status = SubtaskStatus::Failed;
                    any_failed = true;
                }
            }
        }

        if any_failed && fallback(Operation::ComplexWorkflow, health) == FallbackAction::Fail {
            break;
        }
    }

    let (_, level) = health.should_degrade();
    let accept_partial = any_failed && should_return_partial(level, results.len(), total, 1.0);

    if any_failed && !accept_partial {
        let err = ActivityError::Orchestra(OrchestraError::Internal(format!(
            "{} of {} subtasks failed",
            total - results.len(),
            total
        )));
        emit_failure(ctx, &err).await;
        return failed_result(&err);
    }

    let outputs: Vec<String> = results.iter().map(|r| r.output.clone()).collect();
    match synthesize(ctx.provider.as_ref(), &ctx.next_activity_key(), &outputs, None).await {
        Ok(answer) => {
            ctx.publish(EventDraft::new(EventType::WorkflowCompleted)).await;
            completed_result(answer, &results, None)
        }
        Err(err) => {
            emit_failure(ctx, &err).await;
            failed_result(&err)
        }
    }
}

/// DAG strategy: bounded-parallel fan-out over subtasks with no supervisory
/// re-planning (spec §4.7).
pub async fn run_dag(ctx: &WorkflowContext, subtasks: Vec<Subtask>, max_parallel: usize, health: &HealthSnapshot) -> TaskResult {
    let by_id = subtasks.into_iter().map(|s| (s.id.clone(), s)).collect();
    run_graph(ctx, by_id, max_parallel, health).await
}

/// Supervisor strategy: the same frontier-execution loop as DAG, but
/// reserved for decompositions with more subtasks or deeper dependency
/// chains than a plain DAG run would take (the router makes that call, not
/// this function — spec §4.5 step 3).
pub async fn run_supervisor(ctx: &WorkflowContext, subtasks: Vec<Subtask>, max_parallel: usize, health: &HealthSnapshot) -> TaskResult {
    let by_id = subtasks.into_iter().map(|s| (s.id.clone(), s)).collect();
    run_graph(ctx, by_id, max_parallel, health).await
}

/// React strategy: bounded reason-act-observe loop (spec §4.7). Halts on an
/// explicit `FINAL:`-prefixed answer, the iteration cap, or a budget denial.
pub async fn run_react(ctx: &WorkflowContext, query: &str, max_iterations: u32) -> TaskResult {
    ctx.publish(EventDraft::new(EventType::WorkflowStarted)).await;

    const SYSTEM_PROMPT: &str =
        "Think step by step. When you have the answer, reply with a line starting `FINAL:` followed by the answer.";

    let mut scratchpad = vec![format!("Query: {query}")];
    let mut results = Vec::new();
    let mut last_text = String::new();

    for iteration in 1..=max_iterations {
        let request = ctx.llm_request(ModelTierRequest::Medium, Some(SYSTEM_PROMPT.to_string()), scratchpad.join("\n"), 1_000);
        let outcome = ctx.run_agent(&format!("react-{iteration}"), "reasoner", request).await;
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                emit_failure(ctx, &err).await;
                return failed_result(&err);
            }
        };

        ctx.publish(EventDraft::new(EventType::AgentProgress).with_message(format!("iteration {iteration}"))).await;
        last_text = result.output.clone();
        let is_final = last_text.trim_start().starts_with("FINAL:");
        results.push(result);

        if is_final {
            ctx.publish(EventDraft::new(EventType::WorkflowCompleted)).await;
            let answer = last_text.trim_start().trim_start_matches("FINAL:").trim().to_string();
            return completed_result(answer, &results, None);
        }

        scratchpad.push(format!("Observation {iteration}: {last_text}"));
    }

    ctx.publish(EventDraft::new(EventType::WorkflowCompleted)).await;
    completed_result(last_text, &results, None)
}

/// Research strategy: decompose, run a search/agent round, score coverage,
/// and loop until the coverage threshold or iteration cap is hit, then
/// synthesize with citations (spec §4.7).
pub async fn run_research(ctx: &WorkflowContext, query: &str, context: &HashMap<String, serde_json::Value>, max_iterations: u32, coverage_threshold: f64) -> TaskResult {
    ctx.publish(EventDraft::new(EventType::WorkflowStarted)).await;

    let decomposition = match decompose_task(ctx.provider.as_ref(), &ctx.next_activity_key(), query, context).await {
        Ok(decomposition) => decomposition,
        Err(err) => {
            emit_failure(ctx, &err).await;
            return failed_result(&err);
        }
    };

    let mut results = Vec::new();
    let mut round_outputs: Vec<String> = Vec::new();
    let mut coverage = 0.0;

    for iteration in 1..=max_iterations {
        let targets: Vec<&Subtask> = decomposition.subtasks.iter().collect();
        for subtask in targets {
            match execute_subtask(ctx, subtask).await {
                Ok(result) => {
                    round_outputs.push(result.output.clone());
                    results.push(result);
                }
                Err(err) => {
                    tracing::warn!(error = %err, subtask = %subtask.id, "research subtask failed, continuing");
                }
            }
        }

        let eval_request = ctx.llm_request(
            ModelTierRequest::Small,
            Some("Score how completely the notes below answer the query, as a single number in [0,1]. Reply with only the number.".to_string()),
            format!("Query: {query}\n\nNotes so far:\n{}", round_outputs.join("\n")),
            20,
        );
        match with_retries(3, || ctx.provider.call(&eval_request)).await {
            Ok(response) => {
                coverage = response.text.trim().parse().unwrap_or(coverage);
            }
            Err(err) => {
                tracing::warn!(error = %err, "coverage scoring failed, keeping previous estimate");
            }
        }

        ctx.publish(
            EventDraft::new(EventType::Synthesis)
                .with_message(format!("round {iteration} coverage {coverage:.2}")),
        )
        .await;

        if coverage >= coverage_threshold {
            break;
        }
    }

    match synthesize(ctx.provider.as_ref(), &ctx.next_activity_key(), &round_outputs, None).await {
        Ok(answer) => {
            ctx.publish(EventDraft::new(EventType::WorkflowCompleted)).await;
            completed_result(answer, &results, Some(vec![]))
        }
        Err(err) => {
            emit_failure(ctx, &err).await;
            failed_result(&err)
        }
    }
}

/// Exploratory strategy: tree-of-thoughts with `branch_factor` branches per
/// level, each scored, keeping only the best path and pruning once a branch
/// scores below the quality floor (spec §4.7).
pub async fn run_exploratory(ctx: &WorkflowContext, query: &str, branch_factor: u32, max_depth: u32) -> TaskResult {
    const PRUNE_FLOOR: f64 = 0.3;

    ctx.publish(EventDraft::new(EventType::WorkflowStarted)).await;

    let mut path = vec![format!("Query: {query}")];
    let mut results = Vec::new();

    for depth in 0..max_depth {
        let mut branches = Vec::with_capacity(branch_factor as usize);
        for branch in 0..branch_factor {
            let request = ctx.llm_request(
                ModelTierRequest::Medium,
                Some(format!("Propose distinct next-step reasoning branch #{branch} for this problem.")),
                path.join("\n"),
                400,
            );
            match ctx.run_agent(&format!("explore-{depth}-{branch}"), "explorer", request).await {
                Ok(result) => branches.push(result),
                Err(err) => tracing::warn!(error = %err, "exploratory branch failed, skipping"),
            }
        }

        if branches.is_empty() {
            break;
        }

        let mut scored = Vec::with_capacity(branches.len());
        for branch in &branches {
            let eval_request = ctx.llm_request(
                ModelTierRequest::Small,
                Some("Score how promising this reasoning branch is toward solving the problem, as a number in [0,1]. Reply with only the number.".to_string()),
                branch.output.clone(),
                10,
            );
            let score = match with_retries(3, || ctx.provider.call(&eval_request)).await {
                Ok(response) => response.text.trim().parse().unwrap_or(0.0),
                Err(_) => 0.0,
            };
            scored.push(score);
        }

        results.extend(branches.iter().cloned());
        let best_index = scored
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(index, _)| index);

        let Some(best_index) = best_index else { break };
        if scored[best_index] < PRUNE_FLOOR {
            break;
        }
        path.push(branches[best_index].output.clone());
    }

    match synthesize(ctx.provider.as_ref(), &ctx.next_activity_key(), &path, None).await {
        Ok(answer) => {
            ctx.publish(EventDraft::new(EventType::WorkflowCompleted)).await;
            completed_result(answer, &results, None)
        }
        Err(err) => {
            emit_failure(ctx, &err).await;
            failed_result(&err)
        }
    }
}

/// Debate strategy: `num_agents` distinct stances argue over `rounds`,
/// each seeing the others' prior-round output, then synthesized into one
/// answer (spec §4.7).
pub async fn run_debate(ctx: &WorkflowContext, topic: &str, num_agents: u32, rounds: u32) -> TaskResult {
    ctx.publish(EventDraft::new(EventType::WorkflowStarted)).await;

    let stances: Vec<String> = (0..num_agents).map(|i| format!("stance-{i}")).collect();
    let mut transcripts: Vec<Vec<String>> = vec![Vec::new(); stances.len()];
    let mut results = Vec::new();

    for round in 0..rounds {
        let mut pending = Vec::with_capacity(stances.len());
        for (index, stance) in stances.iter().enumerate() {
            let ctx = ctx.clone();
            let stance = stance.clone();
            let history = transcripts[index].join("\n");
            let topic = topic.to_string();
            let agent_id = format!("debate-{stance}-r{round}");
            pending.push(async move {
                let request = ctx.llm_request(
                    ModelTierRequest::Medium,
                    Some(format!("You argue the {stance} position. Critique the other side's last point and defend your own.")),
                    format!("Topic: {topic}\n\nTranscript so far:\n{history}"),
                    500,
                );
                (index, ctx.run_agent(&agent_id, "debater", request).await)
            });
        }

        let outcomes = futures::future::join_all(pending).await;
        for (index, outcome) in outcomes {
            if let Ok(result) = outcome {
                transcripts[index].push(result.output.clone());
                results.push(result);
            }
        }
    }

    let combined: Vec<String> = transcripts.into_iter().map(|turns| turns.join("\n")).collect();
    match synthesize(ctx.provider.as_ref(), &ctx.next_activity_key(), &combined, None).await {
        Ok(answer) => {
            ctx.publish(EventDraft::new(EventType::WorkflowCompleted)).await;
            completed_result(answer, &results, None)
        }
        Err(err) => {
            emit_failure(ctx, &err).await;
            failed_result(&err)
        }
    }
}

/// Reflection strategy: an initial answer, then up to `max_iterations`
/// rounds of self-critique and revision, stopping early once a revision
/// stops changing the answer (spec §4.7).
pub async fn run_reflection(ctx: &WorkflowContext, query: &str, max_iterations: u32) -> TaskResult {
    ctx.publish(EventDraft::new(EventType::WorkflowStarted)).await;

    let mut results = Vec::new();
    let initial_request = ctx.llm_request(ModelTierRequest::Medium, None, query.to_string(), 1_500);
    let mut answer = match ctx.run_agent("reflect-0", "writer", initial_request).await {
        Ok(result) => {
            let output = result.output.clone();
            results.push(result);
            output
        }
        Err(err) => {
            emit_failure(ctx, &err).await;
            return failed_result(&err);
        }
    };

    for iteration in 1..=max_iterations {
        let critique_request = ctx.llm_request(
            ModelTierRequest::Medium,
            Some("Critique the answer below. List concrete weaknesses.".to_string()),
            answer.clone(),
            500,
        );
        let critique = match with_retries(3, || ctx.provider.call(&critique_request)).await {
            Ok(response) => response.text,
            Err(err) => {
                tracing::warn!(error = %err, "reflection critique failed, keeping current answer");
                break;
            }
        };
        ctx.publish(EventDraft::new(EventType::Reflection).with_message(critique.clone())).await;

        let revise_request = ctx.llm_request(
            ModelTierRequest::Medium,
            Some("Revise the answer to address this critique.".to_string()),
            format!("Query: {query}\n\nPrevious answer:\n{answer}\n\nCritique:\n{critique}"),
            1_500,
        );
        let revised = match ctx.run_agent(&format!("reflect-{iteration}"), "writer", revise_request).await {
            Ok(result) => {
                let output = result.output.clone();
                results.push(result);
                output
            }
            Err(err) => {
                tracing::warn!(error = %err, "reflection revision failed, keeping current answer");
                break;
            }
        };

        if revised == answer {
            break;
        }
        answer = revised;
    }

    ctx.publish(EventDraft::new(EventType::WorkflowCompleted)).await;
    completed_result(answer, &results, None)
}

/// Wraps any strategy run as a scheduled-task execution: enforces the
/// schedule's `Active` status and per-run budget cap before the workflow
/// starts, then records the resulting cost and status against the
/// schedule once it finishes (spec §4.7 "scheduled task wrapper", spec
/// §4.7 "per-user schedule cap and per-run budget cap are enforced before
/// start").
pub async fn run_scheduled<F, Fut>(
    schedule_repo: &dyn orc_schedule::ScheduleRepository,
    schedule_id: uuid::Uuid,
    budget: &BudgetManager,
    task_id: &str,
    clock: &dyn Clock,
    run: F,
) -> TaskResult
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = TaskResult>,
{
    let started_at = clock.now();

    let schedule = match schedule_repo.get(schedule_id).await {
        Ok(schedule) => schedule,
        Err(err) => {
            tracing::warn!(%schedule_id, error = %err, "scheduled run denied: schedule lookup failed");
            return failed_result(&ActivityError::Orchestra(OrchestraError::BudgetDenied(format!(
                "schedule {schedule_id} not found: {err}"
            ))));
        }
    };

    if schedule.status != orc_types::schedule::ScheduleStatus::Active {
        tracing::warn!(%schedule_id, status = ?schedule.status, "scheduled run denied: schedule not active");
        return failed_result(&ActivityError::Orchestra(OrchestraError::BudgetDenied(
            "schedule is not active".to_string(),
        )));
    }

    let cap_tokens = (schedule.max_budget_usd / orc_pricing::FALLBACK_USD_PER_TOKEN).max(0.0) as u64;
    budget.set_task_limit(task_id, cap_tokens).await;

    let result = run().await;
    if let Err(err) = orc_schedule::record_schedule_execution(schedule_repo, schedule_id, result.status, result.metadata.cost_usd, started_at).await {
        tracing::warn!(error = %err, "failed to record scheduled execution");
    }
    result
}

/// In-process fakes and a deterministic context builder for workflow tests
/// (spec §10.4): no real runtime, no real model, no wall-clock waits.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use orc_activities::testing::{FakeModelProvider, FakeToolRunner};
    use orc_budget::BudgetManagerConfig;
    use orc_eventbus::EventBusConfig;
    use orc_pricing::PricingCatalog;

    pub fn test_context(workflow_id: &str, fixed_text: impl Into<String>) -> WorkflowContext {
        WorkflowContext::new(
            workflow_id,
            "user-1",
            "session-1",
            "task-1",
            Arc::new(FakeModelProvider::new(fixed_text)),
            Arc::new(FakeToolRunner::new()),
            Arc::new(BudgetManager::new(BudgetManagerConfig::default(), PricingCatalog::new(vec![]))),
            Arc::new(PricingCatalog::new(vec![])),
            Arc::new(EventBus::new(EventBusConfig::default())),
            Arc::new(DeterministicClock::new(chrono::Utc::now())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::test_context;
    use super::*;
    use orc_types::task::Subtask;

    #[tokio::test]
    async fn simple_workflow_completes_with_single_agent_output() {
        let ctx = test_context("wf-simple", "the answer");
        let result = run_simple(&ctx, "what is it?").await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.output, "the answer");
        assert_eq!(result.metadata.num_agents, 1);
    }

    #[tokio::test]
    async fn dag_workflow_executes_independent_subtasks_and_synthesizes() {
        let ctx = test_context("wf-dag", "partial result");
        let a = Subtask::new("t1", "a");
        let mut b = Subtask::new("t1", "b");
        b.depends_on.insert(a.id.clone());
        let health = HealthSnapshot::default();

        let result = run_dag(&ctx, vec![a, b], 2, &health).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.metadata.num_agents, 2);
    }

    #[tokio::test]
    async fn react_workflow_halts_on_final_marker() {
        let ctx = test_context("wf-react", "FINAL: done thinking");
        let result = run_react(&ctx, "solve it", 5).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.output, "done thinking");
        assert_eq!(result.metadata.num_agents, 1);
    }

    #[tokio::test]
    async fn react_workflow_reaches_iteration_cap_without_final_marker() {
        let ctx = test_context("wf-react-cap", "still thinking");
        let result = run_react(&ctx, "solve it", 3).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.metadata.num_agents, 3);
    }

    #[tokio::test]
    async fn reflection_workflow_stops_early_once_revision_converges() {
        let ctx = test_context("wf-reflect", "same answer every time");
        let result = run_reflection(&ctx, "explain it", 5).await;
        assert_eq!(result.status, TaskStatus::Completed);
        // Initial answer plus exactly one revision attempt before convergence is detected.
        assert_eq!(result.metadata.num_agents, 2);
    }

    #[tokio::test]
    async fn debate_workflow_synthesizes_across_all_stances() {
        let ctx = test_context("wf-debate", "argument");
        let result = run_debate(&ctx, "is x good", 2, 2).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.metadata.num_agents, 4);
    }

    #[tokio::test]
    async fn exploratory_workflow_synthesizes_best_path() {
        let ctx = test_context("wf-exploratory", "0.9");
        let result = run_exploratory(&ctx, "plan a trip", 2, 2).await;
        assert_eq!(result.status, TaskStatus::Completed);
    }
}
