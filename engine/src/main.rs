//! CLI harness for the orchestration core.
//!
//! The durable execution runtime, the HTTP/gRPC gateway, and authentication
//! all live outside this crate's scope; this binary wires the core modules
//! in-process and exercises the submit/control/subscribe/schedule surface
//! directly from the command line.

mod provider;
mod schedule_store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use orc_activities::{ActivityError, ToolResult, ToolRunner};
use orc_budget::{BudgetManager, BudgetManagerConfig};
use orc_degradation::HealthSnapshot;
use orc_eventbus::{EventBus, EventBusConfig};
use orc_pricing::PricingCatalog;
use orc_router::{AnalyzerInput, DecompositionShape, RouteContext, Strategy};
use orc_schedule::{create_schedule, delete_schedule, pause_schedule, resume_schedule, ScheduleLimits, ScheduleRepository};
use orc_types::task::Subtask;
use orc_types::wire::{CognitiveStrategy, Mode, TaskResult};
use orc_workflows::{RealClock, WorkflowContext};
use provider::HttpModelProvider;
use schedule_store::FileScheduleRepository;
use serde_json::Value;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "orc-engine", version, about = "Orchestration core CLI harness")]
struct Cli {
    /// Directory holding config.yaml, logs/, and schedules.json.
    #[arg(long, env = "ORCHESTRA_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task end to end and print its TaskResult as JSON.
    Submit {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        query: String,
        #[arg(long, value_enum)]
        mode: Option<CliMode>,
        #[arg(long, value_enum)]
        strategy: Option<CliStrategy>,
        /// Base URL of an OpenAI-compatible chat completions endpoint.
        #[arg(long, env = "ORCHESTRA_PROVIDER_URL", default_value = "http://localhost:11434/v1")]
        provider_url: String,
        #[arg(long, env = "ORCHESTRA_PROVIDER_API_KEY")]
        provider_api_key: Option<String>,
        #[arg(long, env = "ORCHESTRA_SMALL_MODEL", default_value = "small")]
        small_model: String,
        #[arg(long, env = "ORCHESTRA_MEDIUM_MODEL", default_value = "medium")]
        medium_model: String,
        #[arg(long, env = "ORCHESTRA_LARGE_MODEL", default_value = "large")]
        large_model: String,
    },
    /// Schedule management (spec §6 create/list/pause/resume/delete).
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    Create {
        #[arg(long)]
        user_id: String,
        #[arg(long, default_value = "default")]
        tenant_id: String,
        #[arg(long)]
        cron: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 1.0)]
        max_budget_usd: f64,
    },
    List {
        #[arg(long)]
        user_id: String,
    },
    Pause {
        #[arg(long)]
        id: Uuid,
    },
    Resume {
        #[arg(long)]
        id: Uuid,
    },
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Simple,
    Standard,
    Complex,
}

impl From<CliMode> for Mode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Simple => Mode::Simple,
            CliMode::Standard => Mode::Standard,
            CliMode::Complex => Mode::Complex,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliStrategy {
    React,
    Research,
    Exploratory,
    Debate,
    Swarm,
}

impl From<CliStrategy> for CognitiveStrategy {
    fn from(strategy: CliStrategy) -> Self {
        match strategy {
            CliStrategy::React => CognitiveStrategy::React,
            CliStrategy::Research => CognitiveStrategy::Research,
            CliStrategy::Exploratory => CognitiveStrategy::Exploratory,
            CliStrategy::Debate => CognitiveStrategy::Debate,
            CliStrategy::Swarm => CognitiveStrategy::Swarm,
        }
    }
}

/// No sandbox/tool execution service is wired up (spec §1 non-goal); a
/// submit that reaches for a tool fails cleanly instead of silently no-op'ing.
struct UnconfiguredToolRunner;

#[async_trait::async_trait]
impl ToolRunner for UnconfiguredToolRunner {
    async fn execute(&self, name: &str, _params: Value, _timeout: Duration) -> Result<ToolResult, ActivityError> {
        Err(ActivityError::Orchestra(orc_types::error::OrchestraError::Validation(format!(
            "no tool runner configured for `{name}`"
        ))))
    }
}

fn resolve_state_dir(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value.unwrap_or_else(|| dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("orchestra"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = resolve_state_dir(cli.state_dir);
    tokio::fs::create_dir_all(&state_dir).await?;

    let logs_dir = orc_observability::canonical_logs_dir_from_root(&state_dir);
    let _guard = orc_observability::init_process_logging(orc_observability::ProcessKind::Engine, &logs_dir)?;

    let config = orc_config::OrchestraConfig::load(state_dir.join("config.yaml")).await?;

    match cli.command {
        Command::Submit {
            user_id,
            session_id,
            query,
            mode,
            strategy,
            provider_url,
            provider_api_key,
            small_model,
            medium_model,
            large_model,
        } => {
            let result = submit(
                &config,
                &user_id,
                session_id.as_deref(),
                &query,
                mode.map(Mode::from),
                strategy.map(CognitiveStrategy::from),
                &provider_url,
                provider_api_key,
                &small_model,
                &medium_model,
                &large_model,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Schedule { action } => {
            let repo = FileScheduleRepository::open(state_dir.join("schedules.json")).await?;
            let limits = ScheduleLimits {
                min_interval_secs: config.schedule.min_interval_secs,
                max_schedules_per_user: config.schedule.max_schedules_per_user,
            };
            handle_schedule_action(&repo, &limits, action).await?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn submit(
    config: &orc_config::OrchestraConfig,
    user_id: &str,
    session_id: Option<&str>,
    query: &str,
    mode: Option<Mode>,
    cognitive_strategy: Option<CognitiveStrategy>,
    provider_url: &str,
    provider_api_key: Option<String>,
    small_model: &str,
    medium_model: &str,
    large_model: &str,
) -> anyhow::Result<TaskResult> {
    let pricing = Arc::new(PricingCatalog::new(vec![]));
    let budget = Arc::new(BudgetManager::new(
        BudgetManagerConfig {
            default_task_limit: config.budget.default_task_limit,
            default_session_limit: config.budget.default_session_limit,
            task_hard_limit: config.budget.task_hard_limit,
            session_hard_limit: config.budget.session_hard_limit,
            backpressure: orc_budget::BackpressureSchedule {
                threshold: config.budget.backpressure_threshold,
                delays_ms: config.budget.backpressure_delays_ms.clone(),
                max_delay_ms: config.budget.backpressure_max_delay_ms,
            },
            circuit_breaker: orc_budget::CircuitBreakerConfig {
                failure_threshold: config.budget.circuit_breaker_failure_threshold,
                success_threshold: config.budget.circuit_breaker_success_threshold,
                cooldown: Duration::from_secs(config.budget.circuit_breaker_cooldown_secs),
            },
            idempotency_ttl: Duration::from_secs(config.budget.idempotency_ttl_secs),
        },
        (*pricing).clone(),
    ));
    let events = Arc::new(EventBus::new(EventBusConfig {
        ring_size: config.event_bus.ring_size,
        heartbeat_interval: Duration::from_secs(config.event_bus.heartbeat_interval_secs),
        subscriber_lag_threshold: config.event_bus.subscriber_lag_threshold,
    }));
    let provider = Arc::new(HttpModelProvider::new(
        "cli-provider",
        provider_url,
        provider_api_key,
        small_model,
        medium_model,
        large_model,
    ));
    let tools = Arc::new(UnconfiguredToolRunner);

    let task_id = Uuid::new_v4().to_string();
    let workflow_id = format!("wf-{task_id}");
    let ctx = WorkflowContext::new(
        workflow_id,
        user_id.to_string(),
        session_id.unwrap_or(&task_id).to_string(),
        task_id,
        provider.clone(),
        tools,
        budget,
        pricing,
        events,
        Arc::new(RealClock),
    );

    let score = orc_router::analyze(&AnalyzerInput { query, has_tool_hints: false, historical_complexity_bias: 0.0 });
    let strategy = orc_router::route(
        score,
        &DecompositionShape::default(),
        &RouteContext { mode, cognitive_strategy },
    );

    let result = match strategy {
        Strategy::Simple => orc_workflows::run_simple(&ctx, query).await,
        Strategy::Dag | Strategy::Supervisor => {
            let decomposition =
                orc_activities::decompose_task(provider.as_ref(), &ctx.next_activity_key(), query, &HashMap::new()).await;
            match decomposition {
                Ok(output) => run_graph_strategy(&ctx, strategy, output.subtasks, config.workflows.dag_max_parallel).await,
                Err(err) => fallback_simple_on_decompose_failure(&ctx, query, &err).await,
            }
        }
        Strategy::React => orc_workflows::run_react(&ctx, query, config.workflows.react_max_iterations).await,
        Strategy::Research => {
            orc_workflows::run_research(
                &ctx,
                query,
                &HashMap::new(),
                config.workflows.research_max_iterations,
                config.workflows.research_coverage_threshold,
            )
            .await
        }
        Strategy::Exploratory => {
            orc_workflows::run_exploratory(
                &ctx,
                query,
                config.workflows.exploratory_branch_factor,
                config.workflows.exploratory_max_depth,
            )
            .await
        }
        Strategy::Debate => {
            orc_workflows::run_debate(&ctx, query, config.workflows.debate_min_agents, config.workflows.debate_rounds).await
        }
        Strategy::Reflection => orc_workflows::run_reflection(&ctx, query, config.workflows.reflection_max_iterations).await,
    };

    Ok(result)
}

async fn run_graph_strategy(ctx: &WorkflowContext, strategy: Strategy, subtasks: Vec<Subtask>, max_parallel: usize) -> TaskResult {
    let health = HealthSnapshot::default();
    match strategy {
        Strategy::Supervisor => orc_workflows::run_supervisor(ctx, subtasks, max_parallel, &health).await,
        _ => orc_workflows::run_dag(ctx, subtasks, max_parallel, &health).await,
    }
}

/// `decompose_task` failing (non-JSON output, DAG cycle) is itself a
/// plausible outcome against a small local model; fall back to Simple
/// rather than failing the whole submission.
async fn fallback_simple_on_decompose_failure(ctx: &WorkflowContext, query: &str, err: &ActivityError) -> TaskResult {
    tracing::warn!(error = %err, "decomposition failed, falling back to the simple strategy");
    orc_workflows::run_simple(ctx, query).await
}

async fn handle_schedule_action(
    repo: &FileScheduleRepository,
    limits: &ScheduleLimits,
    action: ScheduleAction,
) -> anyhow::Result<()> {
    match action {
        ScheduleAction::Create { user_id, tenant_id, cron, query, max_budget_usd } => {
            let mut template = HashMap::new();
            template.insert("query".to_string(), Value::String(query));
            let schedule = create_schedule(repo, limits, &user_id, &tenant_id, &cron, template, max_budget_usd).await?;
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        ScheduleAction::List { user_id } => {
            let schedules = repo.list_for_user(&user_id).await;
            println!("{}", serde_json::to_string_pretty(&schedules)?);
        }
        ScheduleAction::Pause { id } => pause_schedule(repo, id).await?,
        ScheduleAction::Resume { id } => resume_schedule(repo, id).await?,
        ScheduleAction::Delete { id } => delete_schedule(repo, id).await?,
    }
    Ok(())
}
