//! Idempotent activity contracts (spec §4.6).
//!
//! Every activity here is keyed by a caller-provided `activity_key` derived
//! from `workflow_id:step_index`, mirroring `BudgetManager`'s idempotency
//! set. Activities call out through narrow traits (`ModelProvider`,
//! `ToolRunner`, `MemoryStore`) rather than hard-coding a provider, the way
//! the host's `Provider`/`Tool` traits decouple orchestration from any one
//! backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use orc_budget::BudgetManager;
use orc_pricing::PricingCatalog;
use orc_types::error::OrchestraError;
use orc_types::task::{validate_dag, Subtask};
use orc_types::usage::UsageRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error(transparent)]
    Orchestra(#[from] OrchestraError),
    #[error("budget error: {0}")]
    Budget(#[from] orc_budget::BudgetError),
    #[error("non-JSON response from model after {attempts} attempts")]
    NonJsonResponse { attempts: u32 },
    #[error("activity timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ActivityError> for OrchestraError {
    fn from(err: ActivityError) -> Self {
        match err {
            ActivityError::Orchestra(inner) => inner,
            ActivityError::Budget(orc_budget::BudgetError::Overflow(session)) => {
                OrchestraError::Overflow(session)
            }
            ActivityError::NonJsonResponse { attempts } => {
                OrchestraError::Provider(format!("non-JSON response after {attempts} attempts"))
            }
            ActivityError::Timeout(duration) => OrchestraError::Timeout(duration),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTierRequest {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub activity_key: String,
    pub tier: ModelTierRequest,
    pub system_prompt: Option<String>,
    pub messages: Vec<(String, String)>,
    pub max_tokens: u32,
    pub structured: bool,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
    pub provider: String,
    pub finish_reason: String,
    pub cost: f64,
}

/// Narrow adapter over whatever model backend is actually wired in; the
/// activity layer only ever sees this trait, never a concrete SDK client.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ActivityError>;
    fn is_transient_error(&self, error: &ActivityError) -> bool {
        matches!(error, ActivityError::Orchestra(OrchestraError::TransientUpstream(_)))
    }
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: Value,
    pub duration: Duration,
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn execute(&self, name: &str, params: Value, timeout: Duration) -> Result<ToolResult, ActivityError>;
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

#[async_trait]
pub trait WebProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ActivityError>;
    async fn fetch(&self, url: &str) -> Result<String, ActivityError>;
}

#[derive(Debug, Clone)]
pub struct MemoryChunk {
    pub text: String,
    pub score: f64,
    pub source: String,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn record_query(&self, text: &str, metadata: HashMap<String, Value>) -> Result<(), ActivityError>;
    async fn retrieve(&self, query: &str, top_k: usize, mmr_diversity: bool) -> Result<Vec<MemoryChunk>, ActivityError>;
}

/// Retries `operation` with exponential backoff, capped at `max_attempts`,
/// only when the error is transient per spec §4.9.
pub async fn with_retries<T, F, Fut>(max_attempts: u32, mut operation: F) -> Result<T, ActivityError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ActivityError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                let backoff_ms = 2u64.saturating_pow(attempt) * 100;
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_retryable(err: &ActivityError) -> bool {
    matches!(err, ActivityError::Orchestra(OrchestraError::TransientUpstream(_)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposeOutput {
    pub subtasks: Vec<Subtask>,
    pub complexity_score: f64,
    pub total_tokens: u64,
}

/// `decompose_task` (spec §4.6): structured-mode call at medium tier, max
/// 16k tokens, doubled (capped 32k) on a length-limit finish, bounded
/// retries on non-JSON output, DAG validation on the result.
pub async fn decompose_task(
    provider: &dyn ModelProvider,
    activity_key: &str,
    query: &str,
    context: &HashMap<String, Value>,
) -> Result<DecomposeOutput, ActivityError> {
    const INITIAL_MAX_TOKENS: u32 = 16_000;
    const CAPPED_MAX_TOKENS: u32 = 32_000;
    const MAX_JSON_RETRIES: u32 = 3;

    let mut max_tokens = INITIAL_MAX_TOKENS;
    let mut last_response: Option<LlmResponse> = None;

    for attempt in 1..=MAX_JSON_RETRIES {
        let request = LlmRequest {
            activity_key: activity_key.to_string(),
            tier: ModelTierRequest::Medium,
            system_prompt: Some("Decompose the task into a JSON array of subtasks.".to_string()),
            messages: vec![("user".to_string(), query.to_string())],
            max_tokens,
            structured: true,
        };
        let response = with_retries(3, || provider.call(&request)).await?;

        if response.finish_reason == "length" && max_tokens < CAPPED_MAX_TOKENS {
            max_tokens = CAPPED_MAX_TOKENS;
            last_response = Some(response);
            continue;
        }

        match serde_json::from_str::<Vec<Subtask>>(&response.text) {
            Ok(subtasks) => {
                validate_dag(&subtasks)?;
                let complexity_score = context
                    .get("complexity_hint")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.5);
                return Ok(DecomposeOutput {
                    subtasks,
                    complexity_score,
                    total_tokens: response.input_tokens + response.output_tokens,
                });
            }
            Err(_) => {
                last_response = Some(response);
                if attempt == MAX_JSON_RETRIES {
                    return Err(ActivityError::NonJsonResponse { attempts: attempt });
                }
            }
        }
    }

    let _ = last_response;
    Err(ActivityError::NonJsonResponse {
        attempts: MAX_JSON_RETRIES,
    })
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub activity_key: String,
    pub user_id: String,
    pub session_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub role: String,
    pub llm: LlmRequest,
}

/// `execute_agent` (spec §4.6): admit, call the model, record usage under
/// the activity key, and surface a typed `AgentExecutionResult`.
pub async fn execute_agent(
    provider: &dyn ModelProvider,
    budget: &BudgetManager,
    pricing: &PricingCatalog,
    request: AgentRequest,
) -> Result<orc_types::agent::AgentExecutionResult, ActivityError> {
    let estimated_tokens = request.llm.max_tokens as u64;
    let admission = budget
        .admit(&request.user_id, &request.session_id, &request.task_id, estimated_tokens)
        .await;
    if !admission.can_proceed {
        return Err(ActivityError::Orchestra(OrchestraError::BudgetDenied(
            admission.reason.unwrap_or_else(|| "admission denied".to_string()),
        )));
    }

    let started = std::time::Instant::now();
    let response = with_retries(3, || provider.call(&request.llm)).await?;
    let cost = pricing.cost(&response.model, response.input_tokens, response.output_tokens);

    budget
        .record(UsageRecord {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            task_id: Some(request.task_id.clone()),
            agent_id: request.agent_id.clone(),
            model: response.model.clone(),
            provider: response.provider.clone(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost_usd: cost,
            timestamp: chrono::Utc::now(),
            idempotency_key: Some(request.activity_key.clone()),
        })
        .await?;

    Ok(orc_types::agent::AgentExecutionResult {
        agent_id: request.agent_id,
        role: request.role,
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        model: response.model,
        provider: response.provider,
        cost_usd: cost,
        duration_ms: started.elapsed().as_millis() as u64,
        success: true,
        error: None,
        output: response.text,
        citations: vec![],
    })
}

/// `call_llm` (spec §4.6): thin retrying wrapper; tier-specific timeouts
/// are the caller's responsibility via `tokio::time::timeout`.
pub async fn call_llm(provider: &dyn ModelProvider, request: &LlmRequest, timeout: Duration) -> Result<LlmResponse, ActivityError> {
    tokio::time::timeout(timeout, with_retries(3, || provider.call(request)))
        .await
        .map_err(|_| ActivityError::Timeout(timeout))?
}

/// `execute_tool` (spec §4.6): per-tool timeout, default 30s.
pub async fn execute_tool(runner: &dyn ToolRunner, name: &str, params: Value) -> Result<ToolResult, ActivityError> {
    const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
    runner.execute(name, params, DEFAULT_TOOL_TIMEOUT).await
}

/// `web_search`/`web_fetch` with simple URL-based deduplication (spec §4.6).
pub async fn web_search(web: &dyn WebProvider, query: &str) -> Result<Vec<SearchResult>, ActivityError> {
    let mut results = web.search(query).await?;
    let mut seen = std::collections::HashSet::new();
    results.retain(|result| seen.insert(result.url.clone()));
    Ok(results)
}

pub async fn web_fetch(web: &dyn WebProvider, url: &str) -> Result<String, ActivityError> {
    web.fetch(url).await
}

pub async fn record_query(memory: &dyn MemoryStore, text: &str, metadata: HashMap<String, Value>) -> Result<(), ActivityError> {
    memory.record_query(text, metadata).await
}

pub async fn retrieve_memory(memory: &dyn MemoryStore, query: &str, top_k: usize, mmr_diversity: bool) -> Result<Vec<MemoryChunk>, ActivityError> {
    memory.retrieve(query, top_k, mmr_diversity).await
}

const CITATION_RULES_SUFFIX: &str = "\n\n## Citation rules\nEvery factual claim must cite its source inline as [n], matching the numbered source list.";

/// `synthesize` (spec §4.6, Open Question resolution in SPEC_FULL.md): a
/// `synthesis_template_override` replaces the template body but the
/// citation-rules suffix is always appended unless the override already
/// has its own case-insensitive "citation" heading.
pub async fn synthesize(
    provider: &dyn ModelProvider,
    activity_key: &str,
    subtask_outputs: &[String],
    template_override: Option<&str>,
) -> Result<String, ActivityError> {
    let body = subtask_outputs.join("\n\n");
    let system_prompt = match template_override {
        Some(template) if template.to_lowercase().contains("citation") => template.to_string(),
        Some(template) => format!("{template}{CITATION_RULES_SUFFIX}"),
        None => format!("Synthesize a final answer from the following subtask results.{CITATION_RULES_SUFFIX}"),
    };

    let request = LlmRequest {
        activity_key: activity_key.to_string(),
        tier: ModelTierRequest::Large,
        system_prompt: Some(system_prompt),
        messages: vec![("user".to_string(), body)],
        max_tokens: 8_000,
        structured: false,
    };
    let response = with_retries(3, || provider.call(&request)).await?;
    Ok(response.text)
}

/// `checkpoint`/`restore` (spec §4.6, §4.8): the workflow state is
/// serialized to JSON bytes, then compressed and checksummed via
/// `orc_types::Checkpoint`.
pub fn checkpoint(workflow_id: &str, seq_at_checkpoint: u64, state: &Value) -> Result<orc_types::checkpoint::Checkpoint, ActivityError> {
    let raw = serde_json::to_vec(state).map_err(|e| ActivityError::Orchestra(OrchestraError::Internal(e.to_string())))?;
    orc_types::checkpoint::Checkpoint::encode(workflow_id, seq_at_checkpoint, &raw)
        .map_err(|e| ActivityError::Orchestra(OrchestraError::Internal(e.to_string())))
}

pub fn restore(snapshot: &orc_types::checkpoint::Checkpoint) -> Result<Value, ActivityError> {
    let raw = snapshot
        .decode()
        .map_err(|e| ActivityError::Orchestra(OrchestraError::Internal(e.to_string())))?;
    serde_json::from_slice(&raw).map_err(|e| ActivityError::Orchestra(OrchestraError::Internal(e.to_string())))
}

/// In-process fakes for the external collaborators §1 puts out of scope,
/// so workflow and activity tests run deterministically without a real
/// model provider, tool sandbox, or search index.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Mutex;

    pub struct FakeModelProvider {
        pub fixed_text: String,
        pub finish_reason: String,
        pub calls: AtomicU64,
        pub last_system_prompt: Mutex<Option<String>>,
    }

    impl FakeModelProvider {
        pub fn new(fixed_text: impl Into<String>) -> Self {
            Self {
                fixed_text: fixed_text.into(),
                finish_reason: "stop".to_string(),
                calls: AtomicU64::new(0),
                last_system_prompt: Mutex::new(None),
            }
        }

        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelProvider for FakeModelProvider {
        async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ActivityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_system_prompt.lock().await = request.system_prompt.clone();
            Ok(LlmResponse {
                text: self.fixed_text.clone(),
                input_tokens: 100,
                output_tokens: 50,
                model: "fake-model".to_string(),
                provider: "fake".to_string(),
                finish_reason: self.finish_reason.clone(),
                cost: 0.0,
            })
        }
    }

    pub struct FakeToolRunner {
        pub responses: Mutex<HashMap<String, Value>>,
    }

    impl FakeToolRunner {
        pub fn new() -> Self {
            Self { responses: Mutex::new(HashMap::new()) }
        }

        pub async fn stub(&self, name: impl Into<String>, output: Value) {
            self.responses.lock().await.insert(name.into(), output);
        }
    }

    impl Default for FakeToolRunner {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ToolRunner for FakeToolRunner {
        async fn execute(&self, name: &str, _params: Value, _timeout: Duration) -> Result<ToolResult, ActivityError> {
            let responses = self.responses.lock().await;
            let output = responses.get(name).cloned().unwrap_or(Value::Null);
            Ok(ToolResult { output, duration: Duration::from_millis(1) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::FakeModelProvider;

    fn subtask_json(id: &str, depends_on: &[&str]) -> String {
        format!(
            r#"{{"id":"{id}","parent_task_id":"t1","description":"{id}","depends_on":{deps},"assigned_role":"worker","strategy":"dag","status":"pending"}}"#,
            deps = serde_json::to_string(depends_on).unwrap(),
        )
    }

    #[tokio::test]
    async fn decompose_task_rejects_cycles() {
        let body = format!("[{},{}]", subtask_json("a", &["b"]), subtask_json("b", &["a"]));
        let provider = FakeModelProvider::new(body);
        let result = decompose_task(&provider, "wf-1:0", "do it", &HashMap::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn decompose_task_parses_valid_dag() {
        let body = format!("[{}]", subtask_json("a", &[]));
        let provider = FakeModelProvider::new(body);
        let result = decompose_task(&provider, "wf-1:0", "do it", &HashMap::new()).await.unwrap();
        assert_eq!(result.subtasks.len(), 1);
    }

    #[tokio::test]
    async fn synthesize_appends_citation_suffix_to_override() {
        let provider = FakeModelProvider::new("final answer");
        synthesize(&provider, "wf-1:5", &["a".to_string()], Some("Be concise.")).await.unwrap();
        let prompt = provider.last_system_prompt.lock().await.clone().unwrap();
        assert!(prompt.starts_with("Be concise."));
        assert!(prompt.to_lowercase().contains("citation"));
    }

    #[tokio::test]
    async fn synthesize_skips_suffix_when_override_already_has_citation_rules() {
        let provider = FakeModelProvider::new("final answer");
        synthesize(&provider, "wf-1:5", &["a".to_string()], Some("Follow this Citation style: [n].")).await.unwrap();
        let prompt = provider.last_system_prompt.lock().await.clone().unwrap();
        assert_eq!(prompt, "Follow this Citation style: [n].");
    }

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let state = serde_json::json!({"iteration": 3});
        let snapshot = checkpoint("wf-1", 10, &state).unwrap();
        let restored = restore(&snapshot).unwrap();
        assert_eq!(restored, state);
    }
}
