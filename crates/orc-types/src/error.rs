use thiserror::Error;

/// Shared top-level error taxonomy for the orchestration core (spec §7).
///
/// Crate-local error enums convert into this at crate boundaries the same
/// way the host's `MemoryError`/`DocumentError` convert into `TandemError`.
#[derive(Error, Debug, Clone)]
pub enum OrchestraError {
    /// Malformed input: bad cron expression, dependency cycle, unknown template.
    /// Not retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Admission refused: projected usage over limit, circuit open, or approval required.
    /// Not retried; emits BUDGET_THRESHOLD.
    #[error("budget denied: {0}")]
    BudgetDenied(String),

    /// Network/5xx/timeout/429 from a model or tool provider. Retried with
    /// backoff inside the activity; surfaces here only once retries are exhausted.
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// Model returned invalid structured output or was length-truncated
    /// after retrying with an adjusted max token count.
    #[error("provider error: {0}")]
    Provider(String),

    /// Cooperative cancellation signal observed by an activity or workflow.
    #[error("cancelled")]
    Cancelled,

    /// A deadline elapsed before the operation completed.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// A token counter would overflow its integer representation.
    #[error("token counter overflow: {0}")]
    Overflow(String),

    /// Assertion violation / invariant broken; always a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestraError {
    /// True for errors spec §7 classifies as retryable by the activity layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestraError::TransientUpstream(_))
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_transient()
    }
}

pub type Result<T> = std::result::Result<T, OrchestraError>;
