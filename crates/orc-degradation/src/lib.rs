//! Dependency health aggregation and graceful-degradation policy (spec §4.4).
//!
//! Decisions here must be produced by an activity, never computed directly
//! inside workflow code, so replays reproduce the same mode: callers pass in
//! the timestamp the workflow recorded rather than reading the clock here.

use orc_types::wire::Mode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    ModelService,
    ToolService,
    KvCache,
    RelationalStore,
    VectorStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeLevel {
    None,
    Minor,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    Proceed,
    Degrade,
    Cache,
    Skip,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SessionWrite,
    LlmCall,
    ComplexWorkflow,
    ToolCall,
    MemoryRetrieve,
}

#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub down: Vec<Dependency>,
}

impl HealthSnapshot {
    pub fn is_down(&self, dependency: Dependency) -> bool {
        self.down.contains(&dependency)
    }

    /// `(should_degrade, level)` derived from the count of unhealthy
    /// dependencies: 1 -> minor, 2 -> moderate, >=3 -> severe.
    pub fn should_degrade(&self) -> (bool, DegradeLevel) {
        let level = match self.down.len() {
            0 => DegradeLevel::None,
            1 => DegradeLevel::Minor,
            2 => DegradeLevel::Moderate,
            _ => DegradeLevel::Severe,
        };
        (level != DegradeLevel::None, level)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeDecision {
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub decided_at: chrono::DateTime<chrono::Utc>,
}

/// Fixed downgrade table (spec §4.4). Applying it twice at the same level
/// is a no-op past the first application (mode monotonicity, spec §8).
pub fn recommended_mode(level: DegradeLevel, original: Mode, decided_at: chrono::DateTime<chrono::Utc>) -> ModeDecision {
    let final_mode = match (level, original) {
        (DegradeLevel::None, mode) => mode,
        (DegradeLevel::Minor, Mode::Complex) => Mode::Standard,
        (DegradeLevel::Minor, mode) => mode,
        (DegradeLevel::Moderate, Mode::Complex) => Mode::Standard,
        (DegradeLevel::Moderate, Mode::Standard) => Mode::Simple,
        (DegradeLevel::Moderate, mode) => mode,
        (DegradeLevel::Severe, _) => Mode::Simple,
    };
    let reason = (final_mode != original).then(|| format!("downgraded from {original:?} under {level:?} degradation"));
    ModeDecision { mode: final_mode, reason, decided_at }
}

/// Per-operation fallback rules (spec §4.4 examples, extended to every
/// dependency/operation pair).
pub fn fallback(operation: Operation, health: &HealthSnapshot) -> FallbackAction {
    match operation {
        Operation::SessionWrite => {
            if health.is_down(Dependency::RelationalStore) {
                FallbackAction::Degrade
            } else if health.is_down(Dependency::KvCache) {
                FallbackAction::Proceed
            } else {
                FallbackAction::Proceed
            }
        }
        Operation::LlmCall => {
            if health.is_down(Dependency::ModelService) {
                FallbackAction::Cache
            } else {
                FallbackAction::Proceed
            }
        }
        Operation::ComplexWorkflow => {
            let (should_degrade, level) = health.should_degrade();
            if should_degrade && matches!(level, DegradeLevel::Moderate | DegradeLevel::Severe) {
                FallbackAction::Degrade
            } else {
                FallbackAction::Proceed
            }
        }
        Operation::ToolCall => {
            if health.is_down(Dependency::ToolService) {
                FallbackAction::Skip
            } else {
                FallbackAction::Proceed
            }
        }
        Operation::MemoryRetrieve => {
            if health.is_down(Dependency::VectorStore) {
                FallbackAction::Skip
            } else {
                FallbackAction::Proceed
            }
        }
    }
}

/// Whether a workflow in flight should accept a partial result rather than
/// fail outright, per the level-specific thresholds in spec §4.4.
pub fn should_return_partial(level: DegradeLevel, success_count: usize, total: usize, normal_threshold: f64) -> bool {
    if total == 0 {
        return false;
    }
    let ratio = success_count as f64 / total as f64;
    match level {
        DegradeLevel::None => ratio >= normal_threshold,
        DegradeLevel::Minor => success_count >= 1,
        DegradeLevel::Moderate => ratio >= 0.25,
        DegradeLevel::Severe => success_count >= 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(down: &[Dependency]) -> HealthSnapshot {
        HealthSnapshot { down: down.to_vec() }
    }

    #[test]
    fn degrade_level_scales_with_outage_count() {
        assert_eq!(health(&[]).should_degrade(), (false, DegradeLevel::None));
        assert_eq!(health(&[Dependency::ModelService]).should_degrade(), (true, DegradeLevel::Minor));
        assert_eq!(
            health(&[Dependency::ModelService, Dependency::ToolService]).should_degrade(),
            (true, DegradeLevel::Moderate)
        );
        assert_eq!(
            health(&[Dependency::ModelService, Dependency::ToolService, Dependency::KvCache]).should_degrade(),
            (true, DegradeLevel::Severe)
        );
    }

    #[test]
    fn downgrade_table_matches_spec() {
        let now = chrono::Utc::now();
        assert_eq!(recommended_mode(DegradeLevel::Minor, Mode::Complex, now).mode, Mode::Standard);
        assert_eq!(recommended_mode(DegradeLevel::Minor, Mode::Standard, now).mode, Mode::Standard);
        assert_eq!(recommended_mode(DegradeLevel::Moderate, Mode::Complex, now).mode, Mode::Standard);
        assert_eq!(recommended_mode(DegradeLevel::Moderate, Mode::Standard, now).mode, Mode::Simple);
        assert_eq!(recommended_mode(DegradeLevel::Severe, Mode::Standard, now).mode, Mode::Simple);
    }

    #[test]
    fn downgrade_table_is_idempotent() {
        let now = chrono::Utc::now();
        let once = recommended_mode(DegradeLevel::Moderate, Mode::Complex, now).mode;
        let twice = recommended_mode(DegradeLevel::Moderate, once, now).mode;
        assert_eq!(once, twice);
    }

    #[test]
    fn llm_call_falls_back_to_cache_when_model_service_down() {
        let health = health(&[Dependency::ModelService]);
        assert_eq!(fallback(Operation::LlmCall, &health), FallbackAction::Cache);
    }

    #[test]
    fn session_write_proceeds_when_only_cache_down() {
        let health = health(&[Dependency::KvCache]);
        assert_eq!(fallback(Operation::SessionWrite, &health), FallbackAction::Proceed);
    }

    #[test]
    fn partial_result_thresholds_match_spec() {
        assert!(should_return_partial(DegradeLevel::Minor, 1, 10, 0.8));
        assert!(!should_return_partial(DegradeLevel::None, 1, 10, 0.8));
        assert!(should_return_partial(DegradeLevel::Moderate, 3, 10, 0.8));
        assert!(!should_return_partial(DegradeLevel::Moderate, 2, 10, 0.8));
        assert!(should_return_partial(DegradeLevel::Severe, 1, 100, 0.8));
    }
}
