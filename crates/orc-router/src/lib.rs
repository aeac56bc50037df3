//! Heuristic complexity scoring and strategy routing (spec §4.5).

use orc_degradation::{DegradeLevel, recommended_mode};
use orc_types::wire::{CognitiveStrategy, Mode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Simple,
    Dag,
    Supervisor,
    React,
    Research,
    Exploratory,
    Debate,
    Reflection,
}

impl From<CognitiveStrategy> for Strategy {
    fn from(tag: CognitiveStrategy) -> Self {
        match tag {
            CognitiveStrategy::React => Strategy::React,
            CognitiveStrategy::Research => Strategy::Research,
            CognitiveStrategy::Exploratory => Strategy::Exploratory,
            CognitiveStrategy::Scientific => Strategy::Research,
            CognitiveStrategy::Debate => Strategy::Debate,
            CognitiveStrategy::Swarm => Strategy::Supervisor,
            CognitiveStrategy::Browser => Strategy::React,
        }
    }
}

/// Plain-data view of a decomposition result, enough for routing without
/// depending on the activity layer.
#[derive(Debug, Clone, Default)]
pub struct DecompositionShape {
    pub subtask_count: usize,
    pub has_dependencies: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzerInput<'a> {
    pub query: &'a str,
    pub has_tool_hints: bool,
    pub historical_complexity_bias: f64,
}

/// Bounded heuristic score in `[0, 1]`: query length, enumeration markers,
/// tool hints, and a caller-supplied historical bias all contribute.
pub fn analyze(input: &AnalyzerInput<'_>) -> f64 {
    let length_component = (input.query.len() as f64 / 400.0).min(1.0);
    let enumeration_markers = ["1.", "2.", "- ", "* ", "\n-", "step "]
        .iter()
        .filter(|marker| input.query.to_lowercase().contains(&marker.to_lowercase()))
        .count();
    let enumeration_component = (enumeration_markers as f64 / 3.0).min(1.0);
    let tool_component = if input.has_tool_hints { 0.3 } else { 0.0 };
    let historical_component = input.historical_complexity_bias.clamp(0.0, 1.0);

    let score = 0.4 * length_component + 0.3 * enumeration_component + tool_component * 0.2 + historical_component * 0.1;
    score.clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct RouteContext {
    pub mode: Option<Mode>,
    pub cognitive_strategy: Option<CognitiveStrategy>,
}

/// Complexity thresholds shift with `mode`: `simple` biases toward Simple,
/// `complex` biases toward Supervisor/DAG, `standard` uses the documented
/// defaults (score < 0.3, > 5 subtasks).
struct Thresholds {
    simple_score_ceiling: f64,
    supervisor_subtask_floor: usize,
}

fn thresholds_for_mode(mode: Option<Mode>) -> Thresholds {
    match mode {
        Some(Mode::Simple) => Thresholds { simple_score_ceiling: 0.5, supervisor_subtask_floor: 8 },
        Some(Mode::Complex) => Thresholds { simple_score_ceiling: 0.15, supervisor_subtask_floor: 3 },
        Some(Mode::Standard) | None => Thresholds { simple_score_ceiling: 0.3, supervisor_subtask_floor: 5 },
    }
}

/// Applies the routing table from spec §4.5 steps 1-5, given a
/// caller-supplied decomposition preview used only to check for the
/// Supervisor/DAG split (steps 2-3); callers that haven't decomposed yet
/// pass `DecompositionShape::default()` and treat score alone as decisive
/// for step 2.
pub fn route(score: f64, decomposition: &DecompositionShape, context: &RouteContext) -> Strategy {
    if let Some(strategy) = context.cognitive_strategy {
        return strategy.into();
    }

    let thresholds = thresholds_for_mode(context.mode);

    if score < thresholds.simple_score_ceiling && decomposition.subtask_count <= 1 && !decomposition.has_dependencies {
        return Strategy::Simple;
    }

    if decomposition.subtask_count > thresholds.supervisor_subtask_floor || decomposition.has_dependencies {
        return Strategy::Supervisor;
    }

    Strategy::Dag
}

/// Step 5 of §4.5: after picking a strategy, consult degradation and
/// possibly downgrade to a lighter one. Only Supervisor/DAG/React/Research/
/// Exploratory/Debate/Reflection are downgradable; Simple is already the
/// floor.
pub fn downgrade_for_degradation(strategy: Strategy, level: DegradeLevel, decided_at: chrono::DateTime<chrono::Utc>) -> Strategy {
    if level == DegradeLevel::None {
        return strategy;
    }
    let as_mode = match strategy {
        Strategy::Simple => Mode::Simple,
        Strategy::Dag | Strategy::React | Strategy::Reflection => Mode::Standard,
        Strategy::Supervisor | Strategy::Research | Strategy::Exploratory | Strategy::Debate => Mode::Complex,
    };
    let decision = recommended_mode(level, as_mode, decided_at);
    match (strategy, decision.mode) {
        (_, Mode::Simple) => Strategy::Simple,
        (Strategy::Supervisor | Strategy::Research | Strategy::Exploratory | Strategy::Debate, Mode::Standard) => {
            Strategy::Dag
        }
        (unchanged, _) => unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RouteContext {
        RouteContext { mode: None, cognitive_strategy: None }
    }

    #[test]
    fn short_query_with_no_dependencies_is_simple() {
        let strategy = route(0.1, &DecompositionShape::default(), &ctx());
        assert_eq!(strategy, Strategy::Simple);
    }

    #[test]
    fn many_subtasks_routes_to_supervisor() {
        let shape = DecompositionShape { subtask_count: 8, has_dependencies: false };
        let strategy = route(0.5, &shape, &ctx());
        assert_eq!(strategy, Strategy::Supervisor);
    }

    #[test]
    fn dependencies_route_to_supervisor_even_with_few_subtasks() {
        let shape = DecompositionShape { subtask_count: 2, has_dependencies: true };
        let strategy = route(0.5, &shape, &ctx());
        assert_eq!(strategy, Strategy::Supervisor);
    }

    #[test]
    fn moderate_shape_falls_through_to_dag() {
        let shape = DecompositionShape { subtask_count: 3, has_dependencies: false };
        let strategy = route(0.5, &shape, &ctx());
        assert_eq!(strategy, Strategy::Dag);
    }

    #[test]
    fn cognitive_strategy_override_wins_regardless_of_score() {
        let context = RouteContext { mode: None, cognitive_strategy: Some(CognitiveStrategy::Debate) };
        let strategy = route(0.01, &DecompositionShape::default(), &context);
        assert_eq!(strategy, Strategy::Debate);
    }

    #[test]
    fn mode_shifts_thresholds_without_overriding_strategy_selection() {
        let simple_biased = RouteContext { mode: Some(Mode::Simple), cognitive_strategy: None };
        // Score 0.4 would not be "simple" under standard thresholds but is under a simple-mode bias.
        let strategy = route(0.4, &DecompositionShape::default(), &simple_biased);
        assert_eq!(strategy, Strategy::Simple);
    }

    #[test]
    fn severe_degradation_downgrades_supervisor_to_simple() {
        let now = chrono::Utc::now();
        let strategy = downgrade_for_degradation(Strategy::Supervisor, DegradeLevel::Severe, now);
        assert_eq!(strategy, Strategy::Simple);
    }

    #[test]
    fn moderate_degradation_downgrades_supervisor_to_dag() {
        let now = chrono::Utc::now();
        let strategy = downgrade_for_degradation(Strategy::Supervisor, DegradeLevel::Moderate, now);
        assert_eq!(strategy, Strategy::Dag);
    }

    #[test]
    fn analyze_score_is_bounded() {
        let long_query = "a".repeat(10_000);
        let input = AnalyzerInput { query: &long_query, has_tool_hints: true, historical_complexity_bias: 1.0 };
        assert!(analyze(&input) <= 1.0);
    }
}
