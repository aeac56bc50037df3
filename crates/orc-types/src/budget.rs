use serde::{Deserialize, Serialize};

/// Per-task or per-session token budget (spec §3). `used <= limit` is
/// enforced only when `hard_limit`; otherwise a warning fires at
/// `used/limit >= warning_threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    pub limit: u64,
    pub used: u64,
    pub hard_limit: bool,
    pub warning_threshold: f64,
    pub require_approval: bool,
    pub estimated_cost: f64,
    pub actual_cost: f64,
}

impl TokenBudget {
    pub fn new(limit: u64, hard_limit: bool) -> Self {
        Self {
            limit,
            used: 0,
            hard_limit,
            warning_threshold: 0.8,
            require_approval: false,
            estimated_cost: 0.0,
            actual_cost: 0.0,
        }
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        self.used as f64 / self.limit as f64
    }

    pub fn is_over_warning_threshold(&self) -> bool {
        self.usage_ratio() >= self.warning_threshold
    }

    pub fn would_exceed(&self, additional: u64) -> bool {
        self.hard_limit && self.used.saturating_add(additional) > self.limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PressureLevel {
    /// Classifies a usage ratio per spec §4.3
    /// (`<0.5 low, <0.75 medium, <0.9 high, else critical`).
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.5 {
            PressureLevel::Low
        } else if ratio < 0.75 {
            PressureLevel::Medium
        } else if ratio < 0.9 {
            PressureLevel::High
        } else {
            PressureLevel::Critical
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_limit_denies_when_projected_exceeds() {
        let budget = TokenBudget::new(100, true);
        assert!(budget.would_exceed(101));
        assert!(!budget.would_exceed(100));
    }

    #[test]
    fn soft_limit_never_denies() {
        let budget = TokenBudget::new(100, false);
        assert!(!budget.would_exceed(10_000));
    }

    #[test]
    fn pressure_levels_match_thresholds() {
        assert_eq!(PressureLevel::from_ratio(0.0), PressureLevel::Low);
        assert_eq!(PressureLevel::from_ratio(0.49), PressureLevel::Low);
        assert_eq!(PressureLevel::from_ratio(0.5), PressureLevel::Medium);
        assert_eq!(PressureLevel::from_ratio(0.75), PressureLevel::High);
        assert_eq!(PressureLevel::from_ratio(0.9), PressureLevel::Critical);
    }
}
