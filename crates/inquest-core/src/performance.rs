//! Efficiency scoring for finished investigations.
//!
//! Pure functions over the final state. The score is advisory telemetry; it
//! never influences routing or verdicts. Every component and the combined
//! score land in [0, 1] regardless of input extremes.

use serde::Deserialize;

use crate::state::InvestigationState;

/// Tunables for the efficiency score.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Wall-clock duration considered ideal for one investigation.
    pub ideal_duration_ms: u64,
    /// Loop counts at or below this score full marks.
    pub soft_loop_threshold: u32,
    /// Domain count at which coverage saturates.
    pub domain_coverage_cap: usize,
    /// Distinct tool count at which tool usage saturates.
    pub tool_usage_cap: usize,
    /// Penalty per safety override.
    pub override_penalty: f64,
    /// Safety component never drops below this.
    pub safety_floor: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            ideal_duration_ms: 30_000,
            soft_loop_threshold: 5,
            domain_coverage_cap: 3,
            tool_usage_cap: 5,
            override_penalty: 0.25,
            safety_floor: 0.2,
        }
    }
}

/// Component scores plus the combined efficiency score, all in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct PerformanceBreakdown {
    pub time_efficiency: f64,
    pub loop_efficiency: f64,
    pub coverage_efficiency: f64,
    pub safety_efficiency: f64,
    pub efficiency: f64,
}

/// Score a finished investigation. Deterministic for a given state.
pub fn score(state: &InvestigationState, config: &PerformanceConfig) -> PerformanceBreakdown {
    let elapsed_ms = state
        .finished_at
        .map(|end| (end - state.started_at).num_milliseconds().max(0) as u64)
        .unwrap_or(0);

    // Peaks at the ideal duration and decays symmetrically either side of it.
    let ratio = elapsed_ms as f64 / config.ideal_duration_ms.max(1) as f64;
    let time_efficiency = clamp01(1.0 / (1.0 + (ratio - 1.0).abs()));

    let loop_efficiency = if state.orchestrator_loops <= config.soft_loop_threshold {
        1.0
    } else {
        clamp01(f64::from(config.soft_loop_threshold) / f64::from(state.orchestrator_loops))
    };

    let domain_part = state.domains_completed.len() as f64 / config.domain_coverage_cap.max(1) as f64;
    let tool_part = state.tools_used.len() as f64 / config.tool_usage_cap.max(1) as f64;
    let coverage_efficiency = clamp01(0.5 * domain_part.min(1.0) + 0.5 * tool_part.min(1.0));

    let safety_efficiency = clamp01(
        (1.0 - config.override_penalty * state.safety_overrides.len() as f64)
            .max(config.safety_floor),
    );

    let efficiency = clamp01(
        (time_efficiency + loop_efficiency + coverage_efficiency + safety_efficiency) / 4.0,
    );

    PerformanceBreakdown {
        time_efficiency,
        loop_efficiency,
        coverage_efficiency,
        safety_efficiency,
        efficiency,
    }
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Domain, EntityRef};
    use chrono::Duration;

    fn finished_state() -> InvestigationState {
        let mut state = InvestigationState::new(EntityRef::new("account", "acct_1"));
        state.finished_at = Some(state.started_at + Duration::milliseconds(30_000));
        state
    }

    fn in_unit_range(b: &PerformanceBreakdown) -> bool {
        [
            b.time_efficiency,
            b.loop_efficiency,
            b.coverage_efficiency,
            b.safety_efficiency,
            b.efficiency,
        ]
        .iter()
        .all(|v| (0.0..=1.0).contains(v))
    }

    #[test]
    fn ideal_duration_scores_full_time_marks() {
        let state = finished_state();
        let breakdown = score(&state, &PerformanceConfig::default());

        assert!((breakdown.time_efficiency - 1.0).abs() < 1e-9);
        assert!(in_unit_range(&breakdown));
    }

    #[test]
    fn extreme_inputs_stay_in_unit_range() {
        let mut state = finished_state();
        state.finished_at = Some(state.started_at + Duration::hours(100));
        state.orchestrator_loops = u32::MAX;
        for i in 0..1_000 {
            state.domains_completed.push(Domain::from(format!("d{i}").as_str()));
            state.tools_used.push(format!("t{i}"));
        }
        for _ in 0..50 {
            state.safety_overrides.push(crate::state::SafetyOverride {
                rule: "r".to_string(),
                detail: "d".to_string(),
                at: chrono::Utc::now(),
                resolved: true,
            });
        }

        let breakdown = score(&state, &PerformanceConfig::default());
        assert!(in_unit_range(&breakdown));
        // Heavy override count bottoms out at the floor, not zero.
        assert!((breakdown.safety_efficiency - 0.2).abs() < 1e-9);
    }

    #[test]
    fn scoring_is_deterministic() {
        let state = finished_state();
        let config = PerformanceConfig::default();

        let a = score(&state, &config);
        let b = score(&state, &config);
        assert_eq!(a.efficiency.to_bits(), b.efficiency.to_bits());
    }

    #[test]
    fn loops_over_threshold_reduce_the_score() {
        let mut state = finished_state();
        state.orchestrator_loops = 10;
        let breakdown = score(&state, &PerformanceConfig::default());

        assert!((breakdown.loop_efficiency - 0.5).abs() < 1e-9);
    }
}
