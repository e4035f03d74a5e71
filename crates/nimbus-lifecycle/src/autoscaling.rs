//! Autoscaling manager (spec.md §4.7): periodic metrics read, desired count
//! bounded by `[min, max]`, scale-up after sustained high utilization,
//! scale-down only after a longer, separately-configured delay to avoid
//! flapping.

use std::time::{Duration, Instant};

use nimbus_types::description::AutoscalingPolicy;

/// Selection of which signal drives the scaling decision. `RoundRobin`
/// exists for pools with no usable metrics source (spec.md §4.7: every
/// strategy still needs *some* answer, this one just alternates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoscalingStrategy {
    Cpu,
    Memory,
    Composite,
    Predictive,
    RoundRobin,
}

/// A single pool's read utilization, as a percentage (spec.md uses
/// `target_cpu_percent`; memory/composite share the same 0-100 scale so the
/// decision function can stay strategy-agnostic).
#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics {
    pub current_count: u32,
    pub utilization_percent: f64,
}

pub trait MetricsSource: Send + Sync {
    fn read(&self, pool: &str, strategy: AutoscalingStrategy) -> PoolMetrics;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
    Hold,
}

#[derive(Debug, Clone)]
pub struct ScalingDecision {
    pub pool: String,
    pub direction: ScaleDirection,
    pub from_count: u32,
    pub to_count: u32,
}

/// Tracks when a pool last scaled in either direction, enforcing
/// `cooldown_secs` after a scale-up and `scale_down_delay_secs` after
/// sustained low utilization before a scale-down is allowed.
pub struct AutoscalerState {
    last_scale_up: Option<Instant>,
    low_utilization_since: Option<Instant>,
}

impl Default for AutoscalerState {
    fn default() -> Self {
        AutoscalerState { last_scale_up: None, low_utilization_since: None }
    }
}

impl AutoscalerState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One evaluation tick for a single pool. `now` is threaded through rather
/// than read internally so the cooldown/hysteresis logic can be tested
/// without real time passing.
pub fn evaluate(
    pool: &str,
    policy: &AutoscalingPolicy,
    metrics: PoolMetrics,
    state: &mut AutoscalerState,
    now: Instant,
) -> ScalingDecision {
    let hold = ScalingDecision { pool: pool.to_string(), direction: ScaleDirection::Hold, from_count: metrics.current_count, to_count: metrics.current_count };

    if !policy.enabled {
        return hold;
    }
    let target = match policy.target_cpu_percent {
        Some(t) => t,
        None => return hold,
    };

    if metrics.utilization_percent > target {
        state.low_utilization_since = None;
        let in_cooldown = state.last_scale_up.map(|t| now.duration_since(t) < Duration::from_secs(policy.cooldown_secs)).unwrap_or(false);
        if in_cooldown || metrics.current_count >= policy.max {
            return hold;
        }
        state.last_scale_up = Some(now);
        let to_count = (metrics.current_count + 1).min(policy.max.max(metrics.current_count));
        return ScalingDecision { pool: pool.to_string(), direction: ScaleDirection::Up, from_count: metrics.current_count, to_count };
    }

    // hysteresis band: scale-down only fires well under target, and only
    // after it has been observed continuously for scale_down_delay_secs.
    let hysteresis = target * 0.6;
    if metrics.utilization_percent < hysteresis {
        let since = *state.low_utilization_since.get_or_insert(now);
        let sustained = now.duration_since(since) >= Duration::from_secs(policy.scale_down_delay_secs);
        if sustained && metrics.current_count > policy.min.max(1) {
            state.low_utilization_since = None;
            let to_count = metrics.current_count.saturating_sub(1).max(policy.min);
            return ScalingDecision { pool: pool.to_string(), direction: ScaleDirection::Down, from_count: metrics.current_count, to_count };
        }
        return hold;
    }

    state.low_utilization_since = None;
    hold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AutoscalingPolicy {
        AutoscalingPolicy {
            enabled: true,
            min: 2,
            max: 6,
            target_cpu_percent: Some(70.0),
            cooldown_secs: 60,
            scale_down_delay_secs: 120,
        }
    }

    #[test]
    fn disabled_policy_never_scales() {
        let mut state = AutoscalerState::new();
        let metrics = PoolMetrics { current_count: 3, utilization_percent: 99.0 };
        let mut p = policy();
        p.enabled = false;
        let decision = evaluate("workers", &p, metrics, &mut state, Instant::now());
        assert_eq!(decision.direction, ScaleDirection::Hold);
    }

    #[test]
    fn high_utilization_scales_up_by_one() {
        let mut state = AutoscalerState::new();
        let metrics = PoolMetrics { current_count: 3, utilization_percent: 85.0 };
        let decision = evaluate("workers", &policy(), metrics, &mut state, Instant::now());
        assert_eq!(decision.direction, ScaleDirection::Up);
        assert_eq!(decision.to_count, 4);
    }

    #[test]
    fn scale_up_respects_max_bound() {
        let mut state = AutoscalerState::new();
        let metrics = PoolMetrics { current_count: 6, utilization_percent: 95.0 };
        let decision = evaluate("workers", &policy(), metrics, &mut state, Instant::now());
        assert_eq!(decision.direction, ScaleDirection::Hold);
    }

    #[test]
    fn low_utilization_requires_sustained_delay_before_scaling_down() {
        let mut state = AutoscalerState::new();
        let metrics = PoolMetrics { current_count: 4, utilization_percent: 10.0 };
        let t0 = Instant::now();
        let first = evaluate("workers", &policy(), metrics, &mut state, t0);
        assert_eq!(first.direction, ScaleDirection::Hold);
        let later = t0 + Duration::from_secs(200);
        let second = evaluate("workers", &policy(), metrics, &mut state, later);
        assert_eq!(second.direction, ScaleDirection::Down);
        assert_eq!(second.to_count, 3);
    }

    #[test]
    fn scale_down_never_crosses_the_minimum() {
        let mut state = AutoscalerState::new();
        let metrics = PoolMetrics { current_count: 2, utilization_percent: 5.0 };
        let t0 = Instant::now();
        evaluate("workers", &policy(), metrics, &mut state, t0);
        let later = t0 + Duration::from_secs(200);
        let decision = evaluate("workers", &policy(), metrics, &mut state, later);
        assert_eq!(decision.direction, ScaleDirection::Hold);
    }
}
