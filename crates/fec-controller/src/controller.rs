//! Controller loop
//!
//! Runs one decision step per segment boundary and owns the session's
//! [`ControllerState`]. A step is synchronous and performs no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::candidates::CandidateGrid;
use crate::codec::{CodecCost, CodecProfile};
use crate::config::{ControllerConfig, HysteresisConfig};
use crate::constants::ScoringConstants;
use crate::constraints::FeasibilityLimits;
use crate::estimator::SharedEstimator;
use crate::selector::{self, Decision, Evaluation, Selection};
use crate::{CandidateConfig, ControllerState, FecError, Result, RuntimeSignals};

/// What to do when every candidate is vetoed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Report `NoFeasibleCandidate` and keep the active configuration
    #[default]
    KeepActive,
    /// Loosen the feasibility limits by `factor` and retry, up to
    /// `max_attempts` times within the same step
    RelaxLimits { factor: f64, max_attempts: u32 },
}

impl RecoveryPolicy {
    pub fn validate(&self) -> Result<()> {
        if let RecoveryPolicy::RelaxLimits {
            factor,
            max_attempts,
        } = self
        {
            if !factor.is_finite() || *factor <= 1.0 {
                return Err(FecError::InvalidConfiguration(format!(
                    "relaxation factor must be finite and > 1, got {}",
                    factor
                )));
            }
            if *max_attempts == 0 {
                return Err(FecError::InvalidConfiguration(
                    "relaxation max_attempts must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Result of one decision step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionReport {
    pub decision: Decision,
    /// Active configuration after the step
    pub active: CandidateConfig,
    /// Winner after tie-break
    pub best: Evaluation,
    /// The configuration that was active going into the step
    pub incumbent: Evaluation,
    pub evaluated: usize,
    pub feasible: usize,
    /// 0 unless the relaxation policy had to loosen the limits
    pub relaxations: u32,
    pub limits: FeasibilityLimits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_cost: Option<CodecCost>,
}

/// Adaptive FEC controller for one streaming session
#[derive(Debug)]
pub struct FecController {
    constants: ScoringConstants,
    grid: CandidateGrid,
    hysteresis: HysteresisConfig,
    recovery: RecoveryPolicy,
    codec: Option<CodecProfile>,
    initial: CandidateConfig,
    estimator: SharedEstimator,
    state: ControllerState,
}

impl FecController {
    /// Validate the configuration and start a session
    pub fn new(config: ControllerConfig, started_at: DateTime<Utc>) -> Result<Self> {
        config.validate()?;

        let state = ControllerState::new(
            config.initial,
            started_at,
            config.hysteresis.min_dwell_segments,
        );

        Ok(Self {
            estimator: SharedEstimator::new(config.estimator),
            constants: config.constants,
            grid: config.grid,
            hysteresis: config.hysteresis,
            recovery: config.recovery,
            codec: config.codec,
            initial: config.initial,
            state,
        })
    }

    /// Handle for the measurement path
    pub fn estimator(&self) -> SharedEstimator {
        self.estimator.clone()
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn active(&self) -> CandidateConfig {
        self.state.active
    }

    pub fn constants(&self) -> &ScoringConstants {
        &self.constants
    }

    /// Decide using the estimator's current snapshot
    pub fn step(&mut self, now: DateTime<Utc>) -> Result<DecisionReport> {
        let signals = self.estimator.snapshot().ok_or_else(|| {
            FecError::InvalidSample("no complete sample observed yet".to_string())
        })?;
        self.step_with(signals, now)
    }

    /// Decide using explicit signals
    pub fn step_with(
        &mut self,
        signals: RuntimeSignals,
        now: DateTime<Utc>,
    ) -> Result<DecisionReport> {
        self.step_observed(signals, now, |_, _| {})
    }

    /// Decide using explicit signals, handing every evaluation to `observer`
    ///
    /// The observer also receives the number of limit relaxations in effect,
    /// so passes discarded by [`RecoveryPolicy::RelaxLimits`] can be told
    /// apart from the one the decision came from (`report.relaxations`).
    pub fn step_observed<F>(
        &mut self,
        signals: RuntimeSignals,
        now: DateTime<Utc>,
        mut observer: F,
    ) -> Result<DecisionReport>
    where
        F: FnMut(u32, &Evaluation),
    {
        signals.validate()?;

        let mut limits = FeasibilityLimits::from_constants(&self.constants);
        let mut relaxations = 0;

        loop {
            let active = self.state.active;
            let incumbent = selector::evaluate(active, &signals, &self.constants, &limits);
            observer(relaxations, &incumbent);

            let mut selection =
                Selection::new(incumbent, self.hysteresis.tie_epsilon, &self.constants);
            // generate() always yields the active configuration first
            for candidate in self.grid.generate(&active).skip(1) {
                let evaluation = selector::evaluate(candidate, &signals, &self.constants, &limits);
                observer(relaxations, &evaluation);
                selection.push(evaluation);
            }
            let evaluated = selection.evaluated();
            let feasible = selection.feasible();

            let Some(best) = selection.best().copied() else {
                if let RecoveryPolicy::RelaxLimits {
                    factor,
                    max_attempts,
                } = self.recovery
                {
                    if relaxations < max_attempts {
                        relaxations += 1;
                        limits = limits.relaxed(factor);
                        debug!(
                            "Relaxing feasibility limits (attempt {}): {:?}",
                            relaxations, limits
                        );
                        continue;
                    }
                }

                warn!(
                    "No feasible candidate among {} (p={:.4}, B={:.2}s); keeping {}",
                    evaluated, signals.loss_rate, signals.buffer_secs, active
                );
                selector::apply(&mut self.state, &Decision::Hold, now);
                return Err(FecError::NoFeasibleCandidate { evaluated });
            };

            let decision = selector::gate(&self.state, &incumbent, &best, &self.hysteresis);
            selector::apply(&mut self.state, &decision, now);

            debug!(
                "Step: {:?}, best {} ({:.6}), incumbent {:.6}, {}/{} feasible",
                decision,
                best.candidate,
                best.score(),
                incumbent.score(),
                feasible,
                evaluated
            );

            return Ok(DecisionReport {
                decision,
                active: self.state.active,
                best,
                incumbent,
                evaluated,
                feasible,
                relaxations,
                limits,
                codec_cost: self.codec.map(|c| c.estimate(&self.state.active)),
            });
        }
    }

    /// Start over from the initial configuration (e.g. on reconnection)
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.state = ControllerState::new(self.initial, now, self.hysteresis.min_dwell_segments);
        self.estimator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::GridAxis;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn controller(config: ControllerConfig) -> FecController {
        FecController::new(config, t(0)).unwrap()
    }

    fn healthy() -> RuntimeSignals {
        RuntimeSignals::new(0.02, 4.0, 2_000_000.0, 1_000_000.0)
    }

    fn lossy() -> RuntimeSignals {
        RuntimeSignals::new(0.10, 2.0, 1_200_000.0, 1_000_000.0)
    }

    #[test]
    fn test_first_step_may_switch() {
        let mut ctl = controller(ControllerConfig::default());
        let report = ctl.step_with(lossy(), t(2)).unwrap();

        assert_eq!(report.evaluated, 125);
        assert!(report.best.candidate.same_as(&CandidateConfig::new(50, 512, 0.3)));
        assert_eq!(report.decision, Decision::Switch(report.best.candidate));
        assert!(report.best.score() < report.incumbent.score() * 0.9);
        assert_eq!(ctl.state().segments_since_switch, 0);
        assert_eq!(ctl.state().last_switch_time, t(2));
        assert_eq!(report.active, ctl.active());
    }

    #[test]
    fn test_stable_signals_converge_and_hold() {
        let mut ctl = controller(ControllerConfig::default());
        ctl.step_with(lossy(), t(2)).unwrap();
        let settled = ctl.active();

        for i in 0..5 {
            let report = ctl.step_with(lossy(), t(4 + 2 * i)).unwrap();
            assert_eq!(report.decision, Decision::Hold);
            assert_eq!(report.best.candidate, settled);
        }
        assert_eq!(ctl.state().segments_since_switch, 5);
        assert_eq!(ctl.state().last_switch_time, t(2));
    }

    #[test]
    fn test_equal_zero_scores_do_not_flap() {
        // Plenty of buffer and headroom: the incumbent already costs nothing
        let mut ctl = controller(ControllerConfig::default());
        for i in 0..3 {
            let report = ctl.step_with(healthy(), t(i)).unwrap();
            assert_eq!(report.incumbent.score(), 0.0);
            assert_eq!(report.decision, Decision::Hold);
        }
        assert_eq!(ctl.active(), CandidateConfig::new(20, 512, 0.2));
    }

    #[test]
    fn test_step_without_samples_is_invalid_sample() {
        let mut ctl = controller(ControllerConfig::default());
        assert!(matches!(ctl.step(t(1)), Err(FecError::InvalidSample(_))));
    }

    #[test]
    fn test_step_reads_estimator_snapshot() {
        let mut ctl = controller(ControllerConfig::default());
        ctl.estimator().update(0.02, 4.0, 2e6, 1e6).unwrap();
        let report = ctl.step(t(1)).unwrap();
        assert_eq!(report.incumbent.breakdown.effective_buffer, 4.0);
    }

    #[test]
    fn test_invalid_explicit_signals_rejected() {
        let mut ctl = controller(ControllerConfig::default());
        let bad = RuntimeSignals::new(0.02, 4.0, 2e6, 0.0);
        assert!(matches!(ctl.step_with(bad, t(1)), Err(FecError::InvalidSample(_))));
        assert_eq!(ctl.state().segments_since_switch, 1, "rejected sample is not a step");
    }

    #[test]
    fn test_no_feasible_keeps_active() {
        let mut ctl = controller(ControllerConfig::default());
        let before = ctl.active();
        let drained = RuntimeSignals::new(0.02, 0.0, 2e6, 1e6);

        let err = ctl.step_with(drained, t(1)).unwrap_err();
        assert!(matches!(err, FecError::NoFeasibleCandidate { evaluated: 125 }));
        assert_eq!(ctl.active(), before);
        assert_eq!(ctl.state().segments_since_switch, 2, "failed step counts as a hold");
        assert_eq!(ctl.state().last_switch_time, t(0));
    }

    fn over_cap_config(recovery: RecoveryPolicy) -> ControllerConfig {
        // Single grid point carrying more overhead than o_cap allows
        ControllerConfig {
            grid: CandidateGrid {
                source_symbols: GridAxis::Values(vec![10]),
                symbol_size: GridAxis::Values(vec![64]),
                redundancy: GridAxis::Values(vec![1.5]),
            },
            initial: CandidateConfig::new(10, 64, 1.5),
            recovery,
            ..Default::default()
        }
    }

    #[test]
    fn test_relax_policy_recovers() {
        let mut ctl = controller(over_cap_config(RecoveryPolicy::RelaxLimits {
            factor: 1.25,
            max_attempts: 2,
        }));

        // o = 15/25 = 0.6; one relaxation lifts the limit to 0.625
        let report = ctl.step_with(healthy(), t(1)).unwrap();
        assert_eq!(report.relaxations, 1);
        assert!((report.limits.max_overhead - 0.625).abs() < 1e-12);
        assert!(report.best.feasible());
        assert_eq!(report.decision, Decision::Hold);
    }

    #[test]
    fn test_keep_active_policy_reports_condition() {
        let mut ctl = controller(over_cap_config(RecoveryPolicy::KeepActive));
        assert!(matches!(
            ctl.step_with(healthy(), t(1)),
            Err(FecError::NoFeasibleCandidate { evaluated: 1 })
        ));
        assert_eq!(ctl.active(), CandidateConfig::new(10, 64, 1.5));
    }

    #[test]
    fn test_relax_policy_gives_up_after_max_attempts() {
        let mut ctl = controller(over_cap_config(RecoveryPolicy::RelaxLimits {
            factor: 1.1,
            max_attempts: 1,
        }));
        // 0.55 still below 0.6
        assert!(matches!(
            ctl.step_with(healthy(), t(1)),
            Err(FecError::NoFeasibleCandidate { .. })
        ));
    }

    #[test]
    fn test_observer_sees_every_candidate() {
        let mut ctl = controller(ControllerConfig::default());
        let mut seen = Vec::new();
        let report = ctl
            .step_observed(healthy(), t(1), |_, e| seen.push(e.candidate))
            .unwrap();

        assert_eq!(seen.len(), report.evaluated);
        assert_eq!(seen[0], CandidateConfig::new(20, 512, 0.2));
    }

    #[test]
    fn test_observer_tags_relaxation_attempts() {
        let mut ctl = controller(over_cap_config(RecoveryPolicy::RelaxLimits {
            factor: 1.25,
            max_attempts: 2,
        }));
        let mut seen = Vec::new();
        let report = ctl
            .step_observed(healthy(), t(1), |attempt, e| seen.push((attempt, e.feasible())))
            .unwrap();

        assert_eq!(report.relaxations, 1);
        assert_eq!(seen, vec![(0, false), (1, true)]);
        let decisive = seen.iter().filter(|(a, _)| *a == report.relaxations).count();
        assert_eq!(decisive, report.evaluated);
    }

    #[test]
    fn test_codec_cost_follows_active() {
        let config = ControllerConfig {
            codec: Some(CodecProfile::new(crate::CodecKind::RaptorQ, 3.0, 5.0)),
            ..Default::default()
        };
        let mut ctl = controller(config);
        let report = ctl.step_with(lossy(), t(1)).unwrap();

        let cost = report.codec_cost.unwrap();
        let active = report.active;
        assert_eq!(
            cost.payload_bytes,
            active.source_symbols as u64 * active.symbol_size as u64
        );
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut ctl = controller(ControllerConfig::default());
        ctl.estimator().update(0.02, 4.0, 2e6, 1e6).unwrap();
        ctl.step(t(1)).unwrap();

        ctl.reset(t(10));
        assert_eq!(ctl.active(), CandidateConfig::new(20, 512, 0.2));
        assert_eq!(ctl.state().last_switch_time, t(10));
        assert!(ctl.estimator().snapshot().is_none());
    }

    #[test]
    fn test_recovery_policy_validation() {
        assert!(RecoveryPolicy::KeepActive.validate().is_ok());
        assert!(RecoveryPolicy::RelaxLimits { factor: 1.0, max_attempts: 3 }
            .validate()
            .is_err());
        assert!(RecoveryPolicy::RelaxLimits { factor: 1.2, max_attempts: 0 }
            .validate()
            .is_err());
        let json = serde_json::to_string(&RecoveryPolicy::RelaxLimits { factor: 1.2, max_attempts: 2 }).unwrap();
        assert_eq!(json, r#"{"policy":"relax_limits","factor":1.2,"max_attempts":2}"#);
    }
}
