//! Candidate scoring implementation
//!
//! Implements the 3-term weighted penalty model:
//! score(c) = w_loss·pen_loss + w_over·pen_over + w_blk·pen_blk
//!
//! Every intermediate value is returned in [`ScoreBreakdown`] so the
//! decision can be audited after the fact.

use crate::constants::ScoringConstants;
use crate::constraints;
use crate::{BlockGeometry, CandidateConfig, RuntimeSignals};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Diagnostic breakdown for one (candidate, signals) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// P, T, o, B_blk
    pub geometry: BlockGeometry,
    /// h
    pub headroom: f64,
    /// B_eff
    pub effective_buffer: f64,

    /// Continuity-corrected normal approximation of the recovery margin
    pub z: f64,
    pub z_target: f64,
    pub pen_loss: f64,

    pub o_free: f64,
    pub o_excess: f64,
    pub pen_over: f64,

    /// Block airtime in seconds at the current goodput
    pub t_blk: f64,
    pub pen_blk: f64,

    pub w_loss: f64,
    pub w_over: f64,
    pub w_blk: f64,

    pub score: f64,
    /// Constraint filter verdict; infeasible scores are ignored by the selector
    pub feasible: bool,
}

/// Score a single candidate against the current signals
pub fn score(
    candidate: &CandidateConfig,
    signals: &RuntimeSignals,
    constants: &ScoringConstants,
) -> ScoreBreakdown {
    let geometry = candidate.geometry();
    let headroom = signals.headroom(constants);
    let effective_buffer = signals.effective_buffer(constants);
    let capped_headroom = headroom.min(constants.headroom_cap);

    let total = geometry.total_symbols as f64;
    let repair = geometry.repair_symbols as f64;
    let p = signals.loss_rate;

    // Loss: z of "losses ≤ P" under Binomial(T, p). The variance is floored at
    // ε_var so p ∈ {0, 1} yields a large finite z instead of a division by zero.
    let variance = (total * p * (1.0 - p)).max(constants.variance_floor);
    let z = (repair + 0.5 - total * p) / variance.sqrt();
    let z_target = constants.z_min
        + constants.alpha_buffer * (constants.buffer_critical - effective_buffer).max(0.0)
        - constants.alpha_headroom * capped_headroom;
    let pen_loss = (z_target - z).max(0.0).powf(constants.loss_exponent);

    // Overhead beyond the free budget
    let o_free = (constants.base_free_overhead
        + constants.k_buffer * effective_buffer
        + constants.k_headroom * capped_headroom)
        .min(constants.overhead_cap);
    let o_excess = (geometry.overhead - o_free).max(0.0);
    let pen_over = o_excess.powf(constants.overhead_exponent);

    // Block airtime vs buffer. An empty buffer saturates the penalty.
    let t_blk = 8.0 * geometry.block_bytes as f64 / signals.goodput_bps.max(constants.epsilon);
    let budget = constants.block_buffer_fraction * effective_buffer;
    let pen_blk = if budget <= 0.0 {
        1.0
    } else {
        (t_blk / budget - 1.0).clamp(0.0, 1.0)
    };

    let w_loss = constants.w_loss_min + constants.lambda_loss * p.min(constants.loss_cap);
    let w_over = constants.w_over_min
        + constants.lambda_buffer * (effective_buffer / constants.buffer_saturation)
        + constants.lambda_headroom * capped_headroom;
    let w_blk = constants.w_blk_min
        + constants.lambda_risk * (1.0 - effective_buffer / constants.buffer_critical).max(0.0)
        + constants.lambda_neg_headroom * (-headroom.min(0.0)).max(0.0);

    let score = w_loss * pen_loss + w_over * pen_over + w_blk * pen_blk;

    let mut breakdown = ScoreBreakdown {
        geometry,
        headroom,
        effective_buffer,
        z,
        z_target,
        pen_loss,
        o_free,
        o_excess,
        pen_over,
        t_blk,
        pen_blk,
        w_loss,
        w_over,
        w_blk,
        score,
        feasible: true,
    };
    breakdown.feasible = constraints::feasible(candidate, &breakdown, signals, constants);

    debug!(
        "Scored {}: {:.6} (loss={:.4}, over={:.4}, blk={:.4}, z={:.3}/{:.3}, feasible={})",
        candidate, score, pen_loss, pen_over, pen_blk, z, z_target, breakdown.feasible
    );

    breakdown
}
