//! Hard feasibility constraints
//!
//! A candidate that violates any limit is vetoed no matter how good its
//! score is. Rejection is an ordinary outcome (`feasible = false`), not an
//! error.

use crate::constants::ScoringConstants;
use crate::scorer::ScoreBreakdown;
use crate::{CandidateConfig, RuntimeSignals};
use serde::{Deserialize, Serialize};

/// Upper bound on the relaxed overhead limit. Past this, a block is nearly
/// all repair data.
pub const MAX_RELAXED_OVERHEAD: f64 = 0.950000000;

/// Feasibility limits in effect for one decision step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityLimits {
    /// Reject when o exceeds this
    pub max_overhead: f64,
    /// Reject when t_blk exceeds this multiple of B_eff
    pub max_block_buffer_ratio: f64,
    /// Reject a negative z while B_eff is below this many seconds
    pub low_buffer_secs: f64,
}

impl FeasibilityLimits {
    pub fn from_constants(constants: &ScoringConstants) -> Self {
        Self {
            max_overhead: constants.overhead_cap,
            max_block_buffer_ratio: constants.max_block_buffer_ratio,
            low_buffer_secs: constants.low_buffer_secs,
        }
    }

    /// Loosen every limit by `factor` (> 1). Used by the relaxation recovery
    /// policy only; the overhead limit never reaches 1.
    pub fn relaxed(&self, factor: f64) -> Self {
        Self {
            max_overhead: (self.max_overhead * factor).min(MAX_RELAXED_OVERHEAD),
            max_block_buffer_ratio: self.max_block_buffer_ratio * factor,
            low_buffer_secs: self.low_buffer_secs / factor,
        }
    }
}

/// Check a scored candidate against the limits in the constants table
///
/// Overhead and B_eff are re-derived from the candidate and the signals;
/// z and t_blk come from the breakdown.
pub fn feasible(
    candidate: &CandidateConfig,
    breakdown: &ScoreBreakdown,
    signals: &RuntimeSignals,
    constants: &ScoringConstants,
) -> bool {
    within(
        candidate.geometry().overhead,
        breakdown.t_blk,
        breakdown.z,
        signals.effective_buffer(constants),
        &FeasibilityLimits::from_constants(constants),
    )
}

/// Check a scored candidate against explicit limits
pub fn feasible_within(breakdown: &ScoreBreakdown, limits: &FeasibilityLimits) -> bool {
    within(
        breakdown.geometry.overhead,
        breakdown.t_blk,
        breakdown.z,
        breakdown.effective_buffer,
        limits,
    )
}

fn within(overhead: f64, t_blk: f64, z: f64, b_eff: f64, limits: &FeasibilityLimits) -> bool {
    if overhead > limits.max_overhead {
        return false;
    }
    if t_blk > limits.max_block_buffer_ratio * b_eff {
        return false;
    }
    if z < 0.0 && b_eff < limits.low_buffer_secs {
        return false;
    }
    true
}
