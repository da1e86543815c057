//! Scoring constants table
//!
//! Every tunable used by the scorer and the constraint filter lives here.
//! Loaded once per session and never mutated afterwards.

use crate::{FecError, Result};
use serde::{Deserialize, Serialize};

/// Buffer saturation level B_sat in seconds (9 decimal precision)
pub const DEFAULT_BUFFER_SATURATION: f64 = 6.000000000;
/// Critical buffer level B_crit in seconds
pub const DEFAULT_BUFFER_CRITICAL: f64 = 3.000000000;
/// Headroom cap h_cap
pub const DEFAULT_HEADROOM_CAP: f64 = 1.000000000;

/// Loss penalty: z_min, α_B, α_h, β
pub const DEFAULT_Z_MIN: f64 = 2.000000000;
pub const DEFAULT_ALPHA_BUFFER: f64 = 0.500000000;
pub const DEFAULT_ALPHA_HEADROOM: f64 = 0.500000000;
pub const DEFAULT_LOSS_EXPONENT: f64 = 2.000000000;

/// Overhead penalty: o0, k_B, k_h, o_cap, α
pub const DEFAULT_BASE_FREE_OVERHEAD: f64 = 0.050000000;
pub const DEFAULT_K_BUFFER: f64 = 0.020000000;
pub const DEFAULT_K_HEADROOM: f64 = 0.050000000;
pub const DEFAULT_OVERHEAD_CAP: f64 = 0.500000000;
pub const DEFAULT_OVERHEAD_EXPONENT: f64 = 2.000000000;

/// Block penalty: η
pub const DEFAULT_BLOCK_BUFFER_FRACTION: f64 = 0.500000000;

/// Weights: floors and slopes
pub const DEFAULT_W_LOSS_MIN: f64 = 1.000000000;
pub const DEFAULT_LAMBDA_LOSS: f64 = 10.000000000;
pub const DEFAULT_LOSS_CAP: f64 = 0.200000000;
pub const DEFAULT_W_OVER_MIN: f64 = 0.500000000;
pub const DEFAULT_LAMBDA_BUFFER: f64 = 0.500000000;
pub const DEFAULT_LAMBDA_HEADROOM: f64 = 0.250000000;
pub const DEFAULT_W_BLK_MIN: f64 = 0.250000000;
pub const DEFAULT_LAMBDA_RISK: f64 = 1.000000000;
pub const DEFAULT_LAMBDA_NEG_HEADROOM: f64 = 1.000000000;

/// Numeric floors: ε for rates, ε_var for the binomial variance
pub const DEFAULT_EPSILON: f64 = 1e-9;
pub const DEFAULT_VARIANCE_FLOOR: f64 = 1e-6;

/// Feasibility: block airtime may not exceed this multiple of B_eff
pub const DEFAULT_MAX_BLOCK_BUFFER_RATIO: f64 = 1.500000000;
/// Feasibility: below this buffer (seconds) a negative z is vetoed
pub const DEFAULT_LOW_BUFFER_SECS: f64 = 1.000000000;

/// Immutable scoring constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConstants {
    /// B_sat: buffer level beyond which more buffer buys nothing (s)
    pub buffer_saturation: f64,
    /// B_crit: buffer level below which the session is at risk (s)
    pub buffer_critical: f64,
    /// h_cap: headroom credit ceiling
    pub headroom_cap: f64,

    /// z_min: baseline target z-score
    pub z_min: f64,
    /// α_B: z target increase per second of buffer deficit
    pub alpha_buffer: f64,
    /// α_h: z target relief per unit of headroom
    pub alpha_headroom: f64,
    /// β: loss penalty exponent
    pub loss_exponent: f64,

    /// o0: overhead that is always free
    pub base_free_overhead: f64,
    /// k_B: free overhead per second of buffer
    pub k_buffer: f64,
    /// k_h: free overhead per unit of headroom
    pub k_headroom: f64,
    /// o_cap: overhead ceiling, also the feasibility limit
    pub overhead_cap: f64,
    /// α: overhead penalty exponent
    pub overhead_exponent: f64,

    /// η: fraction of B_eff a block may occupy before it is penalized
    pub block_buffer_fraction: f64,

    pub w_loss_min: f64,
    /// λ_p
    pub lambda_loss: f64,
    /// p_cap
    pub loss_cap: f64,
    pub w_over_min: f64,
    /// λ_B
    pub lambda_buffer: f64,
    /// λ_h
    pub lambda_headroom: f64,
    pub w_blk_min: f64,
    /// λ_risk
    pub lambda_risk: f64,
    /// λ_{h−}
    pub lambda_neg_headroom: f64,

    /// ε: floor for rate denominators
    pub epsilon: f64,
    /// ε_var: floor for T·p·(1−p) in the z computation
    pub variance_floor: f64,

    /// Block airtime limit as a multiple of B_eff
    pub max_block_buffer_ratio: f64,
    /// Buffer level under which a negative z is a hard veto
    pub low_buffer_secs: f64,
}

impl Default for ScoringConstants {
    fn default() -> Self {
        Self {
            buffer_saturation: DEFAULT_BUFFER_SATURATION,
            buffer_critical: DEFAULT_BUFFER_CRITICAL,
            headroom_cap: DEFAULT_HEADROOM_CAP,
            z_min: DEFAULT_Z_MIN,
            alpha_buffer: DEFAULT_ALPHA_BUFFER,
            alpha_headroom: DEFAULT_ALPHA_HEADROOM,
            loss_exponent: DEFAULT_LOSS_EXPONENT,
            base_free_overhead: DEFAULT_BASE_FREE_OVERHEAD,
            k_buffer: DEFAULT_K_BUFFER,
            k_headroom: DEFAULT_K_HEADROOM,
            overhead_cap: DEFAULT_OVERHEAD_CAP,
            overhead_exponent: DEFAULT_OVERHEAD_EXPONENT,
            block_buffer_fraction: DEFAULT_BLOCK_BUFFER_FRACTION,
            w_loss_min: DEFAULT_W_LOSS_MIN,
            lambda_loss: DEFAULT_LAMBDA_LOSS,
            loss_cap: DEFAULT_LOSS_CAP,
            w_over_min: DEFAULT_W_OVER_MIN,
            lambda_buffer: DEFAULT_LAMBDA_BUFFER,
            lambda_headroom: DEFAULT_LAMBDA_HEADROOM,
            w_blk_min: DEFAULT_W_BLK_MIN,
            lambda_risk: DEFAULT_LAMBDA_RISK,
            lambda_neg_headroom: DEFAULT_LAMBDA_NEG_HEADROOM,
            epsilon: DEFAULT_EPSILON,
            variance_floor: DEFAULT_VARIANCE_FLOOR,
            max_block_buffer_ratio: DEFAULT_MAX_BLOCK_BUFFER_RATIO,
            low_buffer_secs: DEFAULT_LOW_BUFFER_SECS,
        }
    }
}

impl ScoringConstants {
    /// Reject tables that would make the formulas meaningless
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("buffer_saturation", self.buffer_saturation),
            ("buffer_critical", self.buffer_critical),
            ("headroom_cap", self.headroom_cap),
            ("z_min", self.z_min),
            ("alpha_buffer", self.alpha_buffer),
            ("alpha_headroom", self.alpha_headroom),
            ("loss_exponent", self.loss_exponent),
            ("base_free_overhead", self.base_free_overhead),
            ("k_buffer", self.k_buffer),
            ("k_headroom", self.k_headroom),
            ("overhead_cap", self.overhead_cap),
            ("overhead_exponent", self.overhead_exponent),
            ("block_buffer_fraction", self.block_buffer_fraction),
            ("w_loss_min", self.w_loss_min),
            ("lambda_loss", self.lambda_loss),
            ("loss_cap", self.loss_cap),
            ("w_over_min", self.w_over_min),
            ("lambda_buffer", self.lambda_buffer),
            ("lambda_headroom", self.lambda_headroom),
            ("w_blk_min", self.w_blk_min),
            ("lambda_risk", self.lambda_risk),
            ("lambda_neg_headroom", self.lambda_neg_headroom),
            ("epsilon", self.epsilon),
            ("variance_floor", self.variance_floor),
            ("max_block_buffer_ratio", self.max_block_buffer_ratio),
            ("low_buffer_secs", self.low_buffer_secs),
        ];

        // z_min is a target z-score and may legitimately be negative
        for (name, value) in named {
            if !value.is_finite() {
                return Err(invalid(format!("{} must be finite, got {}", name, value)));
            }
            if name != "z_min" && value < 0.0 {
                return Err(invalid(format!("{} must be non-negative, got {}", name, value)));
            }
        }

        let strictly_positive = [
            ("buffer_saturation", self.buffer_saturation),
            ("buffer_critical", self.buffer_critical),
            ("loss_exponent", self.loss_exponent),
            ("overhead_exponent", self.overhead_exponent),
            ("block_buffer_fraction", self.block_buffer_fraction),
            ("epsilon", self.epsilon),
            ("variance_floor", self.variance_floor),
        ];
        for (name, value) in strictly_positive {
            if value <= 0.0 {
                return Err(invalid(format!("{} must be positive, got {}", name, value)));
            }
        }

        if self.overhead_cap >= 1.0 {
            return Err(invalid(format!(
                "overhead_cap must be below 1.0, got {}",
                self.overhead_cap
            )));
        }
        if self.loss_cap > 1.0 {
            return Err(invalid(format!("loss_cap must be within [0, 1], got {}", self.loss_cap)));
        }

        Ok(())
    }
}

fn invalid(msg: String) -> FecError {
    FecError::InvalidConfiguration(msg)
}
