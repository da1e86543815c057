//! Adaptive FEC Configuration Controller
//!
//! Chooses the `(N, S, R)` triple a streaming client uses for its next
//! FEC-protected block, given loss, buffer, goodput and playback telemetry.
//!
//! # Scoring Model (3-Term Weighted Penalty)
//!
//! ```text
//! score(c) = w_loss·pen_loss + w_over·pen_over + w_blk·pen_blk
//! ```
//!
//! | Term     | Penalty                          | Driven by                  |
//! |----------|----------------------------------|----------------------------|
//! | loss     | max(0, z_tgt − z)^β              | loss rate, buffer, headroom |
//! | overhead | max(0, o − o_free)^α             | repair fraction vs budget  |
//! | block    | clamp(t_blk/(η·B_eff) − 1, 0, 1) | block airtime vs buffer    |
//!
//! # Decision Step
//!
//! 1. Snapshot smoothed signals ([`estimator`])
//! 2. Enumerate candidates, active first ([`candidates`])
//! 3. Score each one ([`scorer`]) and veto infeasible ones ([`constraints`])
//! 4. Pick the best, then gate the switch on hysteresis + dwell ([`selector`])
//!
//! [`controller::FecController`] wires these together and owns the
//! per-session [`ControllerState`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod candidates;
pub mod codec;
pub mod config;
pub mod constants;
pub mod constraints;
pub mod controller;
pub mod estimator;
pub mod scorer;
pub mod selector;

pub use candidates::{CandidateGrid, GridAxis};
pub use codec::{CodecCost, CodecKind, CodecProfile, FecCodec};
pub use config::{ControllerConfig, HysteresisConfig};
pub use constants::ScoringConstants;
pub use constraints::FeasibilityLimits;
pub use controller::{DecisionReport, FecController, RecoveryPolicy};
pub use estimator::{EstimatorConfig, SharedEstimator, SignalEstimator};
pub use scorer::ScoreBreakdown;
pub use selector::{Decision, Evaluation, Selection};

/// Tolerance subtracted before `ceil(N·R)` so that products like `10 × 0.3`
/// (which land a hair above 3.0 in binary floating point) do not gain a
/// phantom repair symbol.
pub const REPAIR_CEIL_TOLERANCE: f64 = 1e-9;

/// Largest accepted redundancy ratio (64 repair symbols per source symbol)
pub const MAX_REDUNDANCY: f64 = 64.000000000;

#[derive(Error, Debug)]
pub enum FecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid sample: {0}")]
    InvalidSample(String),
    #[error("No feasible candidate among {evaluated} evaluated")]
    NoFeasibleCandidate { evaluated: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, FecError>;

/// A candidate FEC block configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    /// Source symbols per block (N)
    pub source_symbols: u32,
    /// Symbol size in bytes (S)
    pub symbol_size: u32,
    /// Redundancy ratio as a fraction of N (R)
    pub redundancy: f64,
}

impl CandidateConfig {
    pub fn new(source_symbols: u32, symbol_size: u32, redundancy: f64) -> Self {
        Self {
            source_symbols,
            symbol_size,
            redundancy,
        }
    }

    /// Check the `N ≥ 1, S ≥ 1, R ≥ 0` invariants
    pub fn validate(&self) -> Result<()> {
        if self.source_symbols == 0 {
            return Err(FecError::InvalidConfiguration(
                "source_symbols must be at least 1".into(),
            ));
        }
        if self.symbol_size == 0 {
            return Err(FecError::InvalidConfiguration(
                "symbol_size must be at least 1".into(),
            ));
        }
        if !self.redundancy.is_finite() || self.redundancy < 0.0 {
            return Err(FecError::InvalidConfiguration(format!(
                "redundancy must be a finite non-negative fraction, got {}",
                self.redundancy
            )));
        }
        if self.redundancy > MAX_REDUNDANCY {
            return Err(FecError::InvalidConfiguration(format!(
                "redundancy must not exceed {}, got {}",
                MAX_REDUNDANCY, self.redundancy
            )));
        }
        if self.checked_block_bytes().is_none() {
            return Err(FecError::InvalidConfiguration(format!(
                "block size of {} does not fit in 64 bits",
                self
            )));
        }
        Ok(())
    }

    /// P = ceil(N·R), saturating for absurd ratios
    fn repair_symbols(&self) -> u64 {
        let raw = self.source_symbols as f64 * self.redundancy - REPAIR_CEIL_TOLERANCE;
        if raw <= 0.0 {
            0
        } else {
            raw.ceil() as u64
        }
    }

    fn checked_block_bytes(&self) -> Option<u64> {
        (self.source_symbols as u64)
            .checked_add(self.repair_symbols())?
            .checked_mul(self.symbol_size as u64)
    }

    /// Derive the block geometry. Recomputed on every evaluation.
    ///
    /// Counts saturate at `u64::MAX` for configurations `validate` rejects.
    pub fn geometry(&self) -> BlockGeometry {
        let repair = self.repair_symbols();
        let total = (self.source_symbols as u64).saturating_add(repair);
        BlockGeometry {
            repair_symbols: repair,
            total_symbols: total,
            overhead: repair as f64 / total as f64,
            block_bytes: total.saturating_mul(self.symbol_size as u64),
        }
    }

    /// Same configuration, compared with a redundancy tolerance
    pub fn same_as(&self, other: &CandidateConfig) -> bool {
        self.source_symbols == other.source_symbols
            && self.symbol_size == other.symbol_size
            && (self.redundancy - other.redundancy).abs() < REPAIR_CEIL_TOLERANCE
    }
}

impl std::fmt::Display for CandidateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "N={} S={} R={:.3}",
            self.source_symbols, self.symbol_size, self.redundancy
        )
    }
}

/// Quantities derived from a [`CandidateConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockGeometry {
    /// P = ceil(N·R)
    pub repair_symbols: u64,
    /// T = N + P
    pub total_symbols: u64,
    /// o = P / T
    pub overhead: f64,
    /// B_blk = T·S
    pub block_bytes: u64,
}

/// Runtime signals at decision time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSignals {
    /// Smoothed loss rate in [0, 1]
    pub loss_rate: f64,
    /// Buffer level in seconds
    pub buffer_secs: f64,
    /// Goodput estimate in bits/s
    pub goodput_bps: f64,
    /// Playback bitrate in bits/s
    pub playback_bps: f64,
}

impl RuntimeSignals {
    pub fn new(loss_rate: f64, buffer_secs: f64, goodput_bps: f64, playback_bps: f64) -> Self {
        Self {
            loss_rate,
            buffer_secs,
            goodput_bps,
            playback_bps,
        }
    }

    /// Domain check for signals handed straight to the controller
    pub fn validate(&self) -> Result<()> {
        if !self.loss_rate.is_finite() || !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(FecError::InvalidSample(format!(
                "loss rate must be within [0, 1], got {}",
                self.loss_rate
            )));
        }
        if !self.buffer_secs.is_finite() || self.buffer_secs < 0.0 {
            return Err(FecError::InvalidSample(format!(
                "buffer level must be >= 0 s, got {}",
                self.buffer_secs
            )));
        }
        if !self.goodput_bps.is_finite() || self.goodput_bps < 0.0 {
            return Err(FecError::InvalidSample(format!(
                "goodput must be >= 0 bit/s, got {}",
                self.goodput_bps
            )));
        }
        if !self.playback_bps.is_finite() || self.playback_bps <= 0.0 {
            return Err(FecError::InvalidSample(format!(
                "playback rate must be > 0 bit/s, got {}",
                self.playback_bps
            )));
        }
        Ok(())
    }

    /// h = (G − R_play) / max(R_play, ε). Negative when goodput falls short.
    pub fn headroom(&self, constants: &ScoringConstants) -> f64 {
        (self.goodput_bps - self.playback_bps) / self.playback_bps.max(constants.epsilon)
    }

    /// B_eff = min(B, B_sat), never below zero
    pub fn effective_buffer(&self, constants: &ScoringConstants) -> f64 {
        self.buffer_secs.clamp(0.0, constants.buffer_saturation)
    }
}

/// Persistent selection state for one streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerState {
    pub active: CandidateConfig,
    pub last_switch_time: DateTime<Utc>,
    pub segments_since_switch: u32,
}

impl ControllerState {
    /// Fresh session state. The dwell counter starts satisfied so the first
    /// decision step is free to move off the initial configuration.
    pub fn new(active: CandidateConfig, started_at: DateTime<Utc>, min_dwell: u32) -> Self {
        Self {
            active,
            last_switch_time: started_at,
            segments_since_switch: min_dwell,
        }
    }
}
