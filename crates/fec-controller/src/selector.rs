//! Candidate selection with tie-break, hysteresis and dwell
//!
//! ```text
//! switch ⇔ best.score < active.score × (1 − δ)  ∧  segments_since_switch ≥ dwell
//! ```

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HysteresisConfig;
use crate::constants::ScoringConstants;
use crate::constraints::{feasible_within, FeasibilityLimits};
use crate::scorer::{self, ScoreBreakdown};
use crate::{CandidateConfig, ControllerState, RuntimeSignals};

/// A scored candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub candidate: CandidateConfig,
    pub breakdown: ScoreBreakdown,
}

impl Evaluation {
    pub fn score(&self) -> f64 {
        self.breakdown.score
    }

    pub fn feasible(&self) -> bool {
        self.breakdown.feasible
    }
}

/// Outcome of one decision step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    /// Move to a new configuration
    Switch(CandidateConfig),
    /// Keep the active configuration
    Hold,
}

/// Score one candidate and apply the given feasibility limits
pub fn evaluate(
    candidate: CandidateConfig,
    signals: &RuntimeSignals,
    constants: &ScoringConstants,
    limits: &FeasibilityLimits,
) -> Evaluation {
    let mut breakdown = scorer::score(&candidate, signals, constants);
    breakdown.feasible = feasible_within(&breakdown, limits);
    Evaluation {
        candidate,
        breakdown,
    }
}

/// Single-pass reduction of a candidate stream to its winner
///
/// Only feasible evaluations within `tie_epsilon` of the running minimum are
/// kept, so memory follows the size of the tie band rather than the grid.
/// The incumbent seeds the reduction and decides whether the buffer is at
/// risk for tie-breaking.
#[derive(Debug, Clone)]
pub struct Selection {
    incumbent: Evaluation,
    at_risk: bool,
    tie_epsilon: f64,
    min_score: f64,
    band: Vec<Evaluation>,
    evaluated: usize,
    feasible: usize,
}

impl Selection {
    pub fn new(incumbent: Evaluation, tie_epsilon: f64, constants: &ScoringConstants) -> Self {
        let mut selection = Self {
            incumbent,
            at_risk: incumbent.breakdown.effective_buffer < constants.buffer_critical,
            tie_epsilon,
            min_score: f64::INFINITY,
            band: Vec::new(),
            evaluated: 0,
            feasible: 0,
        };
        selection.push(incumbent);
        selection
    }

    pub fn push(&mut self, evaluation: Evaluation) {
        self.evaluated += 1;
        if !evaluation.feasible() {
            return;
        }
        self.feasible += 1;

        let score = evaluation.score();
        if score < self.min_score {
            self.min_score = score;
            let cutoff = score + self.tie_epsilon;
            self.band.retain(|e| e.score() <= cutoff);
        }
        if score <= self.min_score + self.tie_epsilon {
            self.band.push(evaluation);
        }
    }

    pub fn incumbent(&self) -> &Evaluation {
        &self.incumbent
    }

    pub fn evaluated(&self) -> usize {
        self.evaluated
    }

    pub fn feasible(&self) -> usize {
        self.feasible
    }

    /// Minimum-score feasible evaluation after tie-breaking
    ///
    /// Candidates within `tie_epsilon` of the minimum are ordered by lower
    /// overhead, then larger S, then larger N. When the buffer is below
    /// `B_crit`, the lowest loss penalty goes first. Remaining ties keep
    /// enumeration order.
    pub fn best(&self) -> Option<&Evaluation> {
        self.band
            .iter()
            .min_by(|a, b| tie_break(a, b, self.at_risk))
    }
}

/// [`Selection`] over an already collected slice; the first entry is the
/// incumbent
pub fn pick_best(
    evaluations: &[Evaluation],
    tie_epsilon: f64,
    constants: &ScoringConstants,
) -> Option<Evaluation> {
    let (first, rest) = evaluations.split_first()?;
    let mut selection = Selection::new(*first, tie_epsilon, constants);
    for evaluation in rest {
        selection.push(*evaluation);
    }
    selection.best().copied()
}

fn tie_break(a: &Evaluation, b: &Evaluation, at_risk: bool) -> Ordering {
    let loss_first = if at_risk {
        a.breakdown.pen_loss.total_cmp(&b.breakdown.pen_loss)
    } else {
        Ordering::Equal
    };

    loss_first
        .then_with(|| {
            a.breakdown
                .geometry
                .overhead
                .total_cmp(&b.breakdown.geometry.overhead)
        })
        .then_with(|| b.candidate.symbol_size.cmp(&a.candidate.symbol_size))
        .then_with(|| b.candidate.source_symbols.cmp(&a.candidate.source_symbols))
}

/// Switch gate: hysteresis margin plus minimum dwell
///
/// An active configuration that is itself infeasible under the current
/// signals waives the hysteresis margin; dwell still applies.
pub fn gate(
    state: &ControllerState,
    active: &Evaluation,
    best: &Evaluation,
    hysteresis: &HysteresisConfig,
) -> Decision {
    if best.candidate.same_as(&active.candidate) {
        return Decision::Hold;
    }

    if state.segments_since_switch < hysteresis.min_dwell_segments {
        debug!(
            "Dwell: {} segment(s) since switch, need {}",
            state.segments_since_switch, hysteresis.min_dwell_segments
        );
        return Decision::Hold;
    }

    if !active.feasible() {
        debug!("Active {} infeasible, hysteresis waived", active.candidate);
        return Decision::Switch(best.candidate);
    }

    let threshold = active.score() * (1.0 - hysteresis.delta);
    if best.score() < threshold {
        Decision::Switch(best.candidate)
    } else {
        debug!(
            "Hysteresis: best {:.6} not below {:.6} (active {:.6})",
            best.score(),
            threshold,
            active.score()
        );
        Decision::Hold
    }
}

/// Apply a decision to the session state
pub fn apply(state: &mut ControllerState, decision: &Decision, now: DateTime<Utc>) {
    match decision {
        Decision::Switch(next) => {
            info!("Switching FEC config {} -> {}", state.active, next);
            state.active = *next;
            state.last_switch_time = now;
            state.segments_since_switch = 0;
        }
        Decision::Hold => {
            state.segments_since_switch = state.segments_since_switch.saturating_add(1);
        }
    }
}
