//! Candidate generation
//!
//! Lazy, restartable enumeration of the `(N, S, R)` grid. The active
//! configuration is always yielded first so "stay" is scored alongside every
//! "switch" option.

use serde::{Deserialize, Serialize};

use crate::{CandidateConfig, FecError, Result};

/// Float range counts tolerate this much rounding in (max − min) / step
const RANGE_TOLERANCE: f64 = 1e-9;

/// Longest accepted axis, in values
pub const MAX_AXIS_LEN: usize = 4096;

/// One axis of the search grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridAxis<T> {
    /// Inclusive `min..=max` in `step` increments
    Range { min: T, max: T, step: T },
    /// Explicit values, enumerated in the given order
    Values(Vec<T>),
}

/// Scalar types a grid axis can range over
pub trait AxisValue: Copy + PartialOrd + std::fmt::Debug {
    fn range_len(min: Self, max: Self, step: Self) -> usize;
    fn nth(min: Self, step: Self, index: usize) -> Self;
    fn is_positive(self) -> bool;
}

impl AxisValue for u32 {
    fn range_len(min: u32, max: u32, step: u32) -> usize {
        if max < min || step == 0 {
            return 0;
        }
        (((max - min) / step) as usize).saturating_add(1)
    }

    fn nth(min: u32, step: u32, index: usize) -> u32 {
        min + step * index as u32
    }

    fn is_positive(self) -> bool {
        self > 0
    }
}

impl AxisValue for f64 {
    fn range_len(min: f64, max: f64, step: f64) -> usize {
        if !min.is_finite() || !max.is_finite() || step.is_nan() || step <= 0.0 || max < min {
            return 0;
        }
        // float-to-int casts saturate, so only the +1 needs guarding
        (((max - min) / step + RANGE_TOLERANCE).floor() as usize).saturating_add(1)
    }

    // Computed by index so long sweeps do not accumulate drift
    fn nth(min: f64, step: f64, index: usize) -> f64 {
        min + step * index as f64
    }

    fn is_positive(self) -> bool {
        self > 0.0
    }
}

impl<T: AxisValue> GridAxis<T> {
    pub fn len(&self) -> usize {
        match self {
            GridAxis::Range { min, max, step } => T::range_len(*min, *max, *step),
            GridAxis::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index`; callers stay below `len()`
    fn at(&self, index: usize) -> T {
        match self {
            GridAxis::Range { min, step, .. } => T::nth(*min, *step, index),
            GridAxis::Values(values) => values[index],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).map(move |i| self.at(i))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if let GridAxis::Range { min, max, step } = self {
            if !step.is_positive() {
                return Err(FecError::InvalidConfiguration(format!(
                    "{} step must be positive, got {:?}",
                    name, step
                )));
            }
            if max < min {
                return Err(FecError::InvalidConfiguration(format!(
                    "{} range is empty: min {:?} > max {:?}",
                    name, min, max
                )));
            }
        }
        if self.is_empty() {
            return Err(FecError::InvalidConfiguration(format!("{} axis has no values", name)));
        }
        if self.len() > MAX_AXIS_LEN {
            return Err(FecError::InvalidConfiguration(format!(
                "{} axis has {} values, at most {} allowed",
                name,
                self.len(),
                MAX_AXIS_LEN
            )));
        }
        Ok(())
    }
}

/// Candidate search space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateGrid {
    /// N axis
    pub source_symbols: GridAxis<u32>,
    /// S axis (bytes)
    pub symbol_size: GridAxis<u32>,
    /// R axis (fraction of N)
    pub redundancy: GridAxis<f64>,
}

impl Default for CandidateGrid {
    /// The N × S × R sweep used when benchmarking the codecs
    fn default() -> Self {
        Self {
            source_symbols: GridAxis::Range {
                min: 10,
                max: 50,
                step: 10,
            },
            symbol_size: GridAxis::Values(vec![64, 92, 120, 250, 512]),
            redundancy: GridAxis::Range {
                min: 0.1,
                max: 0.5,
                step: 0.1,
            },
        }
    }
}

impl CandidateGrid {
    pub fn validate(&self) -> Result<()> {
        self.source_symbols.validate("source_symbols")?;
        self.symbol_size.validate("symbol_size")?;
        self.redundancy.validate("redundancy")?;

        if self.source_symbols.iter().any(|n| n == 0) {
            return Err(FecError::InvalidConfiguration(
                "source_symbols values must be at least 1".into(),
            ));
        }
        if self.symbol_size.iter().any(|s| s == 0) {
            return Err(FecError::InvalidConfiguration(
                "symbol_size values must be at least 1".into(),
            ));
        }
        if self.redundancy.iter().any(|r| !r.is_finite() || r < 0.0) {
            return Err(FecError::InvalidConfiguration(
                "redundancy values must be finite and non-negative".into(),
            ));
        }

        // Geometry grows with every axis, so the largest corner bounds the grid
        let widest = CandidateConfig::new(
            self.source_symbols.iter().max().unwrap_or(1),
            self.symbol_size.iter().max().unwrap_or(1),
            self.redundancy.iter().fold(0.0, f64::max),
        );
        widest.validate()?;
        Ok(())
    }

    /// Number of grid points (not counting an off-grid active config)
    pub fn len(&self) -> usize {
        self.source_symbols
            .len()
            .saturating_mul(self.symbol_size.len())
            .saturating_mul(self.redundancy.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerate candidates: `active` first, then the grid with N outermost
    /// and R innermost. `active` is not repeated if it lies on the grid.
    pub fn generate(&self, active: &CandidateConfig) -> Candidates<'_> {
        Candidates {
            grid: self,
            active: *active,
            yielded_active: false,
            index: 0,
        }
    }
}

/// Iterator returned by [`CandidateGrid::generate`]
#[derive(Debug, Clone)]
pub struct Candidates<'a> {
    grid: &'a CandidateGrid,
    active: CandidateConfig,
    yielded_active: bool,
    index: usize,
}

impl Iterator for Candidates<'_> {
    type Item = CandidateConfig;

    fn next(&mut self) -> Option<CandidateConfig> {
        if !self.yielded_active {
            self.yielded_active = true;
            return Some(self.active);
        }

        let s_len = self.grid.symbol_size.len();
        let r_len = self.grid.redundancy.len();
        while self.index < self.grid.len() {
            let i = self.index;
            self.index += 1;

            let n = self.grid.source_symbols.at(i / s_len.saturating_mul(r_len));
            let s = self.grid.symbol_size.at((i / r_len) % s_len);
            let r = self.grid.redundancy.at(i % r_len);
            let candidate = CandidateConfig::new(n, s, r);
            if !candidate.same_as(&self.active) {
                return Some(candidate);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len().saturating_sub(self.index);
        let active = usize::from(!self.yielded_active);
        (remaining.saturating_sub(1) + active, remaining.checked_add(active))
    }
}
