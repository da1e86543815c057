//! Runtime signal estimation
//!
//! Smooths raw loss samples with an EMA and passes buffer, goodput and
//! playback rate through (or smooths them with their own factors).
//!
//! Loss observations can arrive from a separate measurement path between
//! decision steps; [`SharedEstimator`] serializes those updates against the
//! snapshot taken by the decision step.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{FecError, Result, RuntimeSignals};

/// Default EMA factor γ for loss samples (9 decimal precision)
pub const DEFAULT_LOSS_SMOOTHING: f64 = 0.300000000;

/// Smoothing factors. `None` passes the raw value through.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// γ for the loss EMA
    pub loss_smoothing: f64,
    pub buffer_smoothing: Option<f64>,
    pub goodput_smoothing: Option<f64>,
    pub playback_smoothing: Option<f64>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            loss_smoothing: DEFAULT_LOSS_SMOOTHING,
            buffer_smoothing: None,
            goodput_smoothing: None,
            playback_smoothing: None,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<()> {
        let factors = [
            ("loss_smoothing", Some(self.loss_smoothing)),
            ("buffer_smoothing", self.buffer_smoothing),
            ("goodput_smoothing", self.goodput_smoothing),
            ("playback_smoothing", self.playback_smoothing),
        ];
        for (name, factor) in factors {
            if let Some(g) = factor {
                if !(g > 0.0 && g <= 1.0) {
                    return Err(FecError::InvalidConfiguration(format!(
                        "{} must be within (0, 1], got {}",
                        name, g
                    )));
                }
            }
        }
        Ok(())
    }
}

/// EMA step. The first sample seeds the average.
fn ema(previous: Option<f64>, sample: f64, factor: Option<f64>) -> f64 {
    match (previous, factor) {
        (Some(prev), Some(g)) => g * sample + (1.0 - g) * prev,
        _ => sample,
    }
}

/// Smoothed signal state for one session
#[derive(Debug, Clone)]
pub struct SignalEstimator {
    config: EstimatorConfig,
    loss: Option<f64>,
    buffer: Option<f64>,
    goodput: Option<f64>,
    playback: Option<f64>,
}

impl SignalEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            loss: None,
            buffer: None,
            goodput: None,
            playback: None,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Fold a full raw sample into the smoothed state
    ///
    /// On `InvalidSample` nothing is updated.
    pub fn update(
        &mut self,
        raw_loss: f64,
        raw_buffer: f64,
        raw_goodput: f64,
        raw_playback: f64,
    ) -> Result<RuntimeSignals> {
        check_loss(raw_loss)?;
        if !raw_buffer.is_finite() || raw_buffer < 0.0 {
            return Err(reject(format!("buffer level must be >= 0 s, got {}", raw_buffer)));
        }
        if !raw_goodput.is_finite() || raw_goodput < 0.0 {
            return Err(reject(format!("goodput must be >= 0 bit/s, got {}", raw_goodput)));
        }
        if !raw_playback.is_finite() || raw_playback <= 0.0 {
            return Err(reject(format!(
                "playback rate must be > 0 bit/s, got {}",
                raw_playback
            )));
        }

        self.loss = Some(ema(self.loss, raw_loss, Some(self.config.loss_smoothing)));
        self.buffer = Some(ema(self.buffer, raw_buffer, self.config.buffer_smoothing));
        self.goodput = Some(ema(self.goodput, raw_goodput, self.config.goodput_smoothing));
        self.playback = Some(ema(self.playback, raw_playback, self.config.playback_smoothing));

        let signals = RuntimeSignals::new(
            self.loss.unwrap_or(raw_loss),
            self.buffer.unwrap_or(raw_buffer),
            self.goodput.unwrap_or(raw_goodput),
            self.playback.unwrap_or(raw_playback),
        );
        debug!(
            "Signals: p={:.4} B={:.2}s G={:.0} R_play={:.0}",
            signals.loss_rate, signals.buffer_secs, signals.goodput_bps, signals.playback_bps
        );
        Ok(signals)
    }

    /// Fold a loss-only observation, returning the new smoothed loss rate
    pub fn observe_loss(&mut self, raw_loss: f64) -> Result<f64> {
        check_loss(raw_loss)?;
        let p = ema(self.loss, raw_loss, Some(self.config.loss_smoothing));
        self.loss = Some(p);
        Ok(p)
    }

    /// Current smoothed signals, once every signal has been seen
    pub fn current(&self) -> Option<RuntimeSignals> {
        Some(RuntimeSignals::new(
            self.loss?,
            self.buffer?,
            self.goodput?,
            self.playback?,
        ))
    }

    /// Drop all smoothed state (e.g. on reconnection)
    pub fn reset(&mut self) {
        self.loss = None;
        self.buffer = None;
        self.goodput = None;
        self.playback = None;
    }
}

fn check_loss(raw_loss: f64) -> Result<()> {
    if !raw_loss.is_finite() || !(0.0..=1.0).contains(&raw_loss) {
        return Err(reject(format!("loss rate must be within [0, 1], got {}", raw_loss)));
    }
    Ok(())
}

fn reject(msg: String) -> FecError {
    warn!("Rejected sample: {}", msg);
    FecError::InvalidSample(msg)
}

/// Cloneable, thread-safe handle to one session's estimator
#[derive(Debug, Clone)]
pub struct SharedEstimator {
    inner: Arc<Mutex<SignalEstimator>>,
}

impl SharedEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SignalEstimator::new(config))),
        }
    }

    pub fn update(
        &self,
        raw_loss: f64,
        raw_buffer: f64,
        raw_goodput: f64,
        raw_playback: f64,
    ) -> Result<RuntimeSignals> {
        self.inner
            .lock()
            .update(raw_loss, raw_buffer, raw_goodput, raw_playback)
    }

    pub fn observe_loss(&self, raw_loss: f64) -> Result<f64> {
        self.inner.lock().observe_loss(raw_loss)
    }

    /// Consistent copy of the smoothed signals
    pub fn snapshot(&self) -> Option<RuntimeSignals> {
        self.inner.lock().current()
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }
}
