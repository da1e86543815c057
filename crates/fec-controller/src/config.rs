//! Controller configuration loading from JSON files

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::candidates::CandidateGrid;
use crate::codec::CodecProfile;
use crate::constants::ScoringConstants;
use crate::controller::RecoveryPolicy;
use crate::estimator::EstimatorConfig;
use crate::{CandidateConfig, FecError, Result};

/// Allowed hysteresis margin δ
pub const MIN_HYSTERESIS: f64 = 0.050000000;
pub const MAX_HYSTERESIS: f64 = 0.150000000;

/// Switch gating parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    /// δ: relative margin the best candidate must beat the active one by
    pub delta: f64,
    /// ε_tie: scores this close to the minimum count as tied
    pub tie_epsilon: f64,
    /// Decision steps that must pass after a switch before the next one
    pub min_dwell_segments: u32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            delta: 0.100000000,
            tie_epsilon: 1e-6,
            min_dwell_segments: 1,
        }
    }
}

impl HysteresisConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_HYSTERESIS..=MAX_HYSTERESIS).contains(&self.delta) {
            return Err(FecError::InvalidConfiguration(format!(
                "hysteresis delta must be within [{}, {}], got {}",
                MIN_HYSTERESIS, MAX_HYSTERESIS, self.delta
            )));
        }
        if !self.tie_epsilon.is_finite() || self.tie_epsilon < 0.0 {
            return Err(FecError::InvalidConfiguration(format!(
                "tie_epsilon must be finite and non-negative, got {}",
                self.tie_epsilon
            )));
        }
        if self.min_dwell_segments == 0 {
            return Err(FecError::InvalidConfiguration(
                "min_dwell_segments must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Everything a controller session needs, loaded once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub constants: ScoringConstants,
    pub grid: CandidateGrid,
    pub hysteresis: HysteresisConfig,
    pub estimator: EstimatorConfig,
    /// Configuration in effect before the first decision step
    pub initial: CandidateConfig,
    pub recovery: RecoveryPolicy,
    /// Cost model of the codec the output feeds, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<CodecProfile>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            constants: ScoringConstants::default(),
            grid: CandidateGrid::default(),
            hysteresis: HysteresisConfig::default(),
            estimator: EstimatorConfig::default(),
            initial: CandidateConfig::new(20, 512, 0.2),
            recovery: RecoveryPolicy::default(),
            codec: None,
        }
    }
}

impl ControllerConfig {
    /// Load and validate a configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading controller config from {:?}", path);

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: ControllerConfig = serde_json::from_reader(reader)?;
        config.validate()?;

        info!(
            "Loaded config: {} grid points, delta={}, dwell={}",
            config.grid.len(),
            config.hysteresis.delta,
            config.hysteresis.min_dwell_segments
        );
        Ok(config)
    }

    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ControllerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.constants.validate()?;
        self.grid.validate()?;
        self.hysteresis.validate()?;
        self.estimator.validate()?;
        self.initial.validate()?;
        self.recovery.validate()?;
        if let Some(codec) = &self.codec {
            codec.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::GridAxis;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_path_roundtrip() {
        let config = ControllerConfig {
            hysteresis: HysteresisConfig {
                delta: 0.05,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        serde_json::to_writer_pretty(&mut file, &config).unwrap();
        file.flush().unwrap();

        let loaded = ControllerConfig::from_path(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_sparse_document_uses_defaults() {
        let config = ControllerConfig::from_json(
            r#"{
                "grid": {
                    "source_symbols": [16, 32],
                    "symbol_size": {"min": 256, "max": 1024, "step": 256},
                    "redundancy": [0.0, 0.25]
                },
                "constants": { "buffer_critical": 2.5 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.grid.source_symbols, GridAxis::Values(vec![16, 32]));
        assert_eq!(config.grid.len(), 16);
        assert_eq!(config.constants.buffer_critical, 2.5);
        assert_eq!(config.hysteresis, HysteresisConfig::default());
    }

    #[test]
    fn test_rejects_out_of_range_delta() {
        let err = ControllerConfig::from_json(r#"{ "hysteresis": { "delta": 0.3 } }"#).unwrap_err();
        assert!(matches!(err, FecError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_rejects_zero_step() {
        let err = ControllerConfig::from_json(
            r#"{ "grid": {
                "source_symbols": {"min": 10, "max": 50, "step": 0},
                "symbol_size": [512],
                "redundancy": [0.1]
            } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, FecError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_rejects_blocks_too_large_to_size() {
        let err = ControllerConfig::from_json(
            r#"{
                "grid": {
                    "source_symbols": [4294967295],
                    "symbol_size": [4294967295],
                    "redundancy": [1.0]
                },
                "initial": {
                    "source_symbols": 4294967295,
                    "symbol_size": 4294967295,
                    "redundancy": 1.0
                }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, FecError::InvalidConfiguration(_)));

        let err = ControllerConfig::from_json(
            r#"{ "initial": { "source_symbols": 10, "symbol_size": 64, "redundancy": 1e30 } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("redundancy"));
    }

    #[test]
    fn test_rejects_negative_saturation() {
        let err =
            ControllerConfig::from_json(r#"{ "constants": { "buffer_saturation": -6.0 } }"#).unwrap_err();
        assert!(err.to_string().contains("buffer_saturation"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ControllerConfig::from_path("/nonexistent/fec-controller.json").unwrap_err();
        assert!(matches!(err, FecError::Io(_)));
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        let err = ControllerConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, FecError::Json(_)));
    }
}
