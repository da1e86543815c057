//! Codec resource cost model
//!
//! The controller never encodes anything itself. It only needs to know what
//! a chosen block will cost the codec that consumes it, measured as mean
//! per-byte encode/decode time (the figures the codec benchmark reports).

use serde::{Deserialize, Serialize};

use crate::{BlockGeometry, CandidateConfig, FecError, Result};

/// FEC codec families the controller can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Single XOR parity
    Xor,
    /// Reed-Solomon erasure code
    ReedSolomon,
    /// RaptorQ fountain code
    RaptorQ,
}

impl CodecKind {
    /// Losses per block the codec can repair given P repair symbols
    pub fn max_recoverable(&self, repair_symbols: u64) -> u64 {
        match self {
            // every parity symbol is the same XOR sum
            Self::Xor => repair_symbols.min(1),
            Self::ReedSolomon | Self::RaptorQ => repair_symbols,
        }
    }
}

/// Measured throughput of one codec
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CodecProfile {
    pub kind: CodecKind,
    /// Mean encode time per payload byte, in nanoseconds
    pub encode_ns_per_byte: f64,
    /// Mean decode time per payload byte, in nanoseconds
    pub decode_ns_per_byte: f64,
}

/// Estimated cost of one block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CodecCost {
    pub kind: CodecKind,
    /// N·S
    pub payload_bytes: u64,
    /// T·S
    pub block_bytes: u64,
    pub encode_secs: f64,
    pub decode_secs: f64,
    /// Losses the codec can actually repair in this block
    pub recoverable_losses: u64,
}

impl CodecProfile {
    pub fn new(kind: CodecKind, encode_ns_per_byte: f64, decode_ns_per_byte: f64) -> Self {
        Self {
            kind,
            encode_ns_per_byte,
            decode_ns_per_byte,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("encode_ns_per_byte", self.encode_ns_per_byte),
            ("decode_ns_per_byte", self.decode_ns_per_byte),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FecError::InvalidConfiguration(format!(
                    "codec {} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Approximate encode/decode time for one block of `candidate`
    pub fn estimate(&self, candidate: &CandidateConfig) -> CodecCost {
        let geometry = candidate.geometry();
        let payload_bytes = candidate.source_symbols as u64 * candidate.symbol_size as u64;
        CodecCost {
            kind: self.kind,
            payload_bytes,
            block_bytes: geometry.block_bytes,
            encode_secs: payload_bytes as f64 * self.encode_ns_per_byte * 1e-9,
            decode_secs: payload_bytes as f64 * self.decode_ns_per_byte * 1e-9,
            recoverable_losses: self.kind.max_recoverable(geometry.repair_symbols),
        }
    }
}

/// Contract of the external codec that consumes the active configuration
///
/// `encode` turns an `N·S`-byte payload into `T` shards of `S` bytes;
/// `decode` rebuilds the payload from any `N` of them (`None` marks a lost
/// shard).
pub trait FecCodec {
    type Error: std::error::Error;

    fn kind(&self) -> CodecKind;

    fn encode(&self, payload: &[u8], geometry: &BlockGeometry, symbol_size: usize)
        -> std::result::Result<Vec<Vec<u8>>, Self::Error>;

    fn decode(
        &self,
        shards: &mut [Option<Vec<u8>>],
        geometry: &BlockGeometry,
        symbol_size: usize,
    ) -> std::result::Result<Vec<u8>, Self::Error>;
}
