//! A single-parity XOR codec wired against the `FecCodec` contract

use fec_controller::{BlockGeometry, CandidateConfig, CodecKind, CodecProfile, FecCodec};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
enum XorError {
    #[error("payload is {actual} bytes, block carries {expected}")]
    PayloadSize { expected: usize, actual: usize },
    #[error("expected {expected} shards, got {actual}")]
    ShardCount { expected: usize, actual: usize },
    #[error("{missing} source shards lost, XOR parity repairs at most one")]
    Unrecoverable { missing: usize },
}

struct XorParity;

impl XorParity {
    fn parity<'a>(shards: impl Iterator<Item = &'a [u8]>, symbol_size: usize) -> Vec<u8> {
        shards.fold(vec![0u8; symbol_size], |mut acc, shard| {
            acc.iter_mut().zip(shard).for_each(|(a, b)| *a ^= b);
            acc
        })
    }
}

impl FecCodec for XorParity {
    type Error = XorError;

    fn kind(&self) -> CodecKind {
        CodecKind::Xor
    }

    fn encode(
        &self,
        payload: &[u8],
        geometry: &BlockGeometry,
        symbol_size: usize,
    ) -> Result<Vec<Vec<u8>>, XorError> {
        let source = (geometry.total_symbols - geometry.repair_symbols) as usize;
        if payload.len() != source * symbol_size {
            return Err(XorError::PayloadSize {
                expected: source * symbol_size,
                actual: payload.len(),
            });
        }

        let mut shards: Vec<Vec<u8>> = payload.chunks(symbol_size).map(<[u8]>::to_vec).collect();
        let parity = Self::parity(shards.iter().map(Vec::as_slice), symbol_size);
        for _ in 0..geometry.repair_symbols {
            shards.push(parity.clone());
        }
        Ok(shards)
    }

    fn decode(
        &self,
        shards: &mut [Option<Vec<u8>>],
        geometry: &BlockGeometry,
        symbol_size: usize,
    ) -> Result<Vec<u8>, XorError> {
        if shards.len() != geometry.total_symbols as usize {
            return Err(XorError::ShardCount {
                expected: geometry.total_symbols as usize,
                actual: shards.len(),
            });
        }
        let source = (geometry.total_symbols - geometry.repair_symbols) as usize;
        let (data, repair) = shards.split_at_mut(source);

        let missing: Vec<usize> = (0..source).filter(|&i| data[i].is_none()).collect();
        match missing.as_slice() {
            [] => {}
            [lost] => {
                let parity = repair
                    .iter()
                    .flatten()
                    .next()
                    .ok_or(XorError::Unrecoverable { missing: 1 })?;
                let present = data.iter().flatten().map(Vec::as_slice);
                let rebuilt = Self::parity(present.chain(std::iter::once(parity.as_slice())), symbol_size);
                data[*lost] = Some(rebuilt);
            }
            many => return Err(XorError::Unrecoverable { missing: many.len() }),
        }

        Ok(data.iter().flatten().flatten().copied().collect())
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn xor_repairs_a_single_lost_source_shard() {
    let config = CandidateConfig::new(10, 64, 0.1);
    let geometry = config.geometry();
    let data = payload(640);

    let encoded = XorParity.encode(&data, &geometry, 64).unwrap();
    assert_eq!(encoded.len(), 11);

    let mut received: Vec<Option<Vec<u8>>> = encoded.into_iter().map(Some).collect();
    received[3] = None;
    assert_eq!(XorParity.decode(&mut received, &geometry, 64).unwrap(), data);
}

#[test]
fn xor_cannot_use_extra_parity_for_a_second_loss() {
    let config = CandidateConfig::new(10, 64, 0.3);
    let geometry = config.geometry();
    assert_eq!(geometry.repair_symbols, 3);

    let encoded = XorParity.encode(&payload(640), &geometry, 64).unwrap();
    let mut received: Vec<Option<Vec<u8>>> = encoded.into_iter().map(Some).collect();
    received[0] = None;
    received[7] = None;

    assert_eq!(
        XorParity.decode(&mut received, &geometry, 64),
        Err(XorError::Unrecoverable { missing: 2 })
    );
}

#[test]
fn cost_model_matches_what_the_codec_can_repair() {
    let config = CandidateConfig::new(10, 64, 0.3);
    let cost = CodecProfile::new(XorParity.kind(), 0.5, 0.5).estimate(&config);
    assert_eq!(cost.recoverable_losses, 1);
    assert_eq!(cost.payload_bytes, 640);
}

#[test]
fn encode_rejects_short_payload() {
    let geometry = CandidateConfig::new(10, 64, 0.1).geometry();
    assert_eq!(
        XorParity.encode(&payload(100), &geometry, 64),
        Err(XorError::PayloadSize {
            expected: 640,
            actual: 100
        })
    );
}
