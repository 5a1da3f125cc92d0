//! Integrity self-test: random payloads, streaming SHA-256, digest comparison, throughput.

use std::fmt;
use std::time::{Duration, Instant};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::chunk::{ChunkError, LengthAccumulator, Progress};

/// Bytes of the digest shown in logs.
pub const SHORT_DIGEST_LEN: usize = 8;
pub const DIGEST_LEN: usize = 32;

/// SHA-256 digest of a self-test payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }

    /// Parse a digest received from the peer (e.g. over the control channel).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IntegrityError> {
        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| IntegrityError::BadDigestLength(bytes.len()))?;
        Ok(Digest(arr))
    }

    /// Hex of the first eight bytes, as printed by both perf peers.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..SHORT_DIGEST_LEN])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_hex())
    }
}

/// Hash a whole buffer.
pub fn hash_bytes(payload: &[u8]) -> Digest {
    let mut d = StreamDigest::new();
    d.update(payload);
    d.finalize()
}

/// Check a locally computed digest against the one the sender advertised.
pub fn verify_digest(expected: &Digest, actual: &Digest) -> Result<(), IntegrityError> {
    if expected == actual {
        Ok(())
    } else {
        Err(IntegrityError::DigestMismatch {
            expected: expected.short_hex(),
            actual: actual.short_hex(),
        })
    }
}

/// Incremental SHA-256 fed one chunk at a time.
#[derive(Clone, Default)]
pub struct StreamDigest {
    hasher: Sha256,
    bytes: u64,
}

impl StreamDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> Digest {
        Digest(self.hasher.finalize().into())
    }
}

/// Fill a buffer of `len` bytes with uniformly random byte values.
pub fn generate_payload<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}

/// Random payload together with its digest, ready to send.
#[derive(Clone)]
pub struct SelfTestPayload {
    pub bytes: Vec<u8>,
    pub digest: Digest,
}

impl SelfTestPayload {
    pub fn generate(len: usize) -> Self {
        Self::generate_with(&mut rand::thread_rng(), len)
    }

    pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Self {
        let bytes = generate_payload(rng, len);
        let digest = hash_bytes(&bytes);
        Self { bytes, digest }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// `bytes / elapsed` in bytes per second. A zero duration is clamped to one microsecond.
pub fn bytes_per_second(bytes: u64, elapsed: Duration) -> u64 {
    let micros = elapsed.as_micros().max(1);
    (u128::from(bytes) * 1_000_000 / micros) as u64
}

/// Receiving side of the self-test. Host feeds each landed chunk; the digest is updated as
/// chunks arrive, not after full accumulation.
///
/// Timing starts when the first chunk lands, and that chunk's bytes are excluded from the
/// steady-state rate so connection setup does not skew it.
pub struct SelfTestReceiver {
    acc: LengthAccumulator,
    digest: StreamDigest,
    first_chunk: usize,
    started: Option<Instant>,
}

impl SelfTestReceiver {
    pub fn new(total: usize) -> Self {
        Self {
            acc: LengthAccumulator::new(total as u64),
            digest: StreamDigest::new(),
            first_chunk: 0,
            started: None,
        }
    }

    pub fn on_chunk(&mut self, chunk: &[u8], now: Instant) -> Result<Progress, ChunkError> {
        let progress = self.acc.push(chunk.len())?;
        if self.started.is_none() {
            self.started = Some(now);
            self.first_chunk = chunk.len();
        }
        self.digest.update(chunk);
        Ok(progress)
    }

    pub fn is_complete(&self) -> bool {
        self.acc.is_complete()
    }

    pub fn received(&self) -> u64 {
        self.acc.received()
    }

    /// Close out the test. Fails with `Incomplete` if the stream stopped short.
    pub fn finish(self, now: Instant) -> Result<ReceiveSummary, ChunkError> {
        let bytes = self.acc.finish()?;
        let elapsed = self
            .started
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        let steady = bytes - self.first_chunk as u64;
        Ok(ReceiveSummary {
            bytes,
            first_chunk: self.first_chunk,
            chunks: self.acc.chunk_count(),
            elapsed,
            rate_bps: bytes_per_second(steady, elapsed),
            digest: self.digest.finalize(),
        })
    }
}

/// Outcome of a completed receive.
#[derive(Debug, Clone)]
pub struct ReceiveSummary {
    pub bytes: u64,
    pub first_chunk: usize,
    pub chunks: u64,
    pub elapsed: Duration,
    /// Bytes per second, first chunk excluded.
    pub rate_bps: u64,
    pub digest: Digest,
}

/// Serializable record of one self-test direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfTestReport {
    pub direction: String,
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub rate_bps: u64,
    pub hash: String,
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("digest must be 32 bytes, got {0}")]
    BadDigestLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn stream_digest_equals_one_shot() {
        let payload = SelfTestPayload::generate_with(&mut StdRng::seed_from_u64(7), 10 * 1024);
        let mut d = StreamDigest::new();
        for c in payload.bytes.chunks(240) {
            d.update(c);
        }
        assert_eq!(d.bytes(), 10 * 1024);
        assert_eq!(d.finalize(), payload.digest);
    }

    #[test]
    fn generated_payload_has_requested_length() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(generate_payload(&mut rng, 0).len(), 0);
        assert_eq!(generate_payload(&mut rng, 1234).len(), 1234);
    }

    #[test]
    fn generated_payload_uses_wide_byte_range() {
        let buf = generate_payload(&mut StdRng::seed_from_u64(3), 64 * 1024);
        let mut seen = [false; 256];
        for b in buf {
            seen[b as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn corrupted_byte_changes_digest() {
        let payload = SelfTestPayload::generate_with(&mut StdRng::seed_from_u64(9), 4096);
        let mut corrupted = payload.bytes.clone();
        corrupted[2000] ^= 0x01;
        let actual = hash_bytes(&corrupted);
        assert_ne!(actual, payload.digest);
        assert!(matches!(
            verify_digest(&payload.digest, &actual),
            Err(IntegrityError::DigestMismatch { .. })
        ));
        assert!(verify_digest(&payload.digest, &hash_bytes(&payload.bytes)).is_ok());
    }

    #[test]
    fn short_hex_is_first_eight_bytes() {
        let d = Digest::from_bytes([0xab; DIGEST_LEN]);
        assert_eq!(d.short_hex(), "abababababababab");
        assert_eq!(d.to_hex().len(), 64);
    }

    #[test]
    fn digest_from_slice_checks_length() {
        assert!(Digest::from_slice(&[0u8; 32]).is_ok());
        assert_eq!(
            Digest::from_slice(&[0u8; 8]),
            Err(IntegrityError::BadDigestLength(8))
        );
    }

    #[test]
    fn rate_math() {
        assert_eq!(bytes_per_second(10_000, Duration::from_secs(2)), 5_000);
        assert_eq!(bytes_per_second(1_000, Duration::from_millis(500)), 2_000);
        assert_eq!(bytes_per_second(5, Duration::ZERO), 5_000_000);
    }

    #[test]
    fn receiver_excludes_first_chunk_from_rate() {
        let payload = SelfTestPayload::generate_with(&mut StdRng::seed_from_u64(5), 1000);
        let t0 = Instant::now();
        let mut rx = SelfTestReceiver::new(1000);
        let mut progress = Progress::InProgress;
        for c in payload.bytes.chunks(250) {
            progress = rx.on_chunk(c, t0).unwrap();
        }
        assert_eq!(progress, Progress::Complete);
        let summary = rx.finish(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(summary.bytes, 1000);
        assert_eq!(summary.first_chunk, 250);
        assert_eq!(summary.chunks, 4);
        assert_eq!(summary.rate_bps, 750);
        assert_eq!(summary.digest, payload.digest);
    }

    #[test]
    fn receiver_reports_incomplete() {
        let mut rx = SelfTestReceiver::new(1000);
        rx.on_chunk(&[0u8; 100], Instant::now()).unwrap();
        assert!(matches!(
            rx.finish(Instant::now()),
            Err(ChunkError::Incomplete {
                expected: 1000,
                received: 100
            })
        ));
    }
}
