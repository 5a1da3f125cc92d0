//! Chunking for the bulk channel and accumulation of partial reads into logical records.
//!
//! One inbound read is one underlying chunk, and inbound chunk boundaries need not match the
//! sender's. Receivers therefore accumulate against either a known total length (download,
//! self-test) or a content sentinel (listing).

use crate::listing;

/// Check a caller-chosen chunk size against the peer's MTU.
pub fn validate_chunk_size(chunk_size: usize, mtu: usize) -> Result<usize, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    if chunk_size > mtu {
        return Err(ChunkError::ChunkExceedsMtu { chunk_size, mtu });
    }
    Ok(chunk_size)
}

/// Iterate the chunks of `buf` that a sender writes, one channel write each.
pub fn chunks(buf: &[u8], chunk_size: usize) -> Result<std::slice::Chunks<'_, u8>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    Ok(buf.chunks(chunk_size))
}

/// Progress of an accumulation after one more chunk landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    InProgress,
    Complete,
}

/// Accumulates chunk lengths against a total announced beforehand (e.g. by SIZE).
#[derive(Debug, Clone)]
pub struct LengthAccumulator {
    expected: u64,
    received: u64,
    chunks: u64,
}

impl LengthAccumulator {
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            received: 0,
            chunks: 0,
        }
    }

    /// Record `n` more bytes. Bytes beyond the expected total are an overrun.
    pub fn push(&mut self, n: usize) -> Result<Progress, ChunkError> {
        let received = self.received + n as u64;
        if received > self.expected {
            return Err(ChunkError::Overrun {
                expected: self.expected,
                received,
            });
        }
        self.received = received;
        self.chunks += 1;
        Ok(self.progress())
    }

    pub fn progress(&self) -> Progress {
        if self.received >= self.expected {
            Progress::Complete
        } else {
            Progress::InProgress
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress() == Progress::Complete
    }

    /// Bytes still owed by the sender.
    pub fn remaining(&self) -> u64 {
        self.expected - self.received
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks
    }

    /// Stream ended (e.g. disconnect): succeed only if every byte arrived.
    pub fn finish(&self) -> Result<u64, ChunkError> {
        if self.is_complete() {
            Ok(self.received)
        } else {
            Err(ChunkError::Incomplete {
                expected: self.expected,
                received: self.received,
            })
        }
    }
}

/// Accumulates bytes until the listing sentinel terminates the buffer.
#[derive(Debug, Clone, Default)]
pub struct SentinelAccumulator {
    data: Vec<u8>,
}

impl SentinelAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk; the sentinel is checked at the end of the accumulated buffer only.
    pub fn push(&mut self, chunk: &[u8]) -> Progress {
        self.data.extend_from_slice(chunk);
        self.progress()
    }

    pub fn progress(&self) -> Progress {
        if listing::is_terminated(&self.data) {
            Progress::Complete
        } else {
            Progress::InProgress
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress() == Progress::Complete
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Stream ended: return the block if terminated, else a missing-sentinel error.
    pub fn finish(self) -> Result<Vec<u8>, ChunkError> {
        if self.is_complete() {
            Ok(self.data)
        } else {
            Err(ChunkError::MissingSentinel {
                received: self.data.len() as u64,
            })
        }
    }
}

/// Error planning or accumulating chunks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("chunk size {chunk_size} exceeds channel MTU {mtu}")]
    ChunkExceedsMtu { chunk_size: usize, mtu: usize },
    #[error("incomplete transfer: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },
    #[error("overrun: received {received} bytes, expected {expected}")]
    Overrun { expected: u64, received: u64 },
    #[error("stream ended after {received} bytes without listing terminator")]
    MissingSentinel { received: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(buf: &[u8], chunk_size: usize) -> Vec<usize> {
        chunks(buf, chunk_size).unwrap().map(<[u8]>::len).collect()
    }

    #[test]
    fn only_last_chunk_is_short() {
        assert_eq!(sizes(&[0u8; 100], 30), vec![30, 30, 30, 10]);
        assert_eq!(sizes(&[0u8; 90], 30), vec![30, 30, 30]);
        assert_eq!(sizes(&[0u8; 10], 100), vec![10]);
        assert!(sizes(&[], 30).is_empty());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(matches!(chunks(b"abc", 0), Err(ChunkError::ZeroChunkSize)));
    }

    #[test]
    fn chunk_size_capped_by_mtu() {
        assert_eq!(validate_chunk_size(240, 300), Ok(240));
        assert_eq!(validate_chunk_size(300, 300), Ok(300));
        assert_eq!(
            validate_chunk_size(301, 300),
            Err(ChunkError::ChunkExceedsMtu {
                chunk_size: 301,
                mtu: 300
            })
        );
    }

    #[test]
    fn chunks_cover_buffer_in_order() {
        let buf: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let parts: Vec<&[u8]> = chunks(&buf, 240).unwrap().collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[4].len(), 1000 - 4 * 240);
        assert_eq!(parts.concat(), buf);
    }

    #[test]
    fn length_accumulator_completes_exactly() {
        let mut acc = LengthAccumulator::new(1000);
        assert_eq!(acc.push(240).unwrap(), Progress::InProgress);
        assert_eq!(acc.push(240).unwrap(), Progress::InProgress);
        assert_eq!(acc.push(240).unwrap(), Progress::InProgress);
        assert_eq!(acc.push(240).unwrap(), Progress::InProgress);
        assert_eq!(acc.remaining(), 40);
        assert_eq!(acc.push(40).unwrap(), Progress::Complete);
        assert_eq!(acc.finish(), Ok(1000));
        assert_eq!(acc.chunk_count(), 5);
    }

    #[test]
    fn length_accumulator_short_stream_is_incomplete() {
        let mut acc = LengthAccumulator::new(1234);
        acc.push(500).unwrap();
        assert_eq!(
            acc.finish(),
            Err(ChunkError::Incomplete {
                expected: 1234,
                received: 500
            })
        );
    }

    #[test]
    fn length_accumulator_overrun() {
        let mut acc = LengthAccumulator::new(10);
        acc.push(8).unwrap();
        assert_eq!(
            acc.push(5),
            Err(ChunkError::Overrun {
                expected: 10,
                received: 13
            })
        );
        assert_eq!(acc.received(), 8);
    }

    #[test]
    fn zero_length_is_complete_immediately() {
        let acc = LengthAccumulator::new(0);
        assert!(acc.is_complete());
        assert_eq!(acc.finish(), Ok(0));
    }

    #[test]
    fn sentinel_across_chunk_boundary() {
        let mut acc = SentinelAccumulator::new();
        assert_eq!(acc.push(b"10:a.txt\n2048:b"), Progress::InProgress);
        assert_eq!(acc.push(b".bin\n"), Progress::InProgress);
        assert_eq!(acc.push(b"\n"), Progress::Complete);
        assert_eq!(acc.finish().unwrap(), b"10:a.txt\n2048:b.bin\n\n".to_vec());
    }

    #[test]
    fn sentinel_missing_on_finish() {
        let mut acc = SentinelAccumulator::new();
        acc.push(b"10:a.txt\n");
        assert_eq!(
            acc.finish(),
            Err(ChunkError::MissingSentinel { received: 9 })
        );
    }
}
