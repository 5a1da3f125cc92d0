//! Bulk transport adapter: splits a message into MTU-sized chunks on send and reassembles
//! a stream against a known length or the listing terminator on receive.

use l2file_core::chunk::{self, ChunkError, LengthAccumulator, Progress, SentinelAccumulator};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::client::ClientError;
use crate::transport::{BulkChannel, TransportError};

pub struct BulkAdapter<B> {
    channel: B,
    chunks_sent: u64,
    bytes_sent: u64,
}

impl<B: BulkChannel> BulkAdapter<B> {
    pub fn new(channel: B) -> Self {
        Self {
            channel,
            chunks_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn channel(&self) -> &B {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut B {
        &mut self.channel
    }

    /// Totals over the adapter's lifetime: `(chunks, bytes)`.
    pub fn sent(&self) -> (u64, u64) {
        (self.chunks_sent, self.bytes_sent)
    }

    /// Send `bytes` as consecutive chunks of `chunk_size` (last one shorter). Returns the
    /// number of chunks written. Does not flush.
    pub async fn send(&mut self, bytes: &[u8], chunk_size: usize) -> Result<usize, TransportError> {
        let chunk_size = chunk::validate_chunk_size(chunk_size, self.channel.peer_mtu())?;
        let mut count = 0usize;
        for piece in chunk::chunks(bytes, chunk_size)? {
            self.channel.send_chunk(piece).await?;
            count += 1;
        }
        self.chunks_sent += count as u64;
        self.bytes_sent += bytes.len() as u64;
        debug!(bytes = bytes.len(), chunks = count, chunk_size, "bulk send");
        Ok(count)
    }

    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.channel.flush().await
    }

    pub async fn receive_into(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.channel.recv_into(buf).await
    }

    fn receive_buffer(&self) -> Vec<u8> {
        vec![0u8; self.channel.our_mtu().max(1)]
    }

    /// Receive exactly `expected` bytes into `sink`.
    ///
    /// A disconnect before the count is reached is `Incomplete`; bytes beyond it are
    /// `Overrun`. Nothing past the overrunning chunk is written.
    ///
    /// If `sink` fails, the rest of the stream is still read and discarded before the
    /// `Sink` error is returned, so the channel is left at a command boundary.
    pub async fn receive_exact<W>(&mut self, expected: u64, sink: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut acc = LengthAccumulator::new(expected);
        let mut buf = self.receive_buffer();
        let mut sink_err = None;
        while !acc.is_complete() {
            let n = match self.channel.recv_into(&mut buf).await {
                Ok(n) => n,
                Err(TransportError::Disconnected) => {
                    return Err(ChunkError::Incomplete {
                        expected,
                        received: acc.received(),
                    }
                    .into())
                }
                Err(e) => return Err(e.into()),
            };
            acc.push(n)?;
            trace!(received = acc.received(), expected, "bulk chunk");
            if sink_err.is_some() {
                continue;
            }
            if let Err(e) = sink.write_all(&buf[..n]).await {
                warn!(received = acc.received(), expected, "sink failed, draining stream: {}", e);
                sink_err = Some(e);
            }
        }
        if let Some(e) = sink_err {
            return Err(ClientError::Sink(e));
        }
        sink.flush().await.map_err(ClientError::Sink)?;
        debug!(bytes = acc.received(), chunks = acc.chunk_count(), "bulk receive complete");
        Ok(acc.finish()?)
    }

    /// Receive a listing block up to and including its terminator.
    pub async fn receive_listing(&mut self) -> Result<Vec<u8>, ClientError> {
        let mut acc = SentinelAccumulator::new();
        let mut buf = self.receive_buffer();
        loop {
            let n = match self.channel.recv_into(&mut buf).await {
                Ok(n) => n,
                Err(TransportError::Disconnected) => {
                    return Err(ChunkError::MissingSentinel {
                        received: acc.len() as u64,
                    }
                    .into())
                }
                Err(e) => return Err(e.into()),
            };
            if acc.push(&buf[..n]) == Progress::Complete {
                return Ok(acc.finish()?);
            }
        }
    }
}
