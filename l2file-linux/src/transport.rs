//! Collaborator interfaces of the two-channel link: a small-value control channel
//! (attribute write / notify) and an ordered bulk channel with an MTU.
//!
//! Every call is a suspension point. Losing the connection resolves pending calls to
//! [`TransportError::Disconnected`] instead of leaving them parked.

#![allow(async_fn_in_trait)]

use std::future::Future;
use std::time::Duration;

use l2file_core::ChunkError;
use uuid::Uuid;

/// Control attribute. Client writes commands and is notified of replies; the server is
/// notified of commands and writes replies.
pub trait ControlChannel {
    async fn write(&mut self, value: &[u8]) -> Result<(), TransportError>;
    async fn notified(&mut self) -> Result<Vec<u8>, TransportError>;
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Connection-oriented bulk channel opened by port (PSM) with a negotiated MTU.
pub trait BulkChannel {
    /// MTU this side advertised (largest chunk it will receive).
    fn our_mtu(&self) -> usize;
    /// MTU the peer advertised (largest chunk we may send).
    fn peer_mtu(&self) -> usize;
    /// Queue one chunk of at most `peer_mtu()` bytes.
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError>;
    /// Wait until every queued chunk has been drained by the transport.
    async fn flush(&mut self) -> Result<(), TransportError>;
    /// Land the next inbound chunk into `buf`; returns its length (at most `buf.len()`).
    async fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

impl<C: ControlChannel + ?Sized> ControlChannel for &mut C {
    async fn write(&mut self, value: &[u8]) -> Result<(), TransportError> {
        (**self).write(value).await
    }
    async fn notified(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).notified().await
    }
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect().await
    }
}

impl<B: BulkChannel + ?Sized> BulkChannel for &mut B {
    fn our_mtu(&self) -> usize {
        (**self).our_mtu()
    }
    fn peer_mtu(&self) -> usize {
        (**self).peer_mtu()
    }
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        (**self).send_chunk(chunk).await
    }
    async fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush().await
    }
    async fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).recv_into(buf).await
    }
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect().await
    }
}

/// Run `fut` with a deadline. Expiry is reported, never retried here.
pub async fn with_timeout<T, F>(
    what: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => Err(TransportError::Timeout { what, after }),
    }
}

/// Resolve once the peer has gone away, discarding any values it still writes.
pub async fn wait_disconnected<C: ControlChannel>(control: &mut C) -> Result<(), TransportError> {
    loop {
        match control.notified().await {
            Ok(_) => continue,
            Err(TransportError::Disconnected) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timeout during {what} after {after:?}")]
    Timeout { what: &'static str, after: Duration },
    #[error("disconnected")]
    Disconnected,
    #[error("peer advertises {found:?}, expected {expected:?}")]
    NotAdvertised { expected: String, found: String },
    #[error("peer does not offer service {0}")]
    MissingService(Uuid),
    #[error("peer service has no characteristic {0}")]
    MissingCharacteristic(Uuid),
    #[error("chunk of {len} bytes exceeds peer MTU {mtu}")]
    MtuExceeded { len: usize, mtu: usize },
    #[error("chunking: {0}")]
    Chunk(#[from] ChunkError),
    #[error("link handshake: {0}")]
    Handshake(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_reports_operation() {
        let res: Result<(), TransportError> =
            with_timeout("connection", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        match res {
            Err(TransportError::Timeout { what, after }) => {
                assert_eq!(what, "connection");
                assert_eq!(after, Duration::from_millis(10));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_passes_result_through() {
        let res = with_timeout("discovery", Duration::from_secs(1), async { Ok(7u8) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
