//! In-process link: both channels backed by tokio mpsc queues. Used by the tests and the
//! `demo` command; behaves like a real link (bounded bulk queue, MTU checks, disconnect
//! wakes the peer).

use tokio::sync::mpsc;

use crate::transport::{BulkChannel, ControlChannel, TransportError};

/// Chunks that may sit in one direction of the bulk queue before `send_chunk` suspends.
pub const DEFAULT_BULK_DEPTH: usize = 8;

pub struct MemoryControl {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Connected pair of control endpoints.
pub fn control_pair() -> (MemoryControl, MemoryControl) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryControl {
            tx: Some(a_tx),
            rx: b_rx,
        },
        MemoryControl {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

impl ControlChannel for MemoryControl {
    async fn write(&mut self, value: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Disconnected)?;
        tx.send(value.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    async fn notified(&mut self) -> Result<Vec<u8>, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Disconnected)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

pub struct MemoryBulk {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
    /// Tail of a chunk that did not fit the caller's buffer.
    pending: Vec<u8>,
    our_mtu: usize,
    peer_mtu: usize,
}

/// Connected pair of bulk endpoints. `a_mtu`/`b_mtu` are what each side advertises.
pub fn bulk_pair(a_mtu: usize, b_mtu: usize, depth: usize) -> (MemoryBulk, MemoryBulk) {
    let (a_tx, a_rx) = mpsc::channel(depth.max(1));
    let (b_tx, b_rx) = mpsc::channel(depth.max(1));
    (
        MemoryBulk {
            tx: Some(a_tx),
            rx: b_rx,
            pending: Vec::new(),
            our_mtu: a_mtu,
            peer_mtu: b_mtu,
        },
        MemoryBulk {
            tx: Some(b_tx),
            rx: a_rx,
            pending: Vec::new(),
            our_mtu: b_mtu,
            peer_mtu: a_mtu,
        },
    )
}

impl BulkChannel for MemoryBulk {
    fn our_mtu(&self) -> usize {
        self.our_mtu
    }

    fn peer_mtu(&self) -> usize {
        self.peer_mtu
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        if chunk.len() > self.peer_mtu {
            return Err(TransportError::MtuExceeded {
                len: chunk.len(),
                mtu: self.peer_mtu,
            });
        }
        let tx = self.tx.as_ref().ok_or(TransportError::Disconnected)?;
        tx.send(chunk.to_vec())
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        loop {
            let tx = self.tx.as_ref().ok_or(TransportError::Disconnected)?;
            if tx.capacity() == tx.max_capacity() {
                return Ok(());
            }
            if tx.is_closed() {
                return Err(TransportError::Disconnected);
            }
            tokio::task::yield_now().await;
        }
    }

    async fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            self.pending = self.rx.recv().await.ok_or(TransportError::Disconnected)?;
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

/// Both channels of one side of an in-process link.
pub struct MemoryLink {
    pub control: MemoryControl,
    pub bulk: MemoryBulk,
}

/// Client and server ends of a link; the server advertises `server_mtu` on the bulk
/// channel and the client `client_mtu`.
pub fn link(client_mtu: usize, server_mtu: usize) -> (MemoryLink, MemoryLink) {
    let (client_control, server_control) = control_pair();
    let (client_bulk, server_bulk) = bulk_pair(client_mtu, server_mtu, DEFAULT_BULK_DEPTH);
    (
        MemoryLink {
            control: client_control,
            bulk: client_bulk,
        },
        MemoryLink {
            control: server_control,
            bulk: server_bulk,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn control_values_arrive_in_order() {
        let (mut a, mut b) = control_pair();
        a.write(&[3, 1, b'x']).await.unwrap();
        a.write(&[4, 2]).await.unwrap();
        assert_eq!(b.notified().await.unwrap(), vec![3, 1, b'x']);
        assert_eq!(b.notified().await.unwrap(), vec![4, 2]);
    }

    #[tokio::test]
    async fn disconnect_wakes_peer() {
        let (mut a, mut b) = control_pair();
        a.disconnect().await.unwrap();
        assert!(b.notified().await.unwrap_err().is_disconnected());
        assert!(b.write(b"x").await.unwrap_err().is_disconnected());
    }

    #[tokio::test]
    async fn chunk_larger_than_peer_mtu_rejected() {
        let (mut a, _b) = bulk_pair(512, 100, 4);
        let err = a.send_chunk(&[0u8; 101]).await.unwrap_err();
        assert!(matches!(err, TransportError::MtuExceeded { len: 101, mtu: 100 }));
    }

    #[tokio::test]
    async fn recv_into_small_buffer_keeps_remainder() {
        let (mut a, mut b) = bulk_pair(512, 512, 4);
        a.send_chunk(b"abcdef").await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.recv_into(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(b.recv_into(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[tokio::test]
    async fn flush_waits_for_reader() {
        let (mut a, mut b) = bulk_pair(512, 512, 4);
        a.send_chunk(b"one").await.unwrap();
        a.send_chunk(b"two").await.unwrap();
        let reader = async {
            let mut buf = [0u8; 16];
            b.recv_into(&mut buf).await.unwrap();
            b.recv_into(&mut buf).await.unwrap();
        };
        let (flushed, _) = tokio::join!(a.flush(), reader);
        flushed.unwrap();
    }

    #[tokio::test]
    async fn dropped_peer_is_disconnected() {
        let (mut a, b) = bulk_pair(512, 512, 4);
        drop(b);
        assert!(a.send_chunk(b"x").await.unwrap_err().is_disconnected());
        let mut buf = [0u8; 4];
        assert!(a.recv_into(&mut buf).await.unwrap_err().is_disconnected());
    }
}
