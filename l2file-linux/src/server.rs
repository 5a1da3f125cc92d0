//! File server: drives `FileServerCore` from a control channel and streams responses over
//! the bulk channel. One connection at a time, one command at a time.

use std::io::{self, Read};

use l2file_core::protocol::{CONTROL_CHARACTERISTIC_UUID, FILE_SERVICE_UUID};
use l2file_core::{Action, FileServerCore, FileStore, StoreError};
use tracing::{debug, info, warn};

use crate::bulk::BulkAdapter;
use crate::config::Config;
use crate::tcp::TcpAdvertiser;
use crate::transport::{with_timeout, BulkChannel, ControlChannel, TransportError};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent DONE.
    Done,
    /// Client went away.
    Disconnected,
    /// A file could not be streamed; the server closed the bulk channel.
    Aborted,
}

enum StreamFailure {
    Store(StoreError),
    Transport(TransportError),
}

impl From<StoreError> for StreamFailure {
    fn from(e: StoreError) -> Self {
        StreamFailure::Store(e)
    }
}

impl From<TransportError> for StreamFailure {
    fn from(e: TransportError) -> Self {
        StreamFailure::Transport(e)
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn fill(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Stream exactly `len` bytes of `path`, one chunk in memory at a time.
async fn stream_file<B, S>(
    bulk: &mut BulkAdapter<B>,
    store: &S,
    path: &str,
    len: u64,
    chunk_size: usize,
) -> Result<(), StreamFailure>
where
    B: BulkChannel,
    S: FileStore + ?Sized,
{
    let mut reader = store.open(path)?;
    let mut buf = vec![0u8; chunk_size];
    let mut sent = 0u64;
    while sent < len {
        let want = (len - sent).min(chunk_size as u64) as usize;
        let n = fill(&mut *reader, &mut buf[..want]).map_err(StoreError::from)?;
        if n < want {
            return Err(StoreError::ShortRead {
                path: path.to_string(),
                read: sent + n as u64,
                expected: len,
            }
            .into());
        }
        bulk.send(&buf[..n], chunk_size).await?;
        sent += n as u64;
    }
    bulk.flush().await?;
    debug!(path, bytes = sent, "file streamed");
    Ok(())
}

/// Close the bulk channel so a client waiting on a stream sees the disconnect.
async fn abort<B: BulkChannel>(bulk: &mut BulkAdapter<B>, reason: &dyn std::fmt::Display) {
    warn!("ending session: {}", reason);
    if let Err(e) = bulk.channel_mut().disconnect().await {
        debug!("bulk disconnect: {}", e);
    }
}

/// Serve one connected client until DONE or disconnect.
///
/// Commands that cannot be answered (short frames, a command while busy) are logged and
/// dropped; the session continues. A SEND that cannot be served closes the bulk channel and
/// ends the session, since its client is already waiting on the stream. Transport failures
/// end it too.
pub async fn serve_connection<C, B, S>(
    control: &mut C,
    bulk: &mut B,
    store: &S,
    chunk_size: usize,
) -> Result<SessionEnd, TransportError>
where
    C: ControlChannel,
    B: BulkChannel,
    S: FileStore + ?Sized,
{
    let chunk_size = chunk_size.min(bulk.peer_mtu());
    let mut bulk = BulkAdapter::new(bulk);
    let mut core = FileServerCore::new();
    loop {
        let frame = match control.notified().await {
            Ok(frame) => frame,
            Err(TransportError::Disconnected) => {
                info!(handled = core.handled(), "client disconnected");
                return Ok(SessionEnd::Disconnected);
            }
            Err(e) => return Err(e),
        };
        let actions = match core.on_command(&frame, store) {
            Ok(actions) => actions,
            Err(e) if e.ends_session() => {
                abort(&mut bulk, &e).await;
                return Ok(SessionEnd::Aborted);
            }
            Err(e) => {
                warn!("dropping command: {}", e);
                continue;
            }
        };
        let mut end = false;
        for action in actions {
            match action {
                Action::Notify(reply) => {
                    debug!(reply = ?reply, "notify");
                    control.write(&reply).await?;
                }
                Action::Stream(data) => {
                    bulk.send(&data, chunk_size).await?;
                    bulk.flush().await?;
                }
                Action::StreamFile { path, len } => {
                    match stream_file(&mut bulk, store, &path, len, chunk_size).await {
                        Ok(()) => {}
                        Err(StreamFailure::Transport(e)) => return Err(e),
                        Err(StreamFailure::Store(e)) => {
                            abort(&mut bulk, &e).await;
                            return Ok(SessionEnd::Aborted);
                        }
                    }
                }
                Action::EndSession => end = true,
            }
        }
        core.on_response_complete();
        if end {
            info!(handled = core.handled(), "session done");
            return Ok(SessionEnd::Done);
        }
    }
}

/// Advertise the file service and serve clients one after another. Returns only when the
/// listener itself fails.
pub async fn run_file_server<S: FileStore>(config: &Config, store: S) -> Result<(), TransportError> {
    let advertiser = TcpAdvertiser::bind(
        config.addr,
        &config.file_name,
        vec![FILE_SERVICE_UUID],
        config.connect_timeout(),
    )
    .await?
    .with_characteristics(vec![CONTROL_CHARACTERISTIC_UUID]);
    info!(
        addr = %advertiser.local_addr()?,
        name = %config.file_name,
        psm = config.psm,
        "file server advertising"
    );
    loop {
        let mut conn = advertiser.advertise().await?;
        info!(peer = %conn.peer_addr(), "connected");
        let accept = advertiser.accept_bulk(&conn, config.psm, config.file_mtu);
        let mut bulk = match with_timeout("bulk accept", config.connect_timeout(), accept).await {
            Ok(bulk) => bulk,
            Err(e) => {
                warn!("bulk channel: {}", e);
                let _ = conn.control.disconnect().await;
                continue;
            }
        };
        match serve_connection(&mut conn.control, &mut bulk, &store, config.chunk_size).await {
            Ok(end) => debug!(?end, "session ended"),
            Err(e) => warn!("session: {}", e),
        }
        let _ = bulk.disconnect().await;
        let _ = conn.control.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, FileClient};
    use crate::memory;
    use l2file_core::listing::ListingEntry;
    use l2file_core::wire::{decode_reply, encode_command, Command};
    use l2file_core::{ChunkError, FileError, MemoryStore, Opcode, Status};

    fn store() -> MemoryStore {
        MemoryStore::new().with_file("/f", vec![1u8; 700])
    }

    #[tokio::test]
    async fn ends_on_disconnect() {
        let (mut c, mut s) = memory::link(512, 512);
        let store = store();
        c.control.disconnect().await.unwrap();
        let end = serve_connection(&mut s.control, &mut s.bulk, &store, 240)
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::Disconnected);
    }

    #[tokio::test]
    async fn short_frame_dropped_and_session_continues() {
        let (mut c, mut s) = memory::link(512, 512);
        let store = store();
        let serve = serve_connection(&mut s.control, &mut s.bulk, &store, 240);
        let client = async {
            c.control.write(&[3]).await.unwrap();
            c.control
                .write(&encode_command(&Command::with_path(Opcode::Size, 2, "/f")))
                .await
                .unwrap();
            let reply = decode_reply(&c.control.notified().await.unwrap()).unwrap();
            assert_eq!(reply.sequence, 2);
            assert_eq!(reply.size, Some(700));
            c.control
                .write(&encode_command(&Command::new(Opcode::Done, 3, Vec::new())))
                .await
                .unwrap();
            let reply = decode_reply(&c.control.notified().await.unwrap()).unwrap();
            assert_eq!(reply.known_status(), Some(Status::Ok));
        };
        let (end, _) = tokio::join!(serve, client);
        assert_eq!(end.unwrap(), SessionEnd::Done);
    }

    #[tokio::test]
    async fn send_streams_in_chunks_no_larger_than_peer_mtu() {
        // Client advertises MTU 100: server must not exceed it even with chunk size 240.
        let (mut c, mut s) = memory::link(100, 512);
        let store = store();
        let serve = serve_connection(&mut s.control, &mut s.bulk, &store, 240);
        let client = async {
            c.control
                .write(&encode_command(&Command::with_path(Opcode::Send, 1, "/f")))
                .await
                .unwrap();
            let mut buf = [0u8; 512];
            let mut total = 0;
            let mut chunks = 0;
            while total < 700 {
                let n = c.bulk.recv_into(&mut buf).await.unwrap();
                assert!(n <= 100);
                total += n;
                chunks += 1;
            }
            assert_eq!(chunks, 7);
            c.control.disconnect().await.unwrap();
        };
        let (end, _) = tokio::join!(serve, client);
        assert_eq!(end.unwrap(), SessionEnd::Disconnected);
    }

    /// Sizes files normally but fails to open them, or hands back fewer bytes than the
    /// size promised.
    struct FlakyStore {
        inner: MemoryStore,
        truncate_to: Option<usize>,
    }

    impl FileStore for FlakyStore {
        fn size(&self, path: &str) -> Result<u64, StoreError> {
            self.inner.size(path)
        }

        fn open<'a>(&'a self, path: &str) -> Result<Box<dyn Read + 'a>, StoreError> {
            match self.truncate_to {
                Some(n) => Ok(Box::new(self.inner.open(path)?.take(n as u64))),
                None => Err(io::Error::from(io::ErrorKind::PermissionDenied).into()),
            }
        }

        fn list(&self, path: &str) -> Result<Vec<ListingEntry>, StoreError> {
            self.inner.list(path)
        }
    }

    #[tokio::test]
    async fn unreadable_file_ends_session_instead_of_stalling_client() {
        let (c, mut s) = memory::link(512, 512);
        let mut client = FileClient::new(c.control, c.bulk);
        let store = FlakyStore {
            inner: store(),
            truncate_to: None,
        };
        let serve = serve_connection(&mut s.control, &mut s.bulk, &store, 240);
        let (end, res) = tokio::join!(serve, client.download_to_vec("/f"));
        assert_eq!(end.unwrap(), SessionEnd::Aborted);
        let err = res.unwrap_err();
        assert!(matches!(
            err,
            ClientError::File(FileError::Transfer(ChunkError::Incomplete {
                expected: 700,
                received: 0
            }))
        ));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn file_shrinking_mid_stream_ends_session() {
        let (c, mut s) = memory::link(512, 512);
        let mut client = FileClient::new(c.control, c.bulk);
        let store = FlakyStore {
            inner: store(),
            truncate_to: Some(500),
        };
        let serve = serve_connection(&mut s.control, &mut s.bulk, &store, 240);
        let (end, res) = tokio::join!(serve, client.download_to_vec("/f"));
        assert_eq!(end.unwrap(), SessionEnd::Aborted);
        assert!(matches!(
            res.unwrap_err(),
            ClientError::File(FileError::Transfer(ChunkError::Incomplete {
                expected: 700,
                received: 480
            }))
        ));
    }
}
