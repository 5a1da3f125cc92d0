//! Async file client over a control channel plus a bulk channel. One command in flight at
//! a time: every method waits for its reply or stream before returning.

use l2file_core::client::{self, ClientSession, Pending};
use l2file_core::listing::{self, ListingEntry};
use l2file_core::{ChunkError, FileError, Opcode};
use std::path::Path;

use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use l2file_core::protocol::{CONTROL_CHARACTERISTIC_UUID, FILE_SERVICE_UUID};

use crate::bulk::BulkAdapter;
use crate::config::Config;
use crate::tcp::{self, TcpBulk, TcpControl};
use crate::transport::{with_timeout, BulkChannel, ControlChannel, TransportError};

pub struct FileClient<C, B> {
    control: C,
    bulk: BulkAdapter<B>,
    session: ClientSession,
}

impl<C: ControlChannel, B: BulkChannel> FileClient<C, B> {
    pub fn new(control: C, bulk: B) -> Self {
        Self {
            control,
            bulk: BulkAdapter::new(bulk),
            session: ClientSession::new(),
        }
    }

    async fn command(&mut self, opcode: Opcode, path: &str) -> Result<Pending, ClientError> {
        let (frame, pending) = self.session.command(opcode, path.as_bytes());
        debug!(?opcode, seq = pending.sequence, path, "command");
        self.control.write(&frame).await?;
        Ok(pending)
    }

    /// Size of a remote file. `NotFound` is reported as an error the caller may recover
    /// from (see [`ClientError::is_not_found`]).
    pub async fn size(&mut self, path: &str) -> Result<u32, ClientError> {
        let pending = self.command(Opcode::Size, path).await?;
        let reply = self.control.notified().await?;
        let size = client::read_size_reply(&reply, pending)?;
        debug!(path, size, "size");
        Ok(size)
    }

    /// Download `path` into `sink`: SIZE for the length, then SEND and accumulate exactly
    /// that many bytes from the bulk channel. A failing sink still consumes the whole
    /// stream, so the session stays usable after [`ClientError::Sink`].
    pub async fn download<W>(&mut self, path: &str, sink: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        let size = self.size(path).await?;
        self.fetch(path, size, sink).await
    }

    async fn fetch<W>(&mut self, path: &str, size: u32, sink: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        self.command(Opcode::Send, path).await?;
        let got = self.bulk.receive_exact(u64::from(size), sink).await?;
        info!(path, bytes = got, "downloaded");
        Ok(got)
    }

    /// Download `path` into a new file at `dest`. The file is created only once SIZE has
    /// succeeded and is removed again if the transfer fails.
    pub async fn download_to_file(&mut self, path: &str, dest: &Path) -> Result<u64, ClientError> {
        let size = self.size(path).await?;
        let mut file = tokio::fs::File::create(dest).await.map_err(ClientError::Sink)?;
        let res = self.fetch(path, size, &mut file).await;
        if res.is_err() {
            drop(file);
            if let Err(e) = tokio::fs::remove_file(dest).await {
                warn!(dest = %dest.display(), "removing partial download: {}", e);
            }
        }
        res
    }

    pub async fn download_to_vec(&mut self, path: &str) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::new();
        self.download(path, &mut out).await?;
        Ok(out)
    }

    /// Directory listing. Lines that do not parse are skipped.
    pub async fn list(&mut self, path: &str) -> Result<Vec<ListingEntry>, ClientError> {
        self.command(Opcode::List, path).await?;
        let block = self.bulk.receive_listing().await?;
        let entries = listing::decode_listing(&block);
        debug!(path, entries = entries.len(), "listing");
        Ok(entries)
    }

    /// Tell the server the session is over, check its acknowledgement, then disconnect.
    pub async fn done(&mut self) -> Result<(), ClientError> {
        let pending = self.command(Opcode::Done, "").await?;
        let reply = self.control.notified().await?;
        client::read_status_reply(&reply, pending)?;
        self.disconnect().await;
        Ok(())
    }

    /// Close both channels. Errors are logged; the link is gone either way.
    pub async fn disconnect(&mut self) {
        if let Err(e) = self.bulk.channel_mut().disconnect().await {
            warn!("bulk disconnect: {}", e);
        }
        if let Err(e) = self.control.disconnect().await {
            warn!("control disconnect: {}", e);
        }
    }
}

/// Find the file server by name and service, connect, check for the control characteristic,
/// and open its bulk channel.
pub async fn connect(config: &Config) -> Result<FileClient<TcpControl, TcpBulk>, ClientError> {
    let peer = tcp::find_peer(
        config.addr,
        &config.file_name,
        Some(FILE_SERVICE_UUID),
        config.discovery_timeout(),
    )
    .await?;
    let conn = peer.connect(config.connect_timeout()).await?;
    conn.require_characteristic(CONTROL_CHARACTERISTIC_UUID)?;
    let bulk = with_timeout(
        "bulk connect",
        config.connect_timeout(),
        conn.open_bulk(config.psm, config.file_mtu),
    )
    .await?;
    info!(peer = %conn.peer_addr(), "connected to file server");
    Ok(FileClient::new(conn.control, bulk))
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    File(#[from] FileError),
    #[error("writing download: {0}")]
    Sink(#[source] std::io::Error),
}

impl From<ChunkError> for ClientError {
    fn from(e: ChunkError) -> Self {
        ClientError::File(FileError::Transfer(e))
    }
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::File(e) if e.is_not_found())
    }

    /// The session can no longer be used: protocol desync or a lost link. A local sink
    /// failure is not fatal because the stream was drained.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::File(e) => {
                e.is_protocol() || matches!(e, FileError::Transfer(ChunkError::Incomplete { .. }))
            }
            ClientError::Sink(_) => false,
        }
    }
}
