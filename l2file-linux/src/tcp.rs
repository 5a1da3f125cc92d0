//! TCP emulation of the two-channel link.
//!
//! Every TCP connection starts with a hello value naming its role:
//! - scan: the advertiser answers with its advertisement record; the scanner may then send
//!   a connect request on the same stream, which becomes the control channel. The connect
//!   ack carries the connection token and the characteristics of the advertised service.
//! - bulk: carries the connection token, PSM and MTU; the acceptor answers with its MTU.
//!
//! All values are framed as u16 little-endian length + bytes.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;
use uuid::Uuid;

use crate::transport::{with_timeout, BulkChannel, ControlChannel, TransportError};

const HELLO_SCAN: u8 = 0x01;
const HELLO_CONNECT: u8 = 0x02;
const HELLO_BULK: u8 = 0x03;

/// Largest value one frame can carry.
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

const BULK_HELLO_LEN: usize = 1 + 16 + 2 + 2;

fn map_io(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportError::Disconnected,
        _ => TransportError::Io(e),
    }
}

async fn write_value<W: AsyncWrite + Unpin>(w: &mut W, value: &[u8]) -> Result<(), TransportError> {
    let len = u16::try_from(value.len()).map_err(|_| TransportError::MtuExceeded {
        len: value.len(),
        mtu: MAX_VALUE_LEN,
    })?;
    let mut frame = Vec::with_capacity(2 + value.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(value);
    w.write_all(&frame).await.map_err(map_io)
}

async fn read_value<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len).await.map_err(map_io)?;
    let mut buf = vec![0u8; u16::from_le_bytes(len) as usize];
    r.read_exact(&mut buf).await.map_err(map_io)?;
    Ok(buf)
}

/// `[count][uuid; count]`, at most 255 entries.
fn encode_uuids(out: &mut Vec<u8>, uuids: &[Uuid]) {
    let uuids = &uuids[..uuids.len().min(255)];
    out.push(uuids.len() as u8);
    for u in uuids {
        out.extend_from_slice(u.as_bytes());
    }
}

fn decode_uuids(data: &[u8], what: &str) -> Result<Vec<Uuid>, TransportError> {
    let bad = || TransportError::Handshake(format!("truncated {}", what));
    let (&count, rest) = data.split_first().ok_or_else(bad)?;
    if rest.len() != count as usize * 16 {
        return Err(bad());
    }
    Ok(rest
        .chunks(16)
        .filter_map(|c| Uuid::from_slice(c).ok())
        .collect())
}

/// What an advertiser tells scanners about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: String,
    pub services: Vec<Uuid>,
}

impl Advertisement {
    /// `[name_len][name][count][uuid; count]`. Names longer than 255 bytes are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let name = &self.name.as_bytes()[..self.name.len().min(255)];
        let mut out = Vec::with_capacity(2 + name.len() + 16 * self.services.len());
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        encode_uuids(&mut out, &self.services);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, TransportError> {
        let bad = || TransportError::Handshake("truncated advertisement".into());
        let (&name_len, rest) = data.split_first().ok_or_else(bad)?;
        let name_len = name_len as usize;
        if rest.len() < name_len + 1 {
            return Err(bad());
        }
        let name = String::from_utf8_lossy(&rest[..name_len]).into_owned();
        let services = decode_uuids(&rest[name_len..], "advertisement")?;
        Ok(Self { name, services })
    }

    pub fn offers(&self, service: &Uuid) -> bool {
        self.services.contains(service)
    }
}

pub struct TcpControl {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl TcpControl {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self { reader, writer }
    }
}

impl ControlChannel for TcpControl {
    async fn write(&mut self, value: &[u8]) -> Result<(), TransportError> {
        write_value(&mut self.writer, value).await
    }

    async fn notified(&mut self) -> Result<Vec<u8>, TransportError> {
        read_value(&mut self.reader).await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        match self.writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(map_io(e)),
        }
    }
}

pub struct TcpBulk {
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
    pending: Vec<u8>,
    our_mtu: usize,
    peer_mtu: usize,
}

impl TcpBulk {
    fn new(stream: TcpStream, our_mtu: usize, peer_mtu: usize) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer: BufWriter::new(writer),
            pending: Vec::new(),
            our_mtu,
            peer_mtu,
        }
    }
}

impl BulkChannel for TcpBulk {
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
        write_value(&mut self.writer, chunk).await
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.writer.flush().await.map_err(map_io)
    }

    async fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            self.pending = read_value(&mut self.reader).await?;
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        match self.writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(map_io(e)),
        }
    }
}

/// An established link: the control channel plus what is needed to open bulk channels.
pub struct TcpConnection {
    pub control: TcpControl,
    peer: SocketAddr,
    token: Uuid,
    characteristics: Vec<Uuid>,
}

impl TcpConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Characteristics the peer's service exposes, as discovered during connect.
    pub fn characteristics(&self) -> &[Uuid] {
        &self.characteristics
    }

    /// Fail unless the peer's service exposes `characteristic`.
    pub fn require_characteristic(&self, characteristic: Uuid) -> Result<(), TransportError> {
        if self.characteristics.contains(&characteristic) {
            Ok(())
        } else {
            Err(TransportError::MissingCharacteristic(characteristic))
        }
    }

    /// Open a bulk channel to the peer (client side).
    pub async fn open_bulk(&self, psm: u16, mtu: u16) -> Result<TcpBulk, TransportError> {
        let mut stream = TcpStream::connect(self.peer).await.map_err(map_io)?;
        stream.set_nodelay(true)?;
        let mut hello = Vec::with_capacity(BULK_HELLO_LEN);
        hello.push(HELLO_BULK);
        hello.extend_from_slice(self.token.as_bytes());
        hello.extend_from_slice(&psm.to_le_bytes());
        hello.extend_from_slice(&mtu.to_le_bytes());
        write_value(&mut stream, &hello).await?;
        let reply = match read_value(&mut stream).await {
            Ok(reply) => reply,
            Err(TransportError::Disconnected) => {
                return Err(TransportError::Handshake(format!(
                    "bulk channel refused on psm {}",
                    psm
                )))
            }
            Err(e) => return Err(e),
        };
        match reply.as_slice() {
            [HELLO_BULK, lo, hi] => {
                let peer_mtu = u16::from_le_bytes([*lo, *hi]) as usize;
                debug!(psm, our_mtu = mtu, peer_mtu, "bulk channel open");
                Ok(TcpBulk::new(stream, mtu as usize, peer_mtu))
            }
            _ => Err(TransportError::Handshake("bad bulk accept".into())),
        }
    }
}

/// A scanned peer whose advertisement has been read; not yet connected.
pub struct TcpPeer {
    pub advertisement: Advertisement,
    addr: SocketAddr,
    control: TcpControl,
}

impl TcpPeer {
    /// Scan the advertiser at `addr` and read its advertisement.
    pub async fn scan(addr: SocketAddr, timeout: Duration) -> Result<Self, TransportError> {
        with_timeout("discovery", timeout, async {
            let stream = TcpStream::connect(addr).await.map_err(map_io)?;
            stream.set_nodelay(true)?;
            let mut control = TcpControl::new(stream);
            control.write(&[HELLO_SCAN]).await?;
            let advertisement = Advertisement::decode(&control.notified().await?)?;
            Ok(Self {
                advertisement,
                addr,
                control,
            })
        })
        .await
    }

    /// Connect to the scanned peer; the scan stream becomes the control channel.
    pub async fn connect(self, timeout: Duration) -> Result<TcpConnection, TransportError> {
        let Self {
            addr, mut control, ..
        } = self;
        with_timeout("connection", timeout, async move {
            control.write(&[HELLO_CONNECT]).await?;
            let ack = control.notified().await?;
            if ack.len() < 1 + 16 + 1 || ack[0] != HELLO_CONNECT {
                return Err(TransportError::Handshake("bad connect ack".into()));
            }
            let token = Uuid::from_slice(&ack[1..17])
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            let characteristics = decode_uuids(&ack[17..], "connect ack")?;
            debug!(peer = %addr, characteristics = characteristics.len(), "connected");
            Ok(TcpConnection {
                control,
                peer: addr,
                token,
                characteristics,
            })
        })
        .await
    }
}

/// Scan `addr` and accept the peer only if it advertises `name` (and `service`, if given).
pub async fn find_peer(
    addr: SocketAddr,
    name: &str,
    service: Option<Uuid>,
    timeout: Duration,
) -> Result<TcpPeer, TransportError> {
    let peer = TcpPeer::scan(addr, timeout).await?;
    if peer.advertisement.name != name {
        return Err(TransportError::NotAdvertised {
            expected: name.to_string(),
            found: peer.advertisement.name.clone(),
        });
    }
    if let Some(service) = service {
        if !peer.advertisement.offers(&service) {
            return Err(TransportError::MissingService(service));
        }
    }
    debug!(%addr, name, "found peer");
    Ok(peer)
}

/// Server side: answers scans with its advertisement and accepts one connection at a time.
pub struct TcpAdvertiser {
    listener: TcpListener,
    advertisement: Advertisement,
    characteristics: Vec<Uuid>,
    handshake_timeout: Duration,
}

impl TcpAdvertiser {
    pub async fn bind(
        addr: SocketAddr,
        name: &str,
        services: Vec<Uuid>,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            advertisement: Advertisement {
                name: name.to_string(),
                services,
            },
            characteristics: Vec::new(),
            handshake_timeout,
        })
    }

    /// Characteristics reported to connecting clients.
    pub fn with_characteristics(mut self, characteristics: Vec<Uuid>) -> Self {
        self.characteristics = characteristics;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Advertise until a scanner connects. Scanners that leave or misbehave are skipped.
    pub async fn advertise(&self) -> Result<TcpConnection, TransportError> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let res = with_timeout("handshake", self.handshake_timeout, self.answer_scan(stream, peer))
                .await;
            match res {
                Ok(Some(conn)) => return Ok(conn),
                Ok(None) => debug!(%peer, "scanner left"),
                Err(e) => debug!(%peer, "scan handshake: {}", e),
            }
        }
    }

    async fn answer_scan(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<Option<TcpConnection>, TransportError> {
        stream.set_nodelay(true)?;
        let mut control = TcpControl::new(stream);
        if control.notified().await? != [HELLO_SCAN] {
            // Stale bulk hello or garbage: not a scanner.
            return Ok(None);
        }
        control.write(&self.advertisement.encode()).await?;
        match control.notified().await {
            Ok(v) if v == [HELLO_CONNECT] => {}
            Ok(_) => return Err(TransportError::Handshake("expected connect request".into())),
            Err(TransportError::Disconnected) => return Ok(None),
            Err(e) => return Err(e),
        }
        let token = Uuid::new_v4();
        let mut ack = Vec::with_capacity(1 + 16 + 1 + 16 * self.characteristics.len());
        ack.push(HELLO_CONNECT);
        ack.extend_from_slice(token.as_bytes());
        encode_uuids(&mut ack, &self.characteristics);
        control.write(&ack).await?;
        Ok(Some(TcpConnection {
            control,
            peer,
            token,
            characteristics: self.characteristics.clone(),
        }))
    }

    /// Accept the bulk channel of `conn` on `psm` (server side). Other arrivals on the
    /// listener are refused by closing them.
    pub async fn accept_bulk(
        &self,
        conn: &TcpConnection,
        psm: u16,
        mtu: u16,
    ) -> Result<TcpBulk, TransportError> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            let hello = match read_value(&mut stream).await {
                Ok(hello) => hello,
                Err(e) => {
                    debug!(%peer, "bulk hello: {}", e);
                    continue;
                }
            };
            if hello.len() != BULK_HELLO_LEN || hello[0] != HELLO_BULK {
                debug!(%peer, "refusing non-bulk connection while busy");
                continue;
            }
            let token = &hello[1..17];
            let their_psm = u16::from_le_bytes([hello[17], hello[18]]);
            let peer_mtu = u16::from_le_bytes([hello[19], hello[20]]) as usize;
            if token != conn.token.as_bytes() || their_psm != psm {
                debug!(%peer, psm = their_psm, "refusing bulk channel");
                continue;
            }
            stream.set_nodelay(true)?;
            let mut accept = vec![HELLO_BULK];
            accept.extend_from_slice(&mtu.to_le_bytes());
            write_value(&mut stream, &accept).await?;
            debug!(psm, our_mtu = mtu, peer_mtu, "bulk channel accepted");
            return Ok(TcpBulk::new(stream, mtu as usize, peer_mtu));
        }
    }
}
