//! Bulk-channel self-test: each side sends a random payload and receives the other's,
//! hashing as chunks land and reporting throughput. After a send is flushed, the sender
//! writes the full digest on the control channel so the receiver can verify it.

use std::time::Instant;

use l2file_core::integrity::{self, ReceiveSummary};
use l2file_core::{ChunkError, Digest, IntegrityError, SelfTestPayload, SelfTestReceiver, SelfTestReport};
use serde::Serialize;
use tracing::{info, warn};

use crate::bulk::BulkAdapter;
use crate::config::Config;
use crate::tcp::{self, TcpAdvertiser};
use crate::transport::{self, with_timeout, BulkChannel, ControlChannel, TransportError};

#[derive(Debug, Clone, Copy)]
pub struct PerfSettings {
    pub total_bytes: usize,
    pub chunk_size: usize,
    /// Exchange full digests over the control channel and fail on mismatch.
    pub exchange_digest: bool,
}

impl PerfSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            total_bytes: config.perf_total_bytes,
            chunk_size: config.chunk_size,
            exchange_digest: config.exchange_digest,
        }
    }
}

/// Both directions of one self-test.
#[derive(Debug, Clone, Serialize)]
pub struct PerfOutcome {
    pub sent: SelfTestReport,
    pub received: SelfTestReport,
}

#[derive(Debug, thiserror::Error)]
pub enum PerfError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Transfer(#[from] ChunkError),
    #[error("{0}")]
    Integrity(#[from] IntegrityError),
}

/// Send the payload and flush. The rate covers send plus flush.
pub async fn send_payload<B: BulkChannel>(
    bulk: &mut BulkAdapter<B>,
    payload: &SelfTestPayload,
    chunk_size: usize,
) -> Result<SelfTestReport, PerfError> {
    let start = Instant::now();
    let chunks = bulk.send(&payload.bytes, chunk_size).await?;
    bulk.flush().await?;
    let elapsed = start.elapsed();
    let bytes = payload.len() as u64;
    let rate_bps = integrity::bytes_per_second(bytes, elapsed);
    info!(
        bytes,
        chunks,
        elapsed_ms = elapsed.as_millis() as u64,
        rate_bps,
        hash = %payload.digest,
        "sent payload"
    );
    Ok(SelfTestReport {
        direction: "send".to_string(),
        bytes,
        elapsed_ms: elapsed.as_millis() as u64,
        rate_bps,
        hash: payload.digest.short_hex(),
        verified: None,
    })
}

/// Receive `total` bytes, hashing each chunk as it lands.
pub async fn receive_payload<B: BulkChannel>(
    bulk: &mut BulkAdapter<B>,
    total: usize,
) -> Result<ReceiveSummary, PerfError> {
    let mut rx = SelfTestReceiver::new(total);
    let mut buf = vec![0u8; bulk.channel().our_mtu().max(1)];
    while !rx.is_complete() {
        match bulk.receive_into(&mut buf).await {
            Ok(n) => {
                rx.on_chunk(&buf[..n], Instant::now())?;
            }
            // finish() reports the shortfall
            Err(TransportError::Disconnected) => break,
            Err(e) => return Err(e.into()),
        }
    }
    let summary = rx.finish(Instant::now())?;
    info!(
        bytes = summary.bytes,
        chunks = summary.chunks,
        first_chunk = summary.first_chunk,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        rate_bps = summary.rate_bps,
        hash = %summary.digest,
        "received payload"
    );
    Ok(summary)
}

pub async fn announce_digest<C: ControlChannel>(control: &mut C, digest: &Digest) -> Result<(), PerfError> {
    control.write(digest.as_bytes()).await?;
    Ok(())
}

/// Read the sender's digest and compare it with what was received.
pub async fn check_digest<C: ControlChannel>(
    control: &mut C,
    summary: &ReceiveSummary,
) -> Result<(), PerfError> {
    let announced = Digest::from_slice(&control.notified().await?)?;
    if let Err(e) = integrity::verify_digest(&announced, &summary.digest) {
        warn!("{}", e);
        return Err(e.into());
    }
    Ok(())
}

fn receive_report(summary: &ReceiveSummary, verified: Option<bool>) -> SelfTestReport {
    SelfTestReport {
        direction: "receive".to_string(),
        bytes: summary.bytes,
        elapsed_ms: summary.elapsed.as_millis() as u64,
        rate_bps: summary.rate_bps,
        hash: summary.digest.short_hex(),
        verified,
    }
}

async fn send_side<C, B>(
    control: &mut C,
    bulk: &mut BulkAdapter<B>,
    settings: &PerfSettings,
) -> Result<SelfTestReport, PerfError>
where
    C: ControlChannel,
    B: BulkChannel,
{
    let payload = SelfTestPayload::generate(settings.total_bytes);
    let report = send_payload(bulk, &payload, settings.chunk_size).await?;
    if settings.exchange_digest {
        announce_digest(control, &payload.digest).await?;
    }
    Ok(report)
}

async fn receive_side<C, B>(
    control: &mut C,
    bulk: &mut BulkAdapter<B>,
    settings: &PerfSettings,
) -> Result<SelfTestReport, PerfError>
where
    C: ControlChannel,
    B: BulkChannel,
{
    let summary = receive_payload(bulk, settings.total_bytes).await?;
    let verified = if settings.exchange_digest {
        check_digest(control, &summary).await?;
        Some(true)
    } else {
        None
    };
    Ok(receive_report(&summary, verified))
}

/// Client order: send first, then receive.
pub async fn client_session<C, B>(
    control: &mut C,
    bulk: &mut BulkAdapter<B>,
    settings: &PerfSettings,
) -> Result<PerfOutcome, PerfError>
where
    C: ControlChannel,
    B: BulkChannel,
{
    let sent = send_side(control, bulk, settings).await?;
    let received = receive_side(control, bulk, settings).await?;
    Ok(PerfOutcome { sent, received })
}

/// Server order: receive first, then send.
pub async fn server_session<C, B>(
    control: &mut C,
    bulk: &mut BulkAdapter<B>,
    settings: &PerfSettings,
) -> Result<PerfOutcome, PerfError>
where
    C: ControlChannel,
    B: BulkChannel,
{
    let received = receive_side(control, bulk, settings).await?;
    let sent = send_side(control, bulk, settings).await?;
    Ok(PerfOutcome { sent, received })
}

/// Find the perf server, run one self-test, disconnect.
pub async fn run_perf_client(config: &Config) -> Result<PerfOutcome, PerfError> {
    let peer = tcp::find_peer(config.addr, &config.perf_name, None, config.discovery_timeout()).await?;
    let mut conn = peer.connect(config.connect_timeout()).await?;
    info!(peer = %conn.peer_addr(), "connected");
    let bulk = with_timeout(
        "bulk connect",
        config.connect_timeout(),
        conn.open_bulk(config.psm, config.perf_mtu),
    )
    .await?;
    let mut bulk = BulkAdapter::new(bulk);
    let settings = PerfSettings::from_config(config);
    let outcome = client_session(&mut conn.control, &mut bulk, &settings).await;
    let _ = bulk.channel_mut().disconnect().await;
    let _ = conn.control.disconnect().await;
    outcome
}

/// Advertise the perf service and run the self-test with each client in turn.
pub async fn run_perf_server(config: &Config) -> Result<(), PerfError> {
    let advertiser = TcpAdvertiser::bind(
        config.addr,
        &config.perf_name,
        Vec::new(),
        config.connect_timeout(),
    )
    .await?;
    info!(addr = %advertiser.local_addr()?, name = %config.perf_name, "perf server advertising");
    let settings = PerfSettings::from_config(config);
    loop {
        let mut conn = advertiser.advertise().await?;
        info!(peer = %conn.peer_addr(), "connected");
        let accept = advertiser.accept_bulk(&conn, config.psm, config.perf_mtu);
        let bulk = match with_timeout("bulk accept", config.connect_timeout(), accept).await {
            Ok(bulk) => bulk,
            Err(e) => {
                warn!("bulk channel: {}", e);
                let _ = conn.control.disconnect().await;
                continue;
            }
        };
        let mut bulk = BulkAdapter::new(bulk);
        match server_session(&mut conn.control, &mut bulk, &settings).await {
            Ok(outcome) => {
                if let Err(e) = transport::wait_disconnected(&mut conn.control).await {
                    warn!("waiting for disconnect: {}", e);
                }
                info!(
                    sent_bps = outcome.sent.rate_bps,
                    received_bps = outcome.received.rate_bps,
                    "self-test done"
                );
            }
            Err(e) => warn!("self-test: {}", e),
        }
        let _ = bulk.channel_mut().disconnect().await;
        let _ = conn.control.disconnect().await;
    }
}
