//! Example client flow: size of a file, size of a missing file, a timed download, and a
//! directory listing.

use std::time::Instant;

use l2file_core::integrity::bytes_per_second;
use l2file_core::ListingEntry;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use crate::client::{ClientError, FileClient};
use crate::transport::{BulkChannel, ControlChannel};

#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub file_size: u32,
    /// `None` when the server reported NOT_FOUND, which is the expected outcome.
    pub missing_size: Option<u32>,
    pub download_bytes: u64,
    pub download_ms: u64,
    pub download_bps: u64,
    pub listing: Vec<ListingEntry>,
}

/// Run the flow against `dir`, downloading `{dir}/big.dat` into `sink`.
pub async fn run_demo<C, B, W>(
    client: &mut FileClient<C, B>,
    dir: &str,
    sink: &mut W,
) -> Result<DemoReport, ClientError>
where
    C: ControlChannel,
    B: BulkChannel,
    W: AsyncWrite + Unpin,
{
    let dir = dir.trim_end_matches('/');
    let file_size = client.size(&format!("{}/file.txt", dir)).await?;
    info!(size = file_size, "file.txt");

    let missing_size = match client.size(&format!("{}/notfound.bin", dir)).await {
        Ok(size) => {
            warn!(size, "notfound.bin exists");
            Some(size)
        }
        Err(e) if e.is_not_found() => {
            info!("notfound.bin: not found");
            None
        }
        Err(e) => return Err(e),
    };

    let start = Instant::now();
    let download_bytes = client.download(&format!("{}/big.dat", dir), sink).await?;
    let elapsed = start.elapsed();
    let download_bps = bytes_per_second(download_bytes, elapsed);
    info!(
        bytes = download_bytes,
        ms = elapsed.as_millis() as u64,
        bps = download_bps,
        "download took"
    );

    let listing = client.list(dir).await?;
    for entry in &listing {
        info!(size = entry.size, name = %entry.name, "entry");
    }

    Ok(DemoReport {
        file_size,
        missing_size,
        download_bytes,
        download_ms: elapsed.as_millis() as u64,
        download_bps,
        listing,
    })
}
