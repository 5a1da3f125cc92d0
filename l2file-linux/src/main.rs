// l2file: file server, file client and bulk self-test over the emulated link.

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use l2file_linux::cli::{Cli, Cmd};
use l2file_linux::client::{self, ClientError, FileClient};
use l2file_linux::config::{self, Config};
use l2file_linux::{demo, logging, perf, server, BulkChannel, ControlChannel, FsStore};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    let mut cfg = config::load();
    cli.apply(&mut cfg);
    cfg.validate().context("invalid configuration")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli, cfg))
}

async fn run(cli: Cli, cfg: Config) -> anyhow::Result<()> {
    match &cli.cmd {
        Cmd::Serve(_) => {
            let store = FsStore::new(&cfg.root);
            info!(root = %cfg.root.display(), "serving");
            tokio::select! {
                res = server::run_file_server(&cfg, store) => res.context("file server")?,
                res = shutdown_signal() => res?,
            }
        }
        Cmd::PerfServer(_) => {
            tokio::select! {
                res = perf::run_perf_server(&cfg) => res.context("perf server")?,
                res = shutdown_signal() => res?,
            }
        }
        Cmd::PerfClient(_) => {
            let outcome = perf::run_perf_client(&cfg).await.context("self-test")?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                for r in [&outcome.sent, &outcome.received] {
                    println!(
                        "{}: {} bytes in {} ms ({} B/s) hash {}",
                        r.direction, r.bytes, r.elapsed_ms, r.rate_bps, r.hash
                    );
                }
            }
        }
        Cmd::Size { path } => {
            let mut c = client::connect(&cfg).await.context("connect")?;
            let res = c.size(path).await;
            finish(&mut c, res.as_ref().err()).await;
            let size = res.with_context(|| format!("size {}", path))?;
            if cli.json {
                print_json(&serde_json::json!({ "path": path, "size": size }))?;
            } else {
                println!("{}", size);
            }
        }
        Cmd::Get { path, dest } => {
            let mut c = client::connect(&cfg).await.context("connect")?;
            let res = c.download_to_file(path, dest).await;
            finish(&mut c, res.as_ref().err()).await;
            let bytes = res.with_context(|| format!("download {}", path))?;
            if cli.json {
                print_json(&serde_json::json!({ "path": path, "dest": dest, "bytes": bytes }))?;
            } else {
                println!("{} bytes -> {}", bytes, dest.display());
            }
        }
        Cmd::Ls { path } => {
            let mut c = client::connect(&cfg).await.context("connect")?;
            let res = c.list(path).await;
            finish(&mut c, res.as_ref().err()).await;
            let entries = res.with_context(|| format!("list {}", path))?;
            if cli.json {
                print_json(&entries)?;
            } else {
                for e in &entries {
                    println!("{:>10} {}", e.size, e.name);
                }
            }
        }
        Cmd::Demo(opts) => {
            let mut c = client::connect(&cfg).await.context("connect")?;
            let mut file = match tokio::fs::File::create(&opts.out).await {
                Ok(file) => file,
                Err(e) => {
                    finish(&mut c, None).await;
                    return Err(e).with_context(|| format!("create {}", opts.out.display()));
                }
            };
            let res = demo::run_demo(&mut c, &opts.dir, &mut file).await;
            finish(&mut c, res.as_ref().err()).await;
            if res.is_err() {
                discard(&opts.out).await;
            }
            let report = res.context("demo")?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("{}", report.file_size);
                match report.missing_size {
                    Some(size) => println!("{}", size),
                    None => println!("Not found"),
                }
                println!(
                    "Download took {}ms ({} b/s).",
                    report.download_ms, report.download_bps
                );
                for e in &report.listing {
                    println!("{}:{}", e.size, e.name);
                }
            }
        }
    }
    Ok(())
}

/// End the session politely unless the link is already unusable.
async fn finish<C, B>(client: &mut FileClient<C, B>, failed: Option<&ClientError>)
where
    C: ControlChannel,
    B: BulkChannel,
{
    if failed.is_some_and(ClientError::is_fatal) {
        client.disconnect().await;
        return;
    }
    if let Err(e) = client.done().await {
        warn!("done: {}", e);
        client.disconnect().await;
    }
}

/// Remove a partially written download.
async fn discard(dest: &Path) {
    if let Err(e) = tokio::fs::remove_file(dest).await {
        warn!(path = %dest.display(), "removing partial download: {}", e);
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutting down");
    Ok(())
}
