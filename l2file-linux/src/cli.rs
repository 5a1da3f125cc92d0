use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "l2file",
    version,
    about = "File service and bulk self-test over a control + bulk channel link"
)]
pub struct Cli {
    /// Link address (overrides config and L2FILE_ADDR)
    #[arg(long, global = true)]
    pub addr: Option<SocketAddr>,
    /// Print results as JSON on stdout
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Advertise the file service and answer clients
    Serve(ServeOpts),
    /// Print the size of a remote file
    Size { path: String },
    /// Download a remote file
    Get { path: String, dest: PathBuf },
    /// List a remote directory
    Ls { path: String },
    /// Size, missing-file, timed download and listing against a demo directory
    Demo(DemoOpts),
    /// Advertise the bulk self-test and run it with each client
    PerfServer(PerfOpts),
    /// Run the bulk self-test against a perf server
    PerfClient(PerfOpts),
}

#[derive(Args, Debug, Clone)]
pub struct ServeOpts {
    /// Directory request paths are resolved under
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Bytes per bulk send
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct DemoOpts {
    /// Remote directory holding file.txt and big.dat
    #[arg(long, default_value = "/tmp/demo")]
    pub dir: String,
    /// Where the downloaded big.dat is written
    #[arg(long, default_value = "download.txt")]
    pub out: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PerfOpts {
    /// Payload size in bytes
    #[arg(long)]
    pub bytes: Option<usize>,
    /// Bytes per bulk send
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Skip the digest exchange on the control channel
    #[arg(long, default_value_t = false)]
    pub no_digest: bool,
}

impl Cli {
    /// Flags win over file and environment.
    pub fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        match &self.cmd {
            Cmd::Serve(o) => {
                if let Some(root) = &o.root {
                    config.root = root.clone();
                }
                if let Some(n) = o.chunk_size {
                    config.chunk_size = n;
                }
            }
            Cmd::PerfServer(o) | Cmd::PerfClient(o) => {
                if let Some(n) = o.bytes {
                    config.perf_total_bytes = n;
                }
                if let Some(n) = o.chunk_size {
                    config.chunk_size = n;
                }
                if o.no_digest {
                    config.exchange_digest = false;
                }
            }
            _ => {}
        }
    }
}
