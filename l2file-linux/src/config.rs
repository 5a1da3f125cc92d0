//! Load config from file and environment.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use l2file_core::chunk::{self, ChunkError};
use l2file_core::protocol;

/// Host configuration. File: ~/.config/l2file/config.toml or /etc/l2file/config.toml.
/// Env overrides: L2FILE_ADDR, L2FILE_PSM, L2FILE_MTU, L2FILE_CHUNK_SIZE, L2FILE_ROOT,
/// L2FILE_CONNECT_TIMEOUT_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the link is emulated on (default 127.0.0.1:4522).
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
    /// Name the file server advertises and the client looks for.
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default = "default_perf_name")]
    pub perf_name: String,
    /// Bulk channel port (default 22).
    #[serde(default = "default_psm")]
    pub psm: u16,
    /// MTU advertised on the file bulk channel (default 512).
    #[serde(default = "default_file_mtu")]
    pub file_mtu: u16,
    /// MTU advertised on the perf bulk channel (default 300).
    #[serde(default = "default_perf_mtu")]
    pub perf_mtu: u16,
    /// Bytes per bulk send (default 240).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_perf_total_bytes")]
    pub perf_total_bytes: usize,
    /// Send the full payload digest over the control channel after each perf transfer.
    #[serde(default = "default_exchange_digest")]
    pub exchange_digest: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    /// Directory the file server serves request paths under.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4522))
}
fn default_file_name() -> String {
    protocol::FILE_SERVER_NAME.to_string()
}
fn default_perf_name() -> String {
    protocol::PERF_SERVER_NAME.to_string()
}
fn default_psm() -> u16 {
    protocol::BULK_PSM
}
fn default_file_mtu() -> u16 {
    protocol::FILE_MTU as u16
}
fn default_perf_mtu() -> u16 {
    protocol::PERF_MTU as u16
}
fn default_chunk_size() -> usize {
    protocol::PERF_CHUNK_SIZE
}
fn default_perf_total_bytes() -> usize {
    protocol::PERF_TOTAL_BYTES
}
fn default_exchange_digest() -> bool {
    true
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_discovery_timeout_ms() -> u64 {
    5000
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            file_name: default_file_name(),
            perf_name: default_perf_name(),
            psm: default_psm(),
            file_mtu: default_file_mtu(),
            perf_mtu: default_perf_mtu(),
            chunk_size: default_chunk_size(),
            perf_total_bytes: default_perf_total_bytes(),
            exchange_digest: default_exchange_digest(),
            connect_timeout_ms: default_connect_timeout_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            root: default_root(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// The chunk size must fit both bulk channels.
    pub fn validate(&self) -> Result<(), ConfigError> {
        chunk::validate_chunk_size(self.chunk_size, self.file_mtu as usize)?;
        chunk::validate_chunk_size(self.chunk_size, self.perf_mtu as usize)?;
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Zero("connect_timeout_ms"));
        }
        if self.discovery_timeout_ms == 0 {
            return Err(ConfigError::Zero("discovery_timeout_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk_size: {0}")]
    Chunk(#[from] ChunkError),
    #[error("{0} must be non-zero")]
    Zero(&'static str),
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(a) = var("L2FILE_ADDR").and_then(|s| s.parse().ok()) {
        c.addr = a;
    }
    if let Some(p) = var("L2FILE_PSM").and_then(|s| s.parse().ok()) {
        c.psm = p;
    }
    if let Some(m) = var("L2FILE_MTU").and_then(|s| s.parse().ok()) {
        c.file_mtu = m;
    }
    if let Some(n) = var("L2FILE_CHUNK_SIZE").and_then(|s| s.parse().ok()) {
        c.chunk_size = n;
    }
    if let Some(r) = var("L2FILE_ROOT") {
        c.root = PathBuf::from(r);
    }
    if let Some(t) = var("L2FILE_CONNECT_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
        c.connect_timeout_ms = t;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/l2file/config.toml"));
    }
    out.push(PathBuf::from("/etc/l2file/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            let s = match std::fs::read_to_string(&p) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(path = %p.display(), "config: {}", e);
                    break;
                }
            };
            match toml::from_str::<Config>(&s) {
                Ok(c) => return Some(c),
                Err(e) => tracing::warn!(path = %p.display(), "config: {}", e),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let c = Config::default();
        assert_eq!(c.psm, 22);
        assert_eq!(c.file_mtu, 512);
        assert_eq!(c.perf_mtu, 300);
        assert_eq!(c.chunk_size, 240);
        assert_eq!(c.perf_total_bytes, 10240);
        assert_eq!(c.file_name, "mpy-file");
        c.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str("psm = 25\nroot = \"/srv/files\"\n").unwrap();
        assert_eq!(c.psm, 25);
        assert_eq!(c.root, PathBuf::from("/srv/files"));
        assert_eq!(c.chunk_size, 240);
        assert_eq!(c.addr, default_addr());
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128\n").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("L2FILE_ADDR", "0.0.0.0:9000"),
            ("L2FILE_MTU", "256"),
            ("L2FILE_CHUNK_SIZE", "200"),
            ("L2FILE_PSM", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.addr, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(c.file_mtu, 256);
        assert_eq!(c.chunk_size, 200);
        assert_eq!(c.psm, 22);
    }

    #[test]
    fn chunk_size_checked_against_mtus() {
        let mut c = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Chunk(ChunkError::ZeroChunkSize))
        ));
        c.chunk_size = 400;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Chunk(ChunkError::ChunkExceedsMtu {
                chunk_size: 400,
                mtu: 300
            }))
        ));
    }
}
