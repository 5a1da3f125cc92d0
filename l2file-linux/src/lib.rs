//! l2file host: async transports, file client and server, bulk self-test.

pub mod bulk;
pub mod cli;
pub mod client;
pub mod config;
pub mod demo;
pub mod logging;
pub mod memory;
pub mod perf;
pub mod server;
pub mod store;
pub mod tcp;
pub mod transport;

pub use bulk::BulkAdapter;
pub use client::{ClientError, FileClient};
pub use config::Config;
pub use store::FsStore;
pub use transport::{BulkChannel, ControlChannel, TransportError};
