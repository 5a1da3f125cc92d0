//! Tracing setup for the `l2file` binary.

/// Install the global subscriber: `RUST_LOG` filter (default `info`), output on stderr so
/// `--json` results on stdout stay clean.
///
/// ```bash
/// RUST_LOG=debug l2file serve
/// RUST_LOG=l2file_linux::bulk=trace l2file get /tmp/demo/big.dat big.dat
/// ```
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
