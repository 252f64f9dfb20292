//! UDT CLI Library
//!
//! Shared functionality for the UDT command-line tools.

pub mod config;
pub mod sink;
pub mod stats;

pub use config::{Config, ConfigError, SenderConfig, SinkConfig};
pub use sink::{Delivery, Reassembler};
pub use stats::{display_compact_stats, display_queue_stats, format_bandwidth, format_bytes};

use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `verbose`.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
