//! Command line interface for the `udp_reassembler` binary.
//!
//! Every flag can also be supplied through a `UDP_REASSEMBLER_*`
//! environment variable. The build script renders a man page from this
//! definition, so it depends on nothing but `clap`.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `udp_reassembler` binary.
#[derive(Debug, Parser)]
#[command(
    name = "udp_reassembler",
    version,
    about = "Reassemble fragmented UDP messages and validate their digests"
)]
pub struct Cli {
    /// UDP address to receive fragments on.
    #[arg(short, long, env = "UDP_REASSEMBLER_BIND", default_value = "0.0.0.0:9000")]
    pub bind: SocketAddr,

    /// Address for the Prometheus scrape endpoint; disabled when unset.
    #[arg(long, env = "UDP_REASSEMBLER_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Receive buffer size in bytes.
    #[arg(long, env = "UDP_REASSEMBLER_RECV_BUFFER", default_value_t = 65_507)]
    pub recv_buffer: usize,

    /// Duplicate suppression window in milliseconds.
    #[arg(long, env = "UDP_REASSEMBLER_CACHE_TTL_MS", default_value_t = 5_000)]
    pub cache_ttl_ms: u64,

    /// Interval between cleanup sweeps in milliseconds.
    #[arg(long, env = "UDP_REASSEMBLER_SWEEP_INTERVAL_MS", default_value_t = 1_000)]
    pub sweep_interval_ms: u64,

    /// Grace period for incomplete messages in milliseconds.
    #[arg(long, env = "UDP_REASSEMBLER_GRACE_PERIOD_MS", default_value_t = 30_000)]
    pub grace_period_ms: u64,
}
