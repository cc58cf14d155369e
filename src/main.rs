//! `udp_reassembler` binary.
//!
//! Parses CLI arguments, optionally starts the Prometheus endpoint, and
//! runs the UDP listener until Ctrl+C.

mod cli;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use udp_reassembler::{
    ChannelSink,
    CompletedStorage,
    MessageProcessor,
    ReassemblerConfig,
    Result,
    server::UdpReassemblyServer,
};

const COMPLETION_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let config = ReassemblerConfig::builder()
        .cache_ttl(Duration::from_millis(cli.cache_ttl_ms))
        .sweep_interval(Duration::from_millis(cli.sweep_interval_ms))
        .grace_period(Duration::from_millis(cli.grace_period_ms))
        .recv_buffer_size(cli.recv_buffer)
        .build()?;

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "metrics endpoint listening");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        tracing::warn!("built without the metrics feature; ignoring --metrics-addr");
    }

    let (sink, mut completions) = ChannelSink::new(COMPLETION_QUEUE);
    let processor = Arc::new(
        MessageProcessor::new(config.grace_period(), Arc::new(CompletedStorage::default()))
            .with_sink(sink),
    );
    tokio::spawn(async move {
        while let Some(message) = completions.recv().await {
            tracing::info!(
                key = %message.key(),
                len = message.payload().len(),
                digest = %message.digest(),
                "message available"
            );
        }
    });

    UdpReassemblyServer::bind(cli.bind, processor, config)?
        .run()
        .await?;
    Ok(())
}
