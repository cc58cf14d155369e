//! Top-level error type for starting the reassembler.
//!
//! Each module reports its own failures through a dedicated `thiserror`
//! enum; [`ReassemblerError`] gathers the ones that can abort start-up so
//! the binary has a single error surface.

use thiserror::Error;

use crate::{config::ConfigError, server::ServerError};

/// Failures that prevent the reassembler from starting or running.
#[derive(Debug, Error)]
pub enum ReassemblerError {
    /// Configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The UDP listener failed.
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    /// The Prometheus exporter could not be installed.
    #[cfg(feature = "metrics")]
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Result type used by start-up code.
pub type Result<T> = std::result::Result<T, ReassemblerError>;
