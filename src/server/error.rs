//! Errors raised by [`UdpReassemblyServer`](super::UdpReassemblyServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while setting up or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the UDP socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// The bound socket could not report its address.
    #[error("local address unavailable: {0}")]
    LocalAddr(#[source] io::Error),
}
