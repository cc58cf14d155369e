//! Tokio-based UDP listener feeding the reassembly engine.
//!
//! [`UdpReassemblyServer`] receives datagrams, decodes their
//! [`wire`](crate::wire) header, drops retransmitted copies seen within the
//! cache TTL, and hands each fragment to a shared [`MessageProcessor`]. A
//! [`CleanupSweeper`](crate::CleanupSweeper) runs alongside the receive loop
//! for the lifetime of the server.

mod error;
mod runtime;

use std::{
    io,
    net::{SocketAddr, UdpSocket as StdUdpSocket},
    sync::Arc,
};

use async_trait::async_trait;
pub use error::ServerError;
use tokio::{net::UdpSocket, sync::oneshot};

use crate::{cache::FragmentCache, config::ReassemblerConfig, processor::MessageProcessor};

/// Source of incoming datagrams consumed by the receive loop.
///
/// Implementations must be cancellation-safe: dropping a pending
/// `recv_from()` future must not lose a datagram already read.
#[async_trait]
pub trait DatagramSource: Send + Sync {
    /// Receive one datagram into `buf`, returning its length and sender.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Address the source is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramSource for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { UdpSocket::local_addr(self) }
}

/// UDP front end for a [`MessageProcessor`].
///
/// # Examples
///
/// ```no_run
/// use std::{net::SocketAddr, sync::Arc};
///
/// use udp_reassembler::{
///     CompletedStorage,
///     MessageProcessor,
///     ReassemblerConfig,
///     server::{ServerError, UdpReassemblyServer},
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), ServerError> {
/// let config = ReassemblerConfig::default();
/// let processor = Arc::new(MessageProcessor::new(
///     config.grace_period(),
///     Arc::new(CompletedStorage::default()),
/// ));
/// let addr: SocketAddr = ([127, 0, 0, 1], 9000).into();
/// UdpReassemblyServer::bind(addr, processor, config)?.run().await
/// # }
/// ```
pub struct UdpReassemblyServer<S = UdpSocket> {
    source: Arc<S>,
    processor: Arc<MessageProcessor>,
    cache: Arc<FragmentCache<String>>,
    config: ReassemblerConfig,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl<S> std::fmt::Debug for UdpReassemblyServer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpReassemblyServer")
            .field("processor", &self.processor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UdpReassemblyServer<UdpSocket> {
    /// Bind a UDP socket at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding or configuring the socket
    /// fails.
    pub fn bind(
        addr: SocketAddr,
        processor: Arc<MessageProcessor>,
        config: ReassemblerConfig,
    ) -> Result<Self, ServerError> {
        let std_socket = StdUdpSocket::bind(addr).map_err(ServerError::Bind)?;
        Self::bind_existing_socket(std_socket, processor, config)
    }

    /// Adopt an already bound standard library socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the socket cannot be registered
    /// with the runtime.
    pub fn bind_existing_socket(
        std_socket: StdUdpSocket,
        processor: Arc<MessageProcessor>,
        config: ReassemblerConfig,
    ) -> Result<Self, ServerError> {
        std_socket
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let socket = UdpSocket::from_std(std_socket).map_err(ServerError::Bind)?;
        Ok(Self::with_source(socket, processor, config))
    }
}

impl<S: DatagramSource + 'static> UdpReassemblyServer<S> {
    /// Serve datagrams from an arbitrary [`DatagramSource`].
    #[must_use]
    pub fn with_source(
        source: S,
        processor: Arc<MessageProcessor>,
        config: ReassemblerConfig,
    ) -> Self {
        Self {
            source: Arc::new(source),
            processor,
            cache: Arc::new(FragmentCache::new()),
            config,
            ready_tx: None,
        }
    }

    /// Notify `tx` once the receive loop and sweeper are running.
    #[must_use]
    pub fn with_ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Address the server receives on.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::LocalAddr`] if the source cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.source.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Processor receiving decoded fragments.
    #[must_use]
    pub fn processor(&self) -> &Arc<MessageProcessor> { &self.processor }

    /// Cache staging recently seen fragments for duplicate suppression.
    #[must_use]
    pub fn cache(&self) -> &Arc<FragmentCache<String>> { &self.cache }

    /// Settings the server was built with.
    #[must_use]
    pub const fn config(&self) -> &ReassemblerConfig { &self.config }
}
