//! Runtime control for [`UdpReassemblyServer`].


use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::{select, signal, time::sleep};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{DatagramSource, ServerError, UdpReassemblyServer};
use crate::{
    cache::FragmentCache,
    metrics,
    message::MessageKey,
    processor::{FragmentMeta, FragmentOutcome, MessageProcessor},
    sweeper::CleanupSweeper,
    wire::decode_datagram,
};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

impl<S: DatagramSource + 'static> UdpReassemblyServer<S> {
    /// Run the server until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; receive errors are logged and
    /// retried rather than surfaced.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// The receive loop and the cleanup sweeper run as tracked tasks and
    /// are both stopped and awaited before this returns.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use tokio::sync::oneshot;
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
    /// let server = UdpReassemblyServer::bind(([127, 0, 0, 1], 0).into(), processor, config)?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(server.run_with_shutdown(async {
    ///     let _ = rx.await;
    /// }));
    ///
    /// let _ = tx.send(());
    /// handle.await.expect("join server task")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; receive errors are logged and
    /// retried rather than surfaced.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let UdpReassemblyServer {
            source,
            processor,
            cache,
            config,
            ready_tx,
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        if let Ok(addr) = source.local_addr() {
            info!("udp reassembler listening: addr={addr}");
        }

        CleanupSweeper::new(config.sweep_interval())
            .with_target(processor.clone())
            .with_target(cache.clone())
            .spawn(&tracker, shutdown_token.clone());

        let handler = DatagramHandler {
            processor,
            cache,
            cache_ttl: config.cache_ttl(),
        };
        tracker.spawn(receive_loop(
            source,
            handler,
            config.recv_buffer_size(),
            shutdown_token.clone(),
        ));

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        info!("udp reassembler stopped");
        Ok(())
    }
}

/// Per-datagram pipeline: decode, suppress duplicates, ingest.
#[derive(Debug, Clone)]
pub(super) struct DatagramHandler {
    pub processor: Arc<MessageProcessor>,
    pub cache: Arc<FragmentCache<String>>,
    pub cache_ttl: Duration,
}

impl DatagramHandler {
    /// Process one datagram, returning the processor's outcome when the
    /// datagram reached it.
    pub fn handle(&self, datagram: Bytes, peer: SocketAddr) -> Option<FragmentOutcome> {
        let fragment = match decode_datagram(datagram) {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!("dropping malformed datagram: peer={peer}, error={e}");
                metrics::inc_malformed_datagrams();
                return None;
            }
        };

        let staging_key = fragment.staging_key();
        if self.cache.get(&staging_key).is_some() {
            debug!("dropping duplicate datagram: peer={peer}, fragment={staging_key}");
            metrics::inc_duplicate_datagrams();
            return None;
        }
        self.cache
            .put(staging_key.clone(), fragment.payload().clone(), self.cache_ttl);

        let (key, payload, meta) = fragment.into_parts();
        let outcome = self.processor.process_fragment(key.clone(), payload, meta);
        if let FragmentOutcome::Rejected(err) = &outcome {
            // Only accepted fragments may shadow later copies.
            self.cache.remove(&staging_key);
            if err.discarded_message() {
                self.unstage_message(&key, meta);
            }
        }
        Some(outcome)
    }

    /// Forget every staged fragment of a discarded message so a resend is
    /// not mistaken for retransmits.
    fn unstage_message(&self, key: &MessageKey, meta: FragmentMeta) {
        for index in 0..meta.expected_count().get() {
            self.cache.remove(&format!("{key}#{index}"));
        }
    }
}

/// Receive datagrams until `shutdown` is cancelled.
///
/// Receive failures are logged and retried after a delay that doubles on
/// each consecutive failure, capped at one second.
pub(super) async fn receive_loop<S>(
    source: Arc<S>,
    handler: DatagramHandler,
    buffer_size: usize,
    shutdown: CancellationToken,
) where
    S: DatagramSource + ?Sized,
{
    let mut buf = vec![0u8; buffer_size];
    let mut delay = INITIAL_RETRY_DELAY;
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            res = source.recv_from(&mut buf) => match res {
                Ok((len, peer)) => {
                    delay = INITIAL_RETRY_DELAY;
                    handler.handle(Bytes::copy_from_slice(&buf[..len]), peer);
                }
                Err(e) => {
                    let local_addr = source.local_addr().ok();
                    warn!("receive error: error={e:?}, local_addr={local_addr:?}");
                    select! {
                        biased;

                        () = shutdown.cancelled() => break,
                        () = sleep(delay) => {}
                    }
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
            },
        }
    }
}
