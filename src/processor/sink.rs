//! Destinations notified when a message completes and validates.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::message::CompletedMessage;

/// Receives every message that completes and passes digest validation.
///
/// `deliver` is called after the in-flight lock has been released and must
/// not block; anything slow belongs behind a queue.
pub trait CompletionSink: Send + Sync {
    /// Accept a freshly completed message.
    fn deliver(&self, message: &CompletedMessage);
}

impl<F> CompletionSink for F
where
    F: Fn(&CompletedMessage) + Send + Sync,
{
    fn deliver(&self, message: &CompletedMessage) { self(message); }
}

/// Sink that ignores completions; storage is the only record.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl CompletionSink for NoopSink {
    fn deliver(&self, _message: &CompletedMessage) {}
}

/// Sink forwarding completions into a bounded tokio channel.
///
/// When the channel is full or closed the completion is dropped with a
/// warning; the message remains available from
/// [`CompletedStorage`](crate::CompletedStorage).
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<CompletedMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiver draining it.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, as [`mpsc::channel`] does.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CompletedMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl CompletionSink for ChannelSink {
    fn deliver(&self, message: &CompletedMessage) {
        match self.tx.try_send(message.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(key = %dropped.key(), "completion queue full; notification dropped");
            }
            Err(TrySendError::Closed(dropped)) => {
                warn!(key = %dropped.key(), "completion queue closed; notification dropped");
            }
        }
    }
}
