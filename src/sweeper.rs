//! Periodic reclamation of stale state.
//!
//! [`CleanupSweeper`] ticks on a fixed interval and asks each registered
//! [`Sweep`] target to drop whatever has outlived its allowance: stale
//! in-flight messages and completion tombstones in the
//! [`MessageProcessor`], expired entries in a [`FragmentCache`]. One task
//! drives every target; nothing schedules a timer per entry.

use std::{fmt, hash::Hash, sync::Arc, time::Duration};

use tokio::{
    select,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

use crate::{cache::FragmentCache, processor::MessageProcessor};

/// State that can shed expired entries on demand.
pub trait Sweep: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Remove everything expired as of `now`, returning how many entries
    /// were removed.
    fn sweep_at(&self, now: Instant) -> usize;
}

impl Sweep for MessageProcessor {
    fn name(&self) -> &'static str { "in-flight messages" }

    fn sweep_at(&self, now: Instant) -> usize { self.sweep_stale_at(now).len() }
}

impl<K> Sweep for FragmentCache<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn name(&self) -> &'static str { "fragment cache" }

    fn sweep_at(&self, now: Instant) -> usize { self.purge_expired_at(now) }
}

/// Fixed-interval sweeper over one or more [`Sweep`] targets.
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, time::Duration};
///
/// use tokio_util::{sync::CancellationToken, task::TaskTracker};
/// use udp_reassembler::{CleanupSweeper, CompletedStorage, MessageProcessor};
///
/// # #[tokio::main]
/// # async fn main() {
/// let processor = Arc::new(MessageProcessor::new(
///     Duration::from_secs(30),
///     Arc::new(CompletedStorage::default()),
/// ));
/// let tracker = TaskTracker::new();
/// let shutdown = CancellationToken::new();
///
/// CleanupSweeper::new(Duration::from_secs(1))
///     .with_target(processor)
///     .spawn(&tracker, shutdown.clone());
///
/// shutdown.cancel();
/// tracker.close();
/// tracker.wait().await;
/// # }
/// ```
#[derive(Clone)]
pub struct CleanupSweeper {
    interval: Duration,
    targets: Vec<Arc<dyn Sweep>>,
}

impl fmt::Debug for CleanupSweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupSweeper")
            .field("interval", &self.interval)
            .field(
                "targets",
                &self.targets.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CleanupSweeper {
    /// Create a sweeper ticking every `interval`.
    ///
    /// # Panics
    ///
    /// [`run`](Self::run) panics if `interval` is zero, as
    /// [`tokio::time::interval`] does. [`ReassemblerConfig`](crate::ReassemblerConfig)
    /// rejects zero intervals up front.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            targets: Vec::new(),
        }
    }

    /// Register another target swept on every tick.
    #[must_use]
    pub fn with_target(mut self, target: Arc<dyn Sweep>) -> Self {
        self.targets.push(target);
        self
    }

    /// Sweep every target once as of `now`, returning the total removed.
    pub fn sweep_once_at(&self, now: Instant) -> usize {
        self.targets
            .iter()
            .map(|target| {
                let removed = target.sweep_at(now);
                if removed > 0 {
                    debug!(target_name = target.name(), removed, "sweep pass");
                }
                removed
            })
            .sum()
    }

    /// Tick until `shutdown` is cancelled.
    ///
    /// The first sweep happens one full interval after the call.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "cleanup sweeper started");
        loop {
            select! {
                biased;
                () = shutdown.cancelled() => break,
                now = ticker.tick() => {
                    self.sweep_once_at(now);
                }
            }
        }
        info!("cleanup sweeper stopped");
    }

    /// Spawn [`run`](Self::run) on `tracker`.
    pub fn spawn(self, tracker: &TaskTracker, shutdown: CancellationToken) {
        tracker.spawn(self.run(shutdown));
    }
}
