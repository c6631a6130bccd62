use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::debug;
use tracing::trace;

use super::Delivery;
use super::DeliveryContext;
use super::Watch;
use crate::interval::IntervalIndex;
use crate::interval::SortedIntervals;
use crate::metrics;
use crate::WatchConfig;
use crate::WatchError;

pub type WatchIndex = Box<dyn IntervalIndex<Arc<Watch>>>;

pub(super) struct RegistryInner {
    pub(super) watches: HashMap<Bytes, Arc<Watch>>,
    pub(super) index: WatchIndex,
}

/// Per-connection set of watches
///
/// The id map and interval index share one lock. It is held only while the
/// structures are mutated or read, never while waiting on a delivery task or
/// a full queue.
pub struct WatchRegistry {
    pub(super) inner: RwLock<RegistryInner>,
    pub(super) config: WatchConfig,
    new_index: fn() -> WatchIndex,
}

fn default_index() -> WatchIndex {
    Box::new(SortedIntervals::new())
}

impl WatchRegistry {
    pub fn new(config: WatchConfig) -> Self {
        Self::with_index(config, default_index)
    }

    /// Uses `new_index` for the initial index and for every `reset()`.
    pub fn with_index(
        config: WatchConfig,
        new_index: fn() -> WatchIndex,
    ) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                watches: HashMap::new(),
                index: new_index(),
            }),
            config,
            new_index,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Registers `[from, to)` under `id`. The watch queues values but does not
    /// deliver them until started.
    pub fn open(
        &self,
        id: Bytes,
        from: &[u8],
        to: &[u8],
    ) -> Result<Arc<Watch>, WatchError> {
        let mut inner = self.inner.write();
        if inner.watches.contains_key(&id) {
            return Err(WatchError::Exists);
        }

        let watch = Arc::new(Watch::new(id.clone(), self.config.queue_capacity));
        let handle = inner.index.insert(from, to, watch.clone());
        watch.set_interval(handle);
        inner.watches.insert(id, watch.clone());

        if self.config.enable_metrics {
            metrics::ACTIVE_WATCHES.inc();
        }
        debug!(watch_id = ?watch.id(), from = ?Bytes::copy_from_slice(from), to = ?Bytes::copy_from_slice(to), "Watch opened");
        Ok(watch)
    }

    pub fn find(
        &self,
        id: &[u8],
    ) -> Result<Arc<Watch>, WatchError> {
        self.inner.read().watches.get(id).cloned().ok_or(WatchError::NotFound)
    }

    /// Starts delivery for `id`, discarding queued and future values `<= after`.
    ///
    /// `None` replays everything. `Some(0)` would still drop a value of 0.
    pub fn start(
        self: &Arc<Self>,
        id: &[u8],
        after: Option<u64>,
        ctx: DeliveryContext,
    ) -> Result<(), WatchError> {
        let watch = self.find(id)?;
        let registry = Arc::downgrade(self);
        let enable_metrics = self.config.enable_metrics;
        watch.start(|receiver| {
            let delivery = Delivery::new(watch.clone(), registry, receiver, after, ctx, enable_metrics);
            tokio::spawn(delivery.run())
        })
    }

    /// Open followed immediately by Start with no replay threshold.
    pub async fn create(
        self: &Arc<Self>,
        id: Bytes,
        from: &[u8],
        to: &[u8],
        ctx: DeliveryContext,
    ) -> Result<Arc<Watch>, WatchError> {
        let watch = self.open(id, from, to)?;
        if let Err(e) = self.start(watch.id(), None, ctx) {
            // Lost a race with a concurrent close of the same id
            self.close(watch.id()).await.ok();
            return Err(e);
        }
        Ok(watch)
    }

    /// Closes `id` and waits for its delivery task to exit.
    ///
    /// Calling it again while a close is in progress waits for that close.
    pub async fn close(
        &self,
        id: &[u8],
    ) -> Result<(), WatchError> {
        let (watch, owner) = {
            let mut inner = self.inner.write();
            let watch = inner.watches.get(id).cloned().ok_or(WatchError::NotFound)?;
            let (owner, interval) = watch.begin_close();
            if let Some(handle) = interval {
                inner.index.remove(handle);
            }
            (watch, owner)
        };

        if owner {
            watch.shutdown().await;
            self.forget(&watch);
            watch.mark_closed();
        } else {
            watch.wait_closed().await;
        }
        Ok(())
    }

    /// Closes the watch from inside its own delivery task.
    ///
    /// Does not wait on the task, which is the caller. The id is free again
    /// as soon as this returns, while the task is still unwinding. The caller
    /// must make no further guest call after `retire`; the old task and a
    /// reopened watch share no queue or interval.
    pub(crate) fn retire(
        &self,
        watch: &Arc<Watch>,
    ) {
        let owner = {
            let mut inner = self.inner.write();
            let (owner, interval) = watch.begin_close();
            if let Some(handle) = interval {
                inner.index.remove(handle);
            }
            if owner {
                Self::forget_locked(&mut inner, watch, self.config.enable_metrics);
            }
            owner
        };
        if owner {
            watch.token().cancel();
            watch.mark_closed();
        }
    }

    /// Force-closes every watch, waiting for all delivery tasks to exit.
    ///
    /// The registry stays usable afterwards.
    pub async fn release(&self) {
        let pending: Vec<(Arc<Watch>, bool)> = {
            let mut inner = self.inner.write();
            let watches: Vec<Arc<Watch>> = inner.watches.values().cloned().collect();
            watches
                .into_iter()
                .map(|watch| {
                    let (owner, interval) = watch.begin_close();
                    if let Some(handle) = interval {
                        inner.index.remove(handle);
                    }
                    (watch, owner)
                })
                .collect()
        };
        debug!(watches = pending.len(), "Releasing watch registry");

        join_all(pending.iter().map(|(watch, owner)| async move {
            if *owner {
                watch.shutdown().await;
                self.forget(watch);
                watch.mark_closed();
            } else {
                watch.wait_closed().await;
            }
        }))
        .await;

        let mut inner = self.inner.write();
        if inner.watches.is_empty() {
            inner.index = (self.new_index)();
        }
    }

    /// Clears the id map and installs a fresh interval index.
    ///
    /// Only valid once no watch is live, i.e. after `release()` on a registry
    /// nobody else holds.
    pub fn reset(&mut self) {
        let enable_metrics = self.config.enable_metrics;
        let inner = self.inner.get_mut();
        Self::abandon(&inner.watches, enable_metrics);
        inner.watches.clear();
        inner.index = (self.new_index)();
        trace!("Watch registry reset");
    }

    pub fn len(&self) -> usize {
        self.inner.read().watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(
        &self,
        id: &[u8],
    ) -> bool {
        self.inner.read().watches.contains_key(id)
    }

    fn forget(
        &self,
        watch: &Arc<Watch>,
    ) {
        let mut inner = self.inner.write();
        Self::forget_locked(&mut inner, watch, self.config.enable_metrics);
    }

    /// Cancels every watch still in the map and stops counting them as active.
    fn abandon(
        watches: &HashMap<Bytes, Arc<Watch>>,
        enable_metrics: bool,
    ) {
        for watch in watches.values() {
            watch.token().cancel();
        }
        if enable_metrics {
            metrics::ACTIVE_WATCHES.sub(watches.len() as i64);
        }
    }

    /// Removes the map entry only if it still refers to this very watch.
    fn forget_locked(
        inner: &mut RegistryInner,
        watch: &Arc<Watch>,
        enable_metrics: bool,
    ) {
        if inner.watches.get(watch.id()).is_some_and(|w| Arc::ptr_eq(w, watch)) {
            inner.watches.remove(watch.id());
            if enable_metrics {
                metrics::ACTIVE_WATCHES.dec();
            }
        }
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        // Tasks hold only a weak registry reference; stop them rather than leak
        let enable_metrics = self.config.enable_metrics;
        Self::abandon(&self.inner.get_mut().watches, enable_metrics);
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("watches", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
