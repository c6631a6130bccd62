use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::interval::IntervalHandle;
use crate::QueueFullPolicy;
use crate::WatchError;

/// Lifecycle of a [`Watch`].
///
/// ```text
/// Created ──Start──► Started ──Stop/Delete/Release──► Closing ──task exited──► Closed
///    │                                                   ▲
///    └───────────────Stop/Delete/Release─────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Interval registered, queue filling, no consumer
    Created,
    /// A delivery task drains the queue
    Started,
    /// Interval removed and task cancelled, waiting for it to exit
    Closing,
    /// Terminal
    Closed,
}

/// Result of trying to put a value on a watch's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    Queued,
    Dropped,
    Closed,
}

#[derive(Debug)]
struct WatchInner {
    state: WatchState,
    receiver: Option<mpsc::Receiver<u64>>,
    task: Option<JoinHandle<()>>,
    interval: Option<IntervalHandle>,
}

/// One range subscription
#[derive(Debug)]
pub struct Watch {
    id: Bytes,
    sender: mpsc::Sender<u64>,
    /// Cancels the delivery task
    token: CancellationToken,
    /// Cancelled once the watch reaches `Closed`
    closed: CancellationToken,
    dropped: AtomicU64,
    inner: Mutex<WatchInner>,
}

impl Watch {
    pub(crate) fn new(
        id: Bytes,
        queue_capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        Self {
            id,
            sender,
            token: CancellationToken::new(),
            closed: CancellationToken::new(),
            dropped: AtomicU64::new(0),
            inner: Mutex::new(WatchInner {
                state: WatchState::Created,
                receiver: Some(receiver),
                task: None,
                interval: None,
            }),
        }
    }

    /// Canonical id
    pub fn id(&self) -> &Bytes {
        &self.id
    }

    pub fn state(&self) -> WatchState {
        self.inner.lock().state
    }

    /// Values discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn set_interval(
        &self,
        handle: IntervalHandle,
    ) {
        self.inner.lock().interval = Some(handle);
    }

    /// Moves the watch to `Started`, handing the queue to `spawn`.
    ///
    /// `spawn` runs under the watch's own lock, so two racing Starts cannot
    /// both launch a task.
    pub(crate) fn start<F>(
        &self,
        spawn: F,
    ) -> Result<(), WatchError>
    where
        F: FnOnce(mpsc::Receiver<u64>) -> JoinHandle<()>,
    {
        let mut inner = self.inner.lock();
        match inner.state {
            WatchState::Created => {}
            WatchState::Started => return Err(WatchError::AlreadyOpen),
            WatchState::Closing | WatchState::Closed => return Err(WatchError::Closed),
        }
        let receiver = inner.receiver.take().ok_or(WatchError::Closed)?;
        inner.task = Some(spawn(receiver));
        inner.state = WatchState::Started;
        debug!(watch_id = ?self.id, "Watch started");
        Ok(())
    }

    /// Claims the right to close. Returns the interval to remove, or `None`
    /// with `false` when someone else already owns the close.
    pub(crate) fn begin_close(&self) -> (bool, Option<IntervalHandle>) {
        let mut inner = self.inner.lock();
        match inner.state {
            WatchState::Created | WatchState::Started => {
                inner.state = WatchState::Closing;
                (true, inner.interval.take())
            }
            WatchState::Closing | WatchState::Closed => (false, None),
        }
    }

    /// Cancels the delivery task and waits for it to exit.
    ///
    /// Must only be called by the owner of [`Watch::begin_close`], and never
    /// from the watch's own delivery task.
    pub(crate) async fn shutdown(&self) {
        self.token.cancel();
        let task = {
            let mut inner = self.inner.lock();
            // Unblocks Flush callers waiting on a full queue of an unstarted watch
            inner.receiver.take();
            inner.task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(watch_id = ?self.id, "Delivery task ended abnormally: {:?}", e);
            }
        }
    }

    /// Waits until whoever owns the close has finished it.
    pub(crate) async fn wait_closed(&self) {
        self.closed.cancelled().await;
    }

    pub(crate) fn mark_closed(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = WatchState::Closed;
            inner.receiver.take();
        }
        self.closed.cancel();
        debug!(watch_id = ?self.id, "Watch closed");
    }

    /// Puts `val` on the queue without waiting.
    pub(crate) fn try_enqueue(
        &self,
        val: u64,
    ) -> Enqueued {
        match self.sender.try_send(val) {
            Ok(()) => {
                trace!(watch_id = ?self.id, value = val, "Value queued");
                Enqueued::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(watch_id = ?self.id, value = val, dropped, "Watch queue full, value dropped");
                Enqueued::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueued::Closed,
        }
    }

    /// Puts `val` on the queue, waiting for space. Gives up if the watch closes.
    pub(crate) async fn enqueue(
        &self,
        val: u64,
    ) -> Enqueued {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Enqueued::Closed,
            res = self.sender.send(val) => match res {
                Ok(()) => {
                    trace!(watch_id = ?self.id, value = val, "Value queued");
                    Enqueued::Queued
                }
                Err(_) => Enqueued::Closed,
            },
        }
    }

    pub(crate) async fn enqueue_with(
        &self,
        val: u64,
        policy: QueueFullPolicy,
    ) -> Enqueued {
        match policy {
            QueueFullPolicy::Drop => self.try_enqueue(val),
            QueueFullPolicy::Block => self.enqueue(val).await,
        }
    }
}
