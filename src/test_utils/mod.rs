//! Shared test components for unit tests across modules.
mod mock_guest;

pub use mock_guest::*;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::constants::DEFAULT_RECEIVE_EXPORT;
use crate::DeliveryContext;
use crate::ExecutionPool;
use crate::InstancePool;
use crate::QueueFullPolicy;
use crate::WatchConfig;

pub(crate) fn watch_config(
    queue_capacity: usize,
    queue_full_policy: QueueFullPolicy,
) -> WatchConfig {
    WatchConfig {
        queue_capacity,
        queue_full_policy,
        enable_metrics: false,
    }
}

/// Delivery context backed by `size` clones of `guest`.
pub(crate) fn guest_context(
    guest: &MockGuest,
    size: usize,
) -> (DeliveryContext, InstancePool<MockGuest>) {
    let pool = InstancePool::new(vec![guest.clone(); size]);
    let ctx = pool_context(guest, Arc::new(pool.clone()));
    (ctx, pool)
}

pub(crate) fn pool_context(
    guest: &MockGuest,
    pool: Arc<dyn ExecutionPool>,
) -> DeliveryContext {
    DeliveryContext {
        pool,
        meta: guest.meta(),
        receive_export: Arc::from(DEFAULT_RECEIVE_EXPORT),
        shutdown: CancellationToken::new(),
    }
}

/// Collects exactly `n` notifications, failing after one second.
pub(crate) async fn recv_n<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    n: usize,
) -> Vec<T> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let item = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("notification timed out")
            .expect("channel closed");
        out.push(item);
    }
    out
}

/// Asserts nothing else arrives within a short grace period.
pub(crate) async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        panic!("unexpected notification: {item:?}");
    }
}
