use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serial_test::serial;
use tracing_test::traced_test;

use crate::metrics;
use crate::test_utils::assert_quiet;
use crate::test_utils::guest_context;
use crate::test_utils::recv_n;
use crate::test_utils::watch_config;
use crate::test_utils::MockGuest;
use crate::FlushReport;
use crate::QueueFullPolicy;
use crate::WatchRegistry;

fn registry(
    capacity: usize,
    policy: QueueFullPolicy,
) -> Arc<WatchRegistry> {
    Arc::new(WatchRegistry::new(watch_config(capacity, policy)))
}

fn keys(keys: &[&'static str]) -> Vec<Bytes> {
    keys.iter().map(|k| Bytes::from_static(k.as_bytes())).collect()
}

/// Three overlapping ranges: a=[100,200) b=[150,250) c=[200,300)
async fn overlapping() -> (Arc<WatchRegistry>, tokio::sync::mpsc::UnboundedReceiver<(Bytes, u64)>) {
    let r = registry(16, QueueFullPolicy::Drop);
    let (guest, rx) = MockGuest::recording();
    let (ctx, _pool) = guest_context(&guest, 3);
    r.create(Bytes::from("a"), b"100", b"200", ctx.clone()).await.unwrap();
    r.create(Bytes::from("b"), b"150", b"250", ctx.clone()).await.unwrap();
    r.create(Bytes::from("c"), b"200", b"300", ctx).await.unwrap();
    (r, rx)
}

async fn received(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<(Bytes, u64)>,
    n: usize,
) -> Vec<(Bytes, u64)> {
    let mut got = recv_n(rx, n).await;
    got.sort();
    got
}

#[tokio::test]
async fn test_flush_routes_to_every_containing_range() {
    let (r, mut rx) = overlapping().await;

    let report = r.flush(&keys(&["160"]), 1).await;
    assert_eq!(
        report,
        FlushReport {
            matched: 2,
            queued: 2,
            dropped: 0
        }
    );
    assert_eq!(received(&mut rx, 2).await, vec![(Bytes::from("a"), 1), (Bytes::from("b"), 1)]);

    // Upper bound is exclusive, lower bound inclusive
    r.flush(&keys(&["200"]), 2).await;
    assert_eq!(received(&mut rx, 2).await, vec![(Bytes::from("b"), 2), (Bytes::from("c"), 2)]);

    r.flush(&keys(&["250"]), 3).await;
    assert_eq!(received(&mut rx, 1).await, vec![(Bytes::from("c"), 3)]);

    assert_eq!(r.flush(&keys(&["300"]), 4).await.matched, 0);
    assert_eq!(r.flush(&keys(&["099"]), 5).await.matched, 0);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_flush_queues_once_per_watch() {
    let (r, mut rx) = overlapping().await;

    let report = r.flush(&keys(&["110", "120", "130"]), 9).await;

    assert_eq!(report.matched, 1);
    assert_eq!(received(&mut rx, 1).await, vec![(Bytes::from("a"), 9)]);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_flush_with_no_keys_matches_nothing() {
    let (r, mut rx) = overlapping().await;

    assert_eq!(r.flush(&[], 1).await, FlushReport::default());
    assert_quiet(&mut rx).await;
}

#[tokio::test]
#[traced_test]
async fn test_drop_policy_discards_when_full() {
    let r = registry(2, QueueFullPolicy::Drop);
    let w = r.open(Bytes::from("w"), b"a", b"c").unwrap();

    let mut dropped = 0;
    for val in 1..=3 {
        dropped += r.flush(&keys(&["b"]), val).await.dropped;
    }

    assert_eq!(dropped, 1);
    assert_eq!(w.dropped(), 1);
    assert!(logs_contain("Watch queue full, value dropped"));

    let (guest, mut rx) = MockGuest::recording();
    let (ctx, _pool) = guest_context(&guest, 1);
    r.start(b"w", None, ctx).unwrap();
    let vals: Vec<u64> = recv_n(&mut rx, 2).await.into_iter().map(|(_, v)| v).collect();
    assert_eq!(vals, vec![1, 2]);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_full_queue_does_not_affect_other_watches() {
    let r = registry(1, QueueFullPolicy::Drop);
    let stalled = r.open(Bytes::from("stalled"), b"a", b"c").unwrap();
    let (guest, mut rx) = MockGuest::recording();
    let (ctx, _pool) = guest_context(&guest, 1);
    r.create(Bytes::from("live"), b"a", b"c", ctx).await.unwrap();

    for val in 1..=3 {
        r.flush(&keys(&["b"]), val).await;
        recv_n(&mut rx, 1).await;
    }

    assert_eq!(stalled.dropped(), 2);
}

#[tokio::test]
async fn test_block_policy_waits_for_space() {
    let r = registry(1, QueueFullPolicy::Block);
    r.open(Bytes::from("w"), b"a", b"c").unwrap();
    r.flush(&keys(&["b"]), 1).await;

    let blocked = {
        let r = r.clone();
        tokio::spawn(async move { r.flush(&keys(&["b"]), 2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    let (guest, mut rx) = MockGuest::recording();
    let (ctx, _pool) = guest_context(&guest, 1);
    r.start(b"w", None, ctx).unwrap();

    let report = blocked.await.unwrap();
    assert_eq!(report.queued, 1);
    assert_eq!(report.dropped, 0);
    let vals: Vec<u64> = recv_n(&mut rx, 2).await.into_iter().map(|(_, v)| v).collect();
    assert_eq!(vals, vec![1, 2]);
}

#[tokio::test]
async fn test_block_policy_released_by_close() {
    let r = registry(1, QueueFullPolicy::Block);
    r.open(Bytes::from("w"), b"a", b"c").unwrap();
    r.flush(&keys(&["b"]), 1).await;

    let blocked = {
        let r = r.clone();
        tokio::spawn(async move { r.flush(&keys(&["b"]), 2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    r.close(b"w").await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("flush stayed blocked after close")
        .unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.queued, 0);
}

#[tokio::test]
async fn test_open_is_not_blocked_by_pending_flush() {
    let r = registry(1, QueueFullPolicy::Block);
    r.open(Bytes::from("w"), b"a", b"c").unwrap();
    r.flush(&keys(&["b"]), 1).await;
    let blocked = {
        let r = r.clone();
        tokio::spawn(async move { r.flush(&keys(&["b"]), 2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    r.open(Bytes::from("other"), b"x", b"z").unwrap();
    assert_eq!(r.len(), 2);

    r.close(b"w").await.unwrap();
    blocked.await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_flush_updates_metrics_when_enabled() {
    let mut config = watch_config(1, QueueFullPolicy::Drop);
    config.enable_metrics = true;
    let r = Arc::new(WatchRegistry::new(config));
    r.open(Bytes::from("w"), b"a", b"c").unwrap();
    let flushes = metrics::FLUSH_TOTAL.get();
    let dropped = metrics::DROPPED_TOTAL.get();

    r.flush(&keys(&["b"]), 1).await;
    r.flush(&keys(&["b"]), 2).await;

    assert!(metrics::FLUSH_TOTAL.get() >= flushes + 2);
    assert!(metrics::DROPPED_TOTAL.get() > dropped);
    assert!(metrics::ACTIVE_WATCHES.get() >= 1);
}
