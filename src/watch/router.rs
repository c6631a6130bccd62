use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use super::watch::Enqueued;
use super::Watch;
use super::WatchRegistry;
use crate::metrics;

/// Per-call routing summary
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Watches whose range contained at least one key
    pub matched: usize,
    /// Watches the value was queued on
    pub queued: usize,
    /// Watches whose full queue discarded the value
    pub dropped: usize,
}

impl WatchRegistry {
    /// Queues `val` on every watch whose range contains any of `keys`.
    ///
    /// Matching happens under the shared lock; queueing happens after it is
    /// released, so a blocking queue never holds up Open or Close.
    pub async fn flush(
        &self,
        keys: &[Bytes],
        val: u64,
    ) -> FlushReport {
        let matched: Vec<Arc<Watch>> = {
            let keys: Vec<&[u8]> = keys.iter().map(|k| k.as_ref()).collect();
            let inner = self.inner.read();
            inner.index.find_any(&keys).into_iter().cloned().collect()
        };

        let mut report = FlushReport {
            matched: matched.len(),
            ..Default::default()
        };
        for watch in &matched {
            match watch.enqueue_with(val, self.config.queue_full_policy).await {
                Enqueued::Queued => report.queued += 1,
                Enqueued::Dropped => report.dropped += 1,
                Enqueued::Closed => {}
            }
        }

        if self.config.enable_metrics {
            metrics::FLUSH_TOTAL.inc();
            metrics::FLUSH_MATCHES_TOTAL.inc_by(report.matched as u64);
            metrics::DROPPED_TOTAL.inc_by(report.dropped as u64);
        }
        trace!(keys = keys.len(), value = val, ?report, "Flush routed");
        report
    }
}
