//! Per-watch delivery task
//!
//! Drains one watch's queue and hands each value to the guest's receive
//! export on a handle borrowed from the [`ExecutionPool`]:
//!
//! ```text
//! queue.recv() ─► replay filter ─► pool.acquire() ─► write id/value ─► call recv ─► read error buffer
//! ```
//!
//! A non-empty error buffer means the guest no longer wants the watch; the task
//! retires it and exits. A trap inside the callback only skips that value.
//! An ABI violation cannot be trapped from here, so it cancels the whole
//! connection through [`DeliveryContext::shutdown`].

use std::sync::Arc;
use std::sync::Weak;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::Watch;
use super::WatchRegistry;
use crate::abi::GuestModule;
use crate::abi::Meta;
use crate::metrics;
use crate::pool::ExecutionPool;
use crate::Result;

/// What the delivery engine needs to reach the guest
#[derive(Clone)]
pub struct DeliveryContext {
    pub pool: Arc<dyn ExecutionPool>,
    pub meta: Meta,
    pub receive_export: Arc<str>,
    /// Connection shutdown, cancelled when the guest breaks the ABI
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for DeliveryContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("meta", &self.meta)
            .field("receive_export", &self.receive_export)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Delivered,
    OptOut(String),
}

pub(crate) struct Delivery {
    watch: Arc<Watch>,
    registry: Weak<WatchRegistry>,
    receiver: mpsc::Receiver<u64>,
    after: Option<u64>,
    ctx: DeliveryContext,
    enable_metrics: bool,
}

impl Delivery {
    pub(crate) fn new(
        watch: Arc<Watch>,
        registry: Weak<WatchRegistry>,
        receiver: mpsc::Receiver<u64>,
        after: Option<u64>,
        ctx: DeliveryContext,
        enable_metrics: bool,
    ) -> Self {
        Self {
            watch,
            registry,
            receiver,
            after,
            ctx,
            enable_metrics,
        }
    }

    pub(crate) async fn run(mut self) {
        let token = self.watch.token().clone();
        debug!(watch_id = ?self.watch.id(), after = ?self.after, "Delivery task started");

        loop {
            let val = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                val = self.receiver.recv() => match val {
                    Some(val) => val,
                    None => break,
                },
            };

            if self.after.is_some_and(|after| val <= after) {
                trace!(watch_id = ?self.watch.id(), value = val, "Value at or below replay threshold skipped");
                continue;
            }

            let mut guest = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                guest = self.ctx.pool.acquire() => match guest {
                    Ok(guest) => guest,
                    Err(e) => {
                        warn!(watch_id = ?self.watch.id(), "Execution pool unavailable: {:?}", e);
                        self.retire();
                        break;
                    }
                },
            };

            match self.deliver(guest.as_mut(), val) {
                Ok(Outcome::Delivered) => {
                    if self.enable_metrics {
                        metrics::DELIVERED_TOTAL.inc();
                    }
                }
                Ok(Outcome::OptOut(msg)) => {
                    warn!(watch_id = ?self.watch.id(), value = val, "Error receiving watch notice: {}", msg);
                    if self.enable_metrics {
                        metrics::DELIVERY_ERRORS_TOTAL.inc();
                    }
                    drop(guest);
                    self.retire();
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!(watch_id = ?self.watch.id(), "ABI violation during delivery, shutting down connection: {}", e);
                    drop(guest);
                    self.retire();
                    self.ctx.shutdown.cancel();
                    break;
                }
                Err(e) => {
                    error!(watch_id = ?self.watch.id(), value = val, "Error calling watch receive notice: {}", e);
                    if self.enable_metrics {
                        metrics::DELIVERY_ERRORS_TOTAL.inc();
                    }
                }
            }
        }

        debug!(watch_id = ?self.watch.id(), "Delivery task stopped");
    }

    fn deliver(
        &self,
        guest: &mut dyn GuestModule,
        val: u64,
    ) -> Result<Outcome> {
        let meta = self.ctx.meta;
        meta.write_data(guest, self.watch.id())?;
        meta.write_value(guest, val)?;
        meta.write_error(guest, None)?;
        guest.call(&self.ctx.receive_export)?;
        Ok(match meta.read_error(guest)? {
            Some(msg) => Outcome::OptOut(msg),
            None => Outcome::Delivered,
        })
    }

    fn retire(&self) {
        match self.registry.upgrade() {
            Some(registry) => registry.retire(&self.watch),
            // Registry already gone; nothing left to unregister from
            None => self.watch.token().cancel(),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Delivery").field("watch", &self.watch.id()).field("after", &self.after).finish()
    }
}
