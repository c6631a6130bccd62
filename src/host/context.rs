use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::abi::GuestModule;
use crate::abi::Meta;
use crate::constants::FN_CREATE;
use crate::constants::FN_DELETE;
use crate::constants::FN_FLUSH;
use crate::constants::FN_OPEN;
use crate::constants::FN_START;
use crate::constants::FN_STOP;
use crate::constants::OPEN_ARG_COUNT;
use crate::pool::RegistryPool;
use crate::AbiError;
use crate::DeliveryContext;
use crate::Error;
use crate::Result;
use crate::WatchError;
use crate::WatchRegistry;

/// One connection's view of the host module
#[derive(Debug)]
pub struct HostContext {
    registry: Arc<WatchRegistry>,
    registries: Arc<RegistryPool>,
    delivery: DeliveryContext,
    done: CancellationToken,
}

impl HostContext {
    pub(super) fn new(
        registries: Arc<RegistryPool>,
        delivery: DeliveryContext,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = registries.acquire();
        let done = CancellationToken::new();

        let weak = Arc::downgrade(&registry);
        let finished = done.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Some(registry) = weak.upgrade() {
                        debug!("Connection shut down, releasing watches");
                        registry.release().await;
                    }
                }
                _ = finished.cancelled() => {}
            }
        });

        Self {
            registry,
            registries,
            delivery,
            done,
        }
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    pub fn meta(&self) -> Meta {
        self.delivery.meta
    }

    /// Dispatches an imported host function by name.
    pub async fn call(
        &self,
        name: &str,
        m: &mut dyn GuestModule,
    ) -> Result<()> {
        match name {
            FN_FLUSH => self.flush(m).await,
            FN_OPEN => self.open(m),
            FN_START => self.start(m),
            FN_CREATE => self.create(m).await,
            FN_STOP => self.stop(m).await,
            FN_DELETE => self.delete(m).await,
            other => Err(Error::Fatal(format!("Method signature implementation missing: {other}"))),
        }
    }

    /// Routes the value slot to every watch matching the data buffer's keys.
    pub async fn flush(
        &self,
        m: &mut dyn GuestModule,
    ) -> Result<()> {
        let meta = self.meta();
        let keys = meta.read_key_list(m)?;
        let val = meta.read_value(m)?;
        self.registry.flush(&keys, val).await;
        meta.write_error(m, None)?;
        Ok(())
    }

    pub fn open(
        &self,
        m: &mut dyn GuestModule,
    ) -> Result<()> {
        let [id, from, to] = self.open_args(m)?;
        let res = self.registry.open(id, &from, &to).map(|_| ());
        self.respond(m, res)
    }

    /// Starts delivery. A zero value slot means no replay threshold, so every
    /// queued value is delivered, including a value of 0.
    pub fn start(
        &self,
        m: &mut dyn GuestModule,
    ) -> Result<()> {
        let meta = self.meta();
        let id = meta.read_data(m)?;
        let after = meta.read_value(m)?;
        let after = (after > 0).then_some(after);
        let res = self.registry.start(&id, after, self.delivery.clone());
        self.respond(m, res)
    }

    pub async fn create(
        &self,
        m: &mut dyn GuestModule,
    ) -> Result<()> {
        let [id, from, to] = self.open_args(m)?;
        let res = self
            .registry
            .create(id, &from, &to, self.delivery.clone())
            .await
            .map(|_| ());
        self.respond(m, res)
    }

    pub async fn stop(
        &self,
        m: &mut dyn GuestModule,
    ) -> Result<()> {
        let id = self.meta().read_data(m)?;
        let res = self.registry.close(&id).await;
        self.respond(m, res)
    }

    pub async fn delete(
        &self,
        m: &mut dyn GuestModule,
    ) -> Result<()> {
        self.stop(m).await
    }

    /// Closes every watch and hands the registry back for reuse.
    pub async fn close(self) {
        let registry = self.registry.clone();
        let registries = self.registries.clone();
        drop(self);
        registries.recycle(registry).await;
    }

    fn open_args(
        &self,
        m: &mut dyn GuestModule,
    ) -> Result<[Bytes; OPEN_ARG_COUNT]> {
        let records = self.meta().read_key_list(m)?;
        let actual = records.len();
        records.try_into().map_err(|_| {
            Error::from(AbiError::ArgumentCount {
                expected: OPEN_ARG_COUNT,
                actual,
            })
        })
    }

    fn respond(
        &self,
        m: &mut dyn GuestModule,
        res: std::result::Result<(), WatchError>,
    ) -> Result<()> {
        let msg = res.err().map(|e| {
            trace!("Watch protocol error: {}", e);
            e.to_string()
        });
        self.meta().write_error(m, msg.as_deref())?;
        Ok(())
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        self.done.cancel();
    }
}
