use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tracing::trace;

use crate::abi::GuestMemory;
use crate::abi::GuestModule;
use crate::Error;
use crate::Result;

/// Lends exclusive guest handles for callback invocation.
///
/// `acquire` may wait while every handle is busy; that wait is the only
/// backpressure on callback throughput. The handle goes back to the pool when
/// dropped.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionPool: Send + Sync + 'static {
    async fn acquire(&self) -> Result<Box<dyn GuestModule>>;
}

struct PoolInner<M> {
    idle: Mutex<Vec<M>>,
    permits: Arc<Semaphore>,
}

/// Fixed set of guest instances handed out one caller at a time
pub struct InstancePool<M> {
    inner: Arc<PoolInner<M>>,
}

impl<M: GuestModule + 'static> InstancePool<M> {
    pub fn new(instances: Vec<M>) -> Self {
        let permits = Arc::new(Semaphore::new(instances.len()));
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(instances),
                permits,
            }),
        }
    }

    /// Handles not currently lent out
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Fails pending and future `acquire` calls. Lent handles stay valid.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    async fn lease(&self) -> Result<PooledInstance<M>> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;
        // One permit per idle instance, so holding a permit means one is there
        let instance = self.inner.idle.lock().pop().ok_or(Error::PoolClosed)?;
        trace!("Guest instance leased");
        Ok(PooledInstance {
            instance: Some(instance),
            inner: self.inner.clone(),
            _permit: permit,
        })
    }
}

impl<M> Clone for InstancePool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[async_trait]
impl<M: GuestModule + 'static> ExecutionPool for InstancePool<M> {
    async fn acquire(&self) -> Result<Box<dyn GuestModule>> {
        Ok(Box::new(self.lease().await?))
    }
}

/// Exclusive lease on one pooled instance
pub struct PooledInstance<M> {
    instance: Option<M>,
    inner: Arc<PoolInner<M>>,
    // Released after `drop` has put the instance back
    _permit: OwnedSemaphorePermit,
}

impl<M> Drop for PooledInstance<M> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.inner.idle.lock().push(instance);
        }
    }
}

impl<M: GuestModule> GuestMemory for PooledInstance<M> {
    fn read(
        &self,
        offset: u32,
        len: u32,
    ) -> Option<Vec<u8>> {
        self.instance.as_ref()?.read(offset, len)
    }

    fn write(
        &mut self,
        offset: u32,
        data: &[u8],
    ) -> bool {
        self.instance.as_mut().is_some_and(|m| m.write(offset, data))
    }
}

impl<M: GuestModule> GuestModule for PooledInstance<M> {
    fn call(
        &mut self,
        export: &str,
    ) -> Result<Vec<u64>> {
        self.instance.as_mut().ok_or(Error::PoolClosed)?.call(export)
    }
}
