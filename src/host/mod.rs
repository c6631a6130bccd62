//! Host-function bindings
//!
//! [`RangeWatchHost`] is created once per runtime. For each guest connection the
//! embedding calls [`RangeWatchHost::init_context`] to read the guest's meta
//! table and [`RangeWatchHost::connect`] to get a [`HostContext`], whose methods
//! implement the imported host functions:
//!
//! | import                 | data buffer         | value slot | error buffer |
//! |------------------------|---------------------|------------|--------------|
//! | `__range_watch_flush`  | key list            | value      | cleared      |
//! | `__range_watch_open`   | records id,from,to  |            | protocol err |
//! | `__range_watch_start`  | raw id              | after      | protocol err |
//! | `__range_watch_create` | records id,from,to  |            | protocol err |
//! | `__range_watch_stop`   | raw id              |            | protocol err |
//! | `__range_watch_delete` | raw id              |            | protocol err |
//!
//! A binding returns `Err` only for ABI violations, which the embedding should
//! turn into a trap.

mod context;
pub use context::*;


use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::abi::load_meta;
use crate::abi::GuestModule;
use crate::abi::Meta;
use crate::constants::FN_CREATE;
use crate::constants::FN_DELETE;
use crate::constants::FN_FLUSH;
use crate::constants::FN_OPEN;
use crate::constants::FN_START;
use crate::constants::FN_STOP;
use crate::constants::HOST_MODULE_NAME;
use crate::pool::ExecutionPool;
use crate::pool::RegistryPool;
use crate::DeliveryContext;
use crate::RangeWatchConfig;
use crate::Result;

/// Host functions the guest imports from [`HOST_MODULE_NAME`]
pub const HOST_FUNCTIONS: [&str; 6] = [FN_FLUSH, FN_OPEN, FN_START, FN_STOP, FN_CREATE, FN_DELETE];

#[derive(Debug)]
pub struct RangeWatchHost {
    config: RangeWatchConfig,
    registries: Arc<RegistryPool>,
}

impl RangeWatchHost {
    pub fn new(config: RangeWatchConfig) -> Self {
        let registries = Arc::new(RegistryPool::new(
            config.watch.clone(),
            config.pool.max_idle_registries,
        ));
        Self { config, registries }
    }

    pub fn name(&self) -> &'static str {
        HOST_MODULE_NAME
    }

    pub fn config(&self) -> &RangeWatchConfig {
        &self.config
    }

    pub fn registries(&self) -> &RegistryPool {
        &self.registries
    }

    /// Reads the meta table from a freshly instantiated guest.
    pub fn init_context(
        &self,
        module: &mut dyn GuestModule,
    ) -> Result<Meta> {
        let meta = load_meta(module, &self.config.abi.meta_export)?;
        debug!(?meta, "Range watch meta loaded");
        Ok(meta)
    }

    /// Lends a registry to one connection.
    ///
    /// When `shutdown` is cancelled every watch of the connection is closed.
    /// Delivery cancels it itself if the guest breaks the ABI inside a
    /// receive callback.
    /// [`HostContext::close`] additionally returns the registry for reuse.
    pub fn connect(
        &self,
        meta: Meta,
        pool: Arc<dyn ExecutionPool>,
        shutdown: CancellationToken,
    ) -> HostContext {
        let delivery = DeliveryContext {
            pool,
            meta,
            receive_export: Arc::from(self.config.abi.receive_export.as_str()),
            shutdown: shutdown.clone(),
        };
        HostContext::new(self.registries.clone(), delivery, shutdown)
    }
}
