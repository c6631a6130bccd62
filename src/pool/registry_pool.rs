use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::WatchConfig;
use crate::WatchRegistry;

/// Free-list of watch registries, one lent per connection.
///
/// Contract: a registry goes back on the list only after `release()` closed
/// all its watches and `reset()` cleared its map and index, and only when the
/// pool holds the last strong reference to it.
#[derive(Debug)]
pub struct RegistryPool {
    idle: Mutex<Vec<WatchRegistry>>,
    max_idle: usize,
    config: WatchConfig,
}

impl RegistryPool {
    pub fn new(
        config: WatchConfig,
        max_idle: usize,
    ) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            config,
        }
    }

    /// Reuses an idle registry or builds a new one.
    pub fn acquire(&self) -> Arc<WatchRegistry> {
        let registry = self.idle.lock().pop().unwrap_or_else(|| WatchRegistry::new(self.config.clone()));
        Arc::new(registry)
    }

    /// Force-closes every watch of `registry` and keeps it for reuse if possible.
    pub async fn recycle(
        &self,
        registry: Arc<WatchRegistry>,
    ) {
        registry.release().await;

        let mut registry = match Arc::try_unwrap(registry) {
            Ok(registry) => registry,
            Err(shared) => {
                debug!(
                    strong_count = Arc::strong_count(&shared),
                    "Registry still shared after release, not recycled"
                );
                return;
            }
        };
        registry.reset();

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(registry);
        }
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}
