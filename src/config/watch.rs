use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// What a Flush does when a watch's queue has no free slot
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Discard the value for that watch. The guest resynchronises with
    /// `Start(id, after)`.
    #[default]
    Drop,
    /// Wait for the delivery task to free a slot. No loss, but a stuck
    /// guest callback stalls the publisher.
    Block,
}

/// Configuration for per-watch notification queues
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of each watch's notification queue
    ///
    /// Values published while a watch is open but not yet started also
    /// accumulate here, so this bounds how much history `Start` can replay.
    ///
    /// **Default**: 1000
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Behaviour when a queue is full
    ///
    /// **Default**: drop
    #[serde(default)]
    pub queue_full_policy: QueueFullPolicy,

    /// Record flush/delivery counters in the prometheus registry
    ///
    /// **Default**: false
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            queue_full_policy: QueueFullPolicy::default(),
            enable_metrics: default_enable_metrics(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.queue_capacity must be greater than 0".into(),
            )));
        }

        if self.queue_capacity > 100_000 {
            warn!(
                "watch.queue_capacity ({}) is very large. Each watch will hold up to {}KB of queued values",
                self.queue_capacity,
                (self.queue_capacity * 8) / 1000
            );
        }

        Ok(())
    }
}

const fn default_queue_capacity() -> usize {
    1000
}

const fn default_enable_metrics() -> bool {
    false
}
