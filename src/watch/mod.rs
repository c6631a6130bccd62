//! Range watches
//!
//! A watch subscribes a guest to a half-open byte range `[from, to)`. Each
//! connection owns one [`WatchRegistry`]; publishers call
//! [`WatchRegistry::flush`] with a key set and a value, and every watch whose
//! range contains one of the keys gets the value on its bounded queue.
//!
//! # Architecture
//!
//! ```text
//! Flush(keys, val)
//!   └─► IntervalIndex::find_any(keys)       [shared lock]
//!         └─► per-watch bounded queue       [drop or block when full]
//!               └─► Delivery task           [one per started watch]
//!                     └─► ExecutionPool::acquire() ─► guest receive export
//! ```
//!
//! # Lifecycle
//!
//! - `open` registers the interval and creates the queue. Values published
//!   before `start` accumulate up to the queue capacity.
//! - `start` spawns the delivery task, optionally discarding values at or
//!   below a replay threshold.
//! - `close` removes the interval, cancels the task and waits for it to exit
//!   before the id can be reused.
//! - `release` does the same for every watch of the registry.
//!
//! # Queue-full policy
//!
//! By default a full queue drops the value for that watch and bumps its
//! dropped counter. Guests recover with `Start(id, after)` using the last value
//! they processed. With [`QueueFullPolicy::Block`](crate::QueueFullPolicy)
//! Flush waits for space instead.

mod delivery;
mod registry;
mod router;
#[allow(clippy::module_inception)]
mod watch;

pub use delivery::DeliveryContext;
pub(crate) use delivery::Delivery;
pub use registry::*;
pub use router::*;
pub use watch::Watch;
pub use watch::WatchState;

#[cfg(test)]
mod router_test;
