//! Host-side range watches for sandboxed guest modules.
//!
//! A guest opens watches on half-open byte ranges `[from, to)`. Publishers
//! flush a set of keys with a `u64` value; every watch whose range contains one
//! of the keys receives the value through the guest's receive export, one
//! watch at a time and in publish order.
//!
//! Entry point is [`RangeWatchHost`]; the pieces it wires together
//! ([`WatchRegistry`], [`ExecutionPool`], the [`abi`] codec and the
//! [`interval`] index) are usable on their own.

pub mod abi;
mod config;
pub mod constants;
mod errors;
mod host;
pub mod interval;
pub mod metrics;
mod pool;
mod watch;

pub use config::*;
pub use errors::*;
pub use host::*;
pub use pool::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
