//! Pooled resources: guest execution handles and per-connection registries.
mod execution;
mod registry_pool;

pub use execution::*;
pub use registry_pool::*;
