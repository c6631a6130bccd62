//! Range Watch Error Hierarchy
//!
//! Errors fall into two classes with very different handling:
//!
//! - [`AbiError`]: the guest broke the memory contract (pointer or length outside
//!   what it declared). Fatal. The embedding is expected to trap the guest.
//! - [`WatchError`]: protocol errors. Recoverable, written back into the guest's
//!   error buffer as text and never surfaced to the host as a failure, which is
//!   why [`Error`] has no variant for them.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Guest memory contract violations (version mismatch or corruption)
    #[error(transparent)]
    Abi(#[from] AbiError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A guest export could not be invoked or trapped while running
    #[error("Guest call `{export}` failed: {reason}")]
    GuestCall { export: String, reason: String },

    /// The execution pool stopped lending handles
    #[error("Execution pool closed")]
    PoolClosed,

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Only ABI violations (and explicit fatals) may abort the host.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Abi(_) | Error::Fatal(_))
    }
}

/// Protocol errors. The `Display` text is the exact message the guest reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("Watch not found")]
    NotFound,

    #[error("Watch exists")]
    Exists,

    #[error("Watch closed")]
    Closed,

    #[error("Watch already open")]
    AlreadyOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    /// Memory access outside the guest's linear memory
    #[error("Memory access at offset {offset} with length {len} out of range")]
    OutOfRange { offset: u32, len: u32 },

    /// Declared length larger than declared capacity
    #[error("Declared length {len} exceeds capacity {capacity}")]
    LengthExceedsCapacity { len: u32, capacity: u32 },

    /// Key-list record header points past the declared length
    #[error("Record at offset {offset} declares {declared} bytes but only {remaining} remain")]
    TruncatedRecord {
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    /// Host function received the wrong number of records
    #[error("Expected {expected} records, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    /// A single key cannot be framed within the record format or buffer
    #[error("Record of {len} bytes cannot be encoded")]
    RecordTooLarge { len: usize },

    /// Host-side write larger than the guest-declared data buffer
    #[error("Data of {len} bytes exceeds buffer capacity {capacity}")]
    DataTooLarge { len: usize, capacity: u32 },
}
