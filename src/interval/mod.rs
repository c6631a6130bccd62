//! Byte-string interval index
//!
//! Stores half-open intervals `[from, to)` under byte-lexicographic order and
//! answers "which intervals contain at least one of these keys". An inverted
//! or empty interval is stored like any other and simply never matches.

mod sorted;
pub use sorted::*;


/// Token returned by [`IntervalIndex::insert`]. Removes exactly that interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalHandle(u64);

impl IntervalHandle {
    pub(crate) fn new(seq: u64) -> Self {
        Self(seq)
    }
}

pub trait IntervalIndex<T>: Send + Sync {
    /// Stores `value` under `[from, to)`.
    fn insert(
        &mut self,
        from: &[u8],
        to: &[u8],
        value: T,
    ) -> IntervalHandle;

    /// Removes the interval behind `handle`. `None` if already removed.
    fn remove(
        &mut self,
        handle: IntervalHandle,
    ) -> Option<T>;

    /// Every stored value whose interval contains any of `keys`, each at most once.
    fn find_any(
        &self,
        keys: &[&[u8]],
    ) -> Vec<&T>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
