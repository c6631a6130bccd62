use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ops::Bound;

use super::IntervalHandle;
use super::IntervalIndex;

#[derive(Debug)]
struct Interval<T> {
    to: Vec<u8>,
    value: T,
}

/// Intervals ordered by lower bound.
///
/// A query only visits intervals whose `from` is at or below the largest
/// query key, and tests each against the sorted keys with a binary search.
/// That makes a query linear in the number of such intervals, not
/// logarithmic: wide ranges starting low are scanned on every flush.
#[derive(Debug)]
pub struct SortedIntervals<T> {
    intervals: BTreeMap<(Vec<u8>, IntervalHandle), Interval<T>>,
    lower_bounds: HashMap<IntervalHandle, Vec<u8>>,
    next_seq: u64,
}

impl<T> SortedIntervals<T> {
    pub fn new() -> Self {
        Self {
            intervals: BTreeMap::new(),
            lower_bounds: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> Default for SortedIntervals<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync> IntervalIndex<T> for SortedIntervals<T> {
    fn insert(
        &mut self,
        from: &[u8],
        to: &[u8],
        value: T,
    ) -> IntervalHandle {
        let handle = IntervalHandle::new(self.next_seq);
        self.next_seq += 1;
        self.intervals.insert(
            (from.to_vec(), handle),
            Interval {
                to: to.to_vec(),
                value,
            },
        );
        self.lower_bounds.insert(handle, from.to_vec());
        handle
    }

    fn remove(
        &mut self,
        handle: IntervalHandle,
    ) -> Option<T> {
        let from = self.lower_bounds.remove(&handle)?;
        self.intervals.remove(&(from, handle)).map(|i| i.value)
    }

    fn find_any(
        &self,
        keys: &[&[u8]],
    ) -> Vec<&T> {
        let mut sorted = keys.to_vec();
        sorted.sort_unstable();
        let Some(max) = sorted.last() else {
            return Vec::new();
        };

        let upper = Bound::Included((max.to_vec(), IntervalHandle::new(u64::MAX)));
        self.intervals
            .range((Bound::Unbounded, upper))
            .filter(|((from, _), interval)| {
                // First key >= from; a match iff it is also < to
                let i = sorted.partition_point(|k| *k < from.as_slice());
                sorted.get(i).is_some_and(|k| *k < interval.to.as_slice())
            })
            .map(|(_, interval)| &interval.value)
            .collect()
    }

    fn len(&self) -> usize {
        self.intervals.len()
    }
}
