//! Index arithmetic for fixed-capacity rings of history slots.
//!
//! Every accelerator keeps a bounded history in a circular buffer. The types
//! in this module only deal with indices: [`RingIndex`] tracks where the next
//! entry goes and whether the buffer wrapped, [`CircularRange`] maps the
//! logical (chronological) position of a valid entry to its physical slot.
//!
//! ```text
//! capacity 5, head 2, full
//!
//!   slot:     0   1   2   3   4
//!           ┌───┬───┬───┬───┬───┐
//!           │ d │ e │ a │ b │ c │      oldest → newest: a b c d e
//!           └───┴───┴───┴───┴───┘
//!                     ▲ head (next write, logical oldest)
//! ```

use std::iter::FusedIterator;

/// Position of a valid entry, both in chronological and in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircularIndices {
    /// Chronological index, 0 being the oldest entry of the range.
    pub zero_based: usize,
    /// Physical slot in the underlying storage.
    pub circular: usize,
}

/// A contiguous run of `size` entries in a ring of `capacity` slots,
/// starting at physical slot `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularRange {
    size: usize,
    start: usize,
    capacity: usize,
}

impl CircularRange {
    /// Creates a range of `size` entries starting at slot `start`.
    ///
    /// # Panics
    ///
    /// Panics if `size > capacity` or if `start` is not a valid slot of a
    /// non-empty ring.
    pub fn new(size: usize, start: usize, capacity: usize) -> Self {
        assert!(size <= capacity, "range of {size} entries does not fit in {capacity} slots");
        assert!(
            capacity == 0 || start < capacity,
            "start slot {start} out of range for capacity {capacity}"
        );
        Self {
            size,
            start,
            capacity,
        }
    }

    /// Number of entries in the range.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the range contains no entries.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Physical slot of the oldest entry.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Physical slot one past the newest entry (where the next entry goes).
    pub fn end(&self) -> usize {
        if self.capacity == 0 {
            0
        } else {
            (self.start + self.size) % self.capacity
        }
    }

    /// Maps a chronological index to its physical slot.
    pub fn slot(&self, zero_based: usize) -> usize {
        debug_assert!(zero_based < self.size);
        let i = self.start + zero_based;
        if i >= self.capacity {
            i - self.capacity
        } else {
            i
        }
    }

    /// Iterates oldest first. Use `.rev()` for newest first.
    pub fn iter(&self) -> CircularIter {
        CircularIter {
            range: *self,
            front: 0,
            back: self.size,
        }
    }
}

impl IntoIterator for CircularRange {
    type Item = CircularIndices;
    type IntoIter = CircularIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Double-ended iterator over the indices of a [`CircularRange`].
#[derive(Debug, Clone)]
pub struct CircularIter {
    range: CircularRange,
    front: usize,
    back: usize,
}

impl CircularIter {
    fn at(&self, zero_based: usize) -> CircularIndices {
        CircularIndices {
            zero_based,
            circular: self.range.slot(zero_based),
        }
    }
}

impl Iterator for CircularIter {
    type Item = CircularIndices;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        let item = self.at(self.front);
        self.front += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl DoubleEndedIterator for CircularIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some(self.at(self.back))
    }
}

impl ExactSizeIterator for CircularIter {}

impl FusedIterator for CircularIter {}

/// Write position and fill state of a ring that only grows at its head.
///
/// If not full, the valid entries occupy slots `[0, head)`. Once full, all
/// slots are valid and the logical oldest entry lives at `head`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    capacity: usize,
    head: usize,
    full: bool,
}

impl RingIndex {
    /// Creates an empty ring index with the given number of slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            head: 0,
            full: false,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot that the next entry will be written to.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Returns `true` once every slot holds a valid entry.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Returns `true` if no entry was added since creation or the last reset.
    pub fn is_empty(&self) -> bool {
        self.head == 0 && !self.full
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity
        } else {
            self.head
        }
    }

    /// Next slot in the ring.
    pub fn succ(&self, i: usize) -> usize {
        if i + 1 < self.capacity {
            i + 1
        } else {
            0
        }
    }

    /// Previous slot in the ring.
    pub fn pred(&self, i: usize) -> usize {
        if i > 0 {
            i - 1
        } else {
            self.capacity - 1
        }
    }

    /// Slot of the oldest valid entry.
    pub fn oldest(&self) -> usize {
        if self.full {
            self.head
        } else {
            0
        }
    }

    /// Slot of the newest valid entry, if any.
    pub fn newest(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.pred(self.head))
    }

    /// Marks the head slot as written and moves to the next one.
    pub fn advance(&mut self) {
        self.head = self.succ(self.head);
        self.full |= self.head == 0;
    }

    /// Forgets all entries, keeping the capacity.
    pub fn reset(&mut self) {
        self.head = 0;
        self.full = false;
    }

    /// The valid entries, oldest first.
    pub fn range(&self) -> CircularRange {
        CircularRange::new(self.len(), self.oldest(), self.capacity)
    }
}

/// Running maximum over the last `memory` values that were added.
///
/// The maximum is only recomputed from scratch when the value that falls out
/// of the window was the current maximum.
#[derive(Debug, Clone)]
pub struct MaxHistory<T> {
    buffer: Vec<T>,
    index: RingIndex,
    max: Option<T>,
}

impl<T: PartialOrd + Copy> MaxHistory<T> {
    /// Creates an empty window of `memory` values.
    ///
    /// # Panics
    ///
    /// Panics if `memory` is zero.
    pub fn new(memory: usize) -> Self {
        assert!(memory > 0, "MaxHistory needs room for at least one value");
        Self {
            buffer: Vec::with_capacity(memory),
            index: RingIndex::new(memory),
            max: None,
        }
    }

    /// Adds a value, evicting the oldest one if the window is full.
    pub fn add(&mut self, value: T) {
        let slot = self.index.head();
        if self.index.is_full() {
            let evicted = std::mem::replace(&mut self.buffer[slot], value);
            if self.max.is_some_and(|m| evicted == m) {
                self.max = self.buffer.iter().copied().reduce(|a, b| if b > a { b } else { a });
                self.index.advance();
                return;
            }
        } else {
            self.buffer.push(value);
        }
        self.max = match self.max {
            Some(m) if m >= value => Some(m),
            _ => Some(value),
        };
        self.index.advance();
    }

    /// Largest value in the window, or `None` before the first `add`.
    pub fn max(&self) -> Option<T> {
        self.max
    }

    /// Number of values currently in the window.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` before the first `add`.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn split(r: CircularRange) -> (Vec<usize>, Vec<usize>) {
        r.iter().map(|i| (i.zero_based, i.circular)).unzip()
    }

    fn split_rev(r: CircularRange) -> (Vec<usize>, Vec<usize>) {
        r.iter().rev().map(|i| (i.zero_based, i.circular)).unzip()
    }

    #[test]
    fn test_range_forward_partial() {
        let (z, c) = split(CircularRange::new(4, 3, 5));
        assert_eq!(z, vec![0, 1, 2, 3]);
        assert_eq!(c, vec![3, 4, 0, 1]);
    }

    #[test]
    fn test_range_forward_full() {
        let (z, c) = split(CircularRange::new(5, 3, 5));
        assert_eq!(z, vec![0, 1, 2, 3, 4]);
        assert_eq!(c, vec![3, 4, 0, 1, 2]);
    }

    #[test]
    fn test_range_reverse_partial() {
        let (z, c) = split_rev(CircularRange::new(4, 3, 5));
        assert_eq!(z, vec![3, 2, 1, 0]);
        assert_eq!(c, vec![1, 0, 4, 3]);
    }

    #[test]
    fn test_range_reverse_full() {
        let (z, c) = split_rev(CircularRange::new(5, 3, 5));
        assert_eq!(z, vec![4, 3, 2, 1, 0]);
        assert_eq!(c, vec![2, 1, 0, 4, 3]);
    }

    #[test]
    fn test_range_meets_in_the_middle() {
        let mut it = CircularRange::new(4, 3, 5).iter();
        assert_eq!(it.len(), 4);
        assert_eq!(it.next().map(|i| i.circular), Some(3));
        assert_eq!(it.next_back().map(|i| i.circular), Some(1));
        assert_eq!(it.next().map(|i| i.circular), Some(4));
        assert_eq!(it.next_back().map(|i| i.circular), Some(0));
        assert_eq!(it.next(), None);
        assert_eq!(it.next_back(), None);
    }

    #[test]
    fn test_range_end() {
        assert_eq!(CircularRange::new(4, 3, 5).end(), 2);
        assert_eq!(CircularRange::new(5, 3, 5).end(), 3);
        assert_eq!(CircularRange::new(0, 0, 0).end(), 0);
        assert!(CircularRange::new(0, 0, 0).iter().next().is_none());
    }

    #[test]
    fn test_ring_index_wraps() {
        let mut ring = RingIndex::new(3);
        assert!(ring.is_empty());
        assert_eq!(ring.newest(), None);

        ring.advance();
        ring.advance();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.newest(), Some(1));
        assert!(!ring.is_full());

        ring.advance();
        assert!(ring.is_full());
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.oldest(), 0);
        assert_eq!(ring.newest(), Some(2));

        ring.advance();
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest(), 1);
        assert_eq!(ring.newest(), Some(0));

        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 3);
    }

    #[test]
    fn test_max_history_updown() {
        let mut m = MaxHistory::new(3);
        let inputs = [1, 2, 3, 4, 5, 5, 10, 10, 10, 9, 9, 9, 8, 8, 9, 7, 6, 5, 4, 3];
        let expected = [1, 2, 3, 4, 5, 5, 10, 10, 10, 10, 10, 9, 9, 9, 9, 9, 9, 7, 6, 5];
        let got: Vec<i32> = inputs
            .iter()
            .map(|&v| {
                m.add(v);
                m.max().unwrap()
            })
            .collect();
        assert_eq!(got, expected.to_vec());
    }

    #[test]
    fn test_max_history_large_window() {
        let mut m = MaxHistory::new(999);
        assert_eq!(m.max(), None);
        for v in [1, 2, 3, 10, 9, 8] {
            m.add(v);
        }
        assert_eq!(m.max(), Some(10));
        m.add(100);
        assert_eq!(m.max(), Some(100));
        assert_eq!(m.len(), 7);
    }

    proptest! {
        #[test]
        fn prop_ring_tracks_last_entries(capacity in 1usize..9, inserts in 0usize..40) {
            let mut ring = RingIndex::new(capacity);
            let mut slots = vec![usize::MAX; capacity];
            for k in 0..inserts {
                slots[ring.head()] = k;
                ring.advance();
            }
            prop_assert_eq!(ring.len(), inserts.min(capacity));

            let fwd: Vec<usize> = ring.range().iter().map(|i| slots[i.circular]).collect();
            let expected: Vec<usize> = (inserts - inserts.min(capacity)..inserts).collect();
            prop_assert_eq!(&fwd, &expected);

            let rev: Vec<usize> = ring.range().iter().rev().map(|i| slots[i.circular]).collect();
            let mut expected_rev = expected;
            expected_rev.reverse();
            prop_assert_eq!(rev, expected_rev);
        }

        #[test]
        fn prop_max_history_matches_window(
            values in proptest::collection::vec(-50i32..50, 1..60),
            memory in 1usize..7,
        ) {
            let mut m = MaxHistory::new(memory);
            for (k, &v) in values.iter().enumerate() {
                m.add(v);
                let lo = (k + 1).saturating_sub(memory);
                let expected = values[lo..=k].iter().copied().max();
                prop_assert_eq!(m.max(), expected);
            }
        }
    }
}
