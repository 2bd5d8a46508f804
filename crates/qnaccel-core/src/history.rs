//! Bounded history of update entries.
//!
//! [`LimitedMemoryHistory`] keeps the last `capacity` entries that were
//! pushed, overwriting the oldest once full. Entries are preallocated so a
//! push never allocates: callers fill the next slot in place through
//! [`LimitedMemoryHistory::push_with`].

use crate::ring::{CircularRange, RingIndex};
use std::iter::Chain;
use std::slice::{Iter, IterMut};

/// Fixed-capacity ring of preallocated entries.
#[derive(Debug, Clone)]
pub struct LimitedMemoryHistory<E> {
    slots: Vec<E>,
    index: RingIndex,
}

impl<E> LimitedMemoryHistory<E> {
    /// Creates a history of `capacity` slots, each built by `init`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new_with(capacity: usize, init: impl FnMut() -> E) -> Self {
        assert!(capacity > 0, "history capacity must be positive");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, init);
        Self {
            slots,
            index: RingIndex::new(capacity),
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns `true` if the next push overwrites the oldest entry.
    pub fn is_full(&self) -> bool {
        self.index.is_full()
    }

    /// Physical positions of the valid entries, oldest first.
    pub fn range(&self) -> CircularRange {
        self.index.range()
    }

    /// Fills the next slot in place and makes it the newest entry.
    ///
    /// The closure sees the previous contents of the slot (stale data or the
    /// evicted oldest entry) and must overwrite everything it relies on.
    pub fn push_with<R>(&mut self, fill: impl FnOnce(&mut E) -> R) -> R {
        let out = fill(&mut self.slots[self.index.head()]);
        self.index.advance();
        out
    }

    /// The newest entry.
    pub fn newest(&self) -> Option<&E> {
        self.index.newest().map(|i| &self.slots[i])
    }

    /// The oldest entry.
    pub fn oldest(&self) -> Option<&E> {
        (!self.is_empty()).then(|| &self.slots[self.index.oldest()])
    }

    /// Iterates over the valid entries, oldest first. Use `.rev()` for newest first.
    pub fn iter(&self) -> Chain<Iter<'_, E>, Iter<'_, E>> {
        let (before, after) = self.slots.split_at(self.index.head());
        if self.index.is_full() {
            after.iter().chain(before.iter())
        } else {
            before.iter().chain(after[..0].iter())
        }
    }

    /// Mutable iteration over the valid entries, oldest first.
    pub fn iter_mut(&mut self) -> Chain<IterMut<'_, E>, IterMut<'_, E>> {
        let full = self.index.is_full();
        let (before, after) = self.slots.split_at_mut(self.index.head());
        if full {
            after.iter_mut().chain(before.iter_mut())
        } else {
            before.iter_mut().chain(after[..0].iter_mut())
        }
    }

    /// Forgets all entries. The storage is kept for reuse.
    pub fn reset(&mut self) {
        self.index.reset();
    }
}

impl<'a, E> IntoIterator for &'a LimitedMemoryHistory<E> {
    type Item = &'a E;
    type IntoIter = Chain<Iter<'a, E>, Iter<'a, E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
