use crate::error::{Result, ScanError};
use std::ops::{Index, IndexMut};
use tracing::trace;

/// Fixed-capacity circular history.
///
/// Logical index 0 is always the oldest entry still present, whatever its
/// physical slot. Once full, every insertion overwrites the oldest entry.
#[derive(Debug, Clone)]
pub struct RingHistory<T> {
    slots: Vec<Option<T>>,
    /// Physical slot the next insertion writes to
    tail: usize,
    /// Number of logically present entries (never above capacity)
    len: usize,
    evictions: u64,
}

impl<T> RingHistory<T> {
    /// Create a history holding at most `capacity` entries
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    ///
    /// # Example
    /// ```
    /// use codescan::ring_buffer::RingHistory;
    ///
    /// let mut history = RingHistory::new(2);
    /// history.add("a");
    /// history.add("b");
    /// history.add("c");
    /// assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec!["b", "c"]);
    /// ```
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Ring history capacity must be greater than 0");
        }

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            tail: 0,
            len: 0,
            evictions: 0,
        }
    }

    /// Fallible constructor for capacities coming from configuration
    pub fn try_new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ScanError::system(
                "Ring history capacity must be greater than 0",
            ));
        }
        Ok(Self::new(capacity))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of entries overwritten because the history was full
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Append, overwriting the oldest entry when full
    pub fn add(&mut self, item: T) {
        let capacity = self.capacity();
        if self.len == capacity {
            self.evictions += 1;
            trace!("Ring history full, evicting slot {}", self.tail);
        } else {
            self.len += 1;
        }

        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % capacity;
    }

    /// Entry at logical `index` (0 = oldest)
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> &T {
        let slot = self.wrap_index(index);
        self.slots[slot]
            .as_ref()
            .unwrap_or_else(|| unreachable!("occupied slot {} is empty", slot))
    }

    /// Overwrite the entry at logical `index`
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn set(&mut self, index: usize, item: T) {
        let slot = self.wrap_index(index);
        self.slots[slot] = Some(item);
    }

    /// Logical index of the first entry (oldest to newest) satisfying `predicate`
    pub fn position<P>(&self, mut predicate: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        self.iter().position(|entry| predicate(entry))
    }

    /// Look up `candidate` with `matches(stored, candidate)`.
    ///
    /// On a hit the candidate is overwritten with the stored entry, so the caller
    /// learns the previously recorded values, and the logical index is returned.
    pub fn find_index<F>(&self, candidate: &mut T, mut matches: F) -> Option<usize>
    where
        T: Clone,
        F: FnMut(&T, &T) -> bool,
    {
        let index = self.position(|stored| matches(stored, candidate))?;
        *candidate = self.get(index).clone();
        Some(index)
    }

    /// Replace the first entry matching `item`, or append it.
    ///
    /// Returns the logical index the item ended up at. Never grows the history
    /// when a match exists.
    pub fn add_or_update<F>(&mut self, item: T, mut matches: F) -> usize
    where
        F: FnMut(&T, &T) -> bool,
    {
        match self.position(|stored| matches(stored, &item)) {
            Some(index) => {
                self.set(index, item);
                index
            }
            None => {
                self.add(item);
                self.len - 1
            }
        }
    }

    /// Entries oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }

    /// Drop all entries, keeping the capacity
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.tail = 0;
        self.len = 0;
    }

    fn head(&self) -> usize {
        let capacity = self.capacity();
        (self.tail + capacity - self.len) % capacity
    }

    fn wrap_index(&self, index: usize) -> usize {
        if index >= self.len {
            panic!(
                "index {} out of range for ring history of length {}",
                index, self.len
            );
        }
        (self.head() + index) % self.capacity()
    }
}

impl<T> Index<usize> for RingHistory<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        self.get(index)
    }
}

impl<T> IndexMut<usize> for RingHistory<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        let slot = self.wrap_index(index);
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| unreachable!("occupied slot {} is empty", slot))
    }
}
