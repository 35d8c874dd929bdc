//! # Global Index Table
//!
//! Sparse map from a stable [`GlobalIndex`] to the slot currently holding it.
//!
//! Entries are weak: they name a slot and generation, never own the record.
//! A group move re-points the entry at the new slot, so external references
//! keyed by index keep working while the particle changes storage.

use crate::particle::{GlobalIndex, SlotHandle};

/// Growth policy for the index pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexGrowth {
    /// Geometric growth as a percentage of the current size.
    pub percent: usize,
    /// Minimum number of entries added per growth.
    pub minimum: usize,
}

impl Default for IndexGrowth {
    fn default() -> Self {
        Self {
            percent: 10,
            minimum: 10,
        }
    }
}

/// Global index → holder table.
#[derive(Debug, Default)]
pub struct IndexTable {
    entries: Vec<Option<SlotHandle>>,
    /// Released indices, reused most recent first.
    free: Vec<GlobalIndex>,
    /// Next never-used index.
    next: u32,
    live: usize,
    growth: IndexGrowth,
}

impl IndexTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(growth: IndexGrowth) -> Self {
        Self {
            growth: IndexGrowth {
                percent: growth.percent,
                minimum: growth.minimum.max(1),
            },
            ..Self::default()
        }
    }

    /// Number of indices currently held.
    #[inline]
    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.live
    }

    /// Size of the backing pool.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Assigns a fresh index to `holder`.
    pub fn allocate(&mut self, holder: SlotHandle) -> GlobalIndex {
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            let index = GlobalIndex::new(self.next);
            self.next += 1;
            if index.index() >= self.entries.len() {
                let len = self.entries.len();
                let step = (len * self.growth.percent / 100).max(self.growth.minimum);
                self.entries.resize(len + step, None);
            }
            index
        };
        self.entries[index.index()] = Some(holder);
        self.live += 1;
        index
    }

    /// Points `index` at a new holder, evicting the previous one.
    ///
    /// Returns the evicted holder, if any.
    pub fn rehome(&mut self, index: GlobalIndex, holder: SlotHandle) -> Option<SlotHandle> {
        let entry = self.entries.get_mut(index.index())?;
        let previous = entry.replace(holder);
        if previous.is_none() {
            self.live += 1;
        }
        previous
    }

    /// Releases `index` for reuse. Returns false if it was not held.
    pub fn release(&mut self, index: GlobalIndex) -> bool {
        match self.entries.get_mut(index.index()) {
            Some(entry @ Some(_)) => {
                *entry = None;
                self.live -= 1;
                self.free.push(index);
                true
            }
            _ => false,
        }
    }

    /// The holder of `index`, if it is held.
    #[inline]
    #[must_use]
    pub fn resolve(&self, index: GlobalIndex) -> Option<SlotHandle> {
        self.entries.get(index.index()).copied().flatten()
    }

    /// Releases every index. The pool keeps its size; numbering restarts.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.free.clear();
        self.next = 0;
        self.live = 0;
    }
}
