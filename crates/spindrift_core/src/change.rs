//! # Change List
//!
//! Notifications produced while a tick runs. Painters, affectors, state
//! engines and the sync feed all consume the same list.

use crate::particle::{GlobalIndex, GroupId, SlotHandle};

/// One notification for consumers of particle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    /// A particle finished emission (fresh or re-homed); load its appearance.
    Loaded(SlotHandle),
    /// A particle changed outside its basis (forced kill, affector);
    /// resynchronize its appearance.
    Reloaded(SlotHandle),
    /// A group's storage grew.
    Resized {
        /// The group that grew.
        group: GroupId,
        /// Size before growth.
        old: usize,
        /// Size after growth.
        new: usize,
    },
    /// A global index was released and may be handed out again.
    Released(GlobalIndex),
}

/// Accumulates the changes of one tick.
///
/// The buffer is cleared, not freed, between ticks.
#[derive(Debug, Default)]
pub struct ChangeList {
    changes: Vec<Change>,
}

impl ChangeList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a change.
    #[inline]
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Appends every change from an iterator.
    pub fn extend<I: IntoIterator<Item = Change>>(&mut self, changes: I) {
        self.changes.extend(changes);
    }

    /// The accumulated changes, in order.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Change] {
        &self.changes
    }

    /// Number of accumulated changes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if nothing changed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Handles loaded at or after position `from`.
    pub fn loaded_since(&self, from: usize) -> impl Iterator<Item = SlotHandle> + '_ {
        self.changes[from.min(self.changes.len())..]
            .iter()
            .filter_map(|c| match c {
                Change::Loaded(handle) => Some(*handle),
                _ => None,
            })
    }

    /// Empties the list, keeping its capacity.
    pub fn clear(&mut self) {
        self.changes.clear();
    }
}
