//! # Group Store
//!
//! Owns every particle record of one group in a dense array that only grows.
//!
//! ## Slot State Machine
//!
//! ```text
//! Unallocated ──grow──> Free ──new_datum──> Live ──schedule──> PendingRecycle
//!                        ^                    │                      │
//!                        └──────kill──────────┘                      │
//!                        └────────────recycle (expired)──────────────┘
//! ```
//!
//! Every slot is either free or live, never both:
//! `live_count + free_count == size` holds after every operation.

use tracing::{debug, trace};

use super::queue::ExpirationQueue;
use crate::change::Change;
use crate::config::MIN_MAX_LIFE_MS;
use crate::error::{SpindriftError, SpindriftResult};
use crate::particle::{GroupId, Particle, SlotHandle};
use crate::time::{rounded_ms, SimTime};

/// Queue entry: a slot plus the generation it was scheduled for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotRef {
    slot: u32,
    generation: u32,
}

impl SlotRef {
    /// The scheduled slot.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// The slot generation at scheduling time.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Storage and recycling for one particle group.
#[derive(Debug)]
pub struct GroupStore {
    id: GroupId,
    /// Dense slot array. Never shrinks.
    particles: Vec<Particle>,
    /// Per-slot liveness flag.
    live: Vec<bool>,
    /// Free slots, handed out from the back.
    free: Vec<u32>,
    live_count: usize,
    queue: ExpirationQueue<SlotRef>,
    /// Scratch buffers reused by every recycle pass.
    due: Vec<SlotRef>,
    survivors: Vec<SlotRef>,
    /// Slots added when an unlimited request finds no free slot.
    growth_increment: usize,
    /// Longest lifespan scheduled exactly; longer lives use the horizon.
    max_life_ms: i64,
    /// Notifications waiting to be collected by the owning system.
    changes: Vec<Change>,
}

impl GroupStore {
    /// Creates an empty store.
    ///
    /// # Arguments
    ///
    /// * `id` - The group this store belongs to
    /// * `growth_increment` - Slots added per overflow growth (at least 1)
    /// * `max_life_ms` - Observed maximum lifespan in milliseconds (at least
    ///   [`MIN_MAX_LIFE_MS`])
    #[must_use]
    pub fn new(id: GroupId, growth_increment: usize, max_life_ms: i64) -> Self {
        Self {
            id,
            particles: Vec::new(),
            live: Vec::new(),
            free: Vec::new(),
            live_count: 0,
            queue: ExpirationQueue::new(),
            due: Vec::new(),
            survivors: Vec::new(),
            growth_increment: growth_increment.max(1),
            max_life_ms: max_life_ms.max(MIN_MAX_LIFE_MS),
            changes: Vec::new(),
        }
    }

    /// The group id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> GroupId {
        self.id
    }

    /// Number of slots ever allocated.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.particles.len()
    }

    /// Number of live slots.
    #[inline]
    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.live_count
    }

    /// Number of free slots.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// The expiration queue, for inspection.
    #[inline]
    #[must_use]
    pub const fn queue(&self) -> &ExpirationQueue<SlotRef> {
        &self.queue
    }

    /// The observed maximum lifespan in milliseconds.
    #[inline]
    #[must_use]
    pub const fn max_life_ms(&self) -> i64 {
        self.max_life_ms
    }

    /// Updates the observed maximum lifespan, never below [`MIN_MAX_LIFE_MS`].
    pub fn set_max_life_ms(&mut self, max_life_ms: i64) {
        self.max_life_ms = max_life_ms.max(MIN_MAX_LIFE_MS);
    }

    /// Returns true if `slot` is currently live.
    #[inline]
    #[must_use]
    pub fn is_live(&self, slot: u32) -> bool {
        self.live.get(slot as usize).copied().unwrap_or(false)
    }

    /// Grows the store to `new_size` slots.
    ///
    /// New slots join the free set and consumers receive a
    /// [`Change::Resized`] notification.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::ShrinkRejected`] if `new_size` is smaller
    /// than the current size.
    pub fn set_size(&mut self, new_size: usize) -> SpindriftResult<()> {
        let current = self.size();
        if new_size < current {
            return Err(SpindriftError::ShrinkRejected {
                group: self.id.raw(),
                current,
                requested: new_size,
            });
        }
        if new_size > current {
            self.grow(new_size);
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn grow(&mut self, new_size: usize) {
        let old = self.size();
        self.particles.reserve_exact(new_size - old);
        let id = self.id;
        self.particles
            .extend((old..new_size).map(|slot| Particle::vacant(id, slot as u32)));
        self.live.resize(new_size, false);
        // Reversed so the lowest new slot is handed out first.
        self.free.extend((old..new_size).rev().map(|slot| slot as u32));
        self.changes.push(Change::Resized {
            group: id,
            old,
            new: new_size,
        });
    }

    /// Hands out a free slot for a new particle.
    ///
    /// A free slot whose stale record still reports alive is put back on
    /// the schedule and skipped. When no slot is free, `respects_limit`
    /// decides between reporting `None` and growing by the fixed increment.
    ///
    /// The returned slot is live, its generation has advanced, and its
    /// payload is reset with `t = now`.
    pub fn new_datum(&mut self, respects_limit: bool, now: SimTime) -> Option<SlotHandle> {
        let now_s = now.secs();
        let mut grown = false;
        loop {
            while let Some(slot) = self.free.pop() {
                let idx = slot as usize;
                self.live[idx] = true;
                self.live_count += 1;

                if self.particles[idx].still_alive(now_s) {
                    trace!(group = self.id.raw(), slot, "resurrecting free slot that is still alive");
                    self.prepare_recycler(slot, now);
                    continue;
                }

                let particle = &mut self.particles[idx];
                particle.bump_generation();
                particle.reset_payload(now_s);
                return Some(particle.handle());
            }

            if respects_limit || grown {
                return None;
            }
            let old = self.size();
            debug!(
                group = self.id.raw(),
                old,
                new = old + self.growth_increment,
                "growing group past its declared capacity"
            );
            self.grow(old + self.growth_increment);
            grown = true;
        }
    }

    /// Schedules the next liveness check for `slot`.
    ///
    /// Lifespans shorter than the observed maximum are scheduled exactly at
    /// their death time. Longer lives are extended in steps of a third of the
    /// maximum until they reach past `now`, then checked again two thirds of
    /// the maximum after their (shifted) start. No heap node therefore lives
    /// longer than the bounded horizon.
    #[allow(clippy::cast_precision_loss)]
    pub fn prepare_recycler(&mut self, slot: u32, now: SimTime) {
        let max_life_ms = self.max_life_ms;
        let Some(particle) = self.particles.get_mut(slot as usize) else {
            return;
        };
        let entry = SlotRef {
            slot,
            generation: particle.generation(),
        };

        if f64::from(particle.lifespan) * 1000.0 < max_life_ms as f64 {
            self.queue.insert_timed(entry, particle.death_ms());
            return;
        }

        let horizon = 2 * max_life_ms / 3;
        let step = (max_life_ms as f64 / 3000.0) as f32;
        let now_s = now.secs();
        while rounded_ms(particle.t) + horizon <= now.ms() {
            particle.extend_life(step, now_s);
        }
        self.queue
            .insert_timed(entry, rounded_ms(particle.t) + horizon);
    }

    /// Forces a live particle to die now and frees its slot immediately.
    ///
    /// Consumers receive a [`Change::Reloaded`] for the slot. The orphaned
    /// queue entry is discarded when it pops. Returns false if `handle` is
    /// stale or its slot is not live.
    pub fn kill(&mut self, handle: SlotHandle) -> bool {
        let Some(particle) = self.get_mut(handle) else {
            return false;
        };
        particle.lifespan = 0.0;
        self.changes.push(Change::Reloaded(handle));
        self.release_slot(handle.slot());
        true
    }

    /// Frees a slot that was handed out but never scheduled.
    pub(crate) fn abandon(&mut self, handle: SlotHandle) -> bool {
        let Some(particle) = self.get_mut(handle) else {
            return false;
        };
        particle.lifespan = 0.0;
        self.release_slot(handle.slot());
        true
    }

    /// Drains every node due at or before `now`, freeing expired slots and
    /// rescheduling those whose life was extended after scheduling.
    ///
    /// Returns true if the group has no live particles afterwards.
    pub fn recycle(&mut self, now: SimTime) -> bool {
        let now_s = now.secs();
        let mut due = std::mem::take(&mut self.due);
        let mut survivors = std::mem::take(&mut self.survivors);
        survivors.clear();

        while self.queue.top() <= now.ms() {
            self.queue.pop_into(&mut due);
            for &entry in &due {
                let idx = entry.slot as usize;
                let current = self.live.get(idx).copied().unwrap_or(false)
                    && self.particles[idx].generation() == entry.generation;
                if !current {
                    trace!(group = self.id.raw(), slot = entry.slot, "discarding stale expiration entry");
                    continue;
                }
                if self.particles[idx].still_alive(now_s) {
                    survivors.push(entry);
                } else {
                    self.release_slot(entry.slot);
                }
            }
        }

        // Rescheduled after draining so a survivor cannot be popped twice
        // within one pass.
        for &entry in &survivors {
            trace!(group = self.id.raw(), slot = entry.slot, "rescheduling particle that is still alive");
            self.prepare_recycler(entry.slot, now);
        }

        due.clear();
        self.due = due;
        self.survivors = survivors;
        self.live_count == 0
    }

    fn release_slot(&mut self, slot: u32) {
        let idx = slot as usize;
        self.live[idx] = false;
        self.live_count -= 1;
        self.free.push(slot);
        if let Some(index) = self.particles[idx].take_global_index() {
            self.changes.push(Change::Released(index));
        }
    }

    /// Frees every slot and drops every schedule. Capacity is retained.
    ///
    /// No notifications are produced; global indices are simply dropped.
    /// Every record is anchored at time zero with no life left, so a clock
    /// rewound to zero never finds a free slot still alive.
    #[allow(clippy::cast_possible_truncation)]
    pub fn clear(&mut self) {
        for (particle, live) in self.particles.iter_mut().zip(self.live.iter_mut()) {
            particle.reset_payload(0.0);
            particle.set_global_index(None);
            *live = false;
        }
        self.free.clear();
        self.free.extend((0..self.particles.len()).rev().map(|slot| slot as u32));
        self.live_count = 0;
        self.queue.clear();
        self.changes.clear();
    }

    /// Takes the notifications produced since the last call.
    pub fn drain_changes(&mut self) -> std::vec::Drain<'_, Change> {
        self.changes.drain(..)
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// Resolves a handle to its live particle.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: SlotHandle) -> Option<&Particle> {
        if handle.group() != self.id || !self.is_live(handle.slot()) {
            return None;
        }
        let particle = &self.particles[handle.slot() as usize];
        (particle.generation() == handle.generation()).then_some(particle)
    }

    /// Resolves a handle to its live particle, mutably.
    #[inline]
    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut Particle> {
        if handle.group() != self.id || !self.is_live(handle.slot()) {
            return None;
        }
        let particle = &mut self.particles[handle.slot() as usize];
        (particle.generation() == handle.generation()).then_some(particle)
    }

    /// Direct slot access for callers that hold a checked handle.
    pub(crate) fn particle_at(&self, slot: usize) -> &Particle {
        &self.particles[slot]
    }

    pub(crate) fn particle_at_mut(&mut self, slot: usize) -> &mut Particle {
        &mut self.particles[slot]
    }

    /// Returns the record for a handle whether or not it is still live,
    /// as long as the slot has not been handed out again.
    #[must_use]
    pub fn record(&self, handle: SlotHandle) -> Option<&Particle> {
        self.particles
            .get(handle.slot() as usize)
            .filter(|p| p.generation() == handle.generation() && handle.group() == self.id)
    }

    /// Iterates over live particles.
    pub fn iter_live(&self) -> impl Iterator<Item = &Particle> {
        self.particles
            .iter()
            .zip(self.live.iter())
            .filter_map(|(p, &live)| live.then_some(p))
    }

    /// Iterates mutably over live particles.
    pub fn iter_live_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.particles
            .iter_mut()
            .zip(self.live.iter())
            .filter_map(|(p, &live)| live.then_some(p))
    }

    /// Checks the free/live partition: counts add up to the size, and no
    /// slot is both free and live or free twice.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.live_count + self.free.len() != self.size() {
            return false;
        }
        if self.live.iter().filter(|&&l| l).count() != self.live_count {
            return false;
        }
        let mut seen = vec![false; self.size()];
        self.free.iter().all(|&slot| {
            let idx = slot as usize;
            let fresh = idx < seen.len() && !seen[idx] && !self.live[idx];
            if fresh {
                seen[idx] = true;
            }
            fresh
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::GlobalIndex;

    fn store(capacity: usize) -> GroupStore {
        let mut store = GroupStore::new(GroupId::DEFAULT, 10, 600_000);
        store.set_size(capacity).unwrap();
        store
    }

    fn emit(store: &mut GroupStore, now: SimTime, lifespan: f32) -> SlotHandle {
        let handle = store.new_datum(true, now).unwrap();
        store.get_mut(handle).unwrap().lifespan = lifespan;
        store.prepare_recycler(handle.slot(), now);
        handle
    }

    #[test]
    fn test_set_size_fills_free_set() {
        let mut store = store(10);
        assert_eq!(store.size(), 10);
        assert_eq!(store.free_count(), 10);
        assert_eq!(store.live_count(), 0);
        assert!(store.is_consistent());

        let changes: Vec<_> = store.drain_changes().collect();
        assert_eq!(
            changes,
            vec![Change::Resized {
                group: GroupId::DEFAULT,
                old: 0,
                new: 10
            }]
        );
    }

    #[test]
    fn test_set_size_rejects_shrink() {
        let mut store = store(10);
        assert!(matches!(
            store.set_size(5),
            Err(SpindriftError::ShrinkRejected { current: 10, requested: 5, .. })
        ));
        assert!(store.set_size(10).is_ok());
    }

    #[test]
    fn test_limit_respected() {
        let mut store = store(10);
        let mut slots: Vec<u32> = (0..10)
            .map(|_| store.new_datum(true, SimTime::ZERO).unwrap().slot())
            .collect();
        assert!(store.new_datum(true, SimTime::ZERO).is_none());

        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), 10);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_unlimited_request_grows() {
        let mut store = store(10);
        for _ in 0..10 {
            store.new_datum(true, SimTime::ZERO).unwrap();
        }
        assert!(store.new_datum(true, SimTime::ZERO).is_none());

        let handle = store.new_datum(false, SimTime::ZERO).unwrap();
        assert_eq!(handle.slot(), 10);
        assert_eq!(store.size(), 20);
        assert_eq!(store.live_count(), 11);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_recycle_frees_after_death() {
        let mut store = store(4);
        let handle = emit(&mut store, SimTime::ZERO, 2.0);

        assert!(!store.recycle(SimTime::from_ms(1000)));
        assert!(store.get(handle).is_some());

        assert!(store.recycle(SimTime::from_ms(2500)));
        assert!(store.get(handle).is_none());
        assert_eq!(store.free_count(), 4);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_recycle_is_idempotent() {
        let mut store = store(8);
        for i in 0..8u8 {
            emit(&mut store, SimTime::ZERO, f32::from(i) * 0.5);
        }
        let now = SimTime::from_ms(1750);
        store.recycle(now);
        let snapshot = (store.live_count(), store.free_count(), store.queue().len());
        store.recycle(now);
        assert_eq!(
            snapshot,
            (store.live_count(), store.free_count(), store.queue().len())
        );
    }

    #[test]
    fn test_extended_life_is_rescheduled() {
        let mut store = store(2);
        let handle = emit(&mut store, SimTime::ZERO, 1.0);
        store.get_mut(handle).unwrap().extend_life(2.0, 0.5);

        assert!(!store.recycle(SimTime::from_ms(1500)));
        assert!(store.get(handle).is_some());
        assert_eq!(store.queue().top(), 3000);

        assert!(store.recycle(SimTime::from_ms(3000)));
    }

    #[test]
    fn test_kill_frees_immediately_and_reports() {
        let mut store = store(2);
        let handle = emit(&mut store, SimTime::ZERO, 5.0);
        store.get_mut(handle).unwrap().set_global_index(Some(GlobalIndex::new(4)));
        store.drain_changes().for_each(drop);

        assert!(store.kill(handle));
        assert!(!store.kill(handle));
        assert_eq!(store.live_count(), 0);
        let changes: Vec<_> = store.drain_changes().collect();
        assert_eq!(
            changes,
            vec![Change::Reloaded(handle), Change::Released(GlobalIndex::new(4))]
        );

        // The orphaned queue entry pops without double-freeing.
        assert!(store.recycle(SimTime::from_ms(6000)));
        assert!(store.is_consistent());
        assert_eq!(store.free_count(), 2);
    }

    #[test]
    fn test_stale_entry_does_not_touch_reused_slot() {
        let mut store = store(1);
        let first = emit(&mut store, SimTime::ZERO, 1.0);
        assert!(store.kill(first));

        let second = emit(&mut store, SimTime::ZERO, 10.0);
        assert_eq!(second.slot(), first.slot());
        assert_ne!(second.generation(), first.generation());

        // The first particle's entry at 1000ms is stale and must be ignored.
        assert!(!store.recycle(SimTime::from_ms(1000)));
        assert!(store.get(second).is_some());
        assert!(store.get(first).is_none());
    }

    #[test]
    fn test_long_life_uses_bounded_horizon() {
        let mut store = GroupStore::new(GroupId::DEFAULT, 10, 3000);
        store.set_size(1).unwrap();
        let handle = emit(&mut store, SimTime::ZERO, 60.0);
        // Checked again at two thirds of the maximum, not at death.
        assert_eq!(store.queue().top(), 2000);

        assert!(!store.recycle(SimTime::from_ms(2000)));
        let particle = store.get(handle).unwrap();
        // Shifted forward by a third of the maximum.
        assert!((particle.t - 1.0).abs() < 1e-4);
        assert_eq!(store.queue().top(), 3000);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut store = store(5);
        for _ in 0..5 {
            emit(&mut store, SimTime::ZERO, 1.0);
        }
        store.clear();
        assert_eq!(store.size(), 5);
        assert_eq!(store.free_count(), 5);
        assert!(store.queue().is_empty());
        assert!(store.is_consistent());
    }

    #[test]
    fn test_clear_hands_out_every_slot_after_rewind() {
        let mut store = store(2);
        let now = SimTime::from_ms(5000);
        emit(&mut store, now, 1.0);
        emit(&mut store, now, 30.0);
        // One expires and goes back to the free set, one stays live.
        assert!(!store.recycle(SimTime::from_ms(7000)));
        assert_eq!(store.live_count(), 1);

        store.clear();

        let first = store.new_datum(true, SimTime::ZERO).unwrap();
        let second = store.new_datum(true, SimTime::ZERO).unwrap();
        assert_ne!(first.slot(), second.slot());
        assert!(store.new_datum(true, SimTime::ZERO).is_none());
        assert_eq!(store.live_count(), 2);
        assert!(store.queue().is_empty());
        assert!(store.is_consistent());
    }

    #[test]
    fn test_tiny_max_life_still_reschedules_late_in_the_run() {
        let mut store = GroupStore::new(GroupId::DEFAULT, 10, 1);
        assert_eq!(store.max_life_ms(), MIN_MAX_LIFE_MS);
        store.set_size(1).unwrap();

        let start = SimTime::from_ms(1_000_000_000);
        let handle = emit(&mut store, start, 60.0);
        let later = SimTime::from_ms(1_000_001_000);
        assert!(!store.recycle(later));

        assert!(store.get(handle).is_some());
        assert!(store.queue().top() > later.ms());
    }
}
