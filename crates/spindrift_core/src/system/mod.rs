//! # Particle System
//!
//! The arena that owns every group store, the global index table and the
//! tick's change list.
//!
//! ## Ownership
//!
//! ```text
//! ParticleSystem
//!   ├─ GroupStore × N   (own Particle records by value)
//!   ├─ IndexTable       (GlobalIndex → SlotHandle, weak)
//!   └─ ChangeList       (SlotHandle / GlobalIndex, weak)
//! ```
//!
//! Nothing outside a store holds a reference into it; every cross link is
//! a handle checked against the slot generation on use.

mod emission;

use std::collections::HashMap;

use tracing::debug;

use crate::change::{Change, ChangeList};
use crate::config::{EmitterDeclaration, SystemConfig};
use crate::error::{SpindriftError, SpindriftResult};
use crate::hooks::Affector;
use crate::index::IndexTable;
use crate::particle::{GlobalIndex, GroupId, Particle, SlotHandle};
use crate::recycle::GroupStore;
use crate::time::SimTime;

pub use emission::Emission;

/// Owner of all particle storage.
#[derive(Debug)]
pub struct ParticleSystem {
    stores: Vec<GroupStore>,
    names: Vec<String>,
    by_name: HashMap<String, GroupId>,
    /// Summed emitter declarations per group.
    declared: Vec<usize>,
    index: IndexTable,
    changes: ChangeList,
    growth_increment: usize,
    max_life_ms: i64,
    now: SimTime,
}

impl ParticleSystem {
    /// Creates a system with the default group and every configured group.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::InvalidConfig`] if the configuration does
    /// not validate.
    pub fn new(config: &SystemConfig) -> SpindriftResult<Self> {
        config.validate()?;
        let mut system = Self {
            stores: Vec::new(),
            names: Vec::new(),
            by_name: HashMap::new(),
            declared: Vec::new(),
            index: IndexTable::new(config.index_growth()),
            changes: ChangeList::new(),
            growth_increment: config.growth_increment,
            max_life_ms: config.max_life_ms,
            now: SimTime::ZERO,
        };
        system.group("");
        for group in &config.groups {
            let id = system.group(&group.name);
            system.set_group_capacity(id, group.capacity)?;
        }
        Ok(system)
    }

    /// Current simulation time.
    #[inline]
    #[must_use]
    pub const fn now(&self) -> SimTime {
        self.now
    }

    /// Observed maximum lifespan in milliseconds.
    #[inline]
    #[must_use]
    pub const fn max_life_ms(&self) -> i64 {
        self.max_life_ms
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Returns the id for `name`, registering the group if needed.
    ///
    /// The empty name is the reserved default group.
    pub fn group(&mut self, name: &str) -> GroupId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = GroupId::new(u32::try_from(self.stores.len()).unwrap_or(u32::MAX));
        self.stores
            .push(GroupStore::new(id, self.growth_increment, self.max_life_ms));
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        self.declared.push(0);
        debug!(group = id.raw(), name, "registered particle group");
        id
    }

    /// Looks up a group without registering it.
    #[must_use]
    pub fn find_group(&self, name: &str) -> Option<GroupId> {
        self.by_name.get(name).copied()
    }

    /// The name of a group.
    #[must_use]
    pub fn group_name(&self, id: GroupId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// Number of registered groups, including the default group.
    #[inline]
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.stores.len()
    }

    /// The store of a group.
    #[must_use]
    pub fn group_store(&self, id: GroupId) -> Option<&GroupStore> {
        self.stores.get(id.index())
    }

    /// Every group store, in id order.
    #[must_use]
    pub fn group_stores(&self) -> &[GroupStore] {
        &self.stores
    }

    /// Grows a group to at least `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::UnknownGroup`] for an unregistered id and
    /// [`SpindriftError::ShrinkRejected`] if `capacity` is below the
    /// current size.
    pub fn set_group_capacity(&mut self, id: GroupId, capacity: usize) -> SpindriftResult<()> {
        let store = self
            .stores
            .get_mut(id.index())
            .ok_or_else(|| SpindriftError::UnknownGroup(id.raw().to_string()))?;
        store.set_size(capacity)?;
        self.collect_changes(id);
        Ok(())
    }

    /// Registers an emitter's promise: grows its group to the summed
    /// declared capacity and raises the observed maximum lifespan.
    pub fn declare_emitter(&mut self, declaration: &EmitterDeclaration) -> GroupId {
        let id = self.group(&declaration.group);
        self.declared[id.index()] += declaration.maximum_emitted;

        let wanted = self.declared[id.index()];
        let store = &mut self.stores[id.index()];
        if wanted > store.size() {
            // Growing never fails.
            let _ = store.set_size(wanted);
            self.collect_changes(id);
        }

        let longest = declaration.longest_life_ms();
        if longest > self.max_life_ms {
            debug!(max_life_ms = longest, "raising observed maximum lifespan");
            self.max_life_ms = longest;
            for store in &mut self.stores {
                store.set_max_life_ms(longest);
            }
        }
        id
    }

    // ========================================================================
    // Creation path
    // ========================================================================

    /// Requests a new particle in `group`.
    ///
    /// Returns `None` when the group is unknown, or when `respects_limit`
    /// is set and the group has no free slot. The caller fills in the
    /// returned [`Emission`] and calls [`Emission::finish`].
    pub fn request_entity(&mut self, group: GroupId, respects_limit: bool) -> Option<Emission<'_>> {
        let handle = self.create_datum(group, respects_limit, None)?;
        Some(Emission::new(self, handle))
    }

    /// Obtains a slot and gives it an identity.
    ///
    /// With `rehome` set, the new slot takes over that global index and
    /// the previous holder loses it at once.
    fn create_datum(
        &mut self,
        group: GroupId,
        respects_limit: bool,
        rehome: Option<GlobalIndex>,
    ) -> Option<SlotHandle> {
        let now = self.now;
        let handle = self
            .stores
            .get_mut(group.index())?
            .new_datum(respects_limit, now)?;

        let index = match rehome {
            None => self.index.allocate(handle),
            Some(index) => {
                if let Some(previous) = self.index.rehome(index, handle) {
                    if let Some(old) = self
                        .stores
                        .get_mut(previous.group().index())
                        .and_then(|s| s.get_mut(previous))
                    {
                        old.set_global_index(None);
                    }
                }
                index
            }
        };

        if let Some(particle) = self.stores[group.index()].get_mut(handle) {
            particle.set_global_index(Some(index));
        }
        self.collect_changes(group);
        Some(handle)
    }

    /// Schedules a filled-in particle and queues its load notification.
    pub(crate) fn finish_emission(&mut self, handle: SlotHandle) {
        let now = self.now;
        if let Some(store) = self.stores.get_mut(handle.group().index()) {
            store.prepare_recycler(handle.slot(), now);
            self.changes.push(Change::Loaded(handle));
        }
    }

    /// Returns an unfinished particle's slot and index.
    pub(crate) fn abandon(&mut self, handle: SlotHandle) {
        if let Some(store) = self.stores.get_mut(handle.group().index()) {
            store.abandon(handle);
            self.collect_changes(handle.group());
        }
    }

    /// Moves a live particle to another group, keeping its global index.
    ///
    /// The payload is cloned into a new slot of `to`, the new particle is
    /// loaded like a fresh emission, and the old slot is killed. Returns
    /// the new handle, or `None` when `to` is the current group, the handle
    /// is stale, or `to` is unknown.
    pub fn move_groups(&mut self, handle: SlotHandle, to: GroupId) -> Option<SlotHandle> {
        let from = handle.group();
        if from == to || to.index() >= self.stores.len() {
            return None;
        }
        let payload = self.get(handle)?.clone();
        let index = self.stores[from.index()]
            .get_mut(handle)
            .and_then(Particle::take_global_index);

        let Some(moved) = self.create_datum(to, false, index) else {
            if let Some(old) = self.stores[from.index()].get_mut(handle) {
                old.set_global_index(index);
            }
            return None;
        };

        if let Some(particle) = self.stores[to.index()].get_mut(moved) {
            particle.clone_payload_from(&payload);
        }
        self.finish_emission(moved);

        self.stores[from.index()].kill(handle);
        self.collect_changes(from);
        Some(moved)
    }

    /// Forces a particle to die now. Returns false for a stale handle.
    pub fn kill(&mut self, handle: SlotHandle) -> bool {
        let Some(store) = self.stores.get_mut(handle.group().index()) else {
            return false;
        };
        let killed = store.kill(handle);
        self.collect_changes(handle.group());
        killed
    }

    // ========================================================================
    // Recycling
    // ========================================================================

    /// Runs a recycle pass on every group at `now`.
    ///
    /// Returns true if no group has a live particle afterwards.
    pub fn recycle_all(&mut self, now: SimTime) -> bool {
        self.now = now;
        let mut empty = true;
        for store in &mut self.stores {
            empty = store.recycle(now) && empty;
        }
        for group in 0..self.stores.len() {
            self.collect_changes(GroupId::new(u32::try_from(group).unwrap_or(u32::MAX)));
        }
        empty
    }

    /// Frees every particle and identity and rewinds the clock.
    /// Storage capacity is retained.
    pub fn clear(&mut self) {
        for store in &mut self.stores {
            store.clear();
        }
        self.index.clear();
        self.changes.clear();
        self.now = SimTime::ZERO;
    }

    /// Moves a store's pending notifications into the change list,
    /// releasing global indices as they go.
    fn collect_changes(&mut self, group: GroupId) {
        let Some(store) = self.stores.get_mut(group.index()) else {
            return;
        };
        for change in store.drain_changes() {
            if let Change::Released(index) = change {
                self.index.release(index);
            }
            self.changes.push(change);
        }
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// Resolves a handle to its live particle.
    #[must_use]
    pub fn get(&self, handle: SlotHandle) -> Option<&Particle> {
        self.stores.get(handle.group().index())?.get(handle)
    }

    /// Resolves a handle to its live particle, mutably.
    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut Particle> {
        self.stores.get_mut(handle.group().index())?.get_mut(handle)
    }

    /// Returns a handle's record even if it died, until its slot is reused.
    #[must_use]
    pub fn record(&self, handle: SlotHandle) -> Option<&Particle> {
        self.stores.get(handle.group().index())?.record(handle)
    }

    /// The slot currently holding a global index.
    #[must_use]
    pub fn resolve(&self, index: GlobalIndex) -> Option<SlotHandle> {
        self.index.resolve(index)
    }

    /// The live particle holding a global index.
    #[must_use]
    pub fn by_index(&self, index: GlobalIndex) -> Option<&Particle> {
        self.get(self.resolve(index)?)
    }

    /// The global index table.
    #[must_use]
    pub const fn index_table(&self) -> &IndexTable {
        &self.index
    }

    /// Live particles of one group.
    pub fn live(&self, group: GroupId) -> impl Iterator<Item = &Particle> {
        self.stores
            .get(group.index())
            .into_iter()
            .flat_map(GroupStore::iter_live)
    }

    /// Live particles of one group, mutably.
    pub fn live_mut(&mut self, group: GroupId) -> impl Iterator<Item = &mut Particle> {
        self.stores
            .get_mut(group.index())
            .into_iter()
            .flat_map(GroupStore::iter_live_mut)
    }

    /// Live particles of every group.
    pub fn iter_live(&self) -> impl Iterator<Item = &Particle> {
        self.stores.iter().flat_map(GroupStore::iter_live)
    }

    /// Total live particles across groups.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.stores.iter().map(GroupStore::live_count).sum()
    }

    /// Changes accumulated since the controller last cleared the list.
    #[must_use]
    pub const fn changes(&self) -> &ChangeList {
        &self.changes
    }

    pub(crate) fn clear_changes(&mut self) {
        self.changes.clear();
    }

    /// Runs one affector over every started, live particle of the groups
    /// it accepts. Particles it reports as changed are queued for reload.
    ///
    /// Returns the number of particles reported as changed.
    pub(crate) fn apply_affector(&mut self, affector: &mut dyn Affector, elapsed: f32) -> usize {
        let now = self.now;
        let now_s = now.secs();
        let mut changed = 0;
        for store in &mut self.stores {
            if !affector.accepts(store.id()) {
                continue;
            }
            for particle in store.iter_live_mut() {
                if particle.alive(now_s) && affector.affect(particle, elapsed, now) {
                    self.changes.push(Change::Reloaded(particle.handle()));
                    changed += 1;
                }
            }
        }
        changed
    }
}
