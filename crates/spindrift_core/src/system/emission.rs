//! Scoped access to a particle between slot allocation and scheduling.

use std::ops::{Deref, DerefMut};

use super::ParticleSystem;
use crate::particle::{Particle, SlotHandle};

/// A particle being emitted.
///
/// Dereferences to the particle so the emitter can fill in its payload.
/// [`Emission::finish`] schedules it and queues its load notification;
/// dropping the guard unfinished returns the slot and global index.
#[derive(Debug)]
pub struct Emission<'a> {
    system: &'a mut ParticleSystem,
    handle: SlotHandle,
    finished: bool,
}

impl<'a> Emission<'a> {
    pub(super) fn new(system: &'a mut ParticleSystem, handle: SlotHandle) -> Self {
        Self {
            system,
            handle,
            finished: false,
        }
    }

    /// Handle of the particle being emitted.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> SlotHandle {
        self.handle
    }

    /// Schedules the particle and returns its handle.
    pub fn finish(mut self) -> SlotHandle {
        self.finished = true;
        self.system.finish_emission(self.handle);
        self.handle
    }

    fn store_index(&self) -> (usize, usize) {
        (self.handle.group().index(), self.handle.slot() as usize)
    }
}

impl Deref for Emission<'_> {
    type Target = Particle;

    fn deref(&self) -> &Particle {
        let (group, slot) = self.store_index();
        self.system.stores[group].particle_at(slot)
    }
}

impl DerefMut for Emission<'_> {
    fn deref_mut(&mut self) -> &mut Particle {
        let (group, slot) = self.store_index();
        self.system.stores[group].particle_at_mut(slot)
    }
}

impl Drop for Emission<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.system.abandon(self.handle);
        }
    }
}
