//! # Extension Hooks
//!
//! Host-implemented behaviour plugged into the step controller.
//!
//! | Hook          | Called                         | May                          |
//! |---------------|--------------------------------|------------------------------|
//! | [`Emitter`]     | once per running tick          | request and finish emissions |
//! | [`Affector`]    | once per started live particle | mutate the payload           |
//! | [`StateEngine`] | once per running tick          | request group moves          |
//! | [`Painter`]     | once per change it accepts     | read particles               |
//!
//! Hooks never receive references that outlive the call; anything kept
//! across ticks must be a [`SlotHandle`](crate::particle::SlotHandle) or [`GlobalIndex`].

use crate::config::EmitterDeclaration;
use crate::particle::{GlobalIndex, GroupId, Particle};
use crate::system::ParticleSystem;
use crate::time::SimTime;

/// Source of new particles.
pub trait Emitter: Send {
    /// Capacity and lifespan promise, read once at registration.
    fn declaration(&self) -> EmitterDeclaration;

    /// Emits the particles due this tick into `group`.
    ///
    /// # Arguments
    ///
    /// * `group` - The group resolved from the declaration
    /// * `elapsed` - Seconds since the previous tick
    /// * `system` - Where to request emissions
    fn emit(&mut self, group: GroupId, elapsed: f32, system: &mut ParticleSystem);

    /// Forgets emission progress after a controller reset.
    fn reset(&mut self) {}
}

/// Per-particle modifier run after emission.
pub trait Affector: Send {
    /// Whether this affector runs on particles of `group`.
    fn accepts(&self, _group: GroupId) -> bool {
        true
    }

    /// Whether [`Affector::reset`] must see every freshly loaded particle.
    fn needs_reset(&self) -> bool {
        false
    }

    /// Drops per-particle state kept for a freshly loaded particle.
    fn reset(&mut self, _particle: &Particle) {}

    /// Mutates one started, live particle.
    ///
    /// Returns true if the payload changed outside its kinematic basis; the
    /// particle is then reloaded by painters.
    fn affect(&mut self, particle: &mut Particle, elapsed: f32, now: SimTime) -> bool;
}

/// A requested move of a particle to another group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupMove {
    /// Particle to move.
    pub index: GlobalIndex,
    /// Destination group.
    pub to: GroupId,
}

/// Drives group membership by global index.
pub trait StateEngine: Send {
    /// Starts following a particle that appeared in `group`.
    fn track(&mut self, index: GlobalIndex, group: GroupId);

    /// Stops following a released index.
    fn untrack(&mut self, index: GlobalIndex);

    /// Pushes this tick's group moves into `moves`.
    fn update_state(&mut self, now: SimTime, moves: &mut Vec<GroupMove>);

    /// Forgets every tracked index after a controller reset.
    fn reset(&mut self) {}
}

/// Consumer of particle appearance.
pub trait Painter: Send {
    /// Whether this painter draws particles of `group`.
    fn accepts(&self, _group: GroupId) -> bool {
        true
    }

    /// A particle finished emission.
    fn load(&mut self, particle: &Particle);

    /// A particle changed outside its kinematic basis.
    fn reload(&mut self, particle: &Particle);

    /// A group's storage grew.
    fn resize(&mut self, _group: GroupId, _old: usize, _new: usize) {}

    /// Drops everything after a controller reset.
    fn reset(&mut self) {}
}

