//! # Particle Records
//!
//! A particle is a plain data record owned by exactly one group store.
//! It carries three kinds of data:
//! - **Identity**: owning group, slot, slot generation, global index
//! - **Temporal**: creation time `t` and `lifespan`, both in seconds
//! - **Payload**: kinematic basis and appearance, opaque to the engine
//!
//! ## Kinematic Basis
//!
//! Position is never integrated per tick. It is stored as a basis
//! `(x, vx, ax)` anchored at `t`, and evaluated on demand:
//!
//! ```text
//! pos(now) = x + vx·Δt + ½·ax·Δt²     where Δt = now − t
//! ```
//!
//! Setters that change one observable re-derive the basis so the other
//! observables at `now` stay exactly where they were.

use crate::time::{rounded_ms, EPSILON_SECS};

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Identifier of a particle group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct GroupId(u32);

impl GroupId {
    /// The reserved default (unnamed) group.
    pub const DEFAULT: Self = Self(0);

    /// Creates a group id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the id as a vector index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable external identifier of a particle.
///
/// Survives group moves; independent of the physical storage slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct GlobalIndex(u32);

impl GlobalIndex {
    /// Creates a global index from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the index as a vector index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Weak reference to a particle slot.
///
/// The generation makes the handle go stale as soon as its slot is handed
/// out again, so a handle never silently resolves to a newer particle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    group: GroupId,
    slot: u32,
    generation: u32,
}

impl SlotHandle {
    /// Creates a handle.
    #[inline]
    #[must_use]
    pub const fn new(group: GroupId, slot: u32, generation: u32) -> Self {
        Self {
            group,
            slot,
            generation,
        }
    }

    /// The owning group.
    #[inline]
    #[must_use]
    pub const fn group(self) -> GroupId {
        self.group
    }

    /// The slot within the owning group.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// The slot generation this handle was issued for.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Appearance payload. The engine copies it around but never interprets it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Appearance {
    /// RGBA color.
    pub color: [u8; 4],
    /// Rotation in degrees at `t`.
    pub rotation: f32,
    /// Rotation speed in degrees per second.
    pub rotation_velocity: f32,
    /// Whether rotation follows the direction of travel.
    pub auto_rotate: bool,
    /// 2x2 deformation matrix `[xx, xy, yx, yy]`.
    pub deformation: [f32; 4],
    /// Current sprite frame.
    pub frame_index: u32,
    /// Frames in the current sprite animation.
    pub frame_count: u32,
    /// Duration of one sprite frame in milliseconds.
    pub frame_duration_ms: u32,
    /// Anchor time of the sprite animation, in seconds.
    pub animation_t: f32,
    /// Free-form values for painters.
    pub user: [f32; 4],
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            color: [255, 255, 255, 255],
            rotation: 0.0,
            rotation_velocity: 0.0,
            auto_rotate: false,
            deformation: [1.0, 0.0, 0.0, 1.0],
            frame_index: 0,
            frame_count: 1,
            frame_duration_ms: 0,
            animation_t: 0.0,
            user: [0.0; 4],
        }
    }
}

// ============================================================================
// PARTICLE
// ============================================================================

/// One simulated transient object.
#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    group: GroupId,
    slot: u32,
    generation: u32,
    global_index: Option<GlobalIndex>,

    /// Creation time in seconds. Shift only through [`Particle::extend_life`].
    pub t: f64,
    /// Lifespan in seconds.
    pub lifespan: f32,

    /// Position basis, x axis.
    pub x: f32,
    /// Position basis, y axis.
    pub y: f32,
    /// Velocity basis, x axis.
    pub vx: f32,
    /// Velocity basis, y axis.
    pub vy: f32,
    /// Acceleration, x axis.
    pub ax: f32,
    /// Acceleration, y axis.
    pub ay: f32,

    /// Size at birth.
    pub size: f32,
    /// Size at death.
    pub end_size: f32,
    /// Appearance payload.
    pub appearance: Appearance,
}

impl Particle {
    /// Creates a never-used record for a freshly grown slot.
    #[must_use]
    pub fn vacant(group: GroupId, slot: u32) -> Self {
        Self {
            group,
            slot,
            generation: 0,
            global_index: None,
            t: 0.0,
            lifespan: 0.0,
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            ax: 0.0,
            ay: 0.0,
            size: 0.0,
            end_size: 0.0,
            appearance: Appearance::default(),
        }
    }

    /// The group whose store owns this record.
    #[inline]
    #[must_use]
    pub const fn group(&self) -> GroupId {
        self.group
    }

    /// The slot within the owning store.
    #[inline]
    #[must_use]
    pub const fn slot(&self) -> u32 {
        self.slot
    }

    /// How many times the slot has been handed out.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// The stable external index, if this record currently holds one.
    #[inline]
    #[must_use]
    pub const fn global_index(&self) -> Option<GlobalIndex> {
        self.global_index
    }

    /// A weak handle to this record's current occupancy.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> SlotHandle {
        SlotHandle::new(self.group, self.slot, self.generation)
    }

    pub(crate) fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    pub(crate) fn set_global_index(&mut self, index: Option<GlobalIndex>) {
        self.global_index = index;
    }

    pub(crate) fn take_global_index(&mut self) -> Option<GlobalIndex> {
        self.global_index.take()
    }

    /// Clears the payload for a new occupant, keeping identity.
    pub(crate) fn reset_payload(&mut self, now: f64) {
        self.t = now;
        self.lifespan = 0.0;
        self.x = 0.0;
        self.y = 0.0;
        self.vx = 0.0;
        self.vy = 0.0;
        self.ax = 0.0;
        self.ay = 0.0;
        self.size = 0.0;
        self.end_size = 0.0;
        self.appearance = Appearance::default();
    }

    /// Copies the payload of `source` into this record.
    ///
    /// Identity (`group`, `slot`, `generation`, `global_index`) is never
    /// copied; it belongs to the slot, not to the particle being moved.
    /// Copied: `t`, `lifespan`, the full kinematic basis, `size`,
    /// `end_size` and `appearance`.
    pub fn clone_payload_from(&mut self, source: &Particle) {
        self.t = source.t;
        self.lifespan = source.lifespan;
        self.x = source.x;
        self.y = source.y;
        self.vx = source.vx;
        self.vy = source.vy;
        self.ax = source.ax;
        self.ay = source.ay;
        self.size = source.size;
        self.end_size = source.end_size;
        self.appearance = source.appearance;
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Scheduled death time in rounded milliseconds.
    #[inline]
    #[must_use]
    pub fn death_ms(&self) -> i64 {
        rounded_ms(self.t + f64::from(self.lifespan))
    }

    /// True until the particle's life has run out.
    #[inline]
    #[must_use]
    pub fn still_alive(&self, now: f64) -> bool {
        (self.t + f64::from(self.lifespan) - EPSILON_SECS) > now
    }

    /// True once the particle has started and until its life has run out.
    #[inline]
    #[must_use]
    pub fn alive(&self, now: f64) -> bool {
        (self.t + EPSILON_SECS) < now && self.still_alive(now)
    }

    /// Seconds of life remaining, never negative.
    #[inline]
    #[must_use]
    pub fn life_left(&self, now: f64) -> f32 {
        (self.lifespan - self.age(now)).max(0.0)
    }

    /// Fraction of the life already spent, in `[0, 1]`.
    #[must_use]
    pub fn life_fraction(&self, now: f64) -> f32 {
        if self.lifespan <= 0.0 {
            return 1.0;
        }
        (self.age(now) / self.lifespan).clamp(0.0, 1.0)
    }

    /// Size interpolated linearly from `size` to `end_size` over the life.
    #[must_use]
    pub fn cur_size(&self, now: f64) -> f32 {
        let f = self.life_fraction(now);
        self.size + (self.end_size - self.size) * f
    }

    /// Moves the particle's time anchor by `delta` seconds without any
    /// visible jump in position or velocity at `now`.
    pub fn extend_life(&mut self, delta: f32, now: f64) {
        let (px, py) = (self.cur_x(now), self.cur_y(now));
        let (pvx, pvy) = (self.cur_vx(now), self.cur_vy(now));

        self.t += f64::from(delta);
        self.appearance.animation_t += delta;

        let dt = self.age(now);
        (self.x, self.vx) = rebase(px, pvx, self.ax, dt);
        (self.y, self.vy) = rebase(py, pvy, self.ay, dt);
    }

    // ========================================================================
    // Observed kinematics
    // ========================================================================

    /// Seconds since the time anchor. Short enough for `f32` once the
    /// absolute clock is subtracted out.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn age(&self, now: f64) -> f32 {
        (now - self.t) as f32
    }

    /// Observed x position at `now`.
    #[inline]
    #[must_use]
    pub fn cur_x(&self, now: f64) -> f32 {
        let dt = self.age(now);
        self.x + self.vx * dt + 0.5 * self.ax * dt * dt
    }

    /// Observed y position at `now`.
    #[inline]
    #[must_use]
    pub fn cur_y(&self, now: f64) -> f32 {
        let dt = self.age(now);
        self.y + self.vy * dt + 0.5 * self.ay * dt * dt
    }

    /// Observed x velocity at `now`.
    #[inline]
    #[must_use]
    pub fn cur_vx(&self, now: f64) -> f32 {
        self.vx + self.ax * self.age(now)
    }

    /// Observed y velocity at `now`.
    #[inline]
    #[must_use]
    pub fn cur_vy(&self, now: f64) -> f32 {
        self.vy + self.ay * self.age(now)
    }

    /// Observed x acceleration (constant over the basis).
    #[inline]
    #[must_use]
    pub const fn cur_ax(&self) -> f32 {
        self.ax
    }

    /// Observed y acceleration (constant over the basis).
    #[inline]
    #[must_use]
    pub const fn cur_ay(&self) -> f32 {
        self.ay
    }

    /// Sets the observed x position at `now`, keeping velocity and acceleration.
    pub fn set_instant_x(&mut self, x: f32, now: f64) {
        let vx = self.cur_vx(now);
        (self.x, self.vx) = rebase(x, vx, self.ax, self.age(now));
    }

    /// Sets the observed y position at `now`, keeping velocity and acceleration.
    pub fn set_instant_y(&mut self, y: f32, now: f64) {
        let vy = self.cur_vy(now);
        (self.y, self.vy) = rebase(y, vy, self.ay, self.age(now));
    }

    /// Sets the observed x velocity at `now`, keeping position and acceleration.
    pub fn set_instant_vx(&mut self, vx: f32, now: f64) {
        let x = self.cur_x(now);
        (self.x, self.vx) = rebase(x, vx, self.ax, self.age(now));
    }

    /// Sets the observed y velocity at `now`, keeping position and acceleration.
    pub fn set_instant_vy(&mut self, vy: f32, now: f64) {
        let y = self.cur_y(now);
        (self.y, self.vy) = rebase(y, vy, self.ay, self.age(now));
    }

    /// Sets the x acceleration from `now` on, keeping position and velocity.
    pub fn set_instant_ax(&mut self, ax: f32, now: f64) {
        let (x, vx) = (self.cur_x(now), self.cur_vx(now));
        self.ax = ax;
        (self.x, self.vx) = rebase(x, vx, ax, self.age(now));
    }

    /// Sets the y acceleration from `now` on, keeping position and velocity.
    pub fn set_instant_ay(&mut self, ay: f32, now: f64) {
        let (y, vy) = (self.cur_y(now), self.cur_vy(now));
        self.ay = ay;
        (self.y, self.vy) = rebase(y, vy, ay, self.age(now));
    }
}

/// Derives the `(position, velocity)` basis at `t` that observes `pos` and
/// `vel` after `dt` seconds under constant `acc`.
#[inline]
fn rebase(pos: f32, vel: f32, acc: f32, dt: f32) -> (f32, f32) {
    let base_v = vel - dt * acc;
    let base_p = pos - dt * base_v - 0.5 * dt * dt * acc;
    (base_p, base_v)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-3;

    fn moving(t: f64) -> Particle {
        let mut p = Particle::vacant(GroupId::DEFAULT, 0);
        p.t = t;
        p.lifespan = 3.0;
        p.x = 1.0;
        p.y = -2.0;
        p.vx = 4.0;
        p.vy = 0.5;
        p.ax = -1.0;
        p.ay = 9.8;
        p
    }

    #[test]
    fn test_extrapolation() {
        let p = moving(1.0);
        // dt = 2: 1 + 8 - 2
        assert!((p.cur_x(3.0) - 7.0).abs() < TOLERANCE);
        assert!((p.cur_vx(3.0) - 2.0).abs() < TOLERANCE);
        assert!((p.cur_y(1.0) + 2.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_still_alive_window() {
        let mut p = Particle::vacant(GroupId::DEFAULT, 0);
        p.t = 0.0;
        p.lifespan = 2.0;
        assert!(p.still_alive(0.0));
        assert!(p.still_alive(1.99));
        assert!(!p.still_alive(2.0));
        assert!(!p.still_alive(2.5));
    }

    #[test]
    fn test_still_alive_resolves_milliseconds_after_a_day() {
        let mut p = Particle::vacant(GroupId::DEFAULT, 0);
        p.t = 100_000.0;
        p.lifespan = 0.002;
        assert!(p.still_alive(100_000.0005));
        assert!(!p.still_alive(100_000.0015));
        assert_eq!(p.death_ms(), 100_000_002);
    }

    #[test]
    fn test_alive_excludes_unstarted() {
        let mut p = Particle::vacant(GroupId::DEFAULT, 0);
        p.t = 1.0;
        p.lifespan = 2.0;
        assert!(!p.alive(0.5));
        assert!(!p.alive(1.0));
        assert!(p.alive(1.5));
        assert!(!p.alive(3.0));
    }

    #[test]
    fn test_extend_life_is_continuous() {
        let mut p = moving(0.0);
        let now = 1.25;
        let before = (p.cur_x(now), p.cur_y(now), p.cur_vx(now), p.cur_vy(now));
        p.extend_life(4.0, now);
        let after = (p.cur_x(now), p.cur_y(now), p.cur_vx(now), p.cur_vy(now));

        assert!((before.0 - after.0).abs() < TOLERANCE);
        assert!((before.1 - after.1).abs() < TOLERANCE);
        assert!((before.2 - after.2).abs() < TOLERANCE);
        assert!((before.3 - after.3).abs() < TOLERANCE);
        assert!((p.t - 4.0).abs() < f64::EPSILON);
        assert!(p.still_alive(6.5));
    }

    #[test]
    fn test_set_instant_velocity_keeps_position() {
        let mut p = moving(0.0);
        let now = 0.8;
        let x = p.cur_x(now);
        p.set_instant_vx(-3.0, now);
        assert!((p.cur_x(now) - x).abs() < TOLERANCE);
        assert!((p.cur_vx(now) + 3.0).abs() < TOLERANCE);
        assert!((p.cur_ax() + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_set_instant_acceleration_keeps_position_and_velocity() {
        let mut p = moving(0.0);
        let now = 2.0;
        let (y, vy) = (p.cur_y(now), p.cur_vy(now));
        p.set_instant_ay(0.0, now);
        assert!((p.cur_y(now) - y).abs() < TOLERANCE);
        assert!((p.cur_vy(now) - vy).abs() < TOLERANCE);
        // With no acceleration the velocity stays put afterwards.
        assert!((p.cur_vy(now + 1.0) - vy).abs() < TOLERANCE);
    }

    #[test]
    fn test_set_instant_position_keeps_velocity() {
        let mut p = moving(0.0);
        let now = 1.5;
        let vx = p.cur_vx(now);
        p.set_instant_x(100.0, now);
        assert!((p.cur_x(now) - 100.0).abs() < TOLERANCE);
        assert!((p.cur_vx(now) - vx).abs() < TOLERANCE);
    }

    #[test]
    fn test_clone_payload_keeps_identity() {
        let source = moving(0.5);
        let mut target = Particle::vacant(GroupId::new(3), 7);
        target.bump_generation();
        target.set_global_index(Some(GlobalIndex::new(11)));

        target.clone_payload_from(&source);

        assert_eq!(target.group(), GroupId::new(3));
        assert_eq!(target.slot(), 7);
        assert_eq!(target.generation(), 1);
        assert_eq!(target.global_index(), Some(GlobalIndex::new(11)));
        assert!((target.cur_x(2.0) - source.cur_x(2.0)).abs() < f32::EPSILON);
        assert_eq!(target.appearance, source.appearance);
    }

    #[test]
    fn test_size_interpolation() {
        let mut p = Particle::vacant(GroupId::DEFAULT, 0);
        p.lifespan = 2.0;
        p.size = 10.0;
        p.end_size = 0.0;
        assert!((p.cur_size(1.0) - 5.0).abs() < TOLERANCE);
        assert!((p.cur_size(5.0)).abs() < TOLERANCE);
        assert!((p.life_left(0.5) - 1.5).abs() < TOLERANCE);
    }
}
