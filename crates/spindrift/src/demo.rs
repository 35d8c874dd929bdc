//! # Demo Hooks
//!
//! Minimal emitter, affector, state engine and painter used by the host to
//! drive the engine. They carry no policy beyond what the demo needs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use spindrift_core::{
    Affector, EmitterDeclaration, Emitter, GlobalIndex, GroupId, GroupMove, Painter, Particle,
    ParticleSystem, SimTime, StateEngine,
};

// ============================================================================
// FOUNTAIN EMITTER
// ============================================================================

/// Upward spray of sparks at a fixed rate with seeded jitter.
pub struct Fountain {
    group: String,
    rate: f32,
    lifespan_ms: i64,
    variation_ms: i64,
    speed: f32,
    /// Fractional particles carried to the next tick.
    pending: f32,
    refused: u64,
    seed: u64,
    rng: ChaCha8Rng,
}

impl Fountain {
    /// Creates a fountain emitting `rate` particles per second into `group`.
    pub fn new(group: &str, rate: f32, lifespan_ms: i64, variation_ms: i64, seed: u64) -> Self {
        Self {
            group: group.to_owned(),
            rate,
            lifespan_ms,
            variation_ms: variation_ms.abs(),
            speed: 12.0,
            pending: 0.0,
            refused: 0,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Emitter for Fountain {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn declaration(&self) -> EmitterDeclaration {
        let longest = (self.lifespan_ms + self.variation_ms) as f32 / 1000.0;
        EmitterDeclaration {
            group: self.group.clone(),
            maximum_emitted: (self.rate * longest).ceil() as usize,
            lifespan_ms: self.lifespan_ms,
            lifespan_variation_ms: self.variation_ms,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn emit(&mut self, group: GroupId, elapsed: f32, system: &mut ParticleSystem) {
        self.pending += self.rate * elapsed.max(0.0);
        let due = self.pending.floor();
        self.pending -= due;

        for _ in 0..due as u32 {
            let Some(mut emission) = system.request_entity(group, true) else {
                self.refused += 1;
                debug!(group = group.raw(), refused = self.refused, "fountain group full");
                break;
            };
            let jitter = self.rng.gen_range(-self.variation_ms..=self.variation_ms);
            emission.lifespan = (self.lifespan_ms + jitter) as f32 / 1000.0;

            let angle: f32 = self.rng.gen_range(-0.35..0.35);
            let speed = self.speed * self.rng.gen_range(0.8..1.2);
            emission.vx = speed * angle.sin();
            emission.vy = -speed * angle.cos();
            emission.size = self.rng.gen_range(2.0..6.0);
            emission.end_size = 0.0;
            emission.appearance.color = [255, self.rng.gen_range(120..=220), 40, 255];
            emission.appearance.rotation_velocity = self.rng.gen_range(-90.0..90.0);
            emission.finish();
        }
    }

    fn reset(&mut self) {
        self.pending = 0.0;
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }
}

// ============================================================================
// GRAVITY AFFECTOR
// ============================================================================

/// Applies a constant downward acceleration from a particle's first tick on.
pub struct Gravity {
    accel: f32,
}

impl Gravity {
    /// Creates gravity of `accel` units per second squared.
    pub const fn new(accel: f32) -> Self {
        Self { accel }
    }
}

impl Affector for Gravity {
    fn affect(&mut self, particle: &mut Particle, _elapsed: f32, now: SimTime) -> bool {
        if (particle.ay - self.accel).abs() < f32::EPSILON {
            return false;
        }
        particle.set_instant_ay(self.accel, now.secs());
        true
    }
}

// ============================================================================
// HOPPER STATE ENGINE
// ============================================================================

/// Moves particles from one group to another once they reach an age.
pub struct Hopper {
    from: GroupId,
    to: GroupId,
    after_ms: i64,
    now: SimTime,
    /// Index → time it appeared in `from`.
    entered: HashMap<GlobalIndex, i64>,
}

impl Hopper {
    /// Creates a hopper that moves `from` particles to `to` after `after_ms`.
    pub fn new(from: GroupId, to: GroupId, after_ms: i64) -> Self {
        Self {
            from,
            to,
            after_ms,
            now: SimTime::ZERO,
            entered: HashMap::new(),
        }
    }
}

impl StateEngine for Hopper {
    fn track(&mut self, index: GlobalIndex, group: GroupId) {
        if group == self.from {
            self.entered.insert(index, self.now.ms());
        } else {
            self.entered.remove(&index);
        }
    }

    fn untrack(&mut self, index: GlobalIndex) {
        self.entered.remove(&index);
    }

    fn update_state(&mut self, now: SimTime, moves: &mut Vec<GroupMove>) {
        self.now = now;
        let (to, after_ms) = (self.to, self.after_ms);
        self.entered.retain(|&index, &mut since| {
            if now.ms() - since < after_ms {
                return true;
            }
            moves.push(GroupMove { index, to });
            false
        });
    }

    fn reset(&mut self) {
        self.entered.clear();
        self.now = SimTime::ZERO;
    }
}

// ============================================================================
// TALLY PAINTER
// ============================================================================

/// Counters shared between the painter and the host.
#[derive(Clone, Debug, Default)]
pub struct TallyCounts {
    /// Load notifications.
    pub loads: u64,
    /// Reload notifications.
    pub reloads: u64,
    /// Storage growth notifications.
    pub resizes: u64,
    /// Loads per group.
    pub loads_by_group: HashMap<GroupId, u64>,
}

/// Painter that only counts what it is told.
#[derive(Default)]
pub struct Tally {
    counts: Arc<Mutex<TallyCounts>>,
}

impl Tally {
    /// Shared view of the counters.
    pub fn counts(&self) -> Arc<Mutex<TallyCounts>> {
        Arc::clone(&self.counts)
    }
}

impl Painter for Tally {
    fn load(&mut self, particle: &Particle) {
        let mut counts = self.counts.lock();
        counts.loads += 1;
        *counts.loads_by_group.entry(particle.group()).or_default() += 1;
    }

    fn reload(&mut self, _particle: &Particle) {
        self.counts.lock().reloads += 1;
    }

    fn resize(&mut self, group: GroupId, old: usize, new: usize) {
        self.counts.lock().resizes += 1;
        debug!(group = group.raw(), old, new, "group storage grew");
    }

    fn reset(&mut self) {
        *self.counts.lock() = TallyCounts::default();
    }
}
