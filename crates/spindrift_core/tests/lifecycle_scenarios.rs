//! # Lifecycle Scenarios
//!
//! End-to-end checks of slot allocation, expiration, group moves and the
//! controller tick, through the public API only.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use spindrift_core::{
    Change, EmitterDeclaration, Emitter, ExpirationQueue, GlobalIndex, GroupId, GroupMove,
    GroupStore, Painter, Particle, ParticleSystem, SimTime, SlotHandle, StateEngine,
    StepController, SystemConfig,
};

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

// ============================================================================
// GROUP STORE
// ============================================================================

/// Ten requests on ten free slots succeed with distinct slots; the eleventh
/// is refused.
#[test]
fn test_capacity_ten_refuses_eleventh() {
    let mut store = store(10);
    let mut slots = Vec::new();
    for _ in 0..10 {
        slots.push(store.new_datum(true, SimTime::ZERO).unwrap().slot());
    }
    assert!(store.new_datum(true, SimTime::ZERO).is_none());

    slots.sort_unstable();
    slots.dedup();
    assert_eq!(slots.len(), 10);
    assert_eq!(store.live_count() + store.free_count(), store.size());
}

/// A two second particle survives a pass at one second and is freed by a
/// pass at two and a half.
#[test]
fn test_two_second_particle_expires() {
    let mut store = store(1);
    let handle = emit(&mut store, SimTime::ZERO, 2.0);

    assert!(!store.recycle(SimTime::from_secs(1.0)));
    assert!(store.get(handle).is_some());

    assert!(store.recycle(SimTime::from_secs(2.5)));
    assert!(store.get(handle).is_none());
    assert_eq!(store.free_count(), 1);
}

/// Two particles dying in the same millisecond share a heap node and pop
/// together.
#[test]
fn test_shared_death_time_pops_together() {
    let mut store = store(4);
    let a = emit(&mut store, SimTime::ZERO, 5.0);
    let b = emit(&mut store, SimTime::from_ms(1000), 4.0);

    assert_eq!(store.queue().len(), 1);
    assert_eq!(store.queue().top(), 5000);

    assert!(!store.recycle(SimTime::from_ms(4999)));
    assert!(store.recycle(SimTime::from_ms(5000)));
    assert!(store.get(a).is_none());
    assert!(store.get(b).is_none());

    let mut queue = ExpirationQueue::new();
    queue.insert_timed("a", 5000);
    queue.insert_timed("b", 5000);
    let mut due = queue.pop();
    due.sort_unstable();
    assert_eq!(due, vec!["a", "b"]);
}

/// At capacity a limited request is refused, an unlimited one grows the
/// store by the fixed increment.
#[test]
fn test_full_store_grows_on_unlimited_request() {
    let mut store = store(3);
    for _ in 0..3 {
        store.new_datum(true, SimTime::ZERO).unwrap();
    }
    assert!(store.new_datum(true, SimTime::ZERO).is_none());

    let handle = store.new_datum(false, SimTime::ZERO).unwrap();
    assert_eq!(store.size(), 13);
    assert!(store.get(handle).is_some());
    assert!(store.is_consistent());
}

/// A particle is alive over `[t0, t0 + L)` and dead from `t0 + L` on.
#[test]
fn test_still_alive_window() {
    let mut store = store(1);
    let handle = emit(&mut store, SimTime::from_secs(3.0), 1.5);
    let particle = store.get(handle).unwrap();

    assert!(particle.still_alive(3.0));
    assert!(particle.still_alive(4.0));
    assert!(particle.still_alive(4.49));
    assert!(!particle.still_alive(4.5));
    assert!(!particle.still_alive(9.0));
}

/// Extending life keeps the observed position where it was.
#[test]
fn test_extend_life_is_continuous() {
    let mut store = store(1);
    let handle = emit(&mut store, SimTime::ZERO, 1.0);
    let particle = store.get_mut(handle).unwrap();
    particle.x = 2.0;
    particle.vx = 3.0;
    particle.ax = -1.0;
    particle.y = -4.0;
    particle.vy = 0.5;

    let now = 0.75;
    let before = (particle.cur_x(now), particle.cur_y(now));
    particle.extend_life(5.0, now);
    let after = (particle.cur_x(now), particle.cur_y(now));

    assert!((before.0 - after.0).abs() < 1e-4);
    assert!((before.1 - after.1).abs() < 1e-4);
    assert!(particle.still_alive(5.5));
}

// ============================================================================
// PARTICLE SYSTEM
// ============================================================================

/// A group move re-points the global index at the new particle, and the old
/// slot is free after the next recycle pass.
#[test]
fn test_group_move_preserves_identity() {
    let mut system = ParticleSystem::new(&SystemConfig::default()).unwrap();
    let embers = system.group("embers");

    let mut emission = system.request_entity(GroupId::DEFAULT, false).unwrap();
    emission.lifespan = 3.0;
    emission.vy = -2.0;
    let original = emission.finish();
    let index = system.get(original).unwrap().global_index().unwrap();

    let moved = system.move_groups(original, embers).unwrap();
    assert_eq!(system.resolve(index), Some(moved));
    assert_eq!(system.by_index(index).unwrap().group(), embers);
    assert!((system.get(moved).unwrap().vy + 2.0).abs() < f32::EPSILON);

    system.recycle_all(SimTime::from_ms(16));
    let home = system.group_store(GroupId::DEFAULT).unwrap();
    assert_eq!(home.live_count(), 0);
    assert_eq!(home.free_count(), home.size());

    let loaded: Vec<_> = system
        .changes()
        .as_slice()
        .iter()
        .filter(|c| matches!(c, Change::Loaded(_)))
        .collect();
    assert_eq!(loaded.len(), 2);
}

/// Moves into a full group under no limit still succeed; unknown groups and
/// the current group are ignored.
#[test]
fn test_group_move_edge_cases() {
    let config = SystemConfig::from_toml_str(
        r#"
        [[groups]]
        name = "full"
        capacity = 1
        "#,
    )
    .unwrap();
    let mut system = ParticleSystem::new(&config).unwrap();
    let full = system.find_group("full").unwrap();

    let occupant = system.request_entity(full, true).unwrap().finish();
    assert!(system.request_entity(full, true).is_none());

    let mover = system.request_entity(GroupId::DEFAULT, false).unwrap().finish();
    assert!(system.move_groups(mover, GroupId::DEFAULT).is_none());
    assert!(system.move_groups(mover, GroupId::new(42)).is_none());
    assert!(system.move_groups(mover, full).is_some());
    assert!(system.get(occupant).is_some());
    assert_eq!(system.live(full).count(), 2);
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// Emits one long-lived particle into its group per tick.
struct Trickle {
    group: &'static str,
    lifespan: f32,
}

impl Emitter for Trickle {
    fn declaration(&self) -> EmitterDeclaration {
        EmitterDeclaration {
            group: self.group.to_owned(),
            maximum_emitted: 64,
            lifespan_ms: 2000,
            lifespan_variation_ms: 0,
        }
    }

    fn emit(&mut self, group: GroupId, _elapsed: f32, system: &mut ParticleSystem) {
        if let Some(mut emission) = system.request_entity(group, true) {
            emission.lifespan = self.lifespan;
            emission.finish();
        }
    }
}

/// Sends every particle older than a second to the "old" group.
#[derive(Default)]
struct Ager {
    born: Vec<(GlobalIndex, SimTime)>,
    old: Option<GroupId>,
    now: SimTime,
}

impl StateEngine for Ager {
    fn track(&mut self, index: GlobalIndex, group: GroupId) {
        if Some(group) != self.old {
            self.born.push((index, self.now));
        }
    }

    fn untrack(&mut self, index: GlobalIndex) {
        self.born.retain(|&(i, _)| i != index);
    }

    fn update_state(&mut self, now: SimTime, moves: &mut Vec<GroupMove>) {
        self.now = now;
        let Some(old) = self.old else { return };
        self.born.retain(|&(index, born)| {
            if now.ms() - born.ms() >= 1000 {
                moves.push(GroupMove { index, to: old });
                false
            } else {
                true
            }
        });
    }
}

#[derive(Default)]
struct Log {
    events: Arc<Mutex<Vec<(char, GroupId)>>>,
}

impl Painter for Log {
    fn load(&mut self, particle: &Particle) {
        self.events.lock().push(('L', particle.group()));
    }

    fn reload(&mut self, particle: &Particle) {
        self.events.lock().push(('R', particle.group()));
    }
}

/// Particles emitted by a controller age into another group, then expire.
#[test]
fn test_controller_ages_particles_across_groups() {
    let mut controller = StepController::new(&SystemConfig::default()).unwrap();
    let young = controller.add_emitter(Trickle {
        group: "young",
        lifespan: 1.5,
    });
    let old = controller.system_mut().group("old");
    controller.set_state_engine(Ager {
        old: Some(old),
        ..Ager::default()
    });
    let log = Log::default();
    let events = Arc::clone(&log.events);
    controller.add_painter(log);
    controller.start().unwrap();

    let mut moved = 0;
    for step in 0..=40 {
        let summary = controller.advance(step * 100).unwrap().unwrap();
        moved += summary.moved;
        let system = controller.system();
        for store in system.group_stores() {
            assert!(store.is_consistent());
        }
        assert_eq!(system.index_table().live_count(), system.live_count());
    }

    assert!(moved > 0);
    assert!(controller.system().live(old).count() > 0);
    assert!(controller.system().live(young).count() > 0);
    for particle in controller.system().live(old) {
        assert!(particle.life_left(controller.system().now().secs()) <= 0.5 + 1e-3);
    }

    let events = events.lock();
    assert!(events.contains(&('L', old)));
    assert!(events.contains(&('R', young)));
}

/// Stopping discards every particle and identity; the next start begins
/// from an empty system.
#[test]
fn test_stop_then_start_begins_empty() {
    let mut controller = StepController::new(&SystemConfig::default()).unwrap();
    controller.add_emitter(Trickle {
        group: "",
        lifespan: 10.0,
    });
    controller.start().unwrap();
    for step in 0..5 {
        controller.advance(step * 16).unwrap();
    }
    assert_eq!(controller.system().live_count(), 5);
    assert!(!controller.is_empty());

    controller.stop().unwrap();
    assert_eq!(controller.system().live_count(), 0);
    assert_eq!(controller.system().index_table().live_count(), 0);
    assert!(controller.is_empty());

    controller.start().unwrap();
    let summary = controller.advance(0).unwrap().unwrap();
    assert!(summary.empty);
    assert_eq!(summary.live, 1);
}

/// A consumer thread mirrors every tick through the feed while the sim
/// thread waits at the sync boundary.
#[test]
fn test_consumer_thread_mirrors_ticks() {
    let mut controller = StepController::new(&SystemConfig::default()).unwrap();
    controller.add_emitter(Trickle {
        group: "",
        lifespan: 0.05,
    });
    let reader = controller.attach_feed(2).unwrap();
    controller.start().unwrap();

    let consumer = thread::spawn(move || {
        let mut ticks = Vec::new();
        let mut loads = 0;
        while let Ok(digest) = reader.recv() {
            loads += digest
                .changes
                .iter()
                .filter(|c| matches!(c, Change::Loaded(_)))
                .count();
            ticks.push(digest.tick);
        }
        (ticks, loads)
    });

    for step in 0..20 {
        controller.advance(step * 16).unwrap();
        controller.sync().unwrap();
    }
    controller.destroy();

    let (ticks, loads) = consumer.join().unwrap();
    assert_eq!(ticks, (1..=20).collect::<Vec<u64>>());
    assert_eq!(loads, 20);
}
