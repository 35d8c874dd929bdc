//! # Step Controller
//!
//! Owns the particle system and the registered hooks, and advances them
//! one tick at a time.
//!
//! ## Lifecycle
//!
//! ```text
//!                 start                 pause
//! Uninitialized ───────> Running <═══════════════> Paused
//!                          ^  │        resume        │
//!                    start │  │ stop                 │ stop
//!                          │  v                      │
//!                        Stopped <───────────────────┘
//!
//! any state ──destroy──> Destroyed
//! ```
//!
//! `reset` discards every particle without changing state.
//!
//! ## Tick Order
//!
//! 1. Measure elapsed time since the previous tick
//! 2. Recycle every group; the group results combine into emptiness
//! 3. Apply group moves requested by the state engine
//! 4. Run emitters
//! 5. Reset affectors for fresh particles, then run affectors
//! 6. Deliver the change list to painters, the state engine and the feed
//! 7. Report an emptiness flip

use tracing::{debug, trace, warn};

use crate::change::Change;
use crate::config::SystemConfig;
use crate::error::{SpindriftError, SpindriftResult};
use crate::hooks::{Affector, Emitter, GroupMove, Painter, StateEngine};
use crate::particle::{GroupId, SlotHandle};
use crate::sync::{ChangeFeed, FeedReader, TickDigest};
use crate::system::ParticleSystem;
use crate::time::SimTime;

/// Controller state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SystemState {
    /// Created, never started.
    #[default]
    Uninitialized,
    /// Ticks advance.
    Running,
    /// Ticks are skipped; particles are kept.
    Paused,
    /// Particles were discarded; ticks are skipped until `start`.
    Stopped,
    /// Terminal. Every further call fails.
    Destroyed,
}

/// What one tick did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickSummary {
    /// Tick number.
    pub tick: u64,
    /// Simulation time of the tick.
    pub now: SimTime,
    /// Seconds since the previous tick.
    pub elapsed: f32,
    /// No particle was live after the recycle pass.
    pub empty: bool,
    /// `empty` differs from the previous tick.
    pub empty_changed: bool,
    /// Live particles at the end of the tick.
    pub live: usize,
    /// Group moves that took effect.
    pub moved: usize,
    /// Particles affectors reported as changed.
    pub reloaded: usize,
}

/// Drives a [`ParticleSystem`] and its hooks.
pub struct StepController {
    system: ParticleSystem,
    emitters: Vec<(Box<dyn Emitter>, GroupId)>,
    affectors: Vec<Box<dyn Affector>>,
    painters: Vec<Box<dyn Painter>>,
    state_engine: Option<Box<dyn StateEngine>>,
    feed: Option<ChangeFeed>,
    state: SystemState,
    trace: bool,
    last_ms: i64,
    tick: u64,
    empty: bool,
    /// Scratch buffers reused every tick.
    moves: Vec<GroupMove>,
    loaded: Vec<SlotHandle>,
}

impl std::fmt::Debug for StepController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepController")
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("last_ms", &self.last_ms)
            .field("empty", &self.empty)
            .field("emitters", &self.emitters.len())
            .field("affectors", &self.affectors.len())
            .field("painters", &self.painters.len())
            .field("state_engine", &self.state_engine.is_some())
            .field("feed", &self.feed.is_some())
            .finish_non_exhaustive()
    }
}

impl StepController {
    /// Creates a controller in the `Uninitialized` state.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: &SystemConfig) -> SpindriftResult<Self> {
        Ok(Self {
            system: ParticleSystem::new(config)?,
            emitters: Vec::new(),
            affectors: Vec::new(),
            painters: Vec::new(),
            state_engine: None,
            feed: None,
            state: SystemState::Uninitialized,
            trace: config.trace,
            last_ms: 0,
            tick: 0,
            empty: true,
            moves: Vec::new(),
            loaded: Vec::new(),
        })
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> SystemState {
        self.state
    }

    /// Number of ticks advanced so far.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Whether the last recycle pass left no live particle.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.empty
    }

    /// The particle system.
    #[inline]
    #[must_use]
    pub const fn system(&self) -> &ParticleSystem {
        &self.system
    }

    /// The particle system, mutably. Changes made between ticks are
    /// delivered with the next tick.
    #[inline]
    pub fn system_mut(&mut self) -> &mut ParticleSystem {
        &mut self.system
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers an emitter and applies its declaration.
    ///
    /// Returns the group it emits into.
    pub fn add_emitter(&mut self, emitter: impl Emitter + 'static) -> GroupId {
        let group = self.system.declare_emitter(&emitter.declaration());
        self.emitters.push((Box::new(emitter), group));
        group
    }

    /// Registers an affector.
    pub fn add_affector(&mut self, affector: impl Affector + 'static) {
        self.affectors.push(Box::new(affector));
    }

    /// Registers a painter.
    pub fn add_painter(&mut self, painter: impl Painter + 'static) {
        self.painters.push(Box::new(painter));
    }

    /// Installs the state engine, replacing any previous one.
    pub fn set_state_engine(&mut self, engine: impl StateEngine + 'static) {
        self.state_engine = Some(Box::new(engine));
    }

    /// Opens the sync boundary. A previously attached feed is replaced and
    /// its reader sees a disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::Destroyed`] after [`StepController::destroy`].
    pub fn attach_feed(&mut self, capacity: usize) -> SpindriftResult<FeedReader> {
        self.ensure_alive()?;
        let (feed, reader) = ChangeFeed::new(capacity);
        self.feed = Some(feed);
        debug!(capacity, "change feed attached");
        Ok(reader)
    }

    /// Blocks until the feed reader has received the latest tick.
    ///
    /// Returns at once when no feed is attached.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::Destroyed`] after [`StepController::destroy`].
    pub fn sync(&self) -> SpindriftResult<()> {
        self.ensure_alive()?;
        if let Some(feed) = &self.feed {
            feed.sync();
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn ensure_alive(&self) -> SpindriftResult<()> {
        if self.state == SystemState::Destroyed {
            return Err(SpindriftError::Destroyed);
        }
        Ok(())
    }

    fn transition(&mut self, to: SystemState) {
        if self.state != to {
            debug!(from = ?self.state, to = ?to, "particle system state change");
            self.state = to;
        }
    }

    /// Starts or restarts ticking. Resumes a paused controller.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::Destroyed`] after [`StepController::destroy`].
    pub fn start(&mut self) -> SpindriftResult<()> {
        self.ensure_alive()?;
        self.transition(SystemState::Running);
        Ok(())
    }

    /// Discards every particle and suspends ticking until `start`.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::Destroyed`] after [`StepController::destroy`].
    pub fn stop(&mut self) -> SpindriftResult<()> {
        self.reset()?;
        self.transition(SystemState::Stopped);
        Ok(())
    }

    /// Suspends ticking, keeping particles. Only affects a running controller.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::Destroyed`] after [`StepController::destroy`].
    pub fn pause(&mut self) -> SpindriftResult<()> {
        self.ensure_alive()?;
        if self.state == SystemState::Running {
            self.transition(SystemState::Paused);
        }
        Ok(())
    }

    /// Resumes a paused controller.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::Destroyed`] after [`StepController::destroy`].
    pub fn resume(&mut self) -> SpindriftResult<()> {
        self.ensure_alive()?;
        if self.state == SystemState::Paused {
            self.transition(SystemState::Running);
        }
        Ok(())
    }

    /// Discards every particle and identity, rewinds the clock to zero and
    /// resets every hook. Group capacity is kept; state is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::Destroyed`] after [`StepController::destroy`].
    pub fn reset(&mut self) -> SpindriftResult<()> {
        self.ensure_alive()?;
        self.system.clear();
        for (emitter, _) in &mut self.emitters {
            emitter.reset();
        }
        for painter in &mut self.painters {
            painter.reset();
        }
        if let Some(engine) = self.state_engine.as_mut() {
            engine.reset();
        }
        self.last_ms = 0;
        self.empty = true;
        debug!(tick = self.tick, "particle system reset");
        Ok(())
    }

    /// Releases everything. The controller accepts no further calls.
    pub fn destroy(&mut self) {
        if self.state == SystemState::Destroyed {
            return;
        }
        self.system.clear();
        self.emitters.clear();
        self.affectors.clear();
        self.painters.clear();
        self.state_engine = None;
        self.feed = None;
        self.transition(SystemState::Destroyed);
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advances the simulation to `now_ms`.
    ///
    /// Returns `None` without doing anything unless the controller is
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::Destroyed`] after [`StepController::destroy`].
    pub fn advance(&mut self, now_ms: i64) -> SpindriftResult<Option<TickSummary>> {
        self.ensure_alive()?;
        if self.state != SystemState::Running {
            return Ok(None);
        }

        let now = SimTime::from_ms(now_ms);
        #[allow(clippy::cast_precision_loss)]
        let elapsed = (now_ms - self.last_ms) as f32 / 1000.0;
        self.last_ms = now_ms;
        self.tick += 1;

        let empty = self.system.recycle_all(now);
        let moved = self.apply_moves(now);

        for (emitter, group) in &mut self.emitters {
            emitter.emit(*group, elapsed, &mut self.system);
        }

        let reloaded = self.run_affectors(elapsed);
        self.deliver();
        self.publish(empty);
        self.system.clear_changes();

        let empty_changed = empty != self.empty;
        if empty_changed {
            debug!(empty, tick = self.tick, "particle system emptiness changed");
            self.empty = empty;
        }

        let live = self.system.live_count();
        if self.trace {
            trace!(tick = self.tick, now_ms, live, moved, reloaded, "tick complete");
        }

        Ok(Some(TickSummary {
            tick: self.tick,
            now,
            elapsed,
            empty,
            empty_changed,
            live,
            moved,
            reloaded,
        }))
    }

    fn apply_moves(&mut self, now: SimTime) -> usize {
        let Some(engine) = self.state_engine.as_mut() else {
            return 0;
        };
        self.moves.clear();
        engine.update_state(now, &mut self.moves);

        let mut moved = 0;
        for request in self.moves.drain(..) {
            let Some(handle) = self.system.resolve(request.index) else {
                continue;
            };
            if self.system.move_groups(handle, request.to).is_some() {
                moved += 1;
            }
        }
        moved
    }

    fn run_affectors(&mut self, elapsed: f32) -> usize {
        if self.affectors.is_empty() {
            return 0;
        }
        self.loaded.clear();
        self.loaded.extend(self.system.changes().loaded_since(0));

        let mut reloaded = 0;
        for affector in &mut self.affectors {
            if affector.needs_reset() {
                for &handle in &self.loaded {
                    if !affector.accepts(handle.group()) {
                        continue;
                    }
                    if let Some(particle) = self.system.get(handle) {
                        affector.reset(particle);
                    }
                }
            }
            reloaded += self.system.apply_affector(affector.as_mut(), elapsed);
        }
        reloaded
    }

    /// Hands the change list to painters and the state engine.
    ///
    /// A handle whose slot was handed out again within the tick no longer
    /// resolves and is skipped.
    fn deliver(&mut self) {
        for change in self.system.changes().as_slice() {
            match *change {
                Change::Loaded(handle) => {
                    let Some(particle) = self.system.record(handle) else {
                        continue;
                    };
                    for painter in &mut self.painters {
                        if painter.accepts(handle.group()) {
                            painter.load(particle);
                        }
                    }
                    if let (Some(engine), Some(index)) =
                        (self.state_engine.as_mut(), particle.global_index())
                    {
                        engine.track(index, handle.group());
                    }
                }
                Change::Reloaded(handle) => {
                    let Some(particle) = self.system.record(handle) else {
                        continue;
                    };
                    for painter in &mut self.painters {
                        if painter.accepts(handle.group()) {
                            painter.reload(particle);
                        }
                    }
                }
                Change::Resized { group, old, new } => {
                    for painter in &mut self.painters {
                        if painter.accepts(group) {
                            painter.resize(group, old, new);
                        }
                    }
                }
                Change::Released(index) => {
                    if let Some(engine) = self.state_engine.as_mut() {
                        engine.untrack(index);
                    }
                }
            }
        }
    }

    fn publish(&mut self, empty: bool) {
        let Some(feed) = self.feed.take() else {
            return;
        };
        match feed.publish(TickDigest::capture(self.tick, empty, &self.system)) {
            Ok(true) => self.feed = Some(feed),
            Ok(false) => {
                debug!(
                    tick = self.tick,
                    dropped = feed.dropped(),
                    "change feed reader lagging, digest dropped"
                );
                self.feed = Some(feed);
            }
            Err(err) => warn!(%err, tick = self.tick, "change feed reader gone, detaching"),
        }
    }
}
