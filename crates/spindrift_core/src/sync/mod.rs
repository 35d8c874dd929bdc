//! # Sync Boundary
//!
//! The single point where a consumer on another thread observes particle
//! state. After every tick the controller publishes a [`TickDigest`]; a
//! consumer receives it through a [`FeedReader`].
//!
//! ```text
//! sim thread                         consumer thread
//! ──────────                         ───────────────
//! advance()  ── publish(digest N) ──> recv() → digest N   (marks N delivered)
//! sync()     <── blocks until N delivered ──┘
//! ```
//!
//! Snapshots are copies, so the consumer never reads storage the next tick
//! is mutating.

mod feed;

use crate::change::Change;
use crate::particle::Particle;
use crate::system::ParticleSystem;

pub use feed::{ChangeFeed, FeedReader};

/// Everything a consumer needs to mirror one tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickDigest {
    /// Tick number. Never reused, even across controller resets.
    pub tick: u64,
    /// Simulation time of the tick in milliseconds.
    pub now_ms: i64,
    /// Whether no particle was live after the recycle pass.
    pub empty: bool,
    /// The tick's change list, in order.
    pub changes: Vec<Change>,
    /// Copies of the particles named by `Loaded` and `Reloaded` changes that
    /// still hold their slot at the end of the tick.
    pub snapshots: Vec<Particle>,
}

impl TickDigest {
    /// Captures the system's current change list.
    #[must_use]
    pub fn capture(tick: u64, empty: bool, system: &ParticleSystem) -> Self {
        let changes = system.changes().as_slice().to_vec();
        let snapshots = changes
            .iter()
            .filter_map(|change| match change {
                Change::Loaded(handle) | Change::Reloaded(handle) => system.record(*handle),
                _ => None,
            })
            .cloned()
            .collect();
        Self {
            tick,
            now_ms: system.now().ms(),
            empty,
            changes,
            snapshots,
        }
    }
}
