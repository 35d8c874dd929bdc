//! # SPINDRIFT Core Engine
//!
//! Lifecycle and storage engine for large populations of short-lived
//! particles, designed for:
//! - Hundreds of thousands of particles created and destroyed per second
//! - No per-tick heap allocation once storage has warmed up
//! - Particles that hop between groups without losing their identity
//!
//! ## Architecture Rules
//!
//! 1. **Storage only grows** - Dead particles return their slot to a free set
//! 2. **No per-tick integration** - Position is a closed-form function of time
//! 3. **Weak cross references** - Only the group store owns a particle; the
//!    index table, expiration queue and change list hold generation-checked
//!    handles
//! 4. **One thread mutates** - Consumers on other threads read copies through
//!    the sync feed
//!
//! ## Example
//!
//! ```rust,ignore
//! use spindrift_core::{StepController, SystemConfig};
//!
//! let mut controller = StepController::new(&SystemConfig::default())?;
//! controller.add_emitter(my_emitter);
//! controller.start()?;
//! controller.advance(16)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod change;
pub mod config;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod index;
pub mod particle;
pub mod recycle;
pub mod sync;
pub mod system;
pub mod time;

pub use change::{Change, ChangeList};
pub use config::{
    EmitterDeclaration, GroupConfig, SystemConfig, DEFAULT_MAX_LIFE_MS, MIN_MAX_LIFE_MS,
};
pub use controller::{StepController, SystemState, TickSummary};
pub use error::{SpindriftError, SpindriftResult};
pub use hooks::{Affector, Emitter, GroupMove, Painter, StateEngine};
pub use index::{IndexGrowth, IndexTable};
pub use particle::{Appearance, GlobalIndex, GroupId, Particle, SlotHandle};
pub use recycle::{ExpirationQueue, GroupStore, SlotRef};
pub use sync::{ChangeFeed, FeedReader, TickDigest};
pub use system::{Emission, ParticleSystem};
pub use time::{rounded_ms, SimTime, EPSILON_SECS, FAR_FUTURE_MS};
