//! # Recycling
//!
//! Slot storage and expiration scheduling for particle groups.
//!
//! ## Design Philosophy
//!
//! - Storage only grows; a dead particle's slot goes back to a free set
//! - Expirations live in a min-heap keyed by rounded death time
//! - Identical death times share one heap node
//! - Queue entries carry a slot generation so stale entries are detectable

mod group;
mod queue;

pub use group::{GroupStore, SlotRef};
pub use queue::ExpirationQueue;
