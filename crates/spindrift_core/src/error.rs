//! # Error Types
//!
//! Failures visible to the host. Soft outcomes of the hot path (no free
//! slot, no-op group move) are `None`, never errors.

use thiserror::Error;

/// Errors returned by host-facing operations.
#[derive(Error, Debug)]
pub enum SpindriftError {
    /// A group name or id is not registered.
    #[error("unknown particle group: {0}")]
    UnknownGroup(String),

    /// Configuration values are out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text is not valid TOML for the schema.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Group storage never shrinks.
    #[error("group {group} cannot shrink from {current} to {requested} slots")]
    ShrinkRejected {
        /// Raw group id.
        group: u32,
        /// Current size.
        current: usize,
        /// Requested size.
        requested: usize,
    },

    /// The controller was destroyed and accepts no further calls.
    #[error("particle system has been destroyed")]
    Destroyed,

    /// The consumer side of the change feed went away.
    #[error("change feed consumer disconnected")]
    FeedDisconnected,
}

/// Result type for engine operations.
pub type SpindriftResult<T> = Result<T, SpindriftError>;
