//! # System Configuration
//!
//! Host-supplied settings, loaded once at startup. Every field has a
//! default, so an empty TOML document is a valid configuration.
//!
//! ```toml
//! trace = false
//! max_life_ms = 600000
//! growth_increment = 10
//!
//! [[groups]]
//! name = "sparks"
//! capacity = 256
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SpindriftError, SpindriftResult};
use crate::index::IndexGrowth;

/// Lifespan treated as "lives forever" unless a declaration raises it.
pub const DEFAULT_MAX_LIFE_MS: i64 = 600_000;

/// Smallest accepted maximum lifespan. Long lives are rescheduled in steps of
/// a third of the maximum, which must stay at least one millisecond.
pub const MIN_MAX_LIFE_MS: i64 = 3;

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    /// Per-tick trace logging.
    pub trace: bool,
    /// Initial observed maximum lifespan in milliseconds.
    pub max_life_ms: i64,
    /// Slots added when an unlimited creation finds no free slot.
    pub growth_increment: usize,
    /// Geometric growth of the global index pool, in percent.
    pub index_growth_percent: usize,
    /// Minimum growth of the global index pool.
    pub index_min_growth: usize,
    /// Digests buffered by the change feed before new ones are dropped.
    pub feed_capacity: usize,
    /// Named groups to pre-size.
    pub groups: Vec<GroupConfig>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            trace: false,
            max_life_ms: DEFAULT_MAX_LIFE_MS,
            growth_increment: 10,
            index_growth_percent: 10,
            index_min_growth: 10,
            feed_capacity: 4,
            groups: Vec::new(),
        }
    }
}

/// A named group and its initial capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group name. The empty name is the default group.
    pub name: String,
    /// Slots to allocate up front.
    #[serde(default)]
    pub capacity: usize,
}

/// What an emitter promises about the particles it will create.
///
/// Group capacity is the sum of `maximum_emitted` over all declarations
/// for that group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterDeclaration {
    /// Target group name.
    pub group: String,
    /// Most particles this emitter keeps alive at once.
    pub maximum_emitted: usize,
    /// Nominal lifespan in milliseconds.
    pub lifespan_ms: i64,
    /// Maximum deviation from the nominal lifespan.
    #[serde(default)]
    pub lifespan_variation_ms: i64,
}

impl EmitterDeclaration {
    /// Longest lifespan this emitter can produce.
    #[inline]
    #[must_use]
    pub fn longest_life_ms(&self) -> i64 {
        self.lifespan_ms + self.lifespan_variation_ms.abs()
    }
}

impl SystemConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::ConfigParse`] for malformed TOML and
    /// [`SpindriftError::InvalidConfig`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> SpindriftResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::ConfigIo`] if the file cannot be read, or
    /// any error of [`SystemConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> SpindriftResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges and group name uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> SpindriftResult<()> {
        if self.max_life_ms < MIN_MAX_LIFE_MS {
            return Err(SpindriftError::InvalidConfig(format!(
                "max_life_ms must be at least {MIN_MAX_LIFE_MS}"
            )));
        }
        if self.growth_increment == 0 {
            return Err(SpindriftError::InvalidConfig(
                "growth_increment must be at least 1".into(),
            ));
        }
        if self.index_min_growth == 0 {
            return Err(SpindriftError::InvalidConfig(
                "index_min_growth must be at least 1".into(),
            ));
        }
        if self.feed_capacity == 0 {
            return Err(SpindriftError::InvalidConfig(
                "feed_capacity must be at least 1".into(),
            ));
        }
        let mut names = HashSet::new();
        for group in &self.groups {
            if !names.insert(group.name.as_str()) {
                return Err(SpindriftError::InvalidConfig(format!(
                    "group {:?} is declared twice",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// Growth policy for the global index pool.
    #[must_use]
    pub fn index_growth(&self) -> IndexGrowth {
        IndexGrowth {
            percent: self.index_growth_percent,
            minimum: self.index_min_growth,
        }
    }
}
