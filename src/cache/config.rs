//! Cache configuration.
//!
//! Resolved from the `[cache]` section of the settings file.

use std::num::NonZeroUsize;
use std::time::Duration;

// Default values for cache configuration
pub(crate) const DEFAULT_ENTITY_TTL_SECS: u64 = 12 * 60 * 60;
pub(crate) const DEFAULT_LIST_TTL_SECS: u64 = 12 * 60 * 60;
pub(crate) const DEFAULT_COUNT_TTL_SECS: u64 = 30;
pub(crate) const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
pub(crate) const DEFAULT_OP_TIMEOUT_MS: u64 = 250;
/// Longest TTL accepted for any entry.
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub(crate) fn default_op_timeout() -> Duration {
    Duration::from_millis(DEFAULT_OP_TIMEOUT_MS)
}

/// Which cache store backs the loaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redis { url: String },
    Memory,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// TTL for single-entity entries.
    pub entity_ttl: Duration,
    /// TTL for whole-list entries.
    pub list_ttl: Duration,
    /// TTL for derived counts.
    pub count_ttl: Duration,
    /// Entry ceiling for the in-process store.
    pub memory_capacity: usize,
    /// Deadline for a single store command before it counts as a miss.
    pub op_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            entity_ttl: Duration::from_secs(DEFAULT_ENTITY_TTL_SECS),
            list_ttl: Duration::from_secs(DEFAULT_LIST_TTL_SECS),
            count_ttl: Duration::from_secs(DEFAULT_COUNT_TTL_SECS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            op_timeout: default_op_timeout(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend.clone(),
            entity_ttl: settings.entity_ttl,
            list_ttl: settings.list_ttl,
            count_ttl: settings.count_ttl,
            memory_capacity: settings.memory_capacity.get(),
            op_timeout: settings.op_timeout,
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, CacheBackend::Disabled)
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
