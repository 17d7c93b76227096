//! Cache counters

use serde::{Deserialize, Serialize};

/// Counters collected by a [`FrameCache`](crate::FrameCache) since its last
/// `initialize` (or [`reset_stats`](crate::FrameCache::reset_stats)).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that found the frame
    pub hits: u64,
    /// Lookups that did not find the frame
    pub misses: u64,
    /// Frames placed into a previously unused slot
    pub insertions: u64,
    /// `put` calls that overwrote an already cached frame
    pub refreshes: u64,
    /// Frames dropped to make room for another frame
    pub evictions: u64,
}

impl CacheStats {
    /// Total number of lookups
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that hit, `0.0` when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
