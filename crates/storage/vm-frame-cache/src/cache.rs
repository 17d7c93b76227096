//! LRU frame cache
//!
//! Slots live in a fixed arena allocated at `initialize`. A hash index maps
//! frame indices to slots for lookup; eviction scans every slot for the
//! smallest access stamp, and the first slot holding that stamp is the victim.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::stats::CacheStats;
use crate::{DEFAULT_CACHE_CAPACITY, FRAME_SIZE, Frame, FrameIndex, VolumeId};

/// One cached frame
#[derive(Debug, Clone)]
pub struct CacheEntry {
    volume: VolumeId,
    frame: FrameIndex,
    contents: Box<Frame>,
    access_stamp: u64,
}

impl CacheEntry {
    pub fn volume(&self) -> VolumeId {
        self.volume
    }

    pub fn frame(&self) -> FrameIndex {
        self.frame
    }

    pub fn contents(&self) -> &Frame {
        &self.contents
    }

    /// Recency of the last touch; larger is more recent
    pub fn access_stamp(&self) -> u64 {
        self.access_stamp
    }
}

/// Storage that exists only between `initialize` and `shutdown`
struct ActiveCache {
    /// `None` marks an unused slot
    slots: Vec<Option<CacheEntry>>,
    index: FxHashMap<FrameIndex, usize>,
    /// Last stamp handed out, shared by every slot
    clock: u64,
}

impl ActiveCache {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            clock: 0,
        }
    }

    #[inline]
    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn first_unused(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Slot with the smallest stamp; earlier slots win ties
    fn least_recent(&self) -> Option<usize> {
        let mut victim: Option<(usize, u64)> = None;
        for (slot, entry) in self.slots.iter().enumerate() {
            let Some(entry) = entry else { continue };
            match victim {
                Some((_, stamp)) if entry.access_stamp >= stamp => {}
                _ => victim = Some((slot, entry.access_stamp)),
            }
        }
        victim.map(|(slot, _)| slot)
    }
}

/// Fixed-capacity LRU cache keyed by frame index
///
/// The cache is inert until [`initialize`](Self::initialize) is called and
/// releases all of its storage on [`shutdown`](Self::shutdown). Capacity is
/// chosen with [`configure`](Self::configure) and only takes effect at the
/// next `initialize`.
pub struct FrameCache {
    configured_capacity: usize,
    active: Option<ActiveCache>,
    stats: CacheStats,
}

impl FrameCache {
    /// Create an inactive cache with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create an inactive cache that will hold `capacity` frames once initialized
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            configured_capacity: capacity,
            active: None,
            stats: CacheStats::default(),
        }
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        Self::with_capacity(config.capacity)
    }

    /// Set the number of frames the next `initialize` allocates.
    ///
    /// A running cache keeps its current size; there is no resize in place.
    /// A capacity of zero yields a cache that never retains a frame.
    pub fn configure(&mut self, capacity: usize) {
        if self.active.is_some() {
            debug!(
                "Frame cache capacity set to {} while active; applies at next initialize",
                capacity
            );
        }
        self.configured_capacity = capacity;
    }

    /// Allocate the slot arena with every slot unused
    ///
    /// # Errors
    ///
    /// `CacheError::AlreadyInitialized` if the cache is already active.
    pub fn initialize(&mut self) -> Result<(), CacheError> {
        if self.active.is_some() {
            return Err(CacheError::AlreadyInitialized);
        }
        self.active = Some(ActiveCache::new(self.configured_capacity));
        self.stats = CacheStats::default();
        debug!(
            "Frame cache initialized with {} slots",
            self.configured_capacity
        );
        Ok(())
    }

    /// Drop every entry and release the arena
    ///
    /// # Errors
    ///
    /// `CacheError::NotInitialized` if the cache is not active.
    pub fn shutdown(&mut self) -> Result<(), CacheError> {
        let active = self.active.take().ok_or(CacheError::NotInitialized)?;
        debug!(
            "Frame cache shut down ({} of {} slots in use, {:?})",
            active.index.len(),
            active.slots.len(),
            self.stats
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// Slot count of the running cache, or the configured count when inactive
    pub fn capacity(&self) -> usize {
        self.active
            .as_ref()
            .map_or(self.configured_capacity, |active| active.slots.len())
    }

    pub fn configured_capacity(&self) -> usize {
        self.configured_capacity
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `frame` is cached, without touching its recency
    pub fn contains(&self, frame: FrameIndex) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.index.contains_key(&frame))
    }

    /// Occupied entries in slot order
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.active
            .iter()
            .flat_map(|active| active.slots.iter().flatten())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    /// Look up a cached frame.
    ///
    /// A hit refreshes the entry's recency and returns its contents; a miss
    /// returns `Ok(None)`. The volume is not used for matching.
    ///
    /// # Errors
    ///
    /// `CacheError::NotInitialized` if the cache is not active.
    pub fn get(
        &mut self,
        volume: VolumeId,
        frame: FrameIndex,
    ) -> Result<Option<&Frame>, CacheError> {
        let active = self.active.as_mut().ok_or(CacheError::NotInitialized)?;

        let Some(slot) = active.index.get(&frame).copied() else {
            self.stats.misses += 1;
            trace!("Frame cache miss: volume={} frame={}", volume, frame);
            return Ok(None);
        };

        self.stats.hits += 1;
        trace!("Frame cache hit: volume={} frame={} slot={}", volume, frame, slot);
        let stamp = active.next_stamp();
        Ok(active.slots[slot].as_mut().map(|entry| {
            entry.access_stamp = stamp;
            &*entry.contents
        }))
    }

    /// Insert or refresh the cached copy of a frame.
    ///
    /// An existing entry is overwritten in place. Otherwise the frame takes
    /// the first unused slot, or replaces the least recently touched entry
    /// when every slot is occupied.
    ///
    /// # Errors
    ///
    /// `CacheError::NotInitialized` if the cache is not active.
    pub fn put(
        &mut self,
        volume: VolumeId,
        frame: FrameIndex,
        contents: &Frame,
    ) -> Result<(), CacheError> {
        let active = self.active.as_mut().ok_or(CacheError::NotInitialized)?;
        let stamp = active.next_stamp();

        if let Some(slot) = active.index.get(&frame).copied() {
            if let Some(entry) = active.slots[slot].as_mut() {
                entry.contents.copy_from_slice(contents);
                entry.access_stamp = stamp;
            }
            self.stats.refreshes += 1;
            return Ok(());
        }

        if let Some(slot) = active.first_unused() {
            active.slots[slot] = Some(CacheEntry {
                volume,
                frame,
                contents: Box::new(*contents),
                access_stamp: stamp,
            });
            active.index.insert(frame, slot);
            self.stats.insertions += 1;
            return Ok(());
        }

        let Some(slot) = active.least_recent() else {
            // Zero-capacity cache
            return Ok(());
        };
        if let Some(entry) = active.slots[slot].as_mut() {
            debug!(
                "Frame cache evicting frame {} (stamp {}) for frame {}",
                entry.frame, entry.access_stamp, frame
            );
            active.index.remove(&entry.frame);
            entry.volume = volume;
            entry.frame = frame;
            entry.contents.copy_from_slice(contents);
            entry.access_stamp = stamp;
            active.index.insert(frame, slot);
            self.stats.evictions += 1;
        }
        Ok(())
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("initialized", &self.is_initialized())
            .field("frame_size", &FRAME_SIZE)
            .field("stats", &self.stats)
            .finish()
    }
}
