//! # Frame Cache
//!
//! Fixed-capacity, least-recently-used cache of device frames.
//!
//! A frame is the device's unit of transfer: exactly [`FRAME_SIZE`] bytes
//! addressed by a flat [`FrameIndex`]. The cache holds at most one copy per
//! frame index and is driven through an explicit lifecycle:
//!
//! ```text
//! configure(capacity) -> initialize() -> get/put ... -> shutdown()
//! ```
//!
//! # Example
//!
//! ```rust
//! use vm_frame_cache::{DEFAULT_VOLUME, FRAME_SIZE, FrameCache};
//!
//! let mut cache = FrameCache::new();
//! cache.configure(2);
//! cache.initialize().unwrap();
//!
//! cache.put(DEFAULT_VOLUME, 10, &[0xAA; FRAME_SIZE]).unwrap();
//! assert!(cache.get(DEFAULT_VOLUME, 10).unwrap().is_some());
//! assert!(cache.get(DEFAULT_VOLUME, 11).unwrap().is_none());
//!
//! cache.shutdown().unwrap();
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod stats;

pub use cache::{CacheEntry, FrameCache};
pub use config::CacheConfig;
pub use error::{CacheError, ConfigError};
pub use stats::CacheStats;

/// Size of one device frame in bytes
pub const FRAME_SIZE: usize = 1024;

/// Number of frames a cache holds when no capacity is configured
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Volume used by callers that only address a single device
pub const DEFAULT_VOLUME: VolumeId = 0;

/// One frame's worth of bytes
pub type Frame = [u8; FRAME_SIZE];

/// Flat index of a frame on the device
pub type FrameIndex = u32;

/// Secondary identifier accepted alongside a frame index.
///
/// Entries remember the volume they were inserted with, but lookups and
/// eviction match on the frame index alone.
pub type VolumeId = u32;
