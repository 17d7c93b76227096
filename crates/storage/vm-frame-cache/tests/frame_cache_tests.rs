//! Frame cache behaviour through the public API
//!
//! Coverage:
//! - Lifecycle (configure / initialize / shutdown cycles)
//! - LRU eviction order and tie-breaking
//! - Statistics

use vm_frame_cache::{
    CacheConfig, CacheEntry, CacheError, DEFAULT_VOLUME, FRAME_SIZE, Frame, FrameCache, FrameIndex,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn patterned(seed: u8) -> Frame {
    let mut frame = [0u8; FRAME_SIZE];
    for (i, byte) in frame.iter_mut().enumerate() {
        *byte = seed.wrapping_add(i as u8);
    }
    frame
}

#[test]
fn test_every_uninserted_frame_is_absent() {
    init_logger();
    let mut cache = FrameCache::with_capacity(8);
    cache.initialize().unwrap();
    for frame in [0, 1, 255, 4096, FrameIndex::MAX] {
        assert!(cache.get(DEFAULT_VOLUME, frame).unwrap().is_none());
    }
    assert_eq!(cache.stats().misses, 5);
    assert_eq!(cache.stats().hits, 0);
}

#[test]
fn test_capacity_plus_one_evicts_globally_oldest() {
    init_logger();
    let capacity = 6;
    let mut cache = FrameCache::with_capacity(capacity);
    cache.initialize().unwrap();

    for frame in 0..capacity as FrameIndex {
        cache.put(DEFAULT_VOLUME, frame, &patterned(frame as u8)).unwrap();
    }
    // Touch everything except frame 3 so it becomes the oldest
    for frame in [0, 1, 2, 4, 5] {
        assert!(cache.get(DEFAULT_VOLUME, frame).unwrap().is_some());
    }

    cache.put(DEFAULT_VOLUME, 100, &patterned(100)).unwrap();
    assert_eq!(cache.len(), capacity);
    assert!(cache.get(DEFAULT_VOLUME, 3).unwrap().is_none());
    for frame in [0, 1, 2, 4, 5, 100] {
        assert!(cache.contains(frame), "frame {} should be cached", frame);
    }
}

#[test]
fn test_read_heavy_frame_survives_streaming_inserts() {
    let mut cache = FrameCache::with_capacity(4);
    cache.initialize().unwrap();
    cache.put(DEFAULT_VOLUME, 0, &patterned(0)).unwrap();

    for frame in 1..50 {
        assert!(cache.get(DEFAULT_VOLUME, 0).unwrap().is_some());
        cache.put(DEFAULT_VOLUME, frame, &patterned(frame as u8)).unwrap();
    }
    assert_eq!(cache.get(DEFAULT_VOLUME, 0).unwrap(), Some(&patterned(0)));
    assert_eq!(cache.len(), 4);
}

#[test]
fn test_repeated_lifecycle_never_exceeds_capacity() {
    init_logger();
    let config = CacheConfig::with_capacity(3);
    let mut cache = FrameCache::with_config(&config);

    for round in 0..5u32 {
        cache.configure(config.capacity);
        cache.initialize().unwrap();
        assert!(cache.is_empty());

        for frame in 0..20 {
            cache
                .put(DEFAULT_VOLUME, frame + round * 100, &patterned(frame as u8))
                .unwrap();
            assert!(cache.len() <= config.capacity);
        }
        assert_eq!(cache.len(), config.capacity);
        assert_eq!(cache.entries().count(), config.capacity);

        cache.shutdown().unwrap();
        assert_eq!(cache.len(), 0);
    }
}

#[test]
fn test_lifecycle_misuse_is_an_error() {
    let mut cache = FrameCache::new();
    assert_eq!(
        cache.get(DEFAULT_VOLUME, 0).unwrap_err(),
        CacheError::NotInitialized
    );
    cache.initialize().unwrap();
    assert_eq!(cache.initialize().unwrap_err(), CacheError::AlreadyInitialized);
}

#[test]
fn test_stats_track_each_outcome() {
    let mut cache = FrameCache::with_capacity(1);
    cache.initialize().unwrap();

    cache.put(DEFAULT_VOLUME, 1, &patterned(1)).unwrap(); // insertion
    cache.put(DEFAULT_VOLUME, 1, &patterned(2)).unwrap(); // refresh
    cache.put(DEFAULT_VOLUME, 2, &patterned(3)).unwrap(); // eviction
    let _ = cache.get(DEFAULT_VOLUME, 2).unwrap(); // hit
    let _ = cache.get(DEFAULT_VOLUME, 1).unwrap(); // miss

    let stats = cache.stats();
    assert_eq!(stats.insertions, 1);
    assert_eq!(stats.refreshes, 1);
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    cache.reset_stats();
    assert_eq!(cache.stats().lookups(), 0);
}

#[test]
fn test_stamps_are_strictly_increasing() {
    let mut cache = FrameCache::with_capacity(4);
    cache.initialize().unwrap();
    for frame in 0..4 {
        cache.put(DEFAULT_VOLUME, frame, &patterned(0)).unwrap();
    }
    let _ = cache.get(DEFAULT_VOLUME, 2).unwrap();
    let _ = cache.get(DEFAULT_VOLUME, 0).unwrap();

    let mut stamps: Vec<u64> = cache.entries().map(CacheEntry::access_stamp).collect();
    let len = stamps.len();
    stamps.sort_unstable();
    stamps.dedup();
    assert_eq!(stamps.len(), len);
}
