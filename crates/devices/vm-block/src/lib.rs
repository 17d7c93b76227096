//! # Block Storage
//!
//! Byte-addressable files on top of a device that only transfers whole
//! frames. Every file-level read or write is split into frame accesses by
//! the [`FrameTranslator`], which keeps a [`FrameCache`] in front of the
//! device:
//!
//! - reads are served from the cache when possible and populate it on a miss
//! - writes merge into the current frame contents, are written through to the
//!   device, and then refresh the cache
//!
//! [`BlockDriver`] ties the pieces to the device power cycle: metadata is
//! loaded and the cache initialized at power-on, and both are torn down at
//! power-off.

pub mod config;
pub mod driver;
pub mod error;
pub mod file_table;
pub mod frame_device;
pub mod translator;

pub use config::BlockConfig;
pub use driver::BlockDriver;
pub use error::BlockError;
pub use file_table::{Fd, FileHandle, FileRecord, FileTable, HandleStatus, OpenFile};
pub use frame_device::{FileFrameDevice, FrameDevice, FrameDeviceError, MemFrameDevice};
pub use translator::{FileExtent, FrameTranslator};

pub use vm_frame_cache::{
    CacheStats, DEFAULT_VOLUME, FRAME_SIZE, Frame, FrameCache, FrameIndex, VolumeId,
};
