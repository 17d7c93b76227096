//! Block layer errors

use thiserror::Error;
use vm_frame_cache::{CacheError, ConfigError, FrameIndex};

use crate::file_table::Fd;
use crate::frame_device::FrameDeviceError;

/// Errors returned by the translator, the file table and the driver
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Block device is powered off")]
    PoweredOff,

    #[error("Block device is already powered on")]
    AlreadyPoweredOn,

    #[error("Invalid file handle: {0}")]
    InvalidHandle(Fd),

    #[error("File handle {0} is closed")]
    HandleClosed(Fd),

    #[error("Seek to {offset} is past the end of the file ({size} bytes)")]
    SeekOutOfRange { offset: u64, size: u64 },

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("File table is full ({0} files)")]
    TooManyFiles(usize),

    #[error("Frame allocation failed: {0}")]
    AllocationFailed(String),

    #[error("File has no frame for slot {slot}")]
    MissingFrame { slot: usize },

    /// A frame transfer failed part way through a read or write
    #[error("Device {op} of frame {frame} failed after {transferred} bytes: {source}")]
    Transfer {
        op: &'static str,
        frame: FrameIndex,
        transferred: usize,
        #[source]
        source: FrameDeviceError,
    },

    #[error("Device error: {0}")]
    Device(#[from] FrameDeviceError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BlockError {
    /// Bytes moved before the operation failed
    pub fn transferred(&self) -> usize {
        match self {
            Self::Transfer { transferred, .. } => *transferred,
            _ => 0,
        }
    }
}
