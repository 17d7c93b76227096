//! # Frame Device Trait
//!
//! Common interface for devices that transfer storage in whole frames.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::Mutex;
use thiserror::Error;
use vm_frame_cache::{FRAME_SIZE, Frame, FrameIndex};

/// Frame device errors
#[derive(Error, Debug)]
pub enum FrameDeviceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame index: {0}")]
    InvalidFrame(FrameIndex),

    #[error("Device not ready")]
    NotReady,

    #[error("Write protected")]
    WriteProtected,

    #[error("Device error: {0}")]
    DeviceError(String),
}

/// Generic frame device trait
///
/// Every transfer moves exactly one [`Frame`] addressed by a flat index.
pub trait FrameDevice: Send + Sync {
    /// Bring the device up before any transfer
    fn power_on(&self) -> Result<(), FrameDeviceError> {
        Ok(())
    }

    /// Take the device down; transfers fail until the next `power_on`
    fn power_off(&self) -> Result<(), FrameDeviceError> {
        Ok(())
    }

    /// Read frame `index` into `frame`
    fn read_frame(&self, index: FrameIndex, frame: &mut Frame) -> Result<(), FrameDeviceError>;

    /// Write `frame` to frame `index`
    fn write_frame(&self, index: FrameIndex, frame: &Frame) -> Result<(), FrameDeviceError>;

    /// Flush device cache
    fn flush(&self) -> Result<(), FrameDeviceError> {
        Ok(())
    }

    /// Number of addressable frames
    fn frame_count(&self) -> FrameIndex;

    /// Device size in bytes
    fn size(&self) -> u64 {
        u64::from(self.frame_count()) * FRAME_SIZE as u64
    }
}

/// Frame device backed by an image file
///
/// Frame `i` lives at byte offset `i * FRAME_SIZE` of the image.
pub struct FileFrameDevice {
    path: PathBuf,
    file: Mutex<File>,
    frames: FrameIndex,
}

impl FileFrameDevice {
    /// Open an existing image
    ///
    /// # Arguments
    ///
    /// * `path` - Path to an image whose length is a multiple of `FRAME_SIZE`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FrameDeviceError> {
        let path = path.as_ref();
        let file = File::options().read(true).write(true).open(path).map_err(|e| {
            FrameDeviceError::DeviceError(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let len = file.metadata()?.len();
        if len % FRAME_SIZE as u64 != 0 {
            return Err(FrameDeviceError::DeviceError(format!(
                "Image {} is {} bytes, not a whole number of {}-byte frames",
                path.display(),
                len,
                FRAME_SIZE
            )));
        }
        let frames = FrameIndex::try_from(len / FRAME_SIZE as u64).map_err(|_| {
            FrameDeviceError::DeviceError(format!("Image {} is too large", path.display()))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            frames,
        })
    }

    /// Create (or truncate) an image holding `frames` zeroed frames
    pub fn create<P: AsRef<Path>>(path: P, frames: FrameIndex) -> Result<Self, FrameDeviceError> {
        let path = path.as_ref();
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                FrameDeviceError::DeviceError(format!("Failed to create {}: {}", path.display(), e))
            })?;
        file.set_len(u64::from(frames) * FRAME_SIZE as u64)
            .map_err(|e| FrameDeviceError::DeviceError(format!("Failed to set size: {}", e)))?;

        debug!("Created {}-frame image at {}", frames, path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            frames,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn byte_offset(&self, index: FrameIndex) -> Result<u64, FrameDeviceError> {
        if index >= self.frames {
            return Err(FrameDeviceError::InvalidFrame(index));
        }
        Ok(u64::from(index) * FRAME_SIZE as u64)
    }
}

impl FrameDevice for FileFrameDevice {
    fn power_off(&self) -> Result<(), FrameDeviceError> {
        self.flush()
    }

    fn read_frame(&self, index: FrameIndex, frame: &mut Frame) -> Result<(), FrameDeviceError> {
        let offset = self.byte_offset(index)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(frame)?;
        Ok(())
    }

    fn write_frame(&self, index: FrameIndex, frame: &Frame) -> Result<(), FrameDeviceError> {
        let offset = self.byte_offset(index)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(frame)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), FrameDeviceError> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn frame_count(&self) -> FrameIndex {
        self.frames
    }
}

struct MemState {
    data: Vec<u8>,
    powered: bool,
    reads: u64,
    writes: u64,
    faulty_frame: Option<FrameIndex>,
}

/// In-memory frame device
///
/// Starts powered off and zero-filled. Counts every transfer and can be told
/// to fail transfers of one frame, which makes it the device of choice for
/// tests.
pub struct MemFrameDevice {
    state: Mutex<MemState>,
    frames: FrameIndex,
    read_only: bool,
}

impl MemFrameDevice {
    pub fn new(frames: FrameIndex) -> Self {
        Self {
            state: Mutex::new(MemState {
                data: vec![0u8; frames as usize * FRAME_SIZE],
                powered: false,
                reads: 0,
                writes: 0,
                faulty_frame: None,
            }),
            frames,
            read_only: false,
        }
    }

    /// Reject every write with `WriteProtected`
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Fail reads and writes of `frame` with a device error
    pub fn with_faulty_frame(self, frame: FrameIndex) -> Self {
        self.set_faulty_frame(Some(frame));
        self
    }

    pub fn set_faulty_frame(&self, frame: Option<FrameIndex>) {
        self.state.lock().faulty_frame = frame;
    }

    pub fn is_powered(&self) -> bool {
        self.state.lock().powered
    }

    /// Number of frame reads served so far
    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    /// Number of frame writes accepted so far
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    pub fn reset_counters(&self) {
        let mut state = self.state.lock();
        state.reads = 0;
        state.writes = 0;
    }

    /// Copy of a frame as stored, bypassing power state and counters
    pub fn frame(&self, index: FrameIndex) -> Option<Frame> {
        let state = self.state.lock();
        let range = Self::range(index, self.frames).ok()?;
        let mut frame = [0u8; FRAME_SIZE];
        frame.copy_from_slice(&state.data[range]);
        Some(frame)
    }

    /// Overwrite a frame as stored, bypassing power state and counters
    pub fn load_frame(&self, index: FrameIndex, frame: &Frame) -> Result<(), FrameDeviceError> {
        let range = Self::range(index, self.frames)?;
        self.state.lock().data[range].copy_from_slice(frame);
        Ok(())
    }

    fn range(
        index: FrameIndex,
        frames: FrameIndex,
    ) -> Result<std::ops::Range<usize>, FrameDeviceError> {
        if index >= frames {
            return Err(FrameDeviceError::InvalidFrame(index));
        }
        let start = index as usize * FRAME_SIZE;
        Ok(start..start + FRAME_SIZE)
    }

    fn check_ready(state: &MemState, index: FrameIndex) -> Result<(), FrameDeviceError> {
        if !state.powered {
            return Err(FrameDeviceError::NotReady);
        }
        if state.faulty_frame == Some(index) {
            return Err(FrameDeviceError::DeviceError(format!(
                "Injected fault on frame {}",
                index
            )));
        }
        Ok(())
    }
}

impl FrameDevice for MemFrameDevice {
    fn power_on(&self) -> Result<(), FrameDeviceError> {
        self.state.lock().powered = true;
        Ok(())
    }

    fn power_off(&self) -> Result<(), FrameDeviceError> {
        self.state.lock().powered = false;
        Ok(())
    }

    fn read_frame(&self, index: FrameIndex, frame: &mut Frame) -> Result<(), FrameDeviceError> {
        let range = Self::range(index, self.frames)?;
        let mut state = self.state.lock();
        Self::check_ready(&state, index)?;
        frame.copy_from_slice(&state.data[range]);
        state.reads += 1;
        Ok(())
    }

    fn write_frame(&self, index: FrameIndex, frame: &Frame) -> Result<(), FrameDeviceError> {
        if self.read_only {
            return Err(FrameDeviceError::WriteProtected);
        }
        let range = Self::range(index, self.frames)?;
        let mut state = self.state.lock();
        Self::check_ready(&state, index)?;
        state.data[range].copy_from_slice(frame);
        state.writes += 1;
        Ok(())
    }

    fn frame_count(&self) -> FrameIndex {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_device_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.img");

        let device = FileFrameDevice::create(&path, 16).unwrap();
        assert_eq!(device.path(), path.as_path());
        assert_eq!(device.frame_count(), 16);
        assert_eq!(device.size(), 16 * FRAME_SIZE as u64);

        let written = [0xABu8; FRAME_SIZE];
        device.write_frame(3, &written).unwrap();
        device.power_off().unwrap();
        drop(device);

        let device = FileFrameDevice::open(&path).unwrap();
        assert_eq!(device.path(), path.as_path());
        let mut read_back = [0u8; FRAME_SIZE];
        device.read_frame(3, &mut read_back).unwrap();
        assert_eq!(read_back, written);
        device.read_frame(2, &mut read_back).unwrap();
        assert_eq!(read_back, [0u8; FRAME_SIZE]);
    }

    #[test]
    fn test_file_device_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let device = FileFrameDevice::create(dir.path().join("small.img"), 2).unwrap();
        let mut frame = [0u8; FRAME_SIZE];
        assert!(matches!(
            device.read_frame(2, &mut frame),
            Err(FrameDeviceError::InvalidFrame(2))
        ));
        assert!(matches!(
            device.write_frame(7, &frame),
            Err(FrameDeviceError::InvalidFrame(7))
        ));
    }

    #[test]
    fn test_file_device_rejects_partial_frame_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.img");
        std::fs::write(&path, vec![0u8; FRAME_SIZE + 7]).unwrap();
        assert!(matches!(
            FileFrameDevice::open(&path),
            Err(FrameDeviceError::DeviceError(_))
        ));
    }

    #[test]
    fn test_mem_device_requires_power() {
        let device = MemFrameDevice::new(4);
        let mut frame = [0u8; FRAME_SIZE];
        assert!(matches!(
            device.read_frame(0, &mut frame),
            Err(FrameDeviceError::NotReady)
        ));

        device.power_on().unwrap();
        device.read_frame(0, &mut frame).unwrap();
        assert_eq!(device.reads(), 1);

        device.power_off().unwrap();
        assert!(!device.is_powered());
    }

    #[test]
    fn test_mem_device_read_write() {
        let device = MemFrameDevice::new(4);
        device.power_on().unwrap();

        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = 1;
        frame[FRAME_SIZE - 1] = 2;
        device.write_frame(1, &frame).unwrap();

        assert_eq!(device.frame(1), Some(frame));
        assert_eq!(device.frame(0), Some([0u8; FRAME_SIZE]));
        assert_eq!(device.frame(4), None);
        assert_eq!(device.writes(), 1);
    }

    #[test]
    fn test_mem_device_faults() {
        let device = MemFrameDevice::new(4).with_faulty_frame(2);
        device.power_on().unwrap();
        let mut frame = [0u8; FRAME_SIZE];

        assert!(device.read_frame(2, &mut frame).is_err());
        assert!(device.write_frame(2, &frame).is_err());
        assert!(device.read_frame(1, &mut frame).is_ok());

        device.set_faulty_frame(None);
        assert!(device.read_frame(2, &mut frame).is_ok());
    }

    #[test]
    fn test_mem_device_read_only() {
        let device = MemFrameDevice::new(4).read_only();
        device.power_on().unwrap();
        assert!(matches!(
            device.write_frame(0, &[0u8; FRAME_SIZE]),
            Err(FrameDeviceError::WriteProtected)
        ));
    }
}
