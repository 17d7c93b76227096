//! Frame translator
//!
//! Turns byte-range reads and writes against a file into whole-frame
//! accesses. The cache sits in front of the device as a read-allocate,
//! write-through layer:
//!
//! - read hit: copy from the cache
//! - read miss: read the device, copy, then cache the frame
//! - write: start from the cached or device copy of the frame, merge the new
//!   bytes, write the frame to the device, then cache it
//!
//! Frames are visited in ascending offset order within a call.

use log::{trace, warn};
use vm_frame_cache::{DEFAULT_VOLUME, FRAME_SIZE, Frame, FrameCache, FrameIndex};

use crate::error::BlockError;
use crate::frame_device::{FrameDevice, FrameDeviceError};

/// The view of an open file the translator works against
pub trait FileExtent {
    /// Current file size in bytes
    fn size(&self) -> u64;

    /// Current handle position in bytes
    fn offset(&self) -> u64;

    fn set_offset(&mut self, offset: u64);

    /// Device frame holding bytes `slot * FRAME_SIZE ..`
    fn frame_at(&self, slot: usize) -> Option<FrameIndex>;

    /// Make sure frames exist for `additional` bytes past the current offset.
    ///
    /// On failure the file must be left unchanged.
    fn ensure_capacity(&mut self, additional: usize) -> Result<(), BlockError>;

    fn set_size(&mut self, size: u64);
}

/// Cache-aware byte-range I/O over a frame device
pub struct FrameTranslator<D> {
    device: D,
    cache: FrameCache,
}

impl<D: FrameDevice> FrameTranslator<D> {
    /// Build a translator; the cache is used as-is and must be initialized
    /// before the first transfer.
    pub fn new(device: D, cache: FrameCache) -> Self {
        Self { device, cache }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut FrameCache {
        &mut self.cache
    }

    pub fn into_parts(self) -> (D, FrameCache) {
        (self.device, self.cache)
    }

    /// Read from the file's current offset into `buf`.
    ///
    /// The transfer is clamped to the bytes left before end of file; the
    /// offset advances by the number of bytes returned.
    ///
    /// # Errors
    ///
    /// A failed device read yields `BlockError::Transfer` carrying the bytes
    /// already copied; the offset reflects those bytes.
    pub fn read<F: FileExtent + ?Sized>(
        &mut self,
        file: &mut F,
        buf: &mut [u8],
    ) -> Result<usize, BlockError> {
        let start = file.offset();
        let remaining = file.size().saturating_sub(start);
        let count = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));

        let mut transferred = 0;
        let outcome = self.read_frames(&*file, start, &mut buf[..count], &mut transferred);
        file.set_offset(start + transferred as u64);
        outcome.map(|()| transferred)
    }

    /// Write `data` at the file's current offset.
    ///
    /// Frames are allocated up front; if that fails nothing is written.
    /// The offset advances by `data.len()` and the size grows to cover it.
    ///
    /// # Errors
    ///
    /// `BlockError::AllocationFailed` before any transfer, or
    /// `BlockError::Transfer` when a device access fails part way. Frames
    /// written before the failure stay written and cached.
    pub fn write<F: FileExtent + ?Sized>(
        &mut self,
        file: &mut F,
        data: &[u8],
    ) -> Result<usize, BlockError> {
        file.ensure_capacity(data.len())?;

        let start = file.offset();
        let mut transferred = 0;
        let outcome = self.write_frames(&*file, start, data, &mut transferred);

        let end = start + transferred as u64;
        file.set_offset(end);
        if end > file.size() {
            file.set_size(end);
        }
        outcome.map(|()| transferred)
    }

    fn read_frames<F: FileExtent + ?Sized>(
        &mut self,
        file: &F,
        start: u64,
        dest: &mut [u8],
        transferred: &mut usize,
    ) -> Result<(), BlockError> {
        let mut frame: Frame = [0u8; FRAME_SIZE];
        while *transferred < dest.len() {
            let (index, in_frame) = locate(file, start + *transferred as u64)?;
            let len = (FRAME_SIZE - in_frame).min(dest.len() - *transferred);

            self.fetch(index, &mut frame, true, *transferred)?;
            dest[*transferred..*transferred + len].copy_from_slice(&frame[in_frame..in_frame + len]);
            *transferred += len;
        }
        Ok(())
    }

    fn write_frames<F: FileExtent + ?Sized>(
        &mut self,
        file: &F,
        start: u64,
        data: &[u8],
        transferred: &mut usize,
    ) -> Result<(), BlockError> {
        let mut frame: Frame = [0u8; FRAME_SIZE];
        while *transferred < data.len() {
            let (index, in_frame) = locate(file, start + *transferred as u64)?;
            let len = (FRAME_SIZE - in_frame).min(data.len() - *transferred);

            // Untouched bytes of the frame must survive the merge
            self.fetch(index, &mut frame, false, *transferred)?;
            frame[in_frame..in_frame + len].copy_from_slice(&data[*transferred..*transferred + len]);

            self.device
                .write_frame(index, &frame)
                .map_err(|source| transfer_error("write", index, *transferred, source))?;
            self.cache.put(DEFAULT_VOLUME, index, &frame)?;
            *transferred += len;
        }
        Ok(())
    }

    /// Fill `frame` with the current contents of device frame `index`
    fn fetch(
        &mut self,
        index: FrameIndex,
        frame: &mut Frame,
        populate: bool,
        transferred: usize,
    ) -> Result<(), BlockError> {
        if let Some(cached) = self.cache.get(DEFAULT_VOLUME, index)? {
            frame.copy_from_slice(cached);
            return Ok(());
        }

        trace!("Frame {} not cached, reading from device", index);
        self.device
            .read_frame(index, frame)
            .map_err(|source| transfer_error("read", index, transferred, source))?;
        if populate {
            self.cache.put(DEFAULT_VOLUME, index, frame)?;
        }
        Ok(())
    }
}

/// Device frame and in-frame offset for a byte offset of `file`
fn locate<F: FileExtent + ?Sized>(file: &F, offset: u64) -> Result<(FrameIndex, usize), BlockError> {
    let slot = (offset / FRAME_SIZE as u64) as usize;
    let in_frame = (offset % FRAME_SIZE as u64) as usize;
    file.frame_at(slot)
        .map(|index| (index, in_frame))
        .ok_or(BlockError::MissingFrame { slot })
}

fn transfer_error(
    op: &'static str,
    frame: FrameIndex,
    transferred: usize,
    source: FrameDeviceError,
) -> BlockError {
    warn!(
        "Device {} of frame {} failed after {} bytes: {}",
        op, frame, transferred, source
    );
    BlockError::Transfer {
        op,
        frame,
        transferred,
        source,
    }
}
