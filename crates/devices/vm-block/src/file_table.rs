//! File and handle tables
//!
//! Files are persisted one per metadata frame: the record for file slot `i`
//! lives in device frame `i`, so the first `max_files` frames of the device
//! are reserved. Data frames are handed out from a counter that only moves
//! forward.

use log::{debug, warn};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use vm_frame_cache::{FRAME_SIZE, Frame, FrameIndex};

use crate::error::BlockError;
use crate::frame_device::FrameDevice;
use crate::translator::FileExtent;

/// Longest file name in bytes
pub const MAX_NAME_LEN: usize = 128;

/// Most frames a single file may own; bounds the record to one frame
pub const MAX_FILE_FRAMES: usize = 160;

/// File handle identifier
pub type Fd = u32;

/// Persistent description of one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
    pub frames: Vec<FrameIndex>,
}

fn metadata_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_limit::<FRAME_SIZE>()
}

impl FileRecord {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// An unused slot has no name
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Serialize into a zero-padded frame
    pub fn encode(&self) -> Result<Frame, BlockError> {
        let bytes = bincode::serde::encode_to_vec(self, metadata_config())
            .map_err(|e| BlockError::Metadata(format!("encode {:?}: {}", self.name, e)))?;
        if bytes.len() > FRAME_SIZE {
            return Err(BlockError::Metadata(format!(
                "record for {:?} needs {} bytes",
                self.name,
                bytes.len()
            )));
        }
        let mut frame = [0u8; FRAME_SIZE];
        frame[..bytes.len()].copy_from_slice(&bytes);
        Ok(frame)
    }

    /// Parse a metadata frame; an all-zero frame is an empty record
    pub fn decode(frame: &Frame) -> Result<Self, BlockError> {
        let (record, _): (Self, usize) =
            bincode::serde::decode_from_slice(frame, metadata_config())
                .map_err(|e| BlockError::Metadata(format!("decode: {}", e)))?;

        if record.name.len() > MAX_NAME_LEN || record.frames.len() > MAX_FILE_FRAMES {
            return Err(BlockError::Metadata(format!(
                "record {:?} exceeds limits",
                record.name
            )));
        }
        if record.size > (record.frames.len() * FRAME_SIZE) as u64 {
            return Err(BlockError::Metadata(format!(
                "record {:?} is {} bytes but owns {} frames",
                record.name,
                record.size,
                record.frames.len()
            )));
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Open,
    Closed,
}

/// An open (or once open) file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    /// Slot of the file in the table
    pub file: usize,
    pub offset: u64,
    pub status: HandleStatus,
}

/// Hands out unused data frames
#[derive(Debug, Clone, Copy)]
struct FrameAllocator {
    next_free: FrameIndex,
    frame_count: FrameIndex,
}

impl FrameAllocator {
    fn available(&self) -> usize {
        self.frame_count.saturating_sub(self.next_free) as usize
    }
}

/// In-memory file and handle tables for one power cycle
#[derive(Debug)]
pub struct FileTable {
    records: Vec<FileRecord>,
    handles: Vec<FileHandle>,
    allocator: FrameAllocator,
}

impl FileTable {
    /// An empty table for a device of `frame_count` frames
    pub fn new(max_files: FrameIndex, frame_count: FrameIndex) -> Self {
        Self {
            records: vec![FileRecord::default(); max_files as usize],
            handles: Vec::new(),
            allocator: FrameAllocator {
                next_free: max_files,
                frame_count,
            },
        }
    }

    /// Read the metadata frames `0..max_files` from `device`
    pub fn load<D: FrameDevice + ?Sized>(
        device: &D,
        max_files: FrameIndex,
    ) -> Result<Self, BlockError> {
        let frame_count = device.frame_count();
        let mut table = Self::new(max_files, frame_count);
        let mut frame = [0u8; FRAME_SIZE];
        let mut owned = FxHashSet::default();

        for (slot, record) in (0..max_files).zip(table.records.iter_mut()) {
            device.read_frame(slot, &mut frame)?;
            *record = FileRecord::decode(&frame)?;
            for &f in &record.frames {
                if f < max_files || f >= frame_count {
                    return Err(BlockError::Metadata(format!(
                        "file {:?} references frame {} outside the data area",
                        record.name, f
                    )));
                }
                if !owned.insert(f) {
                    return Err(BlockError::Metadata(format!(
                        "file {:?} shares frame {} with another file",
                        record.name, f
                    )));
                }
            }
        }

        let highest = table
            .records
            .iter()
            .flat_map(|r| r.frames.iter())
            .map(|&f| f + 1)
            .max()
            .unwrap_or(max_files);
        table.allocator.next_free = highest.max(max_files);

        debug!(
            "Loaded {} files, next free frame {}",
            table.file_count(),
            table.allocator.next_free
        );
        Ok(table)
    }

    /// Write every metadata frame back to `device`
    pub fn store<D: FrameDevice + ?Sized>(&self, device: &D) -> Result<(), BlockError> {
        for (slot, record) in (0..).zip(&self.records) {
            device.write_frame(slot, &record.encode()?)?;
        }
        debug!("Stored {} files", self.file_count());
        Ok(())
    }

    /// Number of files with a name
    pub fn file_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_empty()).count()
    }

    pub fn file(&self, name: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| !r.is_empty() && r.name == name)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter().filter(|r| !r.is_empty())
    }

    /// Frames still available for allocation
    pub fn free_frames(&self) -> usize {
        self.allocator.available()
    }

    /// Open `name`, creating an empty file if it does not exist
    pub fn open(&mut self, name: &str) -> Result<Fd, BlockError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') {
            return Err(BlockError::InvalidName(name.to_string()));
        }

        let slot = match self
            .records
            .iter()
            .position(|r| !r.is_empty() && r.name == name)
        {
            Some(slot) => slot,
            None => {
                let slot = self
                    .records
                    .iter()
                    .position(FileRecord::is_empty)
                    .ok_or(BlockError::TooManyFiles(self.records.len()))?;
                self.records[slot] = FileRecord::named(name);
                debug!("Created file {:?} in slot {}", name, slot);
                slot
            }
        };

        let fd = Fd::try_from(self.handles.len())
            .map_err(|_| BlockError::InvalidHandle(Fd::MAX))?;
        self.handles.push(FileHandle {
            file: slot,
            offset: 0,
            status: HandleStatus::Open,
        });
        Ok(fd)
    }

    pub fn handle(&self, fd: Fd) -> Result<&FileHandle, BlockError> {
        self.handles
            .get(fd as usize)
            .ok_or(BlockError::InvalidHandle(fd))
    }

    fn open_handle_mut(&mut self, fd: Fd) -> Result<&mut FileHandle, BlockError> {
        let handle = self
            .handles
            .get_mut(fd as usize)
            .ok_or(BlockError::InvalidHandle(fd))?;
        if handle.status == HandleStatus::Closed {
            return Err(BlockError::HandleClosed(fd));
        }
        Ok(handle)
    }

    pub fn close(&mut self, fd: Fd) -> Result<(), BlockError> {
        self.open_handle_mut(fd)?.status = HandleStatus::Closed;
        Ok(())
    }

    /// Move a handle to `offset`, which may not pass the end of the file
    pub fn seek(&mut self, fd: Fd, offset: u64) -> Result<(), BlockError> {
        let handle = self
            .handles
            .get_mut(fd as usize)
            .ok_or(BlockError::InvalidHandle(fd))?;
        if handle.status == HandleStatus::Closed {
            return Err(BlockError::HandleClosed(fd));
        }
        let size = self.records[handle.file].size;
        if offset > size {
            return Err(BlockError::SeekOutOfRange { offset, size });
        }
        handle.offset = offset;
        Ok(())
    }

    /// Close every handle, returning how many were still open
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for handle in &mut self.handles {
            if handle.status == HandleStatus::Open {
                handle.status = HandleStatus::Closed;
                closed += 1;
            }
        }
        closed
    }

    /// Borrow an open handle together with its file for a transfer
    pub fn open_file(&mut self, fd: Fd) -> Result<OpenFile<'_>, BlockError> {
        let handle = self
            .handles
            .get_mut(fd as usize)
            .ok_or(BlockError::InvalidHandle(fd))?;
        if handle.status == HandleStatus::Closed {
            return Err(BlockError::HandleClosed(fd));
        }
        let record = &mut self.records[handle.file];
        Ok(OpenFile {
            handle,
            record,
            allocator: &mut self.allocator,
        })
    }
}

/// An open handle, its file record and the frame allocator
pub struct OpenFile<'a> {
    handle: &'a mut FileHandle,
    record: &'a mut FileRecord,
    allocator: &'a mut FrameAllocator,
}

impl OpenFile<'_> {
    pub fn record(&self) -> &FileRecord {
        &*self.record
    }
}

impl FileExtent for OpenFile<'_> {
    fn size(&self) -> u64 {
        self.record.size
    }

    fn offset(&self) -> u64 {
        self.handle.offset
    }

    fn set_offset(&mut self, offset: u64) {
        self.handle.offset = offset;
    }

    fn frame_at(&self, slot: usize) -> Option<FrameIndex> {
        self.record.frames.get(slot).copied()
    }

    fn ensure_capacity(&mut self, additional: usize) -> Result<(), BlockError> {
        let end = self.handle.offset + additional as u64;
        let needed = usize::try_from(end.div_ceil(FRAME_SIZE as u64)).unwrap_or(usize::MAX);
        let missing = needed.saturating_sub(self.record.frames.len());
        if missing == 0 {
            return Ok(());
        }

        if needed > MAX_FILE_FRAMES {
            warn!(
                "File {:?} would need {} frames, limit is {}",
                self.record.name, needed, MAX_FILE_FRAMES
            );
            return Err(BlockError::AllocationFailed(format!(
                "{:?} would need {} frames, limit is {}",
                self.record.name, needed, MAX_FILE_FRAMES
            )));
        }
        if missing > self.allocator.available() {
            warn!(
                "Device out of frames: {} requested, {} available",
                missing,
                self.allocator.available()
            );
            return Err(BlockError::AllocationFailed(format!(
                "{} frames requested, {} available",
                missing,
                self.allocator.available()
            )));
        }

        let first = self.allocator.next_free;
        // Bounded by available(), so it fits a FrameIndex
        let count = missing as FrameIndex;
        self.record.frames.extend(first..first + count);
        self.allocator.next_free = first + count;
        Ok(())
    }

    fn set_size(&mut self, size: u64) {
        self.record.size = size;
    }
}
