//! Block driver
//!
//! Owns the device, the frame cache and the file table, and sequences them
//! across the device power cycle:
//!
//! - `power_on`: device up, metadata loaded, cache initialized
//! - `power_off`: metadata persisted, device down, cache shut down, handles closed

use log::{debug, info, warn};
use vm_frame_cache::{CacheStats, FrameCache};

use crate::config::BlockConfig;
use crate::error::BlockError;
use crate::file_table::{Fd, FileHandle, FileTable};
use crate::frame_device::FrameDevice;
use crate::translator::FrameTranslator;

/// File-level access to a frame device
pub struct BlockDriver<D: FrameDevice> {
    config: BlockConfig,
    translator: FrameTranslator<D>,
    /// Present while powered on
    files: Option<FileTable>,
}

impl<D: FrameDevice> BlockDriver<D> {
    /// Create a powered-off driver
    pub fn new(device: D, config: BlockConfig) -> Result<Self, BlockError> {
        config.validate()?;
        let cache = FrameCache::with_config(&config.cache_config());
        Ok(Self {
            config,
            translator: FrameTranslator::new(device, cache),
            files: None,
        })
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        self.translator.device()
    }

    pub fn cache(&self) -> &FrameCache {
        self.translator.cache()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.translator.cache().stats()
    }

    pub fn is_powered_on(&self) -> bool {
        self.files.is_some()
    }

    /// File table of the current power cycle
    pub fn files(&self) -> Result<&FileTable, BlockError> {
        self.files.as_ref().ok_or(BlockError::PoweredOff)
    }

    pub fn into_device(self) -> D {
        self.translator.into_parts().0
    }

    pub fn power_on(&mut self) -> Result<(), BlockError> {
        if self.files.is_some() {
            return Err(BlockError::AlreadyPoweredOn);
        }
        let device = self.translator.device();
        self.config.validate_for(device.frame_count())?;

        device.power_on()?;
        let table = FileTable::load(device, self.config.max_files)?;

        let cache = self.translator.cache_mut();
        cache.configure(self.config.cache_frames);
        cache.initialize()?;

        info!(
            "Block device powered on: {} frames, {} files, cache of {} frames",
            self.translator.device().frame_count(),
            table.file_count(),
            self.config.cache_frames
        );
        self.files = Some(table);
        Ok(())
    }

    pub fn power_off(&mut self) -> Result<(), BlockError> {
        // Stay powered on until the device is down
        let table = self.files.as_ref().ok_or(BlockError::PoweredOff)?;
        let device = self.translator.device();
        table.store(device)?;
        device.flush()?;
        device.power_off()?;

        let stats = self.translator.cache().stats();
        self.translator.cache_mut().shutdown()?;
        let left_open = self.files.take().map_or(0, |mut table| table.close_all());
        if left_open > 0 {
            warn!("Closed {} file handles still open at power off", left_open);
        }
        info!(
            "Block device powered off (cache hits {}, misses {}, evictions {})",
            stats.hits, stats.misses, stats.evictions
        );
        Ok(())
    }

    /// Open `name`, creating it if needed
    pub fn open(&mut self, name: &str) -> Result<Fd, BlockError> {
        let table = self.files.as_mut().ok_or(BlockError::PoweredOff)?;
        let fd = table.open(name)?;
        debug!("Opened {:?} as handle {}", name, fd);
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> Result<(), BlockError> {
        self.files
            .as_mut()
            .ok_or(BlockError::PoweredOff)?
            .close(fd)
    }

    /// Read up to `buf.len()` bytes from the handle's position
    ///
    /// Returns fewer bytes than requested at end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, BlockError> {
        let table = self.files.as_mut().ok_or(BlockError::PoweredOff)?;
        let mut file = table.open_file(fd)?;
        self.translator.read(&mut file, buf)
    }

    /// Write all of `data` at the handle's position, growing the file
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize, BlockError> {
        let table = self.files.as_mut().ok_or(BlockError::PoweredOff)?;
        let mut file = table.open_file(fd)?;
        self.translator.write(&mut file, data)
    }

    pub fn seek(&mut self, fd: Fd, offset: u64) -> Result<(), BlockError> {
        self.files
            .as_mut()
            .ok_or(BlockError::PoweredOff)?
            .seek(fd, offset)
    }

    pub fn handle(&self, fd: Fd) -> Result<&FileHandle, BlockError> {
        self.files()?.handle(fd)
    }

    /// Current position of a handle
    pub fn tell(&self, fd: Fd) -> Result<u64, BlockError> {
        Ok(self.handle(fd)?.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_device::MemFrameDevice;

    fn driver() -> BlockDriver<MemFrameDevice> {
        let config = BlockConfig {
            cache_frames: 4,
            max_files: 4,
        };
        BlockDriver::new(MemFrameDevice::new(32), config).unwrap()
    }

    #[test]
    fn test_operations_require_power() {
        let mut driver = driver();
        assert!(matches!(driver.open("a"), Err(BlockError::PoweredOff)));
        assert!(matches!(driver.read(0, &mut [0u8; 4]), Err(BlockError::PoweredOff)));
        assert!(matches!(driver.write(0, b"x"), Err(BlockError::PoweredOff)));
        assert!(matches!(driver.seek(0, 0), Err(BlockError::PoweredOff)));
        assert!(matches!(driver.close(0), Err(BlockError::PoweredOff)));
        assert!(matches!(driver.power_off(), Err(BlockError::PoweredOff)));
    }

    #[test]
    fn test_double_power_on() {
        let mut driver = driver();
        driver.power_on().unwrap();
        assert!(matches!(driver.power_on(), Err(BlockError::AlreadyPoweredOn)));
        assert!(driver.cache().is_initialized());

        driver.power_off().unwrap();
        assert!(!driver.cache().is_initialized());
        assert!(!driver.device().is_powered());
    }

    #[test]
    fn test_device_too_small_for_metadata() {
        let config = BlockConfig {
            cache_frames: 4,
            max_files: 8,
        };
        let mut driver = BlockDriver::new(MemFrameDevice::new(8), config).unwrap();
        assert!(matches!(driver.power_on(), Err(BlockError::Config(_))));
        assert!(!driver.is_powered_on());
    }

    #[test]
    fn test_write_seek_read() {
        let mut driver = driver();
        driver.power_on().unwrap();

        let fd = driver.open("notes").unwrap();
        assert_eq!(driver.write(fd, b"hello, frames").unwrap(), 13);
        assert_eq!(driver.tell(fd).unwrap(), 13);

        driver.seek(fd, 7).unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(driver.read(fd, &mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"frames");
    }

    #[test]
    fn test_files_survive_power_cycle() {
        let mut driver = driver();
        driver.power_on().unwrap();
        let fd = driver.open("persist").unwrap();
        driver.write(fd, &[0x42; 3000]).unwrap();
        driver.power_off().unwrap();

        driver.power_on().unwrap();
        assert_eq!(driver.cache().len(), 0);
        let fd = driver.open("persist").unwrap();
        let mut buf = vec![0u8; 4000];
        assert_eq!(driver.read(fd, &mut buf).unwrap(), 3000);
        assert!(buf[..3000].iter().all(|&b| b == 0x42));
    }
}
