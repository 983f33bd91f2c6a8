//! Byte streams over block devices
//!
//! Random-access byte view with 0-based absolute positions. Reads and
//! writes iterate over sector-aligned device transfers, copying partial
//! head/tail bytes through a one-sector scratch buffer; writes on a
//! partial sector are read-modify-write.

use super::blockdev::{BlockDevice, SECTOR_SIZE};
use crate::error::KResult;

/// Byte-granular cursor over a borrowed block device.
pub struct Stream<'a> {
    dev: &'a mut dyn BlockDevice,
    pos: u64,
    scratch: [u8; SECTOR_SIZE],
}

impl<'a> Stream<'a> {
    pub fn new(dev: &'a mut dyn BlockDevice) -> Self {
        Self {
            dev,
            pos: 0,
            scratch: [0; SECTOR_SIZE],
        }
    }

    /// Set the absolute position.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Fill `buffer` from the current position, advancing it.
    pub fn read(&mut self, buffer: &mut [u8]) -> KResult<()> {
        let mut written = 0;
        while written < buffer.len() {
            let lba = self.pos / SECTOR_SIZE as u64;
            let offset = (self.pos % SECTOR_SIZE as u64) as usize;
            let chunk = (SECTOR_SIZE - offset).min(buffer.len() - written);
            self.dev.read_sectors(lba, &mut self.scratch)?;
            buffer[written..written + chunk].copy_from_slice(&self.scratch[offset..offset + chunk]);
            self.pos += chunk as u64;
            written += chunk;
        }
        Ok(())
    }

    /// Write `buffer` at the current position, advancing it.
    pub fn write(&mut self, buffer: &[u8]) -> KResult<()> {
        let mut consumed = 0;
        while consumed < buffer.len() {
            let lba = self.pos / SECTOR_SIZE as u64;
            let offset = (self.pos % SECTOR_SIZE as u64) as usize;
            let chunk = (SECTOR_SIZE - offset).min(buffer.len() - consumed);
            // Preserve the sector bytes around a partial write.
            self.dev.read_sectors(lba, &mut self.scratch)?;
            self.scratch[offset..offset + chunk].copy_from_slice(&buffer[consumed..consumed + chunk]);
            self.dev.write_sectors(lba, &self.scratch)?;
            self.pos += chunk as u64;
            consumed += chunk;
        }
        Ok(())
    }
}
