//! ATA PIO driver
//!
//! Primary-master polling driver: IDENTIFY at init decides LBA28 vs
//! LBA48 and the sector count; reads and writes program the port
//! sequence, poll BSY/DRQ/ERR and move 256 words per sector through the
//! device's single 512-byte landing buffer. IRQ14 is installed but only
//! acknowledged; correctness comes from polling.
//!
//! The IDENTIFY word parsing is pure so it stays testable off-target.

use bitflags::bitflags;

use crate::arch::x86::port::{inb, inw, io_wait, outb, outw};
use crate::error::{KResult, KernelError};
use crate::fs::blockdev::{BlockDevice, SECTOR_SIZE};

const DATA_PORT: u16 = 0x1F0;
const ERROR_PORT: u16 = 0x1F1;
const SECTOR_COUNT_PORT: u16 = 0x1F2;
const LBA_LOW_PORT: u16 = 0x1F3;
const LBA_MID_PORT: u16 = 0x1F4;
const LBA_HIGH_PORT: u16 = 0x1F5;
const DRIVE_PORT: u16 = 0x1F6;
const COMMAND_PORT: u16 = 0x1F7;

const CMD_READ_SECTORS: u8 = 0x20;
const CMD_READ_SECTORS_EXT: u8 = 0x24;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_WRITE_SECTORS_EXT: u8 = 0x34;
const CMD_CACHE_FLUSH: u8 = 0xE7;
const CMD_IDENTIFY: u8 = 0xEC;

const DRIVE_SELECT_MASTER: u8 = 0xE0;
const DRIVE_SELECT_LBA48: u8 = 0x40;

bitflags! {
    /// Status-register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaStatus: u8 {
        const ERR = 0x01;
        const DRQ = 0x08;
        const DF  = 0x20;
        const BSY = 0x80;
    }
}

/// Feature bits recorded from IDENTIFY: bit 0 = LBA28, bit 1 = LBA48.
pub const FEATURE_LBA28: u8 = 1 << 0;
pub const FEATURE_LBA48: u8 = 1 << 1;

/// Parsed IDENTIFY data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyInfo {
    pub lba48: bool,
    pub total_sectors: u64,
}

/// Interpret the 256 IDENTIFY words: word 83 bit 10 selects LBA48, the
/// sector count comes from words 100..104 (LBA48) or 60..62 (LBA28).
pub fn parse_identify(words: &[u16; 256]) -> IdentifyInfo {
    let lba48 = words[83] & (1 << 10) != 0;
    let total_sectors = if lba48 {
        (words[103] as u64) << 48
            | (words[102] as u64) << 32
            | (words[101] as u64) << 16
            | words[100] as u64
    } else {
        (words[61] as u64) << 16 | words[60] as u64
    };
    IdentifyInfo {
        lba48,
        total_sectors,
    }
}

/// The primary-master ATA device.
pub struct AtaDevice {
    features: u8,
    total_sectors: u64,
    /// PIO landing pad; one sector moves through here per transfer.
    buffer: [u8; SECTOR_SIZE],
}

impl AtaDevice {
    pub const fn new() -> Self {
        Self {
            features: 0,
            total_sectors: 0,
            buffer: [0; SECTOR_SIZE],
        }
    }

    pub fn features(&self) -> u8 {
        self.features
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.total_sectors * SECTOR_SIZE as u64
    }

    fn record_identify(&mut self, info: IdentifyInfo) {
        self.total_sectors = info.total_sectors;
        self.features = if info.lba48 {
            FEATURE_LBA48
        } else {
            FEATURE_LBA28
        };
    }

    /// Send IDENTIFY and record the device geometry.
    pub fn init(&mut self) -> KResult<()> {
        // SAFETY: the documented IDENTIFY protocol on the primary bus;
        // this driver owns those ports.
        unsafe {
            outb(DRIVE_PORT, DRIVE_SELECT_MASTER);
            outb(SECTOR_COUNT_PORT, 0);
            outb(LBA_LOW_PORT, 0);
            outb(LBA_MID_PORT, 0);
            outb(LBA_HIGH_PORT, 0);
            outb(COMMAND_PORT, CMD_IDENTIFY);

            let mut status = inb(COMMAND_PORT);
            if status == 0 {
                return Err(KernelError::Io);
            }
            while AtaStatus::from_bits_truncate(status).contains(AtaStatus::BSY) {
                status = inb(COMMAND_PORT);
            }
            // A nonzero signature here means the device is not ATA.
            if inb(LBA_MID_PORT) != 0 || inb(LBA_HIGH_PORT) != 0 {
                return Err(KernelError::Io);
            }
            loop {
                let status = AtaStatus::from_bits_truncate(inb(COMMAND_PORT));
                if status.contains(AtaStatus::ERR) {
                    return Err(KernelError::Io);
                }
                if status.contains(AtaStatus::DRQ) {
                    break;
                }
            }
            let mut words = [0u16; 256];
            for word in words.iter_mut() {
                *word = inw(DATA_PORT);
            }
            self.record_identify(parse_identify(&words));
        }
        log::info!(
            "ata: primary master, {} sectors ({} MiB), {}",
            self.total_sectors,
            self.capacity() >> 20,
            if self.features & FEATURE_LBA48 != 0 {
                "lba48"
            } else {
                "lba28"
            }
        );
        Ok(())
    }

    /// Poll until DRQ, failing on ERR or DF.
    fn wait_for_data(&self) -> KResult<()> {
        loop {
            // SAFETY: status reads have no side effect beyond the bus.
            let status = AtaStatus::from_bits_truncate(unsafe { inb(COMMAND_PORT) });
            if status.intersects(AtaStatus::ERR | AtaStatus::DF) {
                return Err(KernelError::Io);
            }
            if status.contains(AtaStatus::DRQ) {
                return Ok(());
            }
        }
    }

    fn program_lba28(&self, lba: u32, sectors: u8) {
        // SAFETY: the LBA28 register sequence; exclusive bus ownership.
        unsafe {
            outb(DRIVE_PORT, DRIVE_SELECT_MASTER | ((lba >> 24) & 0x0F) as u8);
            outb(ERROR_PORT, 0);
            outb(SECTOR_COUNT_PORT, sectors);
            outb(LBA_LOW_PORT, lba as u8);
            outb(LBA_MID_PORT, (lba >> 8) as u8);
            outb(LBA_HIGH_PORT, (lba >> 16) as u8);
        }
    }

    fn program_lba48(&self, lba: u64, sectors: u16) {
        // SAFETY: the LBA48 high-then-low register sequence.
        unsafe {
            outb(DRIVE_PORT, DRIVE_SELECT_LBA48 | DRIVE_SELECT_MASTER);
            outb(SECTOR_COUNT_PORT, (sectors >> 8) as u8);
            outb(LBA_LOW_PORT, (lba >> 24) as u8);
            outb(LBA_MID_PORT, (lba >> 32) as u8);
            outb(LBA_HIGH_PORT, (lba >> 40) as u8);
            outb(SECTOR_COUNT_PORT, sectors as u8);
            outb(LBA_LOW_PORT, lba as u8);
            outb(LBA_MID_PORT, (lba >> 8) as u8);
            outb(LBA_HIGH_PORT, (lba >> 16) as u8);
        }
    }

    /// Read one sector into the landing buffer.
    fn read_sector(&mut self, lba: u64) -> KResult<()> {
        if self.features & FEATURE_LBA48 != 0 {
            self.program_lba48(lba, 1);
            // SAFETY: command write completing the programmed sequence.
            unsafe { outb(COMMAND_PORT, CMD_READ_SECTORS_EXT) };
        } else {
            self.program_lba28(lba as u32, 1);
            // SAFETY: as above, for the LBA28 command.
            unsafe { outb(COMMAND_PORT, CMD_READ_SECTORS) };
        }
        self.wait_for_data()?;
        // SAFETY: DRQ is set, so 256 data words are ready.
        unsafe {
            for index in 0..SECTOR_SIZE / 2 {
                let word = inw(DATA_PORT);
                self.buffer[index * 2] = word as u8;
                self.buffer[index * 2 + 1] = (word >> 8) as u8;
            }
        }
        Ok(())
    }

    /// Write one sector from the landing buffer and flush the cache.
    fn write_sector(&mut self, lba: u64) -> KResult<()> {
        if self.features & FEATURE_LBA48 != 0 {
            self.program_lba48(lba, 1);
            // SAFETY: command write completing the programmed sequence.
            unsafe { outb(COMMAND_PORT, CMD_WRITE_SECTORS_EXT) };
        } else {
            self.program_lba28(lba as u32, 1);
            // SAFETY: as above, for the LBA28 command.
            unsafe { outb(COMMAND_PORT, CMD_WRITE_SECTORS) };
        }
        self.wait_for_data()?;
        // SAFETY: DRQ set; the device expects 256 words with a short
        // delay between writes.
        unsafe {
            for index in 0..SECTOR_SIZE / 2 {
                let word =
                    self.buffer[index * 2] as u16 | (self.buffer[index * 2 + 1] as u16) << 8;
                outw(DATA_PORT, word);
                io_wait();
            }
            outb(COMMAND_PORT, CMD_CACHE_FLUSH);
            while AtaStatus::from_bits_truncate(inb(COMMAND_PORT)).contains(AtaStatus::BSY) {}
        }
        Ok(())
    }
}

impl Default for AtaDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for AtaDevice {
    fn name(&self) -> &str {
        "A"
    }

    fn sector_count(&self) -> u64 {
        self.total_sectors
    }

    fn read_sectors(&mut self, lba: u64, buffer: &mut [u8]) -> KResult<()> {
        if buffer.len() % SECTOR_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        for (index, chunk) in buffer.chunks_mut(SECTOR_SIZE).enumerate() {
            self.read_sector(lba + index as u64)?;
            chunk.copy_from_slice(&self.buffer);
        }
        Ok(())
    }

    fn write_sectors(&mut self, lba: u64, buffer: &[u8]) -> KResult<()> {
        if buffer.len() % SECTOR_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        for (index, chunk) in buffer.chunks(SECTOR_SIZE).enumerate() {
            self.buffer.copy_from_slice(chunk);
            self.write_sector(lba + index as u64)?;
        }
        Ok(())
    }
}

/// IRQ14 handler body: the driver polls, so the interrupt only needs its
/// acknowledgement (done centrally by the IRQ dispatcher).
pub fn handle_irq() {}
