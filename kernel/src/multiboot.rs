//! Multiboot2 boot-information parsing
//!
//! The loader leaves the magic `0x36d76289` in EAX and the physical
//! address of the info block in EBX, 8-byte aligned. The block is a
//! `total_size`/`reserved` header followed by tags; each tag is
//! `(type: u32, size: u32, payload...)` and the next tag starts at
//! `(size + 7) & !7` bytes after the current one. The kernel only
//! consumes the MMAP tag (to seed the frame allocator) and the
//! FRAMEBUFFER tag (to place the MMIO window).
//!
//! Parsing works over a byte view with explicit little-endian reads, so
//! it unit-tests against synthesized blocks.

use crate::error::{KResult, KernelError};

/// Magic the loader must leave in EAX.
pub const BOOTLOADER_MAGIC: u32 = 0x36d7_6289;

const TAG_TYPE_END: u32 = 0;
const TAG_TYPE_MMAP: u32 = 6;
const TAG_TYPE_FRAMEBUFFER: u32 = 8;

/// Classification of a memory-map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Usable RAM.
    Available,
    /// Usable but holding ACPI tables.
    AcpiReclaimable,
    /// Must be preserved across hibernation.
    ReservedNvs,
    /// Defective.
    Bad,
    /// Anything else.
    Reserved,
}

impl MemoryKind {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => MemoryKind::Available,
            3 => MemoryKind::AcpiReclaimable,
            4 => MemoryKind::ReservedNvs,
            5 => MemoryKind::Bad,
            _ => MemoryKind::Reserved,
        }
    }
}

/// One memory-map region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryKind,
}

/// Linear-framebuffer description from the FRAMEBUFFER tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferInfo {
    pub phys_addr: u64,
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
}

/// Borrowed view over a Multiboot2 information block.
pub struct BootInfo<'a> {
    data: &'a [u8],
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let low = read_u32(data, offset)? as u64;
    let high = read_u32(data, offset + 4)? as u64;
    Some(high << 32 | low)
}

impl<'a> BootInfo<'a> {
    /// Validate the magic, the alignment and the block header over an
    /// already-mapped byte view.
    pub fn parse(magic: u32, data: &'a [u8]) -> KResult<Self> {
        if magic != BOOTLOADER_MAGIC {
            return Err(KernelError::InvalidArgument);
        }
        if data.as_ptr() as usize & 7 != 0 {
            return Err(KernelError::InvalidArgument);
        }
        let total_size = read_u32(data, 0).ok_or(KernelError::InvalidArgument)? as usize;
        if total_size < 8 || total_size > data.len() {
            return Err(KernelError::InvalidArgument);
        }
        Ok(Self {
            data: &data[..total_size],
        })
    }

    /// Wrap the info block the loader handed over in EBX.
    ///
    /// # Safety
    ///
    /// `virt_addr` must be the (higher-half) mapping of the loader's info
    /// block, which stays untouched while the view is alive.
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub unsafe fn from_loader(magic: u32, virt_addr: u32) -> KResult<Self> {
        if virt_addr & 7 != 0 {
            return Err(KernelError::InvalidArgument);
        }
        // SAFETY: per the caller contract the block is mapped and live.
        let total_size = unsafe { core::ptr::read(virt_addr as *const u32) } as usize;
        // SAFETY: total_size bounds the block per the Multiboot2 header.
        let data = unsafe { core::slice::from_raw_parts(virt_addr as *const u8, total_size) };
        Self::parse(magic, data)
    }

    /// Iterate `(tag_type, payload)` pairs up to the END tag.
    pub fn tags(&self) -> TagIter<'a> {
        TagIter {
            data: self.data,
            offset: 8,
        }
    }

    /// Memory-map regions, if the loader provided the MMAP tag.
    pub fn memory_regions(&self) -> Option<MemoryRegionIter<'a>> {
        let payload = self
            .tags()
            .find(|(kind, _)| *kind == TAG_TYPE_MMAP)
            .map(|(_, payload)| payload)?;
        let entry_size = read_u32(payload, 0)? as usize;
        if entry_size < 24 {
            return None;
        }
        Some(MemoryRegionIter {
            entries: &payload[8..],
            entry_size,
            offset: 0,
        })
    }

    /// Framebuffer description, if the loader provided one.
    pub fn framebuffer(&self) -> Option<FramebufferInfo> {
        let payload = self
            .tags()
            .find(|(kind, _)| *kind == TAG_TYPE_FRAMEBUFFER)
            .map(|(_, payload)| payload)?;
        Some(FramebufferInfo {
            phys_addr: read_u64(payload, 0)?,
            pitch: read_u32(payload, 8)?,
            width: read_u32(payload, 12)?,
            height: read_u32(payload, 16)?,
            bpp: *payload.get(20)?,
        })
    }
}

/// Iterator over raw tags.
pub struct TagIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for TagIter<'a> {
    type Item = (u32, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let kind = read_u32(self.data, self.offset)?;
        let size = read_u32(self.data, self.offset + 4)? as usize;
        if kind == TAG_TYPE_END || size < 8 {
            return None;
        }
        let payload = self.data.get(self.offset + 8..self.offset + size)?;
        self.offset += (size + 7) & !7;
        Some((kind, payload))
    }
}

/// Iterator over memory-map entries.
pub struct MemoryRegionIter<'a> {
    entries: &'a [u8],
    entry_size: usize,
    offset: usize,
}

impl Iterator for MemoryRegionIter<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + self.entry_size > self.entries.len() {
            return None;
        }
        let base = read_u64(self.entries, self.offset)?;
        let length = read_u64(self.entries, self.offset + 8)?;
        let kind = MemoryKind::from_raw(read_u32(self.entries, self.offset + 16)?);
        self.offset += self.entry_size;
        Some(MemoryRegion { base, length, kind })
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    struct BlockBuilder {
        bytes: Vec<u8>,
    }

    impl BlockBuilder {
        fn new() -> Self {
            Self {
                bytes: alloc::vec![0; 8],
            }
        }

        fn tag(mut self, kind: u32, payload: &[u8]) -> Self {
            let size = 8 + payload.len() as u32;
            self.bytes.extend_from_slice(&kind.to_le_bytes());
            self.bytes.extend_from_slice(&size.to_le_bytes());
            self.bytes.extend_from_slice(payload);
            while self.bytes.len() % 8 != 0 {
                self.bytes.push(0);
            }
            self
        }

        /// Finish with the END tag and fix up total_size. The buffer is
        /// leaked through an 8-aligned allocation to satisfy parse().
        fn build(mut self) -> &'static [u8] {
            self.bytes.extend_from_slice(&0u32.to_le_bytes());
            self.bytes.extend_from_slice(&8u32.to_le_bytes());
            let total = self.bytes.len() as u32;
            self.bytes[0..4].copy_from_slice(&total.to_le_bytes());
            let words: Vec<u64> = self
                .bytes
                .chunks(8)
                .map(|chunk| {
                    let mut word = [0u8; 8];
                    word[..chunk.len()].copy_from_slice(chunk);
                    u64::from_le_bytes(word)
                })
                .collect();
            let leaked = Vec::leak(words);
            // SAFETY: the leaked u64 buffer is 'static and 8-aligned;
            // reinterpreting it as bytes never exceeds its length.
            unsafe {
                core::slice::from_raw_parts(leaked.as_ptr() as *const u8, leaked.len() * 8)
            }
        }
    }

    fn mmap_payload(regions: &[(u64, u64, u32)]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&24u32.to_le_bytes()); // entry_size
        payload.extend_from_slice(&0u32.to_le_bytes()); // entry_version
        for (base, length, kind) in regions {
            payload.extend_from_slice(&base.to_le_bytes());
            payload.extend_from_slice(&length.to_le_bytes());
            payload.extend_from_slice(&kind.to_le_bytes());
            payload.extend_from_slice(&0u32.to_le_bytes());
        }
        payload
    }

    #[test]
    fn rejects_bad_magic() {
        let block = BlockBuilder::new().build();
        assert_eq!(
            BootInfo::parse(0xDEAD_BEEF, block).err(),
            Some(KernelError::InvalidArgument)
        );
        assert!(BootInfo::parse(BOOTLOADER_MAGIC, block).is_ok());
    }

    #[test]
    fn walks_tags_with_padded_sizes() {
        let block = BlockBuilder::new()
            .tag(42, b"hello")
            .tag(7, &[1, 2, 3, 4, 5, 6, 7, 8, 9])
            .build();
        let info = BootInfo::parse(BOOTLOADER_MAGIC, block).unwrap();
        let tags: Vec<(u32, usize)> = info.tags().map(|(kind, p)| (kind, p.len())).collect();
        assert_eq!(tags, alloc::vec![(42, 5), (7, 9)]);
    }

    #[test]
    fn extracts_available_memory_regions() {
        let payload = mmap_payload(&[
            (0x0, 128 * 1024 * 1024, 1),
            (0xFFFF_0000, 0x1_0000, 2),
            (0xFD00_0000, 0x100_0000, 3),
        ]);
        let block = BlockBuilder::new().tag(6, &payload).build();
        let info = BootInfo::parse(BOOTLOADER_MAGIC, block).unwrap();
        let regions: Vec<MemoryRegion> = info.memory_regions().unwrap().collect();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].kind, MemoryKind::Available);
        assert_eq!(regions[0].length, 128 * 1024 * 1024);
        assert_eq!(regions[1].kind, MemoryKind::Reserved);
        assert_eq!(regions[2].kind, MemoryKind::AcpiReclaimable);
    }

    #[test]
    fn extracts_framebuffer_geometry() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0xFD00_0000u64.to_le_bytes());
        payload.extend_from_slice(&4096u32.to_le_bytes()); // pitch
        payload.extend_from_slice(&1024u32.to_le_bytes()); // width
        payload.extend_from_slice(&768u32.to_le_bytes()); // height
        payload.push(32); // bpp
        let block = BlockBuilder::new().tag(8, &payload).build();
        let info = BootInfo::parse(BOOTLOADER_MAGIC, block).unwrap();
        let fb = info.framebuffer().unwrap();
        assert_eq!(fb.phys_addr, 0xFD00_0000);
        assert_eq!(fb.width, 1024);
        assert_eq!(fb.height, 768);
        assert_eq!(fb.bpp, 32);
    }

    #[test]
    fn missing_tags_yield_none() {
        let block = BlockBuilder::new().tag(42, b"x").build();
        let info = BootInfo::parse(BOOTLOADER_MAGIC, block).unwrap();
        assert!(info.memory_regions().is_none());
        assert!(info.framebuffer().is_none());
    }
}
