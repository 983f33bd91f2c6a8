//! FAT16 filesystem driver
//!
//! Mounts the partition at byte offset 0x100000 of the disk, walks the
//! fixed root-directory area and cluster-chained subdirectories, and
//! implements open/read/write/stat/seek/readdir over the cluster chain.
//! Writes allocate clusters first-fit from the FAT and keep the
//! directory entry's `file_size` current; file creation lives in the
//! root directory.
//!
//! Long-file-name entries are skipped; names travel in the padded 8.3
//! native form within the driver and as `NAME.EXT` outside it.

pub mod bpb;
pub mod dirent;
pub mod mkfs;

use alloc::string::String;

use bpb::{Bpb, Ebpb};
use dirent::{to_native, DirEntry, FatAttributes, DIR_ENTRY_SIZE};

use super::blockdev::BlockDevice;
use super::path::ParsedPath;
use super::stream::Stream;
use super::vfs::{NodeKind, OpenMode, SeekWhence, VStat, VfsDirEntry};
use crate::error::{KResult, KernelError};

/// Byte offset of the FAT16 partition on the disk.
pub const PARTITION_OFFSET: u64 = 0x10_0000;

/// FAT entry values.
pub const FAT_FREE: u16 = 0x0000;
pub const FAT_RESERVED: u16 = 0x0001;
pub const FAT_BAD: u16 = 0xFFF7;
/// Entries at or above this value terminate a chain.
pub const FAT_END_OF_CHAIN: u16 = 0xFFF8;
/// Value written to terminate a chain.
const FAT_EOC_WRITE: u16 = 0xFFFF;

/// A resolved node inside the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fat16Node {
    /// The fixed root directory area.
    RootDir,
    /// A subdirectory entry.
    Dir {
        entry: DirEntry,
        /// Absolute byte offset of the 32-byte entry on disk.
        entry_pos: u64,
    },
    /// A file entry.
    File { entry: DirEntry, entry_pos: u64 },
}

impl Fat16Node {
    /// Userland name; the root directory reads as `/`.
    pub fn name(&self) -> String {
        match self {
            Fat16Node::RootDir => String::from("/"),
            Fat16Node::Dir { entry, .. } | Fat16Node::File { entry, .. } => entry.userland_name(),
        }
    }

    pub fn is_directory(&self) -> bool {
        !matches!(self, Fat16Node::File { .. })
    }
}

/// An open FAT16 file or directory.
#[derive(Debug, Clone)]
pub struct Fat16Handle {
    pub node: Fat16Node,
    /// Byte position from the start of the file.
    pub pos: u32,
}

/// A mounted FAT16 volume: validated headers plus derived layout.
pub struct Fat16Volume {
    bpb: Bpb,
    #[allow(dead_code)]
    ebpb: Ebpb,
    partition_offset: u64,
}

impl Fat16Volume {
    /// Read and validate the headers; compute and log the layout.
    pub fn resolve(dev: &mut dyn BlockDevice) -> KResult<Self> {
        let mut header = [0u8; bpb::HEADER_SIZE];
        let mut stream = Stream::new(dev);
        stream.seek(PARTITION_OFFSET);
        stream.read(&mut header)?;

        let bpb = Bpb::decode(&header)?;
        let ebpb = Ebpb::decode(&header)?;
        bpb::validate(&bpb, &ebpb)?;

        log::info!(
            "fat16: {} total sectors, {} clusters of {} bytes, root dir at +0x{:x}, fat at +0x{:x}",
            bpb.total_sectors(),
            bpb.total_clusters(),
            bpb.cluster_size(),
            bpb.root_dir_offset(),
            bpb.fat_offset()
        );

        Ok(Self {
            bpb,
            ebpb,
            partition_offset: PARTITION_OFFSET,
        })
    }

    pub fn cluster_size(&self) -> u32 {
        self.bpb.cluster_size()
    }

    /// Absolute byte offset of a data cluster.
    fn cluster_pos(&self, cluster: u16) -> u64 {
        self.partition_offset
            + self.bpb.sector_for_cluster(cluster) as u64 * self.bpb.bytes_per_sec as u64
    }

    /// Absolute byte offset of the FAT entry for `cluster`.
    fn fat_entry_pos(&self, cluster: u16) -> u64 {
        self.partition_offset + self.bpb.fat_offset() as u64 + cluster as u64 * 2
    }

    /// Absolute byte offset of the root directory area.
    fn root_dir_pos(&self) -> u64 {
        self.partition_offset + self.bpb.root_dir_offset() as u64
    }

    fn read_fat_entry(&self, dev: &mut dyn BlockDevice, cluster: u16) -> KResult<u16> {
        let mut raw = [0u8; 2];
        let mut stream = Stream::new(dev);
        stream.seek(self.fat_entry_pos(cluster));
        stream.read(&mut raw)?;
        Ok(u16::from_le_bytes(raw))
    }

    fn write_fat_entry(&self, dev: &mut dyn BlockDevice, cluster: u16, value: u16) -> KResult<()> {
        let mut stream = Stream::new(dev);
        stream.seek(self.fat_entry_pos(cluster));
        stream.write(&value.to_le_bytes())
    }

    /// First-fit scan for a free cluster.
    fn find_free_cluster(&self, dev: &mut dyn BlockDevice) -> KResult<u16> {
        let limit = 2 + self.bpb.total_clusters().min(u16::MAX as u32 - 2) as u16;
        for cluster in 2..limit {
            if self.read_fat_entry(dev, cluster)? == FAT_FREE {
                return Ok(cluster);
            }
        }
        Err(KernelError::OutOfMemory)
    }

    /// Number of clusters in the chain starting at `start`.
    fn chain_length(&self, dev: &mut dyn BlockDevice, start: u16) -> KResult<u32> {
        let mut length = 1u32;
        let mut cluster = start;
        loop {
            let next = self.read_fat_entry(dev, cluster)?;
            if next >= FAT_END_OF_CHAIN {
                return Ok(length);
            }
            if next == FAT_FREE || next == FAT_RESERVED || next == FAT_BAD {
                return Err(KernelError::Io);
            }
            length += 1;
            cluster = next;
        }
    }

    /// Follow the chain `hops` links from `start`. With `extend`, chain
    /// ends are grown with freshly allocated end-of-chain clusters.
    fn walk_chain(
        &self,
        dev: &mut dyn BlockDevice,
        start: u16,
        hops: u32,
        extend: bool,
    ) -> KResult<Option<u16>> {
        let mut cluster = start;
        for _ in 0..hops {
            let next = self.read_fat_entry(dev, cluster)?;
            if next >= FAT_END_OF_CHAIN {
                if !extend {
                    return Ok(None);
                }
                let fresh = self.find_free_cluster(dev)?;
                self.write_fat_entry(dev, fresh, FAT_EOC_WRITE)?;
                self.write_fat_entry(dev, cluster, fresh)?;
                cluster = fresh;
            } else if next == FAT_FREE || next == FAT_RESERVED || next == FAT_BAD {
                return Err(KernelError::Io);
            } else {
                cluster = next;
            }
        }
        Ok(Some(cluster))
    }

    /// Find `native` among the root-directory entries.
    fn find_in_root(
        &self,
        dev: &mut dyn BlockDevice,
        native: &[u8; 11],
    ) -> KResult<Option<(DirEntry, u64)>> {
        let base = self.root_dir_pos();
        for index in 0..self.bpb.root_ent_cnt as u64 {
            let pos = base + index * DIR_ENTRY_SIZE as u64;
            let entry = self.entry_at(dev, pos)?;
            if entry.is_free() || entry.is_deleted() || entry.is_lfn() {
                continue;
            }
            if entry.name == *native {
                return Ok(Some((entry, pos)));
            }
        }
        Ok(None)
    }

    /// Find `native` inside a subdirectory's cluster chain.
    fn find_in_dir_chain(
        &self,
        dev: &mut dyn BlockDevice,
        start_cluster: u16,
        native: &[u8; 11],
    ) -> KResult<Option<(DirEntry, u64)>> {
        let entries_per_cluster = self.cluster_size() as u64 / DIR_ENTRY_SIZE as u64;
        let mut cluster = start_cluster;
        loop {
            let base = self.cluster_pos(cluster);
            for index in 0..entries_per_cluster {
                let pos = base + index * DIR_ENTRY_SIZE as u64;
                let entry = self.entry_at(dev, pos)?;
                if entry.is_free() || entry.is_deleted() || entry.is_lfn() {
                    continue;
                }
                if entry.name == *native {
                    return Ok(Some((entry, pos)));
                }
            }
            let next = self.read_fat_entry(dev, cluster)?;
            if next >= FAT_END_OF_CHAIN {
                return Ok(None);
            }
            cluster = next;
        }
    }

    fn entry_at(&self, dev: &mut dyn BlockDevice, pos: u64) -> KResult<DirEntry> {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        let mut stream = Stream::new(dev);
        stream.seek(pos);
        stream.read(&mut raw)?;
        Ok(DirEntry::decode(&raw))
    }

    fn write_entry_at(
        &self,
        dev: &mut dyn BlockDevice,
        pos: u64,
        entry: &DirEntry,
    ) -> KResult<()> {
        let mut stream = Stream::new(dev);
        stream.seek(pos);
        stream.write(&entry.encode())
    }

    /// Resolve a parsed path to a node, creating the file when asked to
    /// write a nonexistent root entry.
    pub fn open(
        &self,
        dev: &mut dyn BlockDevice,
        path: &ParsedPath,
        mode: OpenMode,
    ) -> KResult<Fat16Handle> {
        if path.is_root() {
            return Ok(Fat16Handle {
                node: Fat16Node::RootDir,
                pos: 0,
            });
        }

        let mut dir_cluster: Option<u16> = None;
        let last = path.components.len() - 1;
        for (depth, component) in path.components.iter().enumerate() {
            let native = to_native(component);
            let found = match dir_cluster {
                None => self.find_in_root(dev, &native)?,
                Some(cluster) => self.find_in_dir_chain(dev, cluster, &native)?,
            };
            match found {
                Some((entry, entry_pos)) => {
                    if depth == last {
                        let node = if entry.is_directory() {
                            Fat16Node::Dir { entry, entry_pos }
                        } else if entry.is_file() {
                            Fat16Node::File { entry, entry_pos }
                        } else {
                            return Err(KernelError::NotFound);
                        };
                        return Ok(Fat16Handle { node, pos: 0 });
                    }
                    if !entry.is_directory() {
                        return Err(KernelError::NotADirectory);
                    }
                    dir_cluster = Some(entry.first_cluster() as u16);
                }
                None => {
                    if depth == last && mode == OpenMode::Write && dir_cluster.is_none() {
                        let (entry, entry_pos) = self.create_root_file(dev, &native)?;
                        return Ok(Fat16Handle {
                            node: Fat16Node::File { entry, entry_pos },
                            pos: 0,
                        });
                    }
                    return Err(KernelError::NotFound);
                }
            }
        }
        Err(KernelError::NotFound)
    }

    /// Create an empty file in the root directory: free slot (0x00 or
    /// 0xE5 name byte), free cluster marked end-of-chain, fresh 32-byte
    /// entry written in place.
    fn create_root_file(
        &self,
        dev: &mut dyn BlockDevice,
        native: &[u8; 11],
    ) -> KResult<(DirEntry, u64)> {
        let base = self.root_dir_pos();
        let mut slot = None;
        for index in 0..self.bpb.root_ent_cnt as u64 {
            let pos = base + index * DIR_ENTRY_SIZE as u64;
            let entry = self.entry_at(dev, pos)?;
            if entry.is_free() || entry.is_deleted() {
                slot = Some(pos);
                break;
            }
        }
        let slot = slot.ok_or(KernelError::OutOfMemory)?;

        let cluster = self.find_free_cluster(dev)?;
        self.write_fat_entry(dev, cluster, FAT_EOC_WRITE)?;

        let mut entry = DirEntry::zeroed();
        entry.name = *native;
        entry.attributes = FatAttributes::ARCHIVE.bits();
        entry.set_first_cluster(cluster as u32);
        entry.file_size = 0;
        self.write_entry_at(dev, slot, &entry)?;
        log::info!(
            "fat16: created '{}' in / (cluster {})",
            entry.userland_name(),
            cluster
        );
        Ok((entry, slot))
    }

    /// Read from the handle's position, stopping at end of file or end of
    /// chain, whichever comes first. Returns bytes actually read.
    pub fn read(
        &self,
        dev: &mut dyn BlockDevice,
        handle: &mut Fat16Handle,
        buffer: &mut [u8],
    ) -> KResult<usize> {
        let entry = match &handle.node {
            Fat16Node::File { entry, .. } => *entry,
            _ => return Err(KernelError::IsADirectory),
        };
        let cluster_size = self.cluster_size();
        let available = entry.file_size.saturating_sub(handle.pos) as usize;
        let want = buffer.len().min(available);
        if want == 0 {
            return Ok(0);
        }

        let start = entry.first_cluster() as u16;
        let mut cluster = match self.walk_chain(dev, start, handle.pos / cluster_size, false)? {
            Some(cluster) => cluster,
            None => return Ok(0),
        };

        let mut done = 0usize;
        loop {
            let offset = handle.pos % cluster_size;
            let chunk = ((cluster_size - offset) as usize).min(want - done);
            let mut stream = Stream::new(dev);
            stream.seek(self.cluster_pos(cluster) + offset as u64);
            stream.read(&mut buffer[done..done + chunk])?;
            handle.pos += chunk as u32;
            done += chunk;
            if done == want {
                break;
            }
            let next = self.read_fat_entry(dev, cluster)?;
            if next >= FAT_END_OF_CHAIN {
                break;
            }
            cluster = next;
        }
        Ok(done)
    }

    /// Write at the handle's position, allocating and chaining fresh
    /// clusters as boundaries are crossed, then updating the directory
    /// entry's file size.
    pub fn write(
        &self,
        dev: &mut dyn BlockDevice,
        handle: &mut Fat16Handle,
        buffer: &[u8],
    ) -> KResult<usize> {
        let (entry, entry_pos) = match &handle.node {
            Fat16Node::File { entry, entry_pos } => (*entry, *entry_pos),
            _ => return Err(KernelError::IsADirectory),
        };
        if buffer.is_empty() {
            return Ok(0);
        }
        let cluster_size = self.cluster_size();
        let start = entry.first_cluster() as u16;
        let mut cluster = self
            .walk_chain(dev, start, handle.pos / cluster_size, true)?
            .ok_or(KernelError::Io)?;

        let mut done = 0usize;
        loop {
            let offset = handle.pos % cluster_size;
            let chunk = ((cluster_size - offset) as usize).min(buffer.len() - done);
            let mut stream = Stream::new(dev);
            stream.seek(self.cluster_pos(cluster) + offset as u64);
            stream.write(&buffer[done..done + chunk])?;
            handle.pos += chunk as u32;
            done += chunk;
            if done == buffer.len() {
                break;
            }
            cluster = self
                .walk_chain(dev, cluster, 1, true)?
                .ok_or(KernelError::Io)?;
        }

        if handle.pos > entry.file_size {
            let mut updated = entry;
            updated.file_size = handle.pos;
            self.write_entry_at(dev, entry_pos, &updated)?;
            handle.node = Fat16Node::File {
                entry: updated,
                entry_pos,
            };
        }
        Ok(done)
    }

    /// Fill a [`VStat`] for the handle, walking the cluster chain to
    /// count allocated blocks.
    pub fn stat(
        &self,
        dev: &mut dyn BlockDevice,
        dev_name: &str,
        handle: &Fat16Handle,
    ) -> KResult<VStat> {
        let cluster_size = self.cluster_size();
        let sector_size = self.bpb.bytes_per_sec as u32;
        let mut stat = VStat {
            dev: [0; 2],
            kind: if handle.node.is_directory() {
                NodeKind::Dir
            } else {
                NodeKind::File
            },
            size: 0,
            block_size: cluster_size,
            blocks: 0,
            access_date: 0,
            modification_date: 0,
            creation_time: 0,
        };
        for (slot, byte) in stat.dev.iter_mut().zip(dev_name.bytes()) {
            *slot = byte;
        }
        match &handle.node {
            Fat16Node::RootDir => {
                stat.blocks = self.bpb.root_dir_sectors();
                stat.block_size = sector_size;
            }
            Fat16Node::Dir { entry, .. } | Fat16Node::File { entry, .. } => {
                let chain = self.chain_length(dev, entry.first_cluster() as u16)?;
                stat.size = entry.file_size;
                stat.blocks = chain * cluster_size / sector_size;
                stat.access_date = entry.last_access_date as u32;
                stat.modification_date = entry.modification_date as u32;
                stat.creation_time = entry.creation_time_ms as u32;
            }
        }
        Ok(stat)
    }

    /// Reposition the handle. `SEEK_END` stays unimplemented; positions
    /// past the current file size are rejected.
    pub fn seek(&self, handle: &mut Fat16Handle, offset: u32, whence: SeekWhence) -> KResult<()> {
        let size = match &handle.node {
            Fat16Node::File { entry, .. } => entry.file_size,
            _ => return Err(KernelError::IsADirectory),
        };
        let target = match whence {
            SeekWhence::Set => offset,
            SeekWhence::Cur => handle.pos.saturating_add(offset),
            SeekWhence::End => return Err(KernelError::InvalidArgument),
        };
        if target >= size && target != 0 {
            return Err(KernelError::Io);
        }
        handle.pos = target;
        Ok(())
    }

    /// Return the `index`-th listable entry of a directory, or `None`
    /// past the end.
    pub fn readdir(
        &self,
        dev: &mut dyn BlockDevice,
        node: &Fat16Node,
        index: u32,
    ) -> KResult<Option<VfsDirEntry>> {
        let mut seen = 0u32;
        match node {
            Fat16Node::File { .. } => Err(KernelError::NotADirectory),
            Fat16Node::RootDir => {
                let base = self.root_dir_pos();
                for slot in 0..self.bpb.root_ent_cnt as u64 {
                    let entry = self.entry_at(dev, base + slot * DIR_ENTRY_SIZE as u64)?;
                    if !entry.is_listable() {
                        continue;
                    }
                    if seen == index {
                        return Ok(Some(Self::dirent_from(&entry)));
                    }
                    seen += 1;
                }
                Ok(None)
            }
            Fat16Node::Dir { entry, .. } => {
                let entries_per_cluster = self.cluster_size() as u64 / DIR_ENTRY_SIZE as u64;
                let mut cluster = entry.first_cluster() as u16;
                loop {
                    let base = self.cluster_pos(cluster);
                    for slot in 0..entries_per_cluster {
                        let entry = self.entry_at(dev, base + slot * DIR_ENTRY_SIZE as u64)?;
                        if !entry.is_listable() {
                            continue;
                        }
                        if seen == index {
                            return Ok(Some(Self::dirent_from(&entry)));
                        }
                        seen += 1;
                    }
                    let next = self.read_fat_entry(dev, cluster)?;
                    if next >= FAT_END_OF_CHAIN {
                        return Ok(None);
                    }
                    cluster = next;
                }
            }
        }
    }

    fn dirent_from(entry: &DirEntry) -> VfsDirEntry {
        VfsDirEntry {
            name: entry.userland_name(),
            kind: if entry.is_directory() {
                NodeKind::Dir
            } else {
                NodeKind::File
            },
        }
    }

    /// Log the directory tree from `node`, one line per entry, indented
    /// by depth. Diagnostics only.
    pub fn dump_tree(
        &self,
        dev: &mut dyn BlockDevice,
        node: &Fat16Node,
        depth: usize,
    ) -> KResult<()> {
        const MAX_DEPTH: usize = 8;
        if depth >= MAX_DEPTH {
            return Ok(());
        }
        let mut index = 0;
        loop {
            let Some(listing) = self.readdir(dev, node, index)? else {
                return Ok(());
            };
            let date = dirent::unpack_date(self.entry_by_index(dev, node, index)?.modification_date);
            log::info!(
                "fat16: {:indent$}{}{} ({:04}-{:02}-{:02})",
                "",
                listing.name,
                if listing.kind == NodeKind::Dir { "/" } else { "" },
                date.year,
                date.month,
                date.day,
                indent = depth * 2
            );
            if listing.kind == NodeKind::Dir {
                if let Some((entry, entry_pos)) = self.lookup_in(dev, node, &listing.name)? {
                    let child = Fat16Node::Dir { entry, entry_pos };
                    self.dump_tree(dev, &child, depth + 1)?;
                }
            }
            index += 1;
        }
    }

    /// The raw entry behind the `index`-th listable slot of a directory.
    fn entry_by_index(
        &self,
        dev: &mut dyn BlockDevice,
        node: &Fat16Node,
        index: u32,
    ) -> KResult<DirEntry> {
        let name = self
            .readdir(dev, node, index)?
            .ok_or(KernelError::NotFound)?
            .name;
        self.lookup_in(dev, node, &name)?
            .map(|(entry, _)| entry)
            .ok_or(KernelError::NotFound)
    }

    /// Find a child entry by userland name inside a directory node.
    fn lookup_in(
        &self,
        dev: &mut dyn BlockDevice,
        node: &Fat16Node,
        name: &str,
    ) -> KResult<Option<(DirEntry, u64)>> {
        let native = to_native(name);
        match node {
            Fat16Node::File { .. } => Err(KernelError::NotADirectory),
            Fat16Node::RootDir => self.find_in_root(dev, &native),
            Fat16Node::Dir { entry, .. } => {
                self.find_in_dir_chain(dev, entry.first_cluster() as u16, &native)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::mkfs::ImageBuilder;
    use super::*;
    use crate::fs::path;

    fn volume() -> (crate::fs::RamDisk, Fat16Volume) {
        let mut builder = ImageBuilder::new("EMBEROS");
        builder.add_file("HELLO.TXT", b"hello fat sixteen");
        let etc = builder.mkdir("ETC");
        builder.add_file_in(etc, "TIMEZONE", b"Europe/Berlin");
        builder.add_file("KERNEL.BIN", &[0xAB; 2000]);
        let mut disk = builder.build();
        let volume = Fat16Volume::resolve(&mut disk).unwrap();
        (disk, volume)
    }

    fn open(
        volume: &Fat16Volume,
        disk: &mut crate::fs::RamDisk,
        path_str: &str,
        mode: OpenMode,
    ) -> KResult<Fat16Handle> {
        let parsed = path::parse(path_str).unwrap();
        volume.open(disk, &parsed, mode)
    }

    #[test]
    fn resolve_rejects_an_unformatted_disk() {
        let mut disk = crate::fs::RamDisk::new("A", 12 * 1024);
        assert!(Fat16Volume::resolve(&mut disk).is_err());
    }

    #[test]
    fn opens_and_reads_a_root_file() {
        let (mut disk, volume) = volume();
        let mut handle = open(&volume, &mut disk, "A:/HELLO.TXT", OpenMode::Read).unwrap();
        let mut buffer = [0u8; 64];
        let read = volume.read(&mut disk, &mut handle, &mut buffer).unwrap();
        assert_eq!(&buffer[..read], b"hello fat sixteen");
        // A second read sits at EOF.
        assert_eq!(volume.read(&mut disk, &mut handle, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn walks_subdirectories() {
        let (mut disk, volume) = volume();
        let mut handle = open(&volume, &mut disk, "A:/ETC/TIMEZONE", OpenMode::Read).unwrap();
        let mut buffer = [0u8; 32];
        let read = volume.read(&mut disk, &mut handle, &mut buffer).unwrap();
        assert_eq!(read, 13);
        assert_eq!(&buffer[..read], b"Europe/Berlin");
    }

    #[test]
    fn missing_files_and_wrong_parents_error() {
        let (mut disk, volume) = volume();
        assert_eq!(
            open(&volume, &mut disk, "A:/NOPE.TXT", OpenMode::Read).unwrap_err(),
            KernelError::NotFound
        );
        assert_eq!(
            open(&volume, &mut disk, "A:/HELLO.TXT/X.Y", OpenMode::Read).unwrap_err(),
            KernelError::NotADirectory
        );
    }

    #[test]
    fn root_opens_as_a_directory_node() {
        let (mut disk, volume) = volume();
        let handle = open(&volume, &mut disk, "A:/", OpenMode::Read).unwrap();
        assert_eq!(handle.node, Fat16Node::RootDir);
        assert_eq!(handle.node.name(), "/");
        let mut buffer = [0u8; 8];
        let mut handle = handle;
        assert_eq!(
            volume.read(&mut disk, &mut handle, &mut buffer).unwrap_err(),
            KernelError::IsADirectory
        );
    }

    #[test]
    fn write_creates_the_file_and_read_gets_it_back() {
        let (mut disk, volume) = volume();
        let mut handle = open(&volume, &mut disk, "A:/LOG.TXT", OpenMode::Write).unwrap();
        let written = volume.write(&mut disk, &mut handle, b"Hello\n").unwrap();
        assert_eq!(written, 6);

        let mut handle = open(&volume, &mut disk, "A:/LOG.TXT", OpenMode::Read).unwrap();
        match &handle.node {
            Fat16Node::File { entry, .. } => assert_eq!(entry.file_size, 6),
            other => panic!("expected file node, got {other:?}"),
        }
        let mut buffer = [0u8; 6];
        assert_eq!(volume.read(&mut disk, &mut handle, &mut buffer).unwrap(), 6);
        assert_eq!(&buffer, b"Hello\n");
    }

    #[test]
    fn reads_only_open_existing_files() {
        let (mut disk, volume) = volume();
        assert_eq!(
            open(&volume, &mut disk, "A:/MISSING.TXT", OpenMode::Read).unwrap_err(),
            KernelError::NotFound
        );
    }

    #[test]
    fn large_writes_chain_multiple_clusters() {
        let (mut disk, volume) = volume();
        let payload: alloc::vec::Vec<u8> = (0..3000u32).map(|value| (value % 251) as u8).collect();
        let mut handle = open(&volume, &mut disk, "A:/BIG.BIN", OpenMode::Write).unwrap();
        assert_eq!(volume.write(&mut disk, &mut handle, &payload).unwrap(), 3000);

        let handle = open(&volume, &mut disk, "A:/BIG.BIN", OpenMode::Read).unwrap();
        let stat = volume.stat(&mut disk, "A", &handle).unwrap();
        assert_eq!(stat.size, 3000);
        // 3000 bytes over 512-byte clusters: six clusters.
        assert_eq!(stat.blocks, 6);

        let mut handle = handle;
        let mut readback = vec![0u8; 3000];
        assert_eq!(
            volume.read(&mut disk, &mut handle, &mut readback).unwrap(),
            3000
        );
        assert_eq!(readback, payload);
    }

    #[test]
    fn read_past_eof_is_clamped_by_file_size() {
        let (mut disk, volume) = volume();
        let mut handle = open(&volume, &mut disk, "A:/ETC/TIMEZONE", OpenMode::Read).unwrap();
        let mut buffer = [0u8; 512];
        assert_eq!(
            volume.read(&mut disk, &mut handle, &mut buffer).unwrap(),
            13
        );
        assert_eq!(handle.pos, 13);
    }

    #[test]
    fn seek_set_and_cur_reject_out_of_range() {
        let (mut disk, volume) = volume();
        let mut handle = open(&volume, &mut disk, "A:/HELLO.TXT", OpenMode::Read).unwrap();
        volume.seek(&mut handle, 6, SeekWhence::Set).unwrap();
        let mut buffer = [0u8; 3];
        volume.read(&mut disk, &mut handle, &mut buffer).unwrap();
        assert_eq!(&buffer, b"fat");

        volume.seek(&mut handle, 2, SeekWhence::Cur).unwrap();
        assert_eq!(handle.pos, 11);

        assert_eq!(
            volume.seek(&mut handle, 99, SeekWhence::Set).unwrap_err(),
            KernelError::Io
        );
        assert_eq!(
            volume.seek(&mut handle, 0, SeekWhence::End).unwrap_err(),
            KernelError::InvalidArgument
        );
    }

    #[test]
    fn readdir_lists_each_root_entry_once() {
        let (mut disk, volume) = volume();
        let mut names = alloc::vec::Vec::new();
        let mut index = 0;
        while let Some(entry) = volume.readdir(&mut disk, &Fat16Node::RootDir, index).unwrap() {
            names.push((entry.name, entry.kind));
            index += 1;
        }
        assert!(names.contains(&(String::from("HELLO.TXT"), NodeKind::File)));
        assert!(names.contains(&(String::from("ETC"), NodeKind::Dir)));
        assert!(names.contains(&(String::from("KERNEL.BIN"), NodeKind::File)));
        assert_eq!(names.len(), 3);
        // Past the end: None, repeatedly.
        assert!(volume
            .readdir(&mut disk, &Fat16Node::RootDir, index)
            .unwrap()
            .is_none());
    }

    #[test]
    fn readdir_descends_into_subdirectories() {
        let (mut disk, volume) = volume();
        let handle = open(&volume, &mut disk, "A:/ETC", OpenMode::Read).unwrap();
        let entry = volume.readdir(&mut disk, &handle.node, 0).unwrap().unwrap();
        assert_eq!(entry.name, "TIMEZONE");
        assert_eq!(entry.kind, NodeKind::File);
        assert!(volume.readdir(&mut disk, &handle.node, 1).unwrap().is_none());
    }

    #[test]
    fn lookup_and_tree_dump_walk_directories() {
        let (mut disk, volume) = volume();
        let (entry, _) = volume
            .lookup_in(&mut disk, &Fat16Node::RootDir, "ETC")
            .unwrap()
            .unwrap();
        assert!(entry.is_directory());
        let etc = Fat16Node::Dir {
            entry,
            entry_pos: 0,
        };
        let (entry, _) = volume
            .lookup_in(&mut disk, &etc, "TIMEZONE")
            .unwrap()
            .unwrap();
        assert!(entry.is_file());
        // The tree dump must terminate on this two-level layout.
        volume.dump_tree(&mut disk, &Fat16Node::RootDir, 0).unwrap();
    }

    #[test]
    fn stat_counts_cluster_chain_blocks() {
        let (mut disk, volume) = volume();
        let handle = open(&volume, &mut disk, "A:/KERNEL.BIN", OpenMode::Read).unwrap();
        let stat = volume.stat(&mut disk, "A", &handle).unwrap();
        assert_eq!(stat.size, 2000);
        assert_eq!(stat.block_size, 512);
        // 2000 bytes in 512-byte clusters: four.
        assert_eq!(stat.blocks, 4);
        assert_eq!(&stat.dev, b"A\0");
        assert_eq!(stat.kind, NodeKind::File);
    }
}
