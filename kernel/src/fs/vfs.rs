//! Virtual filesystem
//!
//! Multiplexes open files over mounted volumes behind 1-based integer
//! descriptors. The filesystem set is closed, so dispatch is a match on
//! [`Volume`] rather than function-pointer tables; the descriptor table
//! has 512 slots and descriptor `fd` lives in slot `fd - 1`. Directory
//! reads keep a per-descriptor cursor that advances on each hit.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use super::blockdev::BlockDevice;
use super::fat16::{Fat16Handle, Fat16Volume};
use super::path;
use crate::error::{KResult, KernelError};

/// Size of the global file-descriptor table.
pub const MAX_DESCRIPTORS: usize = 512;
/// Size of the filesystem registry.
pub const MAX_FILESYSTEMS: usize = 8;

/// Open mode carried through the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl OpenMode {
    /// Mode from the syscall `flags` argument.
    pub fn from_flags(flags: u32) -> KResult<Self> {
        match flags {
            0 => Ok(OpenMode::Read),
            1 => Ok(OpenMode::Write),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// Mode from the stdio-style mode string.
    pub fn from_str(mode: &str) -> KResult<Self> {
        match mode {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

impl SeekWhence {
    pub fn from_raw(raw: u32) -> KResult<Self> {
        match raw {
            0 => Ok(SeekWhence::Set),
            1 => Ok(SeekWhence::Cur),
            2 => Ok(SeekWhence::End),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

/// Node classification reported by stat and readdir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

/// stat() result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VStat {
    /// Device name bytes ("A\0").
    pub dev: [u8; 2],
    pub kind: NodeKind,
    /// File size in bytes.
    pub size: u32,
    /// Allocation block size (cluster bytes).
    pub block_size: u32,
    /// Allocated blocks in device sectors.
    pub blocks: u32,
    /// Raw on-disk date/time fields.
    pub access_date: u32,
    pub modification_date: u32,
    pub creation_time: u32,
}

/// One directory entry reported by readdir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsDirEntry {
    pub name: String,
    pub kind: NodeKind,
}

/// The closed set of supported filesystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemKind {
    Fat16,
}

/// A mounted filesystem instance.
pub enum Volume {
    Fat16(Fat16Volume),
}

impl Volume {
    pub fn kind(&self) -> FilesystemKind {
        match self {
            Volume::Fat16(_) => FilesystemKind::Fat16,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Volume::Fat16(_) => "FAT16",
        }
    }
}

/// Filesystem-specific open-file state.
pub enum FileHandle {
    Fat16(Fat16Handle),
}

/// One registered disk: the device plus whatever mounted on it.
pub struct Disk {
    drive: char,
    dev: Box<dyn BlockDevice>,
    volume: Option<Volume>,
}

impl Disk {
    pub fn drive(&self) -> char {
        self.drive
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }
}

/// An occupied descriptor slot.
struct OpenFile {
    disk_index: usize,
    handle: FileHandle,
    /// readdir cursor.
    dir_offset: u32,
}

/// The VFS state: registry of filesystems, registered disks and the
/// descriptor table.
pub struct Vfs {
    filesystems: Vec<FilesystemKind>,
    disks: Vec<Disk>,
    descriptors: Vec<Option<OpenFile>>,
}

impl Vfs {
    pub fn new() -> Self {
        let mut descriptors = Vec::new();
        descriptors.resize_with(MAX_DESCRIPTORS, || None);
        let mut vfs = Self {
            filesystems: Vec::new(),
            disks: Vec::new(),
            descriptors,
        };
        vfs.register_filesystem(FilesystemKind::Fat16);
        vfs
    }

    /// Register a filesystem kind to be tried at mount time.
    pub fn register_filesystem(&mut self, kind: FilesystemKind) {
        if self.filesystems.len() >= MAX_FILESYSTEMS {
            panic!("vfs: filesystem registry exhausted");
        }
        if !self.filesystems.contains(&kind) {
            self.filesystems.push(kind);
        }
    }

    /// Register a disk under a drive letter; call [`mount`](Self::mount)
    /// afterwards.
    pub fn register_disk(&mut self, drive: char, dev: Box<dyn BlockDevice>) {
        self.disks.push(Disk {
            drive: drive.to_ascii_uppercase(),
            dev,
            volume: None,
        });
    }

    /// Try each registered filesystem on the drive's device; the first
    /// whose resolve accepts the on-disk layout gets mounted.
    pub fn mount(&mut self, drive: char) -> KResult<()> {
        let disk = self
            .disks
            .iter_mut()
            .find(|disk| disk.drive == drive.to_ascii_uppercase())
            .ok_or(KernelError::Io)?;
        for kind in &self.filesystems {
            let resolved = match kind {
                FilesystemKind::Fat16 => {
                    Fat16Volume::resolve(disk.dev.as_mut()).map(Volume::Fat16)
                }
            };
            if let Ok(volume) = resolved {
                log::info!("vfs: mounted {} on {}:", volume.name(), disk.drive);
                disk.volume = Some(volume);
                return Ok(());
            }
        }
        Err(KernelError::Io)
    }

    fn disk_for_drive(&self, drive: char) -> KResult<usize> {
        self.disks
            .iter()
            .position(|disk| disk.drive == drive)
            .ok_or(KernelError::Io)
    }

    /// Validate a descriptor and return its table index.
    fn slot_index(&self, fd: i32) -> KResult<usize> {
        if fd < 1 || fd as usize > MAX_DESCRIPTORS {
            return Err(KernelError::BadDescriptor);
        }
        let index = fd as usize - 1;
        if self.descriptors[index].is_none() {
            return Err(KernelError::BadDescriptor);
        }
        Ok(index)
    }

    /// Open `path_str`, returning a 1-based descriptor.
    pub fn open(&mut self, path_str: &str, mode: OpenMode) -> KResult<i32> {
        let parsed = path::parse(path_str)?;
        let disk_index = self.disk_for_drive(parsed.drive)?;
        let disk = &mut self.disks[disk_index];
        let volume = disk.volume.as_ref().ok_or(KernelError::Io)?;
        let handle = match volume {
            Volume::Fat16(volume) => volume
                .open(disk.dev.as_mut(), &parsed, mode)
                .map(FileHandle::Fat16)?,
        };
        let slot_index = self
            .descriptors
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::OutOfMemory)?;
        self.descriptors[slot_index] = Some(OpenFile {
            disk_index,
            handle,
            dir_offset: 0,
        });
        Ok(slot_index as i32 + 1)
    }

    /// Read into `buffer`, returning bytes read.
    pub fn read(&mut self, fd: i32, buffer: &mut [u8]) -> KResult<usize> {
        if buffer.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let index = self.slot_index(fd)?;
        // Split borrows: the handle lives in the descriptor table, the
        // device in the disk table.
        let Some(open) = self.descriptors[index].as_mut() else {
            return Err(KernelError::BadDescriptor);
        };
        let disk = &mut self.disks[open.disk_index];
        match (&mut open.handle, disk.volume.as_ref()) {
            (FileHandle::Fat16(handle), Some(Volume::Fat16(volume))) => {
                volume.read(disk.dev.as_mut(), handle, buffer)
            }
            _ => Err(KernelError::Io),
        }
    }

    /// Write from `buffer`, returning bytes written.
    pub fn write(&mut self, fd: i32, buffer: &[u8]) -> KResult<usize> {
        if buffer.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let index = self.slot_index(fd)?;
        let Some(open) = self.descriptors[index].as_mut() else {
            return Err(KernelError::BadDescriptor);
        };
        let disk = &mut self.disks[open.disk_index];
        match (&mut open.handle, disk.volume.as_ref()) {
            (FileHandle::Fat16(handle), Some(Volume::Fat16(volume))) => {
                volume.write(disk.dev.as_mut(), handle, buffer)
            }
            _ => Err(KernelError::Io),
        }
    }

    pub fn seek(&mut self, fd: i32, offset: u32, whence: SeekWhence) -> KResult<()> {
        let index = self.slot_index(fd)?;
        let Some(open) = self.descriptors[index].as_mut() else {
            return Err(KernelError::BadDescriptor);
        };
        match (&mut open.handle, self.disks[open.disk_index].volume.as_ref()) {
            (FileHandle::Fat16(handle), Some(Volume::Fat16(volume))) => {
                volume.seek(handle, offset, whence)
            }
            _ => Err(KernelError::Io),
        }
    }

    pub fn stat(&mut self, fd: i32) -> KResult<VStat> {
        let index = self.slot_index(fd)?;
        let Some(open) = self.descriptors[index].as_ref() else {
            return Err(KernelError::BadDescriptor);
        };
        let disk = &mut self.disks[open.disk_index];
        let drive = [disk.drive as u8];
        let drive_str = core::str::from_utf8(&drive).unwrap_or("A");
        match (&open.handle, disk.volume.as_ref()) {
            (FileHandle::Fat16(handle), Some(Volume::Fat16(volume))) => {
                volume.stat(disk.dev.as_mut(), drive_str, handle)
            }
            _ => Err(KernelError::Io),
        }
    }

    /// Return the next directory entry and advance the cursor, or `None`
    /// at the end of the directory.
    pub fn readdir(&mut self, fd: i32) -> KResult<Option<VfsDirEntry>> {
        let index = self.slot_index(fd)?;
        let Some(open) = self.descriptors[index].as_mut() else {
            return Err(KernelError::BadDescriptor);
        };
        let cursor = open.dir_offset;
        let disk = &mut self.disks[open.disk_index];
        let result = match (&open.handle, disk.volume.as_ref()) {
            (FileHandle::Fat16(handle), Some(Volume::Fat16(volume))) => {
                volume.readdir(disk.dev.as_mut(), &handle.node, cursor)
            }
            _ => Err(KernelError::Io),
        }?;
        if result.is_some() {
            open.dir_offset += 1;
        }
        Ok(result)
    }

    /// Release the descriptor. The slot may be reused by a later open.
    pub fn close(&mut self, fd: i32) -> KResult<()> {
        let index = self.slot_index(fd)?;
        self.descriptors[index] = None;
        Ok(())
    }

    /// Count of occupied descriptor slots.
    pub fn open_count(&self) -> usize {
        self.descriptors
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat16::mkfs::ImageBuilder;

    fn vfs_with_image() -> Vfs {
        let mut builder = ImageBuilder::new("EMBEROS");
        let etc = builder.mkdir("ETC");
        builder.add_file_in(etc, "TIMEZONE", b"Europe/Berlin");
        builder.add_file("MOTD.TXT", b"welcome to emberos\n");
        let mut vfs = Vfs::new();
        vfs.register_disk('A', Box::new(builder.build()));
        vfs.mount('A').unwrap();
        vfs
    }

    #[test]
    fn open_read_close_round_trip() {
        let mut vfs = vfs_with_image();
        let fd = vfs.open("A:/ETC/TIMEZONE", OpenMode::Read).unwrap();
        assert!(fd >= 1);
        let mut buffer = [0u8; 32];
        let read = vfs.read(fd, &mut buffer).unwrap();
        assert_eq!(read, 13);
        assert_eq!(&buffer[..read], b"Europe/Berlin");
        vfs.close(fd).unwrap();
        assert_eq!(vfs.read(fd, &mut buffer).unwrap_err(), KernelError::BadDescriptor);
    }

    #[test]
    fn descriptors_are_one_based_and_reusable() {
        let mut vfs = vfs_with_image();
        let first = vfs.open("A:/MOTD.TXT", OpenMode::Read).unwrap();
        let second = vfs.open("A:/ETC/TIMEZONE", OpenMode::Read).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        vfs.close(first).unwrap();
        // The freed slot is handed out again.
        let third = vfs.open("A:/MOTD.TXT", OpenMode::Read).unwrap();
        assert_eq!(third, 1);
        assert_eq!(vfs.open_count(), 2);
    }

    #[test]
    fn write_then_read_back() {
        let mut vfs = vfs_with_image();
        let fd = vfs.open("A:/TMP.TXT", OpenMode::Write).unwrap();
        assert_eq!(vfs.write(fd, b"Hello\n").unwrap(), 6);
        vfs.close(fd).unwrap();

        let fd = vfs.open("A:/TMP.TXT", OpenMode::Read).unwrap();
        let mut buffer = [0u8; 6];
        assert_eq!(vfs.read(fd, &mut buffer).unwrap(), 6);
        assert_eq!(&buffer, b"Hello\n");
        let stat = vfs.stat(fd).unwrap();
        assert_eq!(stat.size, 6);
        vfs.close(fd).unwrap();
    }

    #[test]
    fn readdir_advances_the_cursor() {
        let mut vfs = vfs_with_image();
        let fd = vfs.open("A:/", OpenMode::Read).unwrap();
        let first = vfs.readdir(fd).unwrap().unwrap();
        let second = vfs.readdir(fd).unwrap().unwrap();
        assert_ne!(first.name, second.name);
        assert!(vfs.readdir(fd).unwrap().is_none());
        vfs.close(fd).unwrap();
    }

    #[test]
    fn bad_descriptors_are_rejected() {
        let mut vfs = vfs_with_image();
        let mut buffer = [0u8; 4];
        for fd in [0, -1, 9999] {
            assert_eq!(vfs.read(fd, &mut buffer).unwrap_err(), KernelError::BadDescriptor);
            assert_eq!(vfs.close(fd).unwrap_err(), KernelError::BadDescriptor);
        }
        // Never-opened but in-range descriptor.
        assert_eq!(vfs.seek(7, 0, SeekWhence::Set).unwrap_err(), KernelError::BadDescriptor);
    }

    #[test]
    fn open_failures_map_to_the_error_taxonomy() {
        let mut vfs = vfs_with_image();
        assert_eq!(
            vfs.open("A:/NOPE.BIN", OpenMode::Read).unwrap_err(),
            KernelError::NotFound
        );
        assert_eq!(
            vfs.open("B:/X.Y", OpenMode::Read).unwrap_err(),
            KernelError::Io
        );
        assert_eq!(
            vfs.open("A:/??", OpenMode::Read).unwrap_err(),
            KernelError::InvalidArgument
        );
    }

    #[test]
    fn unmounted_disk_cannot_open() {
        let mut builder = ImageBuilder::new("X");
        builder.add_file("A.TXT", b"x");
        let mut vfs = Vfs::new();
        vfs.register_disk('A', Box::new(builder.build()));
        assert_eq!(
            vfs.open("A:/A.TXT", OpenMode::Read).unwrap_err(),
            KernelError::Io
        );
    }
}
