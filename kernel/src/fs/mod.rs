//! Filesystem layer
//!
//! Bottom-up: [`blockdev`] abstracts a 512-byte-sector device (ATA on
//! hardware, a RAM disk in tests), [`stream`] gives byte-granular random
//! access on top of it, [`path`] parses `DRV:/DIR/NAME.EXT` paths,
//! [`fat16`] implements the on-disk filesystem, and [`vfs`] multiplexes
//! open files over the mounted volumes behind integer descriptors.

pub mod blockdev;
pub mod fat16;
pub mod path;
pub mod stream;
pub mod vfs;

use lazy_static::lazy_static;
use spin::Mutex;

pub use blockdev::{BlockDevice, RamDisk, SECTOR_SIZE};
pub use stream::Stream;
pub use vfs::{NodeKind, OpenMode, SeekWhence, VStat, Vfs, VfsDirEntry};

lazy_static! {
    /// The kernel's VFS instance. Bring-up registers and mounts the boot
    /// disk; the syscall layer resolves descriptors against it.
    pub static ref VFS: Mutex<Vfs> = Mutex::new(Vfs::new());
}
