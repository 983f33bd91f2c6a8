//! End-to-end filesystem scenarios over a RAM-backed FAT16 volume:
//! open-and-read, write-then-read-back, and directory listing, all
//! through the VFS descriptor table.

use ember_kernel::fs::fat16::mkfs::ImageBuilder;
use ember_kernel::fs::vfs::{OpenMode, Vfs};
use ember_kernel::fs::NodeKind;
use ember_kernel::KernelError;

fn boot_volume() -> Vfs {
    let mut builder = ImageBuilder::new("EMBEROS");
    let etc = builder.mkdir("ETC");
    builder.add_file_in(etc, "TIMEZONE", b"Europe/Berlin");
    let bin = builder.mkdir("BIN");
    builder.add_file_in(bin, "ICARSH.BIN", &[0x90; 1024]);
    let mut vfs = Vfs::new();
    vfs.register_disk('A', Box::new(builder.build()));
    vfs.mount('A').expect("freshly built image must mount");
    vfs
}

#[test]
fn open_and_read_a_config_file() {
    let mut vfs = boot_volume();
    let fd = vfs.open("A:/ETC/TIMEZONE", OpenMode::Read).unwrap();
    assert!(fd >= 1);
    let mut buffer = [0u8; 32];
    let read = vfs.read(fd, &mut buffer).unwrap();
    assert_eq!(read, 13);
    assert_eq!(&buffer[..read], b"Europe/Berlin");
    assert!(vfs.close(fd).is_ok());
}

#[test]
fn write_creates_then_read_returns_the_same_bytes() {
    let mut vfs = boot_volume();
    let fd = vfs.open("A:/TMP/LOG.TXT", OpenMode::Write);
    // Creation is root-directory only; the TMP parent does not exist.
    assert_eq!(fd.unwrap_err(), KernelError::NotFound);

    let fd = vfs.open("A:/LOG.TXT", OpenMode::Write).unwrap();
    assert_eq!(vfs.write(fd, b"Hello\n").unwrap(), 6);
    vfs.close(fd).unwrap();

    let fd = vfs.open("A:/LOG.TXT", OpenMode::Read).unwrap();
    let mut buffer = [0u8; 6];
    assert_eq!(vfs.read(fd, &mut buffer).unwrap(), 6);
    assert_eq!(&buffer, b"Hello\n");
    vfs.close(fd).unwrap();
}

#[test]
fn root_listing_yields_each_entry_once_then_ends() {
    let mut vfs = boot_volume();
    let fd = vfs.open("A:/", OpenMode::Read).unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = vfs.readdir(fd).unwrap() {
        seen.push((entry.name, entry.kind));
    }
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&("ETC".to_string(), NodeKind::Dir)));
    assert!(seen.contains(&("BIN".to_string(), NodeKind::Dir)));
    // The cursor stays at the end.
    assert!(vfs.readdir(fd).unwrap().is_none());
    vfs.close(fd).unwrap();
}

#[test]
fn large_binary_round_trips_through_cluster_chains() {
    let mut vfs = boot_volume();
    let payload: Vec<u8> = (0..10_000u32).map(|value| (value % 253) as u8).collect();

    let fd = vfs.open("A:/DATA.BIN", OpenMode::Write).unwrap();
    assert_eq!(vfs.write(fd, &payload).unwrap(), payload.len());
    vfs.close(fd).unwrap();

    let fd = vfs.open("A:/DATA.BIN", OpenMode::Read).unwrap();
    let stat = vfs.stat(fd).unwrap();
    assert_eq!(stat.size as usize, payload.len());
    let mut readback = vec![0u8; payload.len()];
    assert_eq!(vfs.read(fd, &mut readback).unwrap(), payload.len());
    assert_eq!(readback, payload);
    vfs.close(fd).unwrap();
}

#[test]
fn shell_binary_loads_through_the_same_path_as_spawn() {
    // The process loader stages the image via open + stat + read.
    let mut vfs = boot_volume();
    let fd = vfs.open("A:/BIN/ICARSH.BIN", OpenMode::Read).unwrap();
    let stat = vfs.stat(fd).unwrap();
    assert_eq!(stat.size, 1024);
    let mut image = vec![0u8; stat.size as usize];
    assert_eq!(vfs.read(fd, &mut image).unwrap(), 1024);
    assert!(image.iter().all(|byte| *byte == 0x90));
    vfs.close(fd).unwrap();
}
