//! FAT16 image building
//!
//! Formats a blank volume and populates root files, subdirectories and
//! their contents, then serializes everything to a [`RamDisk`]. Used by
//! the filesystem tests and suitable for building boot-disk images.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::bpb::{Bpb, Ebpb, DIR_ENTRY_SIZE};
use super::dirent::{to_native, DirEntry, FatAttributes};
use super::{FAT_END_OF_CHAIN, PARTITION_OFFSET};
use crate::fs::blockdev::{RamDisk, SECTOR_SIZE};

/// Incrementally builds a FAT16 volume image.
pub struct ImageBuilder {
    bpb: Bpb,
    ebpb: Ebpb,
    fat: Vec<u16>,
    root: Vec<DirEntry>,
    clusters: BTreeMap<u16, Vec<u8>>,
}

impl ImageBuilder {
    /// Start a small, valid FAT16 volume (512-byte clusters, two FATs,
    /// 512 root entries).
    pub fn new(label: &str) -> Self {
        let bpb = Bpb {
            jmp: [0xEB, 0x3C, 0x90],
            oem: *b"EMBEROS ",
            bytes_per_sec: 512,
            sec_per_clus: 1,
            rsvd_sec: 1,
            num_fats: 2,
            root_ent_cnt: 512,
            tot_sec_16: 4300,
            media: 0xF8,
            fatsz16: 17,
            sec_per_trk: 63,
            num_heads: 16,
            hidd_sec: 0,
            tot_sec_32: 0,
        };
        let mut vol_lab = [b' '; 11];
        for (slot, byte) in vol_lab.iter_mut().zip(label.bytes()) {
            *slot = byte.to_ascii_uppercase();
        }
        let ebpb = Ebpb {
            drv_num: 0x80,
            reserved1: 0,
            boot_sig: 0x29,
            vol_id: 0x1234_5678,
            vol_lab,
            fil_sys_type: *b"FAT16   ",
        };
        let mut fat = vec![0u16; bpb.fatsz16 as usize * SECTOR_SIZE / 2];
        // Reserved FAT entries 0 and 1.
        fat[0] = 0xFFF8;
        fat[1] = 0xFFFF;
        Self {
            bpb,
            ebpb,
            fat,
            root: Vec::new(),
            clusters: BTreeMap::new(),
        }
    }

    fn cluster_size(&self) -> usize {
        self.bpb.cluster_size() as usize
    }

    fn alloc_cluster(&mut self) -> u16 {
        let cluster = (2..self.fat.len() as u16)
            .find(|cluster| self.fat[*cluster as usize] == 0)
            .expect("image builder: volume full");
        self.fat[cluster as usize] = 0xFFFF;
        self.clusters.insert(cluster, vec![0; self.cluster_size()]);
        cluster
    }

    /// Store `contents` as a cluster chain, returning the first cluster.
    fn alloc_chain(&mut self, contents: &[u8]) -> u16 {
        let cluster_size = self.cluster_size();
        let first = self.alloc_cluster();
        let mut current = first;
        let mut chunks = contents.chunks(cluster_size);
        if let Some(chunk) = chunks.next() {
            self.clusters.get_mut(&current).unwrap()[..chunk.len()].copy_from_slice(chunk);
        }
        for chunk in chunks {
            let next = self.alloc_cluster();
            self.fat[current as usize] = next;
            self.clusters.get_mut(&next).unwrap()[..chunk.len()].copy_from_slice(chunk);
            current = next;
        }
        first
    }

    fn file_entry(name: &str, cluster: u16, size: u32, attributes: FatAttributes) -> DirEntry {
        let mut entry = DirEntry::zeroed();
        entry.name = to_native(name);
        entry.attributes = attributes.bits();
        entry.set_first_cluster(cluster as u32);
        entry.file_size = size;
        entry
    }

    /// Add a file to the root directory.
    pub fn add_file(&mut self, name: &str, contents: &[u8]) {
        let cluster = self.alloc_chain(contents);
        self.root.push(Self::file_entry(
            name,
            cluster,
            contents.len() as u32,
            FatAttributes::ARCHIVE,
        ));
    }

    /// Add an empty subdirectory to the root; returns its cluster so
    /// files can be placed inside.
    pub fn mkdir(&mut self, name: &str) -> u16 {
        let cluster = self.alloc_cluster();
        self.root
            .push(Self::file_entry(name, cluster, 0, FatAttributes::DIRECTORY));
        cluster
    }

    /// Add a file inside the directory cluster returned by [`mkdir`].
    pub fn add_file_in(&mut self, dir_cluster: u16, name: &str, contents: &[u8]) {
        let cluster = self.alloc_chain(contents);
        let entry = Self::file_entry(name, cluster, contents.len() as u32, FatAttributes::ARCHIVE);
        let data = self
            .clusters
            .get_mut(&dir_cluster)
            .expect("image builder: unknown directory cluster");
        let slot = (0..data.len() / DIR_ENTRY_SIZE as usize)
            .find(|slot| data[slot * DIR_ENTRY_SIZE as usize] == 0)
            .expect("image builder: directory cluster full");
        data[slot * DIR_ENTRY_SIZE as usize..(slot + 1) * DIR_ENTRY_SIZE as usize]
            .copy_from_slice(&entry.encode());
    }

    /// Serialize headers, FAT copies, root directory and data clusters
    /// into a RAM disk with the partition at its fixed offset.
    pub fn build(self) -> RamDisk {
        let total_bytes =
            PARTITION_OFFSET as usize + self.bpb.total_sectors() as usize * SECTOR_SIZE;
        let mut image = vec![0u8; total_bytes];
        let partition = PARTITION_OFFSET as usize;

        self.bpb.encode(&mut image[partition..]);
        self.ebpb.encode(&mut image[partition..]);
        image[partition + 510] = 0x55;
        image[partition + 511] = 0xAA;

        for copy in 0..self.bpb.num_fats as usize {
            let base = partition
                + self.bpb.fat_offset() as usize
                + copy * self.bpb.fatsz16 as usize * SECTOR_SIZE;
            for (index, value) in self.fat.iter().enumerate() {
                image[base + index * 2..base + index * 2 + 2]
                    .copy_from_slice(&value.to_le_bytes());
            }
        }

        let root_base = partition + self.bpb.root_dir_offset() as usize;
        for (index, entry) in self.root.iter().enumerate() {
            let at = root_base + index * DIR_ENTRY_SIZE as usize;
            image[at..at + DIR_ENTRY_SIZE as usize].copy_from_slice(&entry.encode());
        }

        for (cluster, data) in &self.clusters {
            let at = partition + self.bpb.sector_for_cluster(*cluster) as usize * SECTOR_SIZE;
            image[at..at + data.len()].copy_from_slice(data);
        }

        RamDisk::from_image("A", image)
    }
}

/// Render a FAT chain for diagnostics ("3 -> 4 -> EOC").
pub fn format_chain(fat: &[u16], first: u16) -> String {
    use core::fmt::Write;

    let mut out = String::new();
    let mut cluster = first;
    loop {
        let _ = write!(out, "{}", cluster);
        let next = fat[cluster as usize];
        if next >= FAT_END_OF_CHAIN {
            out.push_str(" -> EOC");
            return out;
        }
        out.push_str(" -> ");
        cluster = next;
    }
}
