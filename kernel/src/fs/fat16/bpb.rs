//! FAT16 BIOS parameter block
//!
//! Explicit little-endian decode/encode of the BPB + EBPB pair at the
//! start of the partition, header validation, and the derived layout
//! arithmetic (FAT area, root directory area, data area) every other
//! FAT16 operation builds on. On-disk struct layout is never assumed to
//! match memory layout; each field is read at its byte offset.

use crate::error::{KResult, KernelError};

/// Combined on-disk size of BPB (36 bytes) and EBPB (26 bytes).
pub const HEADER_SIZE: usize = 62;

/// Boot-sector jump signature bytes.
pub const BOOT_SIG_1: u8 = 0xEB;
pub const BOOT_SIG_2: u8 = 0x90;
/// EBPB extended boot signature.
pub const EBPB_SIG: u8 = 0x29;
/// BIOS drive number for the first hard disk.
pub const HARD_DISK_DRIVE: u8 = 0x80;

/// Size of one directory entry.
pub const DIR_ENTRY_SIZE: u32 = 32;

/// BIOS parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bpb {
    pub jmp: [u8; 3],
    pub oem: [u8; 8],
    pub bytes_per_sec: u16,
    pub sec_per_clus: u8,
    pub rsvd_sec: u16,
    pub num_fats: u8,
    pub root_ent_cnt: u16,
    pub tot_sec_16: u16,
    pub media: u8,
    pub fatsz16: u16,
    pub sec_per_trk: u16,
    pub num_heads: u16,
    pub hidd_sec: u32,
    pub tot_sec_32: u32,
}

/// Extended BIOS parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ebpb {
    pub drv_num: u8,
    pub reserved1: u8,
    pub boot_sig: u8,
    pub vol_id: u32,
    pub vol_lab: [u8; 11],
    pub fil_sys_type: [u8; 8],
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

impl Bpb {
    /// Decode from the first 36 header bytes.
    pub fn decode(data: &[u8]) -> KResult<Self> {
        if data.len() < 36 {
            return Err(KernelError::Io);
        }
        let mut jmp = [0u8; 3];
        jmp.copy_from_slice(&data[0..3]);
        let mut oem = [0u8; 8];
        oem.copy_from_slice(&data[3..11]);
        Ok(Self {
            jmp,
            oem,
            bytes_per_sec: u16_at(data, 11),
            sec_per_clus: data[13],
            rsvd_sec: u16_at(data, 14),
            num_fats: data[16],
            root_ent_cnt: u16_at(data, 17),
            tot_sec_16: u16_at(data, 19),
            media: data[21],
            fatsz16: u16_at(data, 22),
            sec_per_trk: u16_at(data, 24),
            num_heads: u16_at(data, 26),
            hidd_sec: u32_at(data, 28),
            tot_sec_32: u32_at(data, 32),
        })
    }

    /// Encode into the first 36 header bytes (mkfs/test support).
    pub fn encode(&self, out: &mut [u8]) {
        out[0..3].copy_from_slice(&self.jmp);
        out[3..11].copy_from_slice(&self.oem);
        out[11..13].copy_from_slice(&self.bytes_per_sec.to_le_bytes());
        out[13] = self.sec_per_clus;
        out[14..16].copy_from_slice(&self.rsvd_sec.to_le_bytes());
        out[16] = self.num_fats;
        out[17..19].copy_from_slice(&self.root_ent_cnt.to_le_bytes());
        out[19..21].copy_from_slice(&self.tot_sec_16.to_le_bytes());
        out[21] = self.media;
        out[22..24].copy_from_slice(&self.fatsz16.to_le_bytes());
        out[24..26].copy_from_slice(&self.sec_per_trk.to_le_bytes());
        out[26..28].copy_from_slice(&self.num_heads.to_le_bytes());
        out[28..32].copy_from_slice(&self.hidd_sec.to_le_bytes());
        out[32..36].copy_from_slice(&self.tot_sec_32.to_le_bytes());
    }

    /// Total sectors, picking the 16- or 32-bit count.
    pub fn total_sectors(&self) -> u32 {
        if self.tot_sec_16 != 0 {
            self.tot_sec_16 as u32
        } else {
            self.tot_sec_32
        }
    }

    /// Sectors occupied by the root directory area, rounded up.
    pub fn root_dir_sectors(&self) -> u32 {
        let bytes = self.root_ent_cnt as u32 * DIR_ENTRY_SIZE;
        bytes.div_ceil(self.bytes_per_sec as u32)
    }

    /// Byte offset of the FAT area from the partition start.
    pub fn fat_offset(&self) -> u32 {
        self.rsvd_sec as u32 * self.bytes_per_sec as u32
    }

    /// Byte offset of the root directory area from the partition start.
    pub fn root_dir_offset(&self) -> u32 {
        self.bytes_per_sec as u32 * (self.rsvd_sec as u32 + self.num_fats as u32 * self.fatsz16 as u32)
    }

    /// First sector of the data area, relative to the partition.
    pub fn first_data_sector(&self) -> u32 {
        self.rsvd_sec as u32 + self.num_fats as u32 * self.fatsz16 as u32 + self.root_dir_sectors()
    }

    /// Sector (relative to the partition) holding the first byte of a
    /// data cluster. Clusters are numbered from 2.
    pub fn sector_for_cluster(&self, cluster: u16) -> u32 {
        self.first_data_sector() + (cluster as u32 - 2) * self.sec_per_clus as u32
    }

    /// Bytes per cluster.
    pub fn cluster_size(&self) -> u32 {
        self.sec_per_clus as u32 * self.bytes_per_sec as u32
    }

    /// Count of data clusters on the volume.
    pub fn total_clusters(&self) -> u32 {
        let overhead =
            self.rsvd_sec as u32 + self.num_fats as u32 * self.fatsz16 as u32 + self.root_dir_sectors();
        let data_sectors = self.total_sectors().saturating_sub(overhead);
        data_sectors / self.sec_per_clus as u32
    }
}

impl Ebpb {
    /// Decode from header bytes 36..62.
    pub fn decode(data: &[u8]) -> KResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(KernelError::Io);
        }
        let mut vol_lab = [0u8; 11];
        vol_lab.copy_from_slice(&data[43..54]);
        let mut fil_sys_type = [0u8; 8];
        fil_sys_type.copy_from_slice(&data[54..62]);
        Ok(Self {
            drv_num: data[36],
            reserved1: data[37],
            boot_sig: data[38],
            vol_id: u32_at(data, 39),
            vol_lab,
            fil_sys_type,
        })
    }

    /// Encode into header bytes 36..62 (mkfs/test support).
    pub fn encode(&self, out: &mut [u8]) {
        out[36] = self.drv_num;
        out[37] = self.reserved1;
        out[38] = self.boot_sig;
        out[39..43].copy_from_slice(&self.vol_id.to_le_bytes());
        out[43..54].copy_from_slice(&self.vol_lab);
        out[54..62].copy_from_slice(&self.fil_sys_type);
    }
}

/// Header validation per the mount contract: jump signature, geometry,
/// two FATs, nonzero media byte, EBPB signature/drive and consistent
/// sector totals.
pub fn validate(bpb: &Bpb, ebpb: &Ebpb) -> KResult<()> {
    let has_signature = bpb.jmp[0] == BOOT_SIG_1 && bpb.jmp[2] == BOOT_SIG_2;
    let has_header = has_signature
        && bpb.bytes_per_sec == 512
        && bpb.sec_per_clus >= 1
        && bpb.num_fats == 2
        && bpb.media != 0;
    if !has_header {
        return Err(KernelError::Io);
    }
    if ebpb.boot_sig != EBPB_SIG || ebpb.drv_num != HARD_DISK_DRIVE {
        return Err(KernelError::Io);
    }
    if bpb.total_sectors() == 0 {
        return Err(KernelError::Io);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Header for a small but valid FAT16 volume: 1 sector per cluster,
    /// 16-sector FATs, 512 root entries.
    pub(crate) fn sample_bpb() -> Bpb {
        Bpb {
            jmp: [0xEB, 0x3C, 0x90],
            oem: *b"MSWIN4.1",
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
        }
    }

    fn sample_ebpb() -> Ebpb {
        Ebpb {
            drv_num: 0x80,
            reserved1: 0,
            boot_sig: 0x29,
            vol_id: 0x1234_5678,
            vol_lab: *b"EMBEROS    ",
            fil_sys_type: *b"FAT16   ",
        }
    }

    #[test]
    fn decode_encode_round_trip() {
        let bpb = sample_bpb();
        let ebpb = sample_ebpb();
        let mut header = [0u8; HEADER_SIZE];
        bpb.encode(&mut header);
        ebpb.encode(&mut header);
        assert_eq!(Bpb::decode(&header).unwrap(), bpb);
        assert_eq!(Ebpb::decode(&header).unwrap(), ebpb);
    }

    #[test]
    fn layout_arithmetic() {
        let bpb = sample_bpb();
        // FAT area right after the reserved sector.
        assert_eq!(bpb.fat_offset(), 512);
        // Root dir after both FATs: (1 + 2*17) * 512.
        assert_eq!(bpb.root_dir_offset(), 35 * 512);
        // 512 entries * 32 bytes = 32 sectors of root directory.
        assert_eq!(bpb.root_dir_sectors(), 32);
        assert_eq!(bpb.first_data_sector(), 67);
        // Cluster 2 begins the data area.
        assert_eq!(bpb.sector_for_cluster(2), 67);
        assert_eq!(bpb.sector_for_cluster(3), 68);
        assert_eq!(bpb.cluster_size(), 512);
        assert_eq!(bpb.total_clusters(), 4300 - 67);
    }

    #[test]
    fn validation_accepts_the_sample_volume() {
        assert!(validate(&sample_bpb(), &sample_ebpb()).is_ok());
    }

    #[test]
    fn validation_rejects_broken_headers() {
        let good_bpb = sample_bpb();
        let good_ebpb = sample_ebpb();

        let mut bpb = good_bpb;
        bpb.jmp[0] = 0;
        assert!(validate(&bpb, &good_ebpb).is_err());

        let mut bpb = good_bpb;
        bpb.bytes_per_sec = 1024;
        assert!(validate(&bpb, &good_ebpb).is_err());

        let mut bpb = good_bpb;
        bpb.num_fats = 1;
        assert!(validate(&bpb, &good_ebpb).is_err());

        let mut ebpb = good_ebpb;
        ebpb.boot_sig = 0;
        assert!(validate(&good_bpb, &ebpb).is_err());

        // Inconsistent totals: no sectors in either count field.
        let mut bpb = good_bpb;
        bpb.tot_sec_16 = 0;
        bpb.tot_sec_32 = 0;
        assert!(validate(&bpb, &good_ebpb).is_err());
    }
}
