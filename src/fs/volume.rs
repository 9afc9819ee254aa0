use log::warn;
use serde::Serialize;

use super::bytes::{read_u16, read_u32};
use super::entry::DIR_ENTRY_SIZE;
use crate::error::{FatError, Result};

/// Number of boot sector bytes the parser needs.
pub const HEADER_SIZE: usize = 128;

/// Largest cluster count still addressed with 12-bit entries.
pub const MAX_FAT12_CLUSTERS: u64 = 0xFF4;

// Common BPB offsets
const BPB_OEM_NAME: usize = 0x03;
const BPB_BYTES_PER_SECTOR: usize = 0x0B;
const BPB_SECTORS_PER_CLUSTER: usize = 0x0D;
const BPB_RESERVED_SECTORS: usize = 0x0E;
const BPB_NUM_FATS: usize = 0x10;
const BPB_TOTAL_SECTORS_32: usize = 0x20;

// FAT12/16 layout
const BPB16_ROOT_ENTRIES: usize = 0x11;
const BPB16_TOTAL_SECTORS: usize = 0x13;
const BPB16_SECTORS_PER_FAT: usize = 0x16;
const BPB16_LABEL: usize = 0x2B;
const BPB16_FS_TYPE: usize = 0x36;

// FAT32 layout
const BPB32_SECTORS_PER_FAT: usize = 0x24;
const BPB32_ROOT_CLUSTER: usize = 0x2C;
const BPB32_LABEL: usize = 0x47;
const BPB32_FS_TYPE: usize = 0x52;

/// On-disk boot sector layout.
///
/// FAT12 volumes share the FAT16 layout; the entry width is derived
/// separately from the cluster count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FatLayout {
    Fat16,
    Fat32,
}

/// Width of the allocation table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn name(&self) -> &'static str {
        match self {
            FatType::Fat12 => "FAT12",
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        }
    }

    pub fn bits(&self) -> u64 {
        match self {
            FatType::Fat12 => 12,
            FatType::Fat16 => 16,
            FatType::Fat32 => 32,
        }
    }
}

/// Parsed boot sector plus derived geometry. Immutable once built.
///
/// All `*_start` offsets are relative to the start of the volume, not the
/// start of the image.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeDescriptor {
    pub layout: FatLayout,
    pub fat_type: FatType,
    pub oem_name: String,
    pub label: String,
    pub fs_type: String,

    pub bytes_per_sector: u64,
    pub sectors_per_cluster: u64,
    pub reserved_sectors: u64,
    pub num_fats: u8,
    pub sectors_per_fat: u64,
    pub total_sectors: u64,
    /// Root directory cluster; 0 on FAT12/16, where the root is a fixed region.
    pub root_cluster: u32,
    /// Root entry count (FAT12/16 only).
    pub root_entries: u16,

    pub fat_start: u64,
    /// Start of the fixed root region (FAT12/16); equals `data_start` on FAT32.
    pub root_start: u64,
    /// Address of cluster 2.
    pub data_start: u64,
    pub bytes_per_cluster: u64,
    pub total_clusters: u32,
    pub fat_size: u64,
    /// Clusters spanned by the fixed root region (FAT12/16 only).
    pub root_clusters: u32,
    pub total_size: u64,

    /// Non-fatal oddities found while parsing.
    pub warnings: Vec<String>,
}

impl VolumeDescriptor {
    /// Parse the boot sector prefix. `header` must hold at least
    /// [`HEADER_SIZE`] bytes.
    pub fn parse(header: &[u8]) -> Result<Self> {
        if header.len() < HEADER_SIZE {
            return Err(FatError::MalformedHeader(format!(
                "need {HEADER_SIZE} header bytes, got {}",
                header.len()
            )));
        }

        let bytes_per_sector = read_u16(header, BPB_BYTES_PER_SECTOR) as u64;
        let sectors_per_cluster = header[BPB_SECTORS_PER_CLUSTER] as u64;
        let reserved_sectors = read_u16(header, BPB_RESERVED_SECTORS) as u64;
        let num_fats = header[BPB_NUM_FATS];
        let oem_name = ascii_field(&header[BPB_OEM_NAME..BPB_OEM_NAME + 8]);

        let mut warnings = Vec::new();
        if header[0] != 0xEB && header[0] != 0xE9 {
            warnings.push(format!("unusual jump instruction: 0x{:02X}", header[0]));
        }

        let bytes_per_cluster = bytes_per_sector * sectors_per_cluster;
        if bytes_per_cluster == 0 {
            return Err(FatError::MalformedHeader(format!(
                "zero-sized cluster ({bytes_per_sector} bytes/sector, \
                 {sectors_per_cluster} sectors/cluster)"
            )));
        }

        let sectors_per_fat_16 = read_u16(header, BPB16_SECTORS_PER_FAT) as u64;

        let layout;
        let fat_type;
        let sectors_per_fat;
        let total_sectors;
        let root_cluster;
        let root_entries;
        let label;
        let fs_type;

        if sectors_per_fat_16 != 0 {
            layout = FatLayout::Fat16;
            sectors_per_fat = sectors_per_fat_16;
            root_entries = read_u16(header, BPB16_ROOT_ENTRIES);
            root_cluster = 0;
            label = ascii_field(&header[BPB16_LABEL..BPB16_LABEL + 11]);
            fs_type = ascii_field(&header[BPB16_FS_TYPE..BPB16_FS_TYPE + 8]);

            let total_16 = read_u16(header, BPB16_TOTAL_SECTORS) as u64;
            total_sectors = if total_16 != 0 {
                total_16
            } else {
                read_u32(header, BPB_TOTAL_SECTORS_32) as u64
            };

            let root_dir_sectors =
                (root_entries as u64 * DIR_ENTRY_SIZE as u64).div_ceil(bytes_per_sector);
            let data_sectors = total_sectors
                .saturating_sub(reserved_sectors + num_fats as u64 * sectors_per_fat + root_dir_sectors);
            let clusters = data_sectors / sectors_per_cluster;
            fat_type = if clusters > MAX_FAT12_CLUSTERS {
                FatType::Fat16
            } else {
                FatType::Fat12
            };
        } else {
            layout = FatLayout::Fat32;
            fat_type = FatType::Fat32;
            sectors_per_fat = read_u32(header, BPB32_SECTORS_PER_FAT) as u64;
            total_sectors = read_u32(header, BPB_TOTAL_SECTORS_32) as u64;
            root_cluster = read_u32(header, BPB32_ROOT_CLUSTER);
            root_entries = 0;
            label = ascii_field(&header[BPB32_LABEL..BPB32_LABEL + 11]);
            fs_type = ascii_field(&header[BPB32_FS_TYPE..BPB32_FS_TYPE + 8]);
        }

        if bytes_per_sector != 512 {
            warnings.push(format!("bytes per sector is not 512: {bytes_per_sector}"));
        }
        if sectors_per_cluster > 128 {
            warnings.push(format!("sectors per cluster is high: {sectors_per_cluster}"));
        }
        if num_fats == 0 {
            warnings.push("number of FATs is 0".to_string());
        }
        if layout == FatLayout::Fat32 && root_cluster != 2 {
            warnings.push(format!("root directory cluster is not 2: {root_cluster}"));
        }
        for w in &warnings {
            warn!("{w}");
        }

        let fat_start = bytes_per_sector * reserved_sectors;
        let fat_size = sectors_per_fat * bytes_per_sector;
        let root_start = fat_start + num_fats as u64 * fat_size;
        let root_bytes = root_entries as u64 * DIR_ENTRY_SIZE as u64;
        let data_start = root_start + root_bytes;
        let total_clusters = (fat_size * 8 / fat_type.bits()).min(u32::MAX as u64 - 1) as u32;
        let root_clusters = if layout == FatLayout::Fat16 {
            root_bytes.div_ceil(bytes_per_cluster) as u32
        } else {
            0
        };

        Ok(Self {
            layout,
            fat_type,
            oem_name,
            label,
            fs_type,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            sectors_per_fat,
            total_sectors,
            root_cluster,
            root_entries,
            fat_start,
            root_start,
            data_start,
            bytes_per_cluster,
            total_clusters,
            fat_size,
            root_clusters,
            total_size: total_sectors * bytes_per_sector,
            warnings,
        })
    }

    /// True if `cluster` indexes an entry of the allocation table.
    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster < self.total_clusters
    }

    /// Volume-relative address of a data cluster (cluster >= 2).
    pub fn cluster_address(&self, cluster: u32) -> u64 {
        self.data_start + self.bytes_per_cluster * (cluster as u64).saturating_sub(2)
    }

    /// Volume-relative address of the `index`-th cluster-sized page of the
    /// fixed FAT12/16 root region.
    pub fn root_page_address(&self, index: u32) -> u64 {
        self.root_start + self.bytes_per_cluster * index as u64
    }

    /// True when `cluster` designates the fixed FAT12/16 root region.
    pub fn is_fixed_root(&self, cluster: u32) -> bool {
        self.layout == FatLayout::Fat16 && cluster == self.root_cluster
    }

    /// Resolve the "cluster 0 means root" convention.
    pub fn resolve_root(&self, cluster: u32) -> u32 {
        if cluster == 0 && self.layout == FatLayout::Fat32 {
            self.root_cluster
        } else {
            cluster
        }
    }

    /// Size of the data region addressed by the table.
    pub fn data_size(&self) -> u64 {
        self.total_clusters as u64 * self.bytes_per_cluster
    }
}

/// Decode a space-padded ASCII boot sector field.
fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}
