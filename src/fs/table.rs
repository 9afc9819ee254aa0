//! Allocation table entry codec.
//!
//! Entries are exchanged as plain `u32` next-cluster values: `0` is a free
//! cluster and [`END_OF_CHAIN`] terminates a chain. Everything width
//! specific (masks, end markers, 12-bit packing) stays in this module.

use super::bytes::{read_u16, read_u32, write_u16, write_u32};
use super::volume::FatType;

/// Terminal sentinel returned for end-of-chain (and reserved) entries.
pub const END_OF_CHAIN: u32 = u32::MAX;

/// Free cluster marker.
pub const FREE_CLUSTER: u32 = 0;

/// Byte offset of `cluster`'s entry inside one FAT copy.
pub fn entry_offset(fat_type: FatType, cluster: u32) -> u64 {
    fat_type.bits() * cluster as u64 / 8
}

/// Bytes to read or write for one entry.
pub fn entry_width(fat_type: FatType) -> usize {
    match fat_type {
        FatType::Fat32 => 4,
        FatType::Fat12 | FatType::Fat16 => 2,
    }
}

/// Extract a 12-bit entry from the two bytes starting at its offset.
///
/// Even clusters start on a byte boundary and use the low 12 bits; odd
/// clusters start half way through a byte and use the high 12 bits.
pub fn unpack12(raw: [u8; 2], cluster: u32) -> u16 {
    let val = u16::from_le_bytes(raw);
    if cluster & 1 == 1 {
        val >> 4
    } else {
        val & 0x0FFF
    }
}

/// Store a 12-bit entry into the two bytes starting at its offset,
/// preserving the nibble that belongs to the neighbouring cluster.
pub fn pack12(raw: [u8; 2], cluster: u32, value: u16) -> [u8; 2] {
    let existing = u16::from_le_bytes(raw);
    let value = value & 0x0FFF;
    let packed = if cluster & 1 == 1 {
        (existing & 0x000F) | (value << 4)
    } else {
        (existing & 0xF000) | value
    };
    packed.to_le_bytes()
}

/// Decode a raw entry (as read from `entry_offset`) into a next-cluster value.
pub fn decode_entry(fat_type: FatType, raw: &[u8], cluster: u32) -> u32 {
    match fat_type {
        FatType::Fat32 => {
            let next = read_u32(raw, 0) & 0x0FFF_FFFF;
            if next >= 0x0FFF_FFF0 {
                END_OF_CHAIN
            } else {
                next
            }
        }
        FatType::Fat16 => {
            let next = read_u16(raw, 0);
            if next >= 0xFFF0 {
                END_OF_CHAIN
            } else {
                next as u32
            }
        }
        FatType::Fat12 => {
            let next = unpack12([raw[0], raw[1]], cluster);
            if next >= 0x0FF0 {
                END_OF_CHAIN
            } else {
                next as u32
            }
        }
    }
}

/// Encode `value` over the raw bytes currently stored at the entry offset.
///
/// `raw` must hold the existing bytes: 12-bit entries share a byte with a
/// neighbour and FAT32 keeps its top four reserved bits.
pub fn encode_entry(fat_type: FatType, raw: &mut [u8], cluster: u32, value: u32) {
    match fat_type {
        FatType::Fat32 => {
            let existing = read_u32(raw, 0);
            let value = if value == END_OF_CHAIN { 0x0FFF_FFFF } else { value };
            write_u32(raw, 0, (existing & 0xF000_0000) | (value & 0x0FFF_FFFF));
        }
        FatType::Fat16 => {
            let value = if value == END_OF_CHAIN { 0xFFFF } else { value };
            write_u16(raw, 0, value as u16);
        }
        FatType::Fat12 => {
            let value = if value == END_OF_CHAIN { 0x0FFF } else { value };
            let packed = pack12([raw[0], raw[1]], cluster, value as u16);
            raw[..2].copy_from_slice(&packed);
        }
    }
}

/// How next-cluster lookups are served.
///
/// Switching to `Cached` is a one-time explicit transition made by
/// `FatVolume::enable_cache`.
#[derive(Debug, Default)]
pub enum TableAccess {
    /// Every lookup reads the first FAT copy through the image.
    #[default]
    Direct,
    /// Fully materialized first FAT copy, indexed by cluster.
    Cached(Vec<u32>),
}

impl TableAccess {
    pub fn is_cached(&self) -> bool {
        matches!(self, TableAccess::Cached(_))
    }

    pub fn get(&self, cluster: u32) -> Option<u32> {
        match self {
            TableAccess::Direct => None,
            TableAccess::Cached(entries) => entries.get(cluster as usize).copied(),
        }
    }

    /// Keep a cached table in step with a write to the first FAT copy.
    pub fn update(&mut self, cluster: u32, value: u32) {
        if let TableAccess::Cached(entries) = self {
            if let Some(slot) = entries.get_mut(cluster as usize) {
                *slot = value;
            }
        }
    }
}

/// Decode every entry of an in-memory FAT copy.
pub fn decode_table(fat_type: FatType, fat: &[u8], total_clusters: u32) -> Vec<u32> {
    let width = entry_width(fat_type);
    (0..total_clusters)
        .map(|cluster| {
            let off = entry_offset(fat_type, cluster) as usize;
            if off + width > fat.len() {
                FREE_CLUSTER
            } else {
                decode_entry(fat_type, &fat[off..off + width], cluster)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fat12_pair_packing() {
        // Clusters 2 and 3 share the three bytes at offset 3..6.
        let mut fat = vec![0u8; 8];
        for (cluster, value) in [(2u32, 0xABCu32), (3, 0x123)] {
            let off = entry_offset(FatType::Fat12, cluster) as usize;
            encode_entry(FatType::Fat12, &mut fat[off..off + 2], cluster, value);
        }
        assert_eq!(&fat[3..6], &[0xBC, 0x3A, 0x12]);
        assert_eq!(decode_entry(FatType::Fat12, &fat[3..5], 2), 0xABC);
        assert_eq!(decode_entry(FatType::Fat12, &fat[4..6], 3), 0x123);

        // Rewriting the odd entry must not touch the even one.
        encode_entry(FatType::Fat12, &mut fat[4..6], 3, 0x456);
        assert_eq!(decode_entry(FatType::Fat12, &fat[3..5], 2), 0xABC);
        assert_eq!(decode_entry(FatType::Fat12, &fat[4..6], 3), 0x456);
    }

    #[test]
    fn test_unpack_pack12() {
        assert_eq!(unpack12([0xFF, 0x0F], 0), 0xFFF);
        assert_eq!(unpack12([0xF0, 0xFF], 1), 0xFFF);
        assert_eq!(pack12([0x00, 0xF0], 0, 0x234), [0x34, 0xF2]);
        assert_eq!(pack12([0x0A, 0x00], 1, 0x234), [0x4A, 0x23]);
    }

    #[test]
    fn test_end_of_chain_thresholds() {
        assert_eq!(decode_entry(FatType::Fat16, &[0xF0, 0xFF], 5), END_OF_CHAIN);
        assert_eq!(decode_entry(FatType::Fat16, &[0xEF, 0xFF], 5), 0xFFEF);
        assert_eq!(
            decode_entry(FatType::Fat32, &[0xF8, 0xFF, 0xFF, 0x0F], 5),
            END_OF_CHAIN
        );
        // Top four bits are reserved and ignored.
        assert_eq!(decode_entry(FatType::Fat32, &[0x07, 0x00, 0x00, 0xF0], 5), 7);
        assert_eq!(decode_entry(FatType::Fat12, &[0xF7, 0x0F], 4), END_OF_CHAIN);
    }

    #[test]
    fn test_round_trip_all_widths() {
        for fat_type in [FatType::Fat12, FatType::Fat16, FatType::Fat32] {
            let mut fat = vec![0u8; 64];
            for (cluster, value) in [(2u32, 3u32), (3, END_OF_CHAIN), (4, 0), (5, 9), (6, 7)] {
                let off = entry_offset(fat_type, cluster) as usize;
                let w = entry_width(fat_type);
                encode_entry(fat_type, &mut fat[off..off + w], cluster, value);
            }
            let table = decode_table(fat_type, &fat, 7);
            assert_eq!(&table[2..], &[3, END_OF_CHAIN, 0, 9, 7], "{fat_type:?}");
        }
    }

    #[test]
    fn test_fat32_keeps_reserved_bits() {
        let mut raw = [0x00, 0x00, 0x00, 0xA0];
        encode_entry(FatType::Fat32, &mut raw, 9, 0x1234);
        assert_eq!(raw, [0x34, 0x12, 0x00, 0xA0]);
    }

    #[test]
    fn test_cached_access() {
        let mut access = TableAccess::Cached(vec![0, 0, 3, END_OF_CHAIN]);
        assert!(access.is_cached());
        assert_eq!(access.get(2), Some(3));
        access.update(2, 0);
        assert_eq!(access.get(2), Some(0));
        assert_eq!(TableAccess::Direct.get(2), None);
    }
}
