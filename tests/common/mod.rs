//! In-memory FAT image builder for integration tests.
//!
//! Volumes use 512-byte sectors, one sector per cluster and two FAT
//! copies. Directories are a single cluster (16 records).

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;

use chrono::NaiveDate;
use fatcat::fs::bytes::pack_fat_datetime;
use fatcat::{FatVolume, OpenOptions};

pub const SECTOR: usize = 512;
pub const END: u32 = u32::MAX;

const ATTR_LONG_NAME: u8 = 0x0F;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

const LFN_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Fat12,
    Fat16,
    Fat32,
}

pub struct ImageBuilder {
    pub img: Vec<u8>,
    kind: Kind,
    fat_start: usize,
    fat_size: usize,
    num_fats: usize,
    root_start: usize,
    data_start: usize,
    slots: HashMap<u32, usize>,
}

impl ImageBuilder {
    /// 128 clusters, root directory at cluster 2.
    pub fn fat32() -> Self {
        let total_sectors = 3 + 128;
        let mut b = Self::blank(Kind::Fat32, total_sectors, 1, 0);
        let h = &mut b.img;
        h[0x24..0x28].copy_from_slice(&1u32.to_le_bytes());
        h[0x2C..0x30].copy_from_slice(&2u32.to_le_bytes());
        h[0x47..0x52].copy_from_slice(b"TESTVOLUME ");
        h[0x52..0x5A].copy_from_slice(b"FAT32   ");
        b.set_fat(0, 0x0FFF_FFF8);
        b.set_fat(1, END);
        b.set_fat(2, END);
        b
    }

    /// 4100 data clusters, 16-entry fixed root.
    pub fn fat16() -> Self {
        let spf = 17;
        let total_sectors = 1 + 2 * spf + 1 + 4100;
        let mut b = Self::blank(Kind::Fat16, total_sectors, spf, 16);
        b.set_fat(0, 0xFFF8);
        b.set_fat(1, END);
        b
    }

    /// 300 data clusters, 32-entry fixed root.
    pub fn fat12() -> Self {
        let total_sectors = 1 + 2 + 2 + 300;
        let mut b = Self::blank(Kind::Fat12, total_sectors, 1, 32);
        b.set_fat(0, 0xFF8);
        b.set_fat(1, END);
        b
    }

    fn blank(kind: Kind, total_sectors: usize, spf: usize, root_entries: usize) -> Self {
        let mut img = vec![0u8; total_sectors * SECTOR];
        img[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        img[0x03..0x0B].copy_from_slice(b"MSWIN4.1");
        img[0x0B..0x0D].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        img[0x0D] = 1;
        img[0x0E..0x10].copy_from_slice(&1u16.to_le_bytes());
        img[0x10] = 2;
        img[0x15] = 0xF8;
        if kind == Kind::Fat32 {
            img[0x20..0x24].copy_from_slice(&(total_sectors as u32).to_le_bytes());
        } else {
            img[0x11..0x13].copy_from_slice(&(root_entries as u16).to_le_bytes());
            img[0x13..0x15].copy_from_slice(&(total_sectors as u16).to_le_bytes());
            img[0x16..0x18].copy_from_slice(&(spf as u16).to_le_bytes());
            img[0x2B..0x36].copy_from_slice(b"TESTVOLUME ");
            let fs_type: &[u8; 8] = if kind == Kind::Fat12 {
                b"FAT12   "
            } else {
                b"FAT16   "
            };
            img[0x36..0x3E].copy_from_slice(fs_type);
        }
        img[510] = 0x55;
        img[511] = 0xAA;

        let fat_start = SECTOR;
        let fat_size = spf * SECTOR;
        let root_start = fat_start + 2 * fat_size;
        Self {
            img,
            kind,
            fat_start,
            fat_size,
            num_fats: 2,
            root_start,
            data_start: root_start + root_entries * 32,
            slots: HashMap::new(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Directory cluster of the root as seen by the library.
    pub fn root(&self) -> u32 {
        if self.kind == Kind::Fat32 {
            2
        } else {
            0
        }
    }

    pub fn cluster_address(&self, cluster: u32) -> usize {
        self.data_start + (cluster as usize - 2) * SECTOR
    }

    /// Write a FAT entry in every copy. `END` stores the end-of-chain mark.
    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        for copy in 0..self.num_fats {
            self.set_fat_copy(copy, cluster, value);
        }
    }

    pub fn set_fat_copy(&mut self, copy: usize, cluster: u32, value: u32) {
        let base = self.fat_start + copy * self.fat_size;
        let c = cluster as usize;
        match self.kind {
            Kind::Fat32 => {
                let v = if value == END { 0x0FFF_FFFF } else { value };
                self.img[base + c * 4..base + c * 4 + 4].copy_from_slice(&v.to_le_bytes());
            }
            Kind::Fat16 => {
                let v = if value == END { 0xFFFF } else { value as u16 };
                self.img[base + c * 2..base + c * 2 + 2].copy_from_slice(&v.to_le_bytes());
            }
            Kind::Fat12 => {
                let v = if value == END { 0xFFF } else { value as u16 & 0xFFF };
                let off = base + c * 3 / 2;
                if c % 2 == 0 {
                    self.img[off] = (v & 0xFF) as u8;
                    self.img[off + 1] = (self.img[off + 1] & 0xF0) | (v >> 8) as u8;
                } else {
                    self.img[off] = (self.img[off] & 0x0F) | ((v & 0x0F) << 4) as u8;
                    self.img[off + 1] = (v >> 4) as u8;
                }
            }
        }
    }

    /// Link `clusters` in order and terminate the chain.
    pub fn chain(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, END);
        }
    }

    /// Spread `content` over `clusters`.
    pub fn write_content(&mut self, clusters: &[u32], content: &[u8]) {
        for (cluster, chunk) in clusters.iter().zip(content.chunks(SECTOR)) {
            let off = self.cluster_address(*cluster);
            self.img[off..off + chunk.len()].copy_from_slice(chunk);
        }
    }

    fn next_slot(&mut self, dir: u32) -> usize {
        let slot = self.slots.entry(dir).or_insert(0);
        let current = *slot;
        *slot += 1;
        let address = if self.kind != Kind::Fat32 && dir == 0 {
            self.root_start + current * 32
        } else {
            assert!(current < SECTOR / 32, "directory {dir} is full");
            self.cluster_address(dir) + current * 32
        };
        address
    }

    /// Add a short record, preceded by long-name records when `long` is
    /// given. Returns the image offset of the short record.
    pub fn entry(
        &mut self,
        dir: u32,
        long: Option<&str>,
        short: &[u8; 11],
        attributes: u8,
        cluster: u32,
        size: u32,
    ) -> usize {
        if let Some(long) = long {
            let checksum = short
                .iter()
                .fold(0u8, |sum, &b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b));
            let mut units: Vec<u16> = long.encode_utf16().collect();
            let count = units.len().div_ceil(13);
            if units.len() % 13 != 0 {
                units.push(0);
            }
            units.resize(count * 13, 0xFFFF);
            for seq in (1..=count).rev() {
                let mut rec = [0u8; 32];
                rec[0] = seq as u8 | if seq == count { 0x40 } else { 0 };
                rec[11] = ATTR_LONG_NAME;
                rec[13] = checksum;
                for (i, off) in LFN_OFFSETS.iter().enumerate() {
                    let unit = units[(seq - 1) * 13 + i];
                    rec[*off..*off + 2].copy_from_slice(&unit.to_le_bytes());
                }
                let at = self.next_slot(dir);
                self.img[at..at + 32].copy_from_slice(&rec);
            }
        }

        let stamp = NaiveDate::from_ymd_opt(2013, 11, 4)
            .and_then(|d| d.and_hms_opt(10, 20, 30))
            .unwrap();
        let (date, time) = pack_fat_datetime(&stamp);

        let mut rec = [0u8; 32];
        rec[..11].copy_from_slice(short);
        rec[11] = attributes;
        rec[0x0E..0x10].copy_from_slice(&time.to_le_bytes());
        rec[0x10..0x12].copy_from_slice(&date.to_le_bytes());
        rec[0x14..0x16].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        rec[0x16..0x18].copy_from_slice(&time.to_le_bytes());
        rec[0x18..0x1A].copy_from_slice(&date.to_le_bytes());
        rec[0x1A..0x1C].copy_from_slice(&(cluster as u16).to_le_bytes());
        rec[0x1C..0x20].copy_from_slice(&size.to_le_bytes());
        let at = self.next_slot(dir);
        self.img[at..at + 32].copy_from_slice(&rec);
        at
    }

    /// A file whose content occupies consecutive clusters from `cluster`.
    pub fn add_file(
        &mut self,
        dir: u32,
        long: &str,
        short: &[u8; 11],
        cluster: u32,
        content: &[u8],
    ) -> &mut Self {
        let count = content.len().div_ceil(SECTOR).max(1) as u32;
        let clusters: Vec<u32> = (cluster..cluster + count).collect();
        self.chain(&clusters);
        self.write_content(&clusters, content);
        self.entry(dir, Some(long), short, ATTR_ARCHIVE, cluster, content.len() as u32);
        self
    }

    /// An erased file: content on disk, clusters free, marker in the name.
    pub fn add_erased_file(&mut self, dir: u32, short: &[u8; 11], cluster: u32, content: &[u8]) {
        let count = content.len().div_ceil(SECTOR).max(1) as u32;
        let clusters: Vec<u32> = (cluster..cluster + count).collect();
        self.write_content(&clusters, content);
        let mut name = *short;
        name[0] = 0xE5;
        self.entry(dir, None, &name, ATTR_ARCHIVE, cluster, content.len() as u32);
    }

    /// A one-cluster directory holding "." and "..".
    pub fn add_dir(&mut self, parent: u32, long: &str, short: &[u8; 11], cluster: u32) -> &mut Self {
        self.chain(&[cluster]);
        let parent_ref = if parent == self.root() { 0 } else { parent };
        self.entry(cluster, None, b".          ", ATTR_DIRECTORY, cluster, 0);
        self.entry(cluster, None, b"..         ", ATTR_DIRECTORY, parent_ref, 0);
        self.entry(parent, Some(long), short, ATTR_DIRECTORY, cluster, 0);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.img
    }

    pub fn open(self) -> FatVolume<Cursor<Vec<u8>>> {
        FatVolume::open(Cursor::new(self.img), OpenOptions::default()).unwrap()
    }

    pub fn open_writable(self) -> FatVolume<Cursor<Vec<u8>>> {
        let options = OpenOptions {
            writable: true,
            ..OpenOptions::default()
        };
        FatVolume::open(Cursor::new(self.img), options).unwrap()
    }
}

pub const HELLO: &[u8] = b"Hello world!\n";
pub const OTHER: &[u8] = b"Hello!\nThis is another file!\n";
pub const ERASED: &[u8] = b"This file was deleted\n";

/// FAT32 image with `/hello.txt` (cluster 3), `/files/` (cluster 4),
/// `/files/other_file.txt` (cluster 5) and an erased `DELETED.TXT`
/// (cluster 6, free), which lists as `ELETED.TXT`.
pub fn scenario() -> ImageBuilder {
    let mut b = ImageBuilder::fat32();
    let root = b.root();
    b.add_file(root, "hello.txt", b"HELLO   TXT", 3, HELLO);
    b.add_dir(root, "files", b"FILES      ", 4);
    b.add_file(4, "other_file.txt", b"OTHER_~1TXT", 5, OTHER);
    b.add_erased_file(root, b"DELETED TXT", 6, ERASED);
    b
}

/// FAT32 image where `/damaged` (cluster 10) lost its FAT entry while its
/// records stay intact. `/damaged/sub` (cluster 20) holds `leaf.txt`
/// (cluster 22) and becomes unreachable through the table.
pub fn orphan_scenario() -> ImageBuilder {
    let mut b = scenario();
    let root = b.root();
    b.add_dir(root, "damaged", b"DAMAGED    ", 10);
    b.add_dir(10, "sub", b"SUB        ", 20);
    b.add_file(20, "leaf.txt", b"LEAF    TXT", 22, b"leaf content\n");
    b.set_fat(10, 0);
    b
}
