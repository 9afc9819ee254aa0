use std::io::{Read, Seek, SeekFrom, Write};

use log::{debug, info, warn};
use serde::Serialize;

use super::entry::DirectoryEntry;
use super::table::{self, TableAccess, FREE_CLUSTER};
use super::volume::{FatLayout, FatType, VolumeDescriptor, HEADER_SIZE};
use crate::error::{FatError, Result};

const CACHE_CHUNK: usize = 64 * 1024; // FAT bytes per read while caching

/// Options for opening a volume.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Byte offset of the volume inside the image (embedded partitions).
    pub offset: u64,
    /// Allow FAT repair writes.
    pub writable: bool,
    /// Materialize the whole allocation table right after opening.
    pub cache_table: bool,
    /// Directory rejection heuristic: reject a decode when
    /// `bad > good + n` and the directory was never confirmed by a
    /// matching "." entry. `None` never rejects.
    pub reject_tolerance: Option<usize>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            writable: false,
            cache_table: false,
            reject_tolerance: Some(0),
        }
    }
}

/// Summary of a volume, for display.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeInfo {
    pub fat_type: &'static str,
    pub oem_name: String,
    pub label: String,
    pub fs_type: String,
    pub bytes_per_sector: u64,
    pub sectors_per_cluster: u64,
    pub bytes_per_cluster: u64,
    pub reserved_sectors: u64,
    pub num_fats: u8,
    pub sectors_per_fat: u64,
    pub fat_start: u64,
    pub fat_size: u64,
    pub data_start: u64,
    pub data_size: u64,
    pub total_size: u64,
    pub total_clusters: u32,
    pub root_cluster: u32,
    pub root_entries: u16,
    pub free_clusters: u32,
    pub free_size: u64,
    pub warnings: Vec<String>,
}

/// A FAT volume inside a seekable image.
///
/// Every access is a seek followed by a read or write on the single
/// underlying handle.
pub struct FatVolume<R> {
    pub(crate) reader: R,
    pub(crate) desc: VolumeDescriptor,
    pub(crate) options: OpenOptions,
    access: TableAccess,
    free_clusters: Option<u32>,
    cancel_check: Box<dyn Fn() -> bool + Send>,
}

impl<R: Read + Seek> FatVolume<R> {
    /// Parse the boot sector at `options.offset` and set up the volume.
    pub fn open(mut reader: R, options: OpenOptions) -> Result<Self> {
        reader.seek(SeekFrom::Start(options.offset))?;
        let mut header = [0u8; HEADER_SIZE];
        let n = read_full(&mut reader, &mut header)?;
        if n < HEADER_SIZE {
            return Err(FatError::MalformedHeader(format!(
                "cannot read boot sector: only {n} of {HEADER_SIZE} bytes available"
            )));
        }
        let desc = VolumeDescriptor::parse(&header)?;
        debug!(
            "{} volume: {} clusters of {} bytes, data at 0x{:x}",
            desc.fat_type.name(),
            desc.total_clusters,
            desc.bytes_per_cluster,
            desc.data_start
        );

        let cache_table = options.cache_table;
        let mut volume = Self {
            reader,
            desc,
            options,
            access: TableAccess::Direct,
            free_clusters: None,
            cancel_check: Box::new(|| false),
        };
        if cache_table {
            volume.enable_cache()?;
        }
        Ok(volume)
    }

    pub fn descriptor(&self) -> &VolumeDescriptor {
        &self.desc
    }

    pub fn fat_type(&self) -> FatType {
        self.desc.fat_type
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.desc.bytes_per_cluster
    }

    pub fn total_clusters(&self) -> u32 {
        self.desc.total_clusters
    }

    /// Root cluster; 0 designates the fixed root region on FAT12/16.
    pub fn root_cluster(&self) -> u32 {
        self.desc.root_cluster
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        self.desc.is_valid_cluster(cluster)
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.access.is_cached()
    }

    /// Install the cooperative cancellation signal.
    pub fn set_cancel_check(&mut self, check: Box<dyn Fn() -> bool + Send>) {
        self.cancel_check = check;
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if (self.cancel_check)() {
            Err(FatError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Give back the underlying image.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read at a volume-relative address. Bytes past the end of the image
    /// are returned as zeros; the count of bytes really read is returned.
    pub(crate) fn read_at(&mut self, address: u64, buf: &mut [u8]) -> Result<usize> {
        self.reader
            .seek(SeekFrom::Start(self.options.offset + address))?;
        let n = read_full(&mut self.reader, buf)?;
        buf[n..].fill(0);
        Ok(n)
    }

    /// Read one data cluster into `buf` (which must be cluster sized).
    pub(crate) fn read_cluster(&mut self, cluster: u32, buf: &mut [u8]) -> Result<()> {
        let address = self.desc.cluster_address(cluster);
        self.read_at(address, buf)?;
        Ok(())
    }

    /// Next-cluster value of `cluster` in the first FAT copy.
    pub fn next_cluster(&mut self, cluster: u32) -> Result<u32> {
        self.next_cluster_in(cluster, 0)
    }

    /// Next-cluster value of `cluster` in FAT copy `fat`.
    ///
    /// Returns 0 (free) for clusters outside the table, and
    /// [`END_OF_CHAIN`](super::table::END_OF_CHAIN) for terminal entries.
    pub fn next_cluster_in(&mut self, cluster: u32, fat: u8) -> Result<u32> {
        if !self.is_valid_cluster(cluster) {
            return Ok(FREE_CLUSTER);
        }
        if fat == 0 {
            if let Some(next) = self.access.get(cluster) {
                return Ok(next);
            }
        }

        let fat_type = self.desc.fat_type;
        let width = table::entry_width(fat_type);
        let address = self.entry_address(cluster, fat);
        let mut raw = [0u8; 4];
        self.read_at(address, &mut raw[..width])?;
        Ok(table::decode_entry(fat_type, &raw[..width], cluster))
    }

    pub fn is_free(&mut self, cluster: u32) -> Result<bool> {
        Ok(self.next_cluster(cluster)? == FREE_CLUSTER)
    }

    fn entry_address(&self, cluster: u32, fat: u8) -> u64 {
        self.desc.fat_start
            + self.desc.fat_size * fat as u64
            + table::entry_offset(self.desc.fat_type, cluster)
    }

    /// Materialize the first FAT copy. A no-op once enabled.
    pub fn enable_cache(&mut self) -> Result<()> {
        if self.access.is_cached() {
            return Ok(());
        }
        info!("Computing FAT cache...");
        let fat_type = self.desc.fat_type;
        let total = self.desc.total_clusters;
        let mut needed = (table::entry_offset(fat_type, total) + 4).min(self.desc.fat_size);

        // A damaged header can declare a FAT larger than the image.
        let image_len = self.reader.seek(SeekFrom::End(0))?;
        let available = image_len.saturating_sub(self.options.offset + self.desc.fat_start);
        if needed > available {
            warn!(
                "FAT overruns the image ({needed} bytes declared, {available} available), \
                 caching what is present"
            );
            needed = available;
        }
        let total = total.min((needed * 8 / fat_type.bits()) as u32);
        let needed = needed as usize;
        let mut fat = vec![0u8; needed];
        let mut pos = 0;
        while pos < needed {
            self.check_cancelled()?;
            let end = (pos + CACHE_CHUNK).min(needed);
            let address = self.desc.fat_start + pos as u64;
            self.read_at(address, &mut fat[pos..end])?;
            pos = end;
        }
        self.access = TableAccess::Cached(table::decode_table(fat_type, &fat, total));
        Ok(())
    }

    /// Number of free clusters, computed once.
    pub fn compute_free_clusters(&mut self) -> Result<u32> {
        if let Some(free) = self.free_clusters {
            return Ok(free);
        }
        let mut free = 0u32;
        for cluster in 2..self.desc.total_clusters {
            if cluster % 4096 == 0 {
                self.check_cancelled()?;
            }
            if self.is_free(cluster)? {
                free += 1;
            }
        }
        self.free_clusters = Some(free);
        Ok(free)
    }

    pub fn info(&mut self) -> Result<VolumeInfo> {
        let free_clusters = self.compute_free_clusters()?;
        let d = &self.desc;
        Ok(VolumeInfo {
            fat_type: d.fat_type.name(),
            oem_name: d.oem_name.clone(),
            label: d.label.clone(),
            fs_type: d.fs_type.clone(),
            bytes_per_sector: d.bytes_per_sector,
            sectors_per_cluster: d.sectors_per_cluster,
            bytes_per_cluster: d.bytes_per_cluster,
            reserved_sectors: d.reserved_sectors,
            num_fats: d.num_fats,
            sectors_per_fat: d.sectors_per_fat,
            fat_start: d.fat_start,
            fat_size: d.fat_size,
            data_start: d.data_start,
            data_size: d.data_size(),
            total_size: d.total_size,
            total_clusters: d.total_clusters,
            root_cluster: d.root_cluster,
            root_entries: d.root_entries,
            free_clusters,
            free_size: free_clusters as u64 * d.bytes_per_cluster,
            warnings: d.warnings.clone(),
        })
    }

    /// The root directory as an entry named "/".
    pub fn root_entry(&self) -> DirectoryEntry {
        DirectoryEntry::placeholder_directory("/", self.desc.root_cluster)
    }

    /// True if the high word of entry start clusters is meaningful.
    pub(crate) fn uses_high_cluster(&self) -> bool {
        self.desc.layout == FatLayout::Fat32
    }
}

impl<R: Read + Write + Seek> FatVolume<R> {
    /// Set the next-cluster value of `cluster` in FAT copy `fat`.
    ///
    /// `value` may be [`END_OF_CHAIN`](super::table::END_OF_CHAIN); it is stored as the width's
    /// end-of-chain marker.
    pub fn set_next_cluster(&mut self, cluster: u32, value: u32, fat: u8) -> Result<()> {
        if !self.options.writable {
            return Err(FatError::VolumeNotWritable);
        }
        if cluster < 2 || !self.is_valid_cluster(cluster) {
            return Err(FatError::ClusterOutOfRange {
                cluster,
                total: self.desc.total_clusters,
            });
        }

        let fat_type = self.desc.fat_type;
        let width = table::entry_width(fat_type);
        let address = self.entry_address(cluster, fat);
        let mut raw = [0u8; 4];
        self.read_at(address, &mut raw[..width])?;
        table::encode_entry(fat_type, &mut raw[..width], cluster, value);

        self.reader
            .seek(SeekFrom::Start(self.options.offset + address))?;
        self.reader
            .write_all(&raw[..width])
            .map_err(FatError::from_write)?;

        if fat == 0 {
            let stored = table::decode_entry(fat_type, &raw[..width], cluster);
            self.access.update(cluster, stored);
        }
        self.free_clusters = None;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.reader.flush().map_err(FatError::from_write)
    }
}

/// Read until `buf` is full or the source is exhausted.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
