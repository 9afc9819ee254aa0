//! Directory decoding with damage heuristics.
//!
//! A directory is decoded cluster by cluster. When the allocation table
//! link is missing (free) or out of range, clusters are assumed to follow
//! each other on disk for as long as they keep yielding plausible entries.

use std::collections::HashSet;
use std::io::{Read, Seek};

use log::{error, warn};

use super::entry::{DirectoryEntry, LongNameBuffer, ATTR_LONG_NAME, DIR_ENTRY_SIZE};
use super::fat::FatVolume;
use super::table::{END_OF_CHAIN, FREE_CLUSTER};
use crate::error::{FatError, Result};

/// Result of decoding one directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    pub entries: Vec<DirectoryEntry>,
    /// Clusters that contributed entries.
    pub clusters: usize,
    /// Part of the directory was read by assuming contiguous clusters.
    pub has_free_clusters: bool,
}

/// Per-cluster decode tally.
#[derive(Default)]
struct ClusterTally {
    good: usize,
    bad: usize,
    /// The last record of the cluster was an empty slot.
    ended_empty: bool,
}

impl<R: Read + Seek> FatVolume<R> {
    /// Decode the directory starting at `start`.
    ///
    /// Cluster 0 designates the root directory. Fails with
    /// `DirectoryRejected` when the content does not look like a directory.
    pub fn read_directory(&mut self, start: u32) -> Result<DirectoryListing> {
        let start = self.desc.resolve_root(start);
        let fixed_root = self.desc.is_fixed_root(start);
        if !fixed_root && !self.is_valid_cluster(start) {
            return Err(FatError::ClusterOutOfRange {
                cluster: start,
                total: self.desc.total_clusters,
            });
        }

        let bytes_per_cluster = self.desc.bytes_per_cluster as usize;
        let high = self.uses_high_cluster();
        let mut confirmed = start == self.desc.root_cluster;
        let mut listing = DirectoryListing::default();
        let mut visited = HashSet::new();
        let mut long_name = LongNameBuffer::default();
        let mut buf = vec![0u8; bytes_per_cluster];
        let mut contiguous = false;
        let mut good_total = 0usize;
        let mut bad_total = 0usize;
        let mut cluster = start;

        // FAT12/16 root: stop at the declared entry count
        let mut root_records_left = self.desc.root_entries as usize;

        loop {
            self.check_cancelled()?;
            if !visited.insert(cluster) {
                error!("Looping directory at cluster {cluster}");
                break;
            }

            let base = if fixed_root {
                self.desc.root_page_address(cluster)
            } else {
                self.desc.cluster_address(cluster)
            };
            self.read_at(base, &mut buf)?;

            let mut records = bytes_per_cluster / DIR_ENTRY_SIZE;
            if fixed_root {
                records = records.min(root_records_left);
                root_records_left -= records;
            }

            let mut tally = ClusterTally::default();
            for i in 0..records {
                let record = &buf[i * DIR_ENTRY_SIZE..(i + 1) * DIR_ENTRY_SIZE];
                if record[11] == ATTR_LONG_NAME {
                    long_name.push_fragment(record);
                    continue;
                }
                if record.iter().all(|&b| b == 0) {
                    long_name.take();
                    tally.ended_empty = true;
                    continue;
                }
                tally.ended_empty = false;

                let address = self.options.offset + base + (i * DIR_ENTRY_SIZE) as u64;
                let entry = DirectoryEntry::decode(record, long_name.take(), address, high);
                if entry.is_plausible() && self.is_valid_cluster(entry.cluster) {
                    tally.good += 1;
                    if !confirmed && entry.cluster == start && entry.name() == "." {
                        confirmed = true;
                    }
                    listing.entries.push(entry);
                } else {
                    tally.bad += 1;
                }
            }
            good_total += tally.good;
            bad_total += tally.bad;
            listing.clusters += 1;

            let previous = cluster;
            cluster = if fixed_root {
                if cluster + 1 < self.desc.root_clusters && root_records_left > 0 {
                    cluster + 1
                } else {
                    END_OF_CHAIN
                }
            } else {
                self.next_cluster(cluster)?
            };

            let broken_link =
                cluster == FREE_CLUSTER || (cluster != END_OF_CHAIN && !self.is_valid_cluster(cluster));
            if broken_link || contiguous {
                if !contiguous {
                    warn!(
                        "Directory {start}: cluster {previous} has no valid successor, \
                         reading following clusters contiguously"
                    );
                }
                contiguous = true;
                listing.has_free_clusters = true;

                let keep_going = !tally.ended_empty && tally.good > 0 && tally.bad < tally.good;
                if keep_going && self.is_valid_cluster(previous + 1) {
                    cluster = previous + 1;
                } else {
                    if tally.good == 0 {
                        listing.clusters -= 1;
                    }
                    break;
                }
            }

            if !confirmed {
                if let Some(tolerance) = self.options.reject_tolerance {
                    if bad_total > good_total + tolerance {
                        error!("Entries of cluster {start} don't look good, this is maybe not a directory");
                        return Err(FatError::DirectoryRejected { cluster: start });
                    }
                }
            }

            if cluster == END_OF_CHAIN {
                break;
            }
        }

        Ok(listing)
    }
}
