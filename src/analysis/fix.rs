//! FAT repair: re-link runs of free clusters that directory entries still
//! claim.

use std::io::{Read, Seek, Write};

use log::{debug, error, info};

use super::walk::{walk, WalkPolicy, WalkVisitor};
use crate::error::{FatError, Result};
use crate::fs::{DirectoryEntry, FatVolume, END_OF_CHAIN};

/// Outcome of [`fix_chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    Fixed,
    /// Nothing to do for an empty run.
    EmptyRun,
    /// Part of the run is allocated; nothing was written.
    Allocated,
}

/// Link `length` clusters from `cluster` into one chain, in every FAT
/// copy. Refuses unless the whole run is free.
pub fn fix_chain<R: Read + Write + Seek>(
    volume: &mut FatVolume<R>,
    cluster: u32,
    length: u32,
) -> Result<FixOutcome> {
    if length == 0 {
        error!("Size is zero, not fixing cluster {cluster}");
        return Ok(FixOutcome::EmptyRun);
    }

    debug!("Fixing the FAT ({length} clusters from {cluster})");
    for c in cluster..cluster.saturating_add(length) {
        if c < 2 || !volume.is_valid_cluster(c) || !volume.is_free(c)? {
            info!("There are allocated clusters in the run from {cluster}, not fixing");
            return Ok(FixOutcome::Allocated);
        }
    }

    let last = cluster + length - 1;
    let copies = volume.descriptor().num_fats;
    for c in cluster..=last {
        volume.check_cancelled()?;
        let next = if c == last { END_OF_CHAIN } else { c + 1 };
        for fat in 0..copies {
            volume.set_next_cluster(c, next, fat)?;
        }
    }
    volume.flush()?;
    Ok(FixOutcome::Fixed)
}

/// Repair totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FixStats {
    /// Entries whose start cluster was free.
    pub damaged: usize,
    pub fixed: usize,
}

#[derive(Debug, Default)]
pub struct FixVisitor {
    pub stats: FixStats,
}

impl<R: Read + Write + Seek> WalkVisitor<R> for FixVisitor {
    fn on_entry(
        &mut self,
        volume: &mut FatVolume<R>,
        _parent: &DirectoryEntry,
        entry: &DirectoryEntry,
        path: &str,
    ) -> Result<()> {
        let cluster = entry.cluster;
        if cluster < 2 || !volume.is_valid_cluster(cluster) || !volume.is_free(cluster)? {
            return Ok(());
        }
        self.stats.damaged += 1;

        let length = if entry.is_directory() {
            info!("Directory '{path}' ({cluster}) seems broken, trying to repair FAT");
            match volume.read_directory(cluster) {
                Ok(listing) => listing.clusters as u32,
                Err(FatError::DirectoryRejected { .. }) => 0,
                Err(e) => return Err(e),
            }
        } else {
            info!("File '{path}' ({cluster}) seems broken, trying to repair FAT");
            entry.size.div_ceil(volume.bytes_per_cluster()) as u32
        };

        if fix_chain(volume, cluster, length)? == FixOutcome::Fixed {
            self.stats.fixed += 1;
        }
        Ok(())
    }
}

/// Walk the live tree and repair every chain whose start is marked free.
pub fn fix_volume<R: Read + Write + Seek>(volume: &mut FatVolume<R>) -> Result<FixStats> {
    info!("Searching for damaged files & directories");
    let mut visitor = FixVisitor::default();
    let root = volume.root_cluster();
    walk(volume, root, WalkPolicy::default(), &mut visitor)?;
    info!(
        "{} damaged entries, {} repaired",
        visitor.stats.damaged, visitor.stats.fixed
    );
    Ok(visitor.stats)
}
