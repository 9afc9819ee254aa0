//! Orphaned chain analysis.
//!
//! Every allocated chain of the table is discovered first, then the
//! directory tree is walked from the root to mark the chains it reaches.
//! Chains left over are retried as directories until no new chain becomes
//! reachable; whatever remains is orphaned.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Seek};

use log::{debug, error, info};
use serde::Serialize;

use crate::error::{FatError, Result};
use crate::fs::{DirectoryEntry, FatVolume, END_OF_CHAIN};

/// One allocated chain of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterChain {
    pub start: u32,
    pub end: u32,
    /// Length in clusters.
    pub length: u32,
    pub orphaned: bool,
    pub is_directory: bool,
    /// Entries found below this chain once explored.
    pub element_count: usize,
    pub size: u64,
}

/// Length and layout of a single chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainExtent {
    pub length: u32,
    /// Every link points at the following cluster.
    pub contiguous: bool,
}

impl<R: Read + Seek> FatVolume<R> {
    /// Follow the chain starting at `cluster`, stopping on a loop.
    pub fn chain_extent(&mut self, cluster: u32) -> Result<ChainExtent> {
        let mut visited = HashSet::new();
        let mut contiguous = true;
        let mut current = cluster;
        let mut length = 0u32;
        loop {
            self.check_cancelled()?;
            visited.insert(current);
            length += 1;
            let next = self.next_cluster(current)?;
            if next == END_OF_CHAIN || !self.is_valid_cluster(next) {
                break;
            }
            if next != current + 1 {
                contiguous = false;
            }
            if visited.contains(&next) {
                error!("Loop detected, {current} points to {next} that was already met");
                break;
            }
            current = next;
        }
        Ok(ChainExtent { length, contiguous })
    }
}

/// Running totals of one exploration.
#[derive(Debug, Default)]
struct Exploration {
    /// Chains that stopped being orphaned.
    reached: usize,
    elements: usize,
    size: u64,
}

/// Chain arena indexed by start cluster plus reconciliation state.
#[derive(Debug, Default)]
pub struct ChainAnalysis {
    chains: BTreeMap<u32, ClusterChain>,
    /// Directories already decoded during reconciliation.
    visited: HashSet<u32>,
    /// Orphans whose decode showed no directory content.
    probed: HashSet<u32>,
    orphan_entries: HashMap<u32, Vec<DirectoryEntry>>,
}

impl ChainAnalysis {
    /// Discover, reconcile from the root, then explore leftover chains.
    pub fn run<R: Read + Seek>(volume: &mut FatVolume<R>) -> Result<Self> {
        volume.enable_cache()?;
        info!("Building the chains");
        let mut analysis = Self::discover(volume)?;
        info!("Found {} chains", analysis.chains.len());

        info!("Running the recursive differential analysis");
        analysis.reconcile_from_root(volume)?;

        info!("Having a look at the chains");
        analysis.explore_chains(volume)?;
        Ok(analysis)
    }

    /// Scan the table from the root cluster and record every chain.
    pub fn discover<R: Read + Seek>(volume: &mut FatVolume<R>) -> Result<Self> {
        let root = volume.root_cluster();
        let total = volume.total_clusters();
        let mut seen = HashSet::new();
        let mut by_end: HashMap<u32, ClusterChain> = HashMap::new();

        for cluster in root..total {
            if cluster % 4096 == 0 {
                volume.check_cancelled()?;
            }
            if seen.contains(&cluster) || volume.is_free(cluster)? {
                continue;
            }
            seen.insert(cluster);

            let mut local = HashSet::from([cluster]);
            let mut end = cluster;
            let mut length = 1u32;
            loop {
                let next = volume.next_cluster(end)?;
                if next == END_OF_CHAIN || !volume.is_valid_cluster(next) {
                    break;
                }
                if !local.insert(next) {
                    error!("Loop in chain starting at {cluster}");
                    break;
                }
                seen.insert(next);
                end = next;
                length += 1;
            }

            // A chain ending where an earlier one ended is its head.
            by_end.insert(
                end,
                ClusterChain {
                    start: cluster,
                    end,
                    length,
                    orphaned: cluster != root,
                    is_directory: cluster == root,
                    element_count: 0,
                    size: 0,
                },
            );
        }

        let chains = by_end
            .into_values()
            .map(|chain| (chain.start, chain))
            .collect();
        Ok(Self {
            chains,
            ..Self::default()
        })
    }

    /// Mark every chain reachable from the root directory.
    pub fn reconcile_from_root<R: Read + Seek>(
        &mut self,
        volume: &mut FatVolume<R>,
    ) -> Result<usize> {
        let root = volume.root_cluster();
        let found = self.explore(volume, root, None, false)?;
        // Cluster 0 is the fixed root or an empty file, never a directory.
        self.visited.insert(0);
        Ok(found.reached)
    }

    /// Retry orphaned chains as directories until nothing changes.
    ///
    /// Returns the number of changes made; 0 once converged.
    pub fn explore_chains<R: Read + Seek>(&mut self, volume: &mut FatVolume<R>) -> Result<usize> {
        let mut total_changes = 0;
        loop {
            let candidates: Vec<u32> = self
                .chains
                .values()
                .filter(|c| c.orphaned && c.start >= 2)
                .map(|c| c.start)
                .filter(|s| !self.visited.contains(s) && !self.probed.contains(s))
                .collect();

            let mut changes = 0;
            for start in candidates {
                volume.check_cancelled()?;
                // Absorbed by an earlier candidate of this round.
                if self.visited.contains(&start) || !self.is_orphaned(start) {
                    continue;
                }

                let entries = match volume.read_directory(start) {
                    Ok(listing) => listing.entries,
                    Err(FatError::DirectoryRejected { .. }) => Vec::new(),
                    Err(e) => return Err(e),
                };
                if entries.is_empty() {
                    self.probed.insert(start);
                    continue;
                }

                debug!("Orphaned chain {start} holds a directory");
                if let Some(chain) = self.chains.get_mut(&start) {
                    chain.is_directory = true;
                }
                self.orphan_entries.insert(
                    start,
                    entries
                        .iter()
                        .filter(|e| !e.erased && !e.is_dot())
                        .cloned()
                        .collect(),
                );

                let found = self.explore(volume, start, Some(entries), true)?;
                if let Some(chain) = self.chains.get_mut(&start) {
                    chain.element_count += found.elements;
                    chain.size += found.size;
                }
                changes += 1 + found.reached;
            }

            total_changes += changes;
            if changes == 0 {
                break;
            }
        }
        Ok(total_changes)
    }

    /// Depth-first exploration below directory `dir`.
    ///
    /// Outside damage exploration, directories whose own cluster is free
    /// are not decoded.
    fn explore<R: Read + Seek>(
        &mut self,
        volume: &mut FatVolume<R>,
        dir: u32,
        entries: Option<Vec<DirectoryEntry>>,
        damage: bool,
    ) -> Result<Exploration> {
        let root = volume.root_cluster();
        let mut found = Exploration::default();
        let mut stack = vec![(dir, entries)];

        while let Some((cluster, entries)) = stack.pop() {
            volume.check_cancelled()?;
            if self.visited.contains(&cluster) {
                continue;
            }
            if !damage && cluster != root && volume.is_free(cluster)? {
                continue;
            }
            self.visited.insert(cluster);
            debug!("Exploring {cluster}");

            let entries = match entries {
                Some(entries) => entries,
                None => match volume.read_directory(cluster) {
                    Ok(listing) => listing.entries,
                    Err(
                        e @ (FatError::DirectoryRejected { .. }
                        | FatError::ClusterOutOfRange { .. }),
                    ) => {
                        debug!("Not exploring {cluster}: {e}");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            for entry in entries.iter().filter(|e| !e.erased && !e.is_dot()) {
                found.elements += 1;
                if !entry.is_directory() {
                    found.size += entry.size;
                }

                if entry.cluster >= 2 {
                    if let Some(chain) = self.chains.get_mut(&entry.cluster) {
                        chain.is_directory = entry.is_directory();
                        if !entry.is_directory() {
                            chain.size = entry.size;
                        }
                        if chain.orphaned {
                            chain.orphaned = false;
                            found.reached += 1;
                            // Explored earlier as an orphan root: its
                            // subtree is not walked twice.
                            if self.visited.contains(&entry.cluster) {
                                found.elements += chain.element_count;
                                found.size += chain.size;
                            }
                        }
                    }
                }

                if entry.is_directory() {
                    stack.push((entry.cluster, None));
                }
            }
        }
        Ok(found)
    }

    fn is_orphaned(&self, start: u32) -> bool {
        self.chains.get(&start).map_or(false, |c| c.orphaned)
    }

    /// Every discovered chain, by start cluster.
    pub fn chains(&self) -> impl Iterator<Item = &ClusterChain> {
        self.chains.values()
    }

    pub fn chain(&self, start: u32) -> Option<&ClusterChain> {
        self.chains.get(&start)
    }

    /// Chains still orphaned, excluding those below cluster 2. A file
    /// orphan has no entry telling its size, so the allocated size is
    /// reported.
    pub fn orphans(&self, bytes_per_cluster: u64) -> Vec<ClusterChain> {
        self.chains
            .values()
            .filter(|c| c.orphaned && c.start >= 2)
            .map(|c| {
                let mut chain = c.clone();
                if !chain.is_directory {
                    chain.size = chain.length as u64 * bytes_per_cluster;
                }
                chain
            })
            .collect()
    }

    /// Entries decoded directly from an orphaned directory chain.
    pub fn entries_of(&self, start: u32) -> Option<&[DirectoryEntry]> {
        self.orphan_entries.get(&start).map(Vec::as_slice)
    }
}
