use std::io::{Read, Seek};

use log::{debug, info};
use serde::Serialize;

use super::walk::{walk, WalkPolicy, WalkVisitor};
use crate::error::Result;
use crate::fs::{DirectoryEntry, FatVolume};

/// An entry referencing the searched cluster.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    /// Cluster of the directory holding the entry.
    pub parent_cluster: u32,
    pub entry: DirectoryEntry,
}

pub struct SearchVisitor {
    cluster: u32,
    pub hits: Vec<SearchHit>,
}

impl SearchVisitor {
    pub fn new(cluster: u32) -> Self {
        Self {
            cluster,
            hits: Vec::new(),
        }
    }
}

impl<R: Read + Seek> WalkVisitor<R> for SearchVisitor {
    fn on_entry(
        &mut self,
        _volume: &mut FatVolume<R>,
        parent: &DirectoryEntry,
        entry: &DirectoryEntry,
        path: &str,
    ) -> Result<()> {
        // The walk root is synthesized, it is not a reference.
        if path == "/" {
            return Ok(());
        }
        if entry.cluster == self.cluster {
            debug!(
                "Found '{path}' in directory '{}' ({})",
                parent.name(),
                parent.cluster
            );
            self.hits.push(SearchHit {
                path: path.to_string(),
                parent_cluster: parent.cluster,
                entry: entry.clone(),
            });
        }
        Ok(())
    }
}

/// Find every entry, erased ones included, whose start cluster is `cluster`.
pub fn search_cluster<R: Read + Seek>(
    volume: &mut FatVolume<R>,
    cluster: u32,
) -> Result<Vec<SearchHit>> {
    info!("Searching for an entry referencing {cluster}");
    let mut visitor = SearchVisitor::new(cluster);
    let root = volume.root_cluster();
    walk(
        volume,
        root,
        WalkPolicy {
            include_erased: true,
        },
        &mut visitor,
    )?;
    if visitor.hits.is_empty() {
        info!("No entry was found");
    }
    Ok(visitor.hits)
}
