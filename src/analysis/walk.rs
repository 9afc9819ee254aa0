//! Depth-first traversal of the directory tree with visitor hooks.

use std::collections::HashSet;
use std::io::{Read, Seek};

use log::warn;

use crate::error::{FatError, Result};
use crate::fs::{DirectoryEntry, FatVolume};

/// What a traversal visits.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkPolicy {
    /// Also visit (and descend into) erased entries.
    pub include_erased: bool,
}

/// Hooks invoked by [`walk`].
///
/// `path` is the full `/`-joined path of `entry`; the starting directory
/// itself is visited once as `/`.
pub trait WalkVisitor<R> {
    /// Called before descending into a directory.
    fn on_directory(
        &mut self,
        _volume: &mut FatVolume<R>,
        _parent: &DirectoryEntry,
        _entry: &DirectoryEntry,
        _path: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Called for every visited entry, after its subtree for directories.
    fn on_entry(
        &mut self,
        volume: &mut FatVolume<R>,
        parent: &DirectoryEntry,
        entry: &DirectoryEntry,
        path: &str,
    ) -> Result<()>;
}

/// Walk the tree rooted at directory cluster `start` (0 is the root).
pub fn walk<R, V>(
    volume: &mut FatVolume<R>,
    start: u32,
    policy: WalkPolicy,
    visitor: &mut V,
) -> Result<()>
where
    R: Read + Seek,
    V: WalkVisitor<R> + ?Sized,
{
    let start = volume.descriptor().resolve_root(start);
    let root = if start == volume.root_cluster() {
        volume.root_entry()
    } else {
        DirectoryEntry::placeholder_directory("/", start)
    };
    visitor.on_entry(volume, &root, &root, "/")?;

    let mut visited = HashSet::new();
    descend(volume, &root, "/", policy, visitor, &mut visited)
}

fn descend<R, V>(
    volume: &mut FatVolume<R>,
    dir: &DirectoryEntry,
    path: &str,
    policy: WalkPolicy,
    visitor: &mut V,
    visited: &mut HashSet<u32>,
) -> Result<()>
where
    R: Read + Seek,
    V: WalkVisitor<R> + ?Sized,
{
    if !visited.insert(dir.cluster) {
        return Ok(());
    }

    let listing = match volume.read_directory(dir.cluster) {
        Ok(listing) => listing,
        Err(e @ (FatError::DirectoryRejected { .. } | FatError::ClusterOutOfRange { .. })) => {
            warn!("Skipping {path}: {e}");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for entry in &listing.entries {
        if entry.erased && !policy.include_erased {
            continue;
        }
        if entry.is_dot() {
            continue;
        }

        let child_path = join(path, &entry.name());
        if entry.is_directory() {
            visitor.on_directory(volume, dir, entry, &child_path)?;
            descend(volume, entry, &child_path, policy, visitor, visited)?;
        }
        visitor.on_entry(volume, dir, entry, &child_path)?;
    }
    Ok(())
}

/// Join a walk path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(join("/", "files"), "/files");
        assert_eq!(join("/files", "a.txt"), "/files/a.txt");
        assert_eq!(join("", "x"), "/x");
    }
}
