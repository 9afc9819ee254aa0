use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::walk::{walk, WalkPolicy, WalkVisitor};
use crate::error::Result;
use crate::fs::{DirectoryEntry, FatVolume, LimitedWriter};

/// Extraction totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Copies a walked tree below a host directory.
pub struct ExtractVisitor {
    target: PathBuf,
    pub stats: ExtractStats,
}

impl ExtractVisitor {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            stats: ExtractStats::default(),
        }
    }

    /// Host path for a walk path. Segments that could escape the target
    /// are dropped and separator-like characters replaced.
    pub fn host_path(&self, path: &str) -> PathBuf {
        let mut out = self.target.clone();
        for part in path.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                continue;
            }
            out.push(sanitize(part));
        }
        out
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '\0' | ':' => '_',
            c => c,
        })
        .collect()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

impl<R: Read + Seek> WalkVisitor<R> for ExtractVisitor {
    fn on_directory(
        &mut self,
        _volume: &mut FatVolume<R>,
        _parent: &DirectoryEntry,
        _entry: &DirectoryEntry,
        path: &str,
    ) -> Result<()> {
        let dir = self.host_path(path);
        fs::create_dir_all(&dir)?;
        self.stats.directories += 1;
        Ok(())
    }

    fn on_entry(
        &mut self,
        volume: &mut FatVolume<R>,
        _parent: &DirectoryEntry,
        entry: &DirectoryEntry,
        path: &str,
    ) -> Result<()> {
        if entry.is_directory() {
            return Ok(());
        }
        if entry.erased {
            info!("Trying to read deleted file {path}, enabling contiguous mode");
        }

        let target = self.host_path(path);
        debug!("Extracting {path} to {}", target.display());
        ensure_parent(&target)?;
        let file = BufWriter::new(File::create(&target)?);
        let mut sink = LimitedWriter::new(file, entry.size);
        let written = volume.read_file(entry.cluster, entry.size, &mut sink, entry.erased)?;
        sink.into_inner().flush()?;

        self.stats.files += 1;
        self.stats.bytes += written.min(entry.size);
        Ok(())
    }
}

/// Extract the tree below directory cluster `start` into `target`.
pub fn extract_tree<R: Read + Seek>(
    volume: &mut FatVolume<R>,
    start: u32,
    target: &Path,
    include_erased: bool,
) -> Result<ExtractStats> {
    fs::create_dir_all(target)?;
    let mut visitor = ExtractVisitor::new(target);
    walk(volume, start, WalkPolicy { include_erased }, &mut visitor)?;
    info!(
        "Extracted {} files and {} directories",
        visitor.stats.files, visitor.stats.directories
    );
    Ok(visitor.stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_path_stays_inside_target() {
        let v = ExtractVisitor::new("/out");
        assert_eq!(v.host_path("/files/a.txt"), PathBuf::from("/out/files/a.txt"));
        assert_eq!(v.host_path("/../x"), PathBuf::from("/out/x"));
        assert_eq!(v.host_path("/a\\b"), PathBuf::from("/out/a_b"));
    }
}
