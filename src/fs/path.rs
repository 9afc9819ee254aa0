//! `/`-delimited paths and their resolution against a volume.

use std::fmt;
use std::io::{Read, Seek, Write};

use log::warn;

use super::directory::DirectoryListing;
use super::entry::DirectoryEntry;
use super::fat::FatVolume;
use super::file::LimitedWriter;
use crate::error::{FatError, Result};

pub const PATH_DELIMITER: char = '/';

/// A parsed path. Empty segments are dropped, so `""`, `"/"` and `"//"`
/// all denote the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatPath {
    parts: Vec<String>,
}

impl FatPath {
    pub fn parse(path: &str) -> Self {
        Self {
            parts: path
                .split(PATH_DELIMITER)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// All segments but the last.
    pub fn dirname(&self) -> FatPath {
        let keep = self.parts.len().saturating_sub(1);
        FatPath {
            parts: self.parts[..keep].to_vec(),
        }
    }

    /// Last segment, `None` for the root.
    pub fn basename(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }
}

impl fmt::Display for FatPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.parts.join("/"))
    }
}

/// Pick a live entry over an erased one of the same name.
fn pick<'a>(mut matches: impl Iterator<Item = &'a DirectoryEntry>) -> Option<&'a DirectoryEntry> {
    let first = matches.next()?;
    if !first.erased {
        return Some(first);
    }
    Some(matches.find(|e| !e.erased).unwrap_or(first))
}

impl<R: Read + Seek> FatVolume<R> {
    /// Resolve a directory path. Segment matching ignores case.
    pub fn find_directory(&mut self, path: &FatPath) -> Result<DirectoryEntry> {
        let mut current = self.root_entry();
        for part in path.parts() {
            let wanted = part.to_lowercase();
            let listing = self.read_directory(current.cluster)?;
            let found = pick(
                listing
                    .entries
                    .iter()
                    .filter(|e| e.is_directory() && !e.is_dot())
                    .filter(|e| e.name().to_lowercase() == wanted),
            );
            current = match found {
                Some(entry) => entry.clone(),
                None => return Err(FatError::PathNotFound(path.to_string())),
            };
        }
        Ok(current)
    }

    /// Resolve a file path. The final name must match exactly.
    pub fn find_file(&mut self, path: &FatPath) -> Result<DirectoryEntry> {
        let basename = match path.basename() {
            Some(name) => name,
            None => return Err(FatError::PathNotFound(path.to_string())),
        };
        let parent = self.find_directory(&path.dirname())?;
        let listing = self.read_directory(parent.cluster)?;
        pick(
            listing
                .entries
                .iter()
                .filter(|e| !e.is_dot() && e.name() == basename),
        )
        .cloned()
        .ok_or_else(|| FatError::PathNotFound(path.to_string()))
    }

    /// Decode the directory designated by `path`.
    pub fn list_path(&mut self, path: &FatPath) -> Result<DirectoryListing> {
        let dir = self.find_directory(path)?;
        self.read_directory(dir.cluster)
    }

    /// Write the content of the file at `path` into `sink`, trimmed to its
    /// logical size. Returns the number of bytes written.
    pub fn read_path(&mut self, path: &FatPath, sink: &mut dyn Write) -> Result<u64> {
        let entry = self.find_file(path)?;
        let erased = entry.erased && self.is_free(entry.cluster)?;
        if erased {
            warn!("Trying to read a deleted file, enabling deleted mode");
        }
        let mut limited = LimitedWriter::new(sink, entry.size);
        let written = self.read_file(entry.cluster, entry.size, &mut limited, erased)?;
        Ok(written.min(entry.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let p = FatPath::parse("/files//other_file.txt");
        assert_eq!(p.parts(), &["files", "other_file.txt"]);
        assert_eq!(p.basename(), Some("other_file.txt"));
        assert_eq!(p.dirname().to_string(), "/files");
        assert_eq!(p.to_string(), "/files/other_file.txt");
    }

    #[test]
    fn test_root_forms() {
        for root in ["", "/", "///"] {
            let p = FatPath::parse(root);
            assert!(p.is_root());
            assert_eq!(p.basename(), None);
            assert_eq!(p.to_string(), "/");
        }
    }
}
