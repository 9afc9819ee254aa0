use std::io::{Read, Seek};

use chrono::NaiveDateTime;
use serde::Serialize;

use super::walk::{walk, WalkPolicy, WalkVisitor};
use crate::error::Result;
use crate::fs::{DirectoryEntry, FatVolume};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One line of a listing.
#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub kind: EntryKind,
    pub changed: Option<NaiveDateTime>,
    pub path: String,
    /// 8.3 name, only when it differs from the displayed name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    pub cluster: u32,
    /// Byte size, files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub hidden: bool,
    pub erased: bool,
}

impl ListEntry {
    pub fn new(entry: &DirectoryEntry, path: String) -> Self {
        let short = entry.short_file_name();
        let is_dir = entry.is_directory();
        Self {
            kind: if is_dir {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            changed: entry.changed,
            short_name: (short != entry.name()).then_some(short),
            path,
            cluster: entry.cluster,
            size: (!is_dir).then_some(entry.size),
            hidden: entry.is_hidden(),
            erased: entry.erased,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Entries of one decoded directory, as listing lines.
pub fn list_entries(entries: &[DirectoryEntry], include_erased: bool) -> Vec<ListEntry> {
    entries
        .iter()
        .filter(|e| include_erased || !e.erased)
        .map(|e| ListEntry::new(e, format!("/{}", e.name())))
        .collect()
}

/// Collects every visited entry of a walk.
#[derive(Debug, Default)]
pub struct ListVisitor {
    pub entries: Vec<ListEntry>,
}

impl<R: Read + Seek> WalkVisitor<R> for ListVisitor {
    fn on_entry(
        &mut self,
        _volume: &mut FatVolume<R>,
        _parent: &DirectoryEntry,
        entry: &DirectoryEntry,
        path: &str,
    ) -> Result<()> {
        // The starting directory is not part of its own listing.
        if path != "/" {
            self.entries.push(ListEntry::new(entry, path.to_string()));
        }
        Ok(())
    }
}

/// Recursive listing of the tree below directory cluster `start`.
pub fn list_tree<R: Read + Seek>(
    volume: &mut FatVolume<R>,
    start: u32,
    include_erased: bool,
) -> Result<Vec<ListEntry>> {
    let mut visitor = ListVisitor::default();
    walk(volume, start, WalkPolicy { include_erased }, &mut visitor)?;
    Ok(visitor.entries)
}
