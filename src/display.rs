//! Plain-text rendering of listings, chains and volume info.

use std::fmt::Write as _;

use crate::analysis::chains::ClusterChain;
use crate::analysis::list::ListEntry;
use crate::analysis::search::SearchHit;
use crate::fs::VolumeInfo;

const NAME_WIDTH: usize = 50;

/// Human-readable size with binary units.
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// `d|f  date  /name[/] (SHORT)  c=N [s=N (pretty)] [h] [d]`
pub fn format_list_entry(entry: &ListEntry) -> String {
    let mut line = String::new();
    line.push(if entry.is_directory() { 'd' } else { 'f' });

    match entry.changed {
        Some(ts) => {
            let _ = write!(line, " {} ", ts.format("%Y-%m-%d %H:%M:%S"));
        }
        None => line.push_str(" ---------- --:--:-- "),
    }

    let mut name = entry.path.clone();
    if entry.is_directory() && !name.ends_with('/') {
        name.push('/');
    }
    if let Some(short) = &entry.short_name {
        let _ = write!(name, " ({short})");
    }
    let _ = write!(line, " {name:>width$}", width = NAME_WIDTH);

    let _ = write!(line, " c={}", entry.cluster);
    if let Some(size) = entry.size {
        let _ = write!(line, " s={size} ({})", format_size(size));
    }
    if entry.hidden {
        line.push_str(" h");
    }
    if entry.erased {
        line.push_str(" d");
    }
    line
}

pub fn format_chain(chain: &ClusterChain) -> String {
    let kind = if chain.is_directory { "directory" } else { "file" };
    let mut line = format!(
        "Chain from {} to {} ({} clusters): {kind}",
        chain.start, chain.end, chain.length
    );
    if chain.is_directory {
        let _ = write!(line, ", {} elements", chain.element_count);
    }
    let _ = write!(line, ", {}", format_size(chain.size));
    line
}

pub fn format_search_hit(hit: &SearchHit) -> String {
    format!(
        "Found {} in directory cluster {} (entry at 0x{:x})",
        hit.path, hit.parent_cluster, hit.entry.address
    )
}

pub fn format_info(info: &VolumeInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FAT Filesystem information");
    let _ = writeln!(out);
    let _ = writeln!(out, "Filesystem type: {}", info.fs_type);
    let _ = writeln!(out, "OEM name: {}", info.oem_name);
    let _ = writeln!(out, "Label: {}", info.label);
    let _ = writeln!(out, "Bits: {}", info.fat_type);
    let _ = writeln!(out, "Total sectors: {}", info.total_size / info.bytes_per_sector.max(1));
    let _ = writeln!(out, "Total data clusters: {}", info.total_clusters);
    let _ = writeln!(out, "Data size: {} ({})", info.data_size, format_size(info.data_size));
    let _ = writeln!(out, "Disk size: {} ({})", info.total_size, format_size(info.total_size));
    let _ = writeln!(out, "Bytes per sector: {}", info.bytes_per_sector);
    let _ = writeln!(out, "Sectors per cluster: {}", info.sectors_per_cluster);
    let _ = writeln!(out, "Bytes per cluster: {}", info.bytes_per_cluster);
    let _ = writeln!(out, "Reserved sectors: {}", info.reserved_sectors);
    let _ = writeln!(out, "Sectors per FAT: {}", info.sectors_per_fat);
    let _ = writeln!(out, "Fat size: {} ({})", info.fat_size, format_size(info.fat_size));
    let _ = writeln!(out, "FAT1 start address: 0x{:016x}", info.fat_start);
    if info.num_fats > 1 {
        let _ = writeln!(out, "FAT2 start address: 0x{:016x}", info.fat_start + info.fat_size);
    }
    let _ = writeln!(out, "Data start address: 0x{:016x}", info.data_start);
    let _ = writeln!(out, "Root directory cluster: {}", info.root_cluster);
    if info.root_entries > 0 {
        let _ = writeln!(out, "Root entries: {}", info.root_entries);
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Free clusters: {}/{} ({:.1}%)",
        info.free_clusters,
        info.total_clusters,
        100.0 * info.free_clusters as f64 / info.total_clusters.max(1) as f64
    );
    let _ = writeln!(out, "Free space: {} ({})", info.free_size, format_size(info.free_size));
    for warning in &info.warnings {
        let _ = writeln!(out, "Warning: {warning}");
    }
    out
}
