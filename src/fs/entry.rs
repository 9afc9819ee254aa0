use chrono::NaiveDateTime;
use serde::Serialize;

use super::bytes::{fat_datetime, read_u16, read_u32};

// FAT directory entry constants
pub const DIR_ENTRY_SIZE: usize = 32;
pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;

/// First short-name byte of an erased entry.
pub const ERASED_MARKER: u8 = 0xE5;

// Record offsets
const OFF_ATTRIBUTES: usize = 0x0B;
const OFF_CREATION_TIME: usize = 0x0E;
const OFF_CREATION_DATE: usize = 0x10;
const OFF_CLUSTER_HIGH: usize = 0x14;
const OFF_CHANGE_TIME: usize = 0x16;
const OFF_CHANGE_DATE: usize = 0x18;
const OFF_CLUSTER_LOW: usize = 0x1A;
const OFF_FILE_SIZE: usize = 0x1C;

/// "Last fragment" flag in the sequence byte of a long-name record.
const LFN_LAST: u8 = 0x40;

/// Longest long name the FAT specification allows, in UTF-16 units.
pub const MAX_LONG_NAME: usize = 255;

/// One decoded short-name record of a directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryEntry {
    /// Reconstructed long name; empty when the entry has none.
    pub long_name: String,
    /// Raw 11-byte 8.3 name.
    #[serde(skip)]
    pub short_name: [u8; 11],
    pub cluster: u32,
    pub size: u64,
    pub attributes: u8,
    pub created: Option<NaiveDateTime>,
    pub changed: Option<NaiveDateTime>,
    /// Absolute byte offset of the record in the image.
    pub address: u64,
    pub erased: bool,
}

impl DirectoryEntry {
    /// Decode a 32-byte short-name record.
    ///
    /// `use_high_cluster` selects whether the high 16 bits of the start
    /// cluster are meaningful (FAT32 only).
    pub fn decode(
        record: &[u8],
        long_name: String,
        address: u64,
        use_high_cluster: bool,
    ) -> Self {
        let mut short_name = [0u8; 11];
        short_name.copy_from_slice(&record[..11]);

        let low = read_u16(record, OFF_CLUSTER_LOW) as u32;
        let high = if use_high_cluster {
            read_u16(record, OFF_CLUSTER_HIGH) as u32
        } else {
            0
        };

        Self {
            long_name,
            short_name,
            cluster: (high << 16) | low,
            size: read_u32(record, OFF_FILE_SIZE) as u64,
            attributes: record[OFF_ATTRIBUTES],
            created: fat_datetime(
                read_u16(record, OFF_CREATION_DATE),
                read_u16(record, OFF_CREATION_TIME),
            ),
            changed: fat_datetime(
                read_u16(record, OFF_CHANGE_DATE),
                read_u16(record, OFF_CHANGE_TIME),
            ),
            address,
            erased: record[0] == ERASED_MARKER,
        }
    }

    /// Synthesized directory entry used as the root of a traversal.
    pub fn placeholder_directory(name: &str, cluster: u32) -> Self {
        let mut short_name = [b' '; 11];
        for (dst, src) in short_name.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
        Self {
            long_name: name.to_string(),
            short_name,
            cluster,
            size: 0,
            attributes: ATTR_DIRECTORY,
            created: None,
            changed: None,
            address: 0,
            erased: false,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_file(&self) -> bool {
        self.attributes & ATTR_ARCHIVE != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes & ATTR_HIDDEN != 0
    }

    /// True for the "." and ".." back-references.
    pub fn is_dot(&self) -> bool {
        let name = self.name();
        name == "." || name == ".."
    }

    /// Attribute sanity used to tell real entries from garbage.
    ///
    /// Non-zero attributes must carry the directory or archive bit, and a
    /// directory may only point at cluster 0 when it is "..".
    pub fn is_plausible(&self) -> bool {
        if self.attributes != 0 && !self.is_directory() && !self.is_file() {
            return false;
        }
        if self.is_directory() && self.cluster == 0 && self.name() != ".." {
            return false;
        }
        true
    }

    /// Long name when present, 8.3 name otherwise.
    pub fn name(&self) -> String {
        if self.long_name.is_empty() {
            self.short_file_name()
        } else {
            self.long_name.clone()
        }
    }

    /// Display form of the 8.3 name. The first character of an erased
    /// entry is gone (overwritten by the marker) and is dropped.
    pub fn short_file_name(&self) -> String {
        let name = if self.erased {
            &self.short_name[1..8]
        } else {
            &self.short_name[..8]
        };
        build_short_name(name, &self.short_name[8..11])
    }
}

/// Accumulates long-name fragments, which are stored on disk
/// last-fragment-first, into a fixed-size buffer.
#[derive(Debug, Clone)]
pub struct LongNameBuffer {
    units: [u16; MAX_LONG_NAME],
    len: usize,
}

impl Default for LongNameBuffer {
    fn default() -> Self {
        Self {
            units: [0; MAX_LONG_NAME],
            len: 0,
        }
    }
}

// UTF-16 character positions inside a long-name record.
const LFN_CHAR_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

impl LongNameBuffer {
    /// Feed one long-name record. The fragment is prepended to what has
    /// been accumulated so far.
    pub fn push_fragment(&mut self, record: &[u8]) {
        let seq = record[0];
        if seq & LFN_LAST != 0 && seq != ERASED_MARKER {
            self.len = 0;
        }

        let mut fragment = [0u16; 13];
        let mut n = 0;
        for &off in &LFN_CHAR_OFFSETS {
            // A 0x0000 unit ends the name, 0xFFFF fills the rest.
            match read_u16(record, off) {
                0x0000 => break,
                0xFFFF => continue,
                unit => {
                    fragment[n] = unit;
                    n += 1;
                }
            }
        }

        let n = n.min(MAX_LONG_NAME - self.len);
        if n == 0 {
            return;
        }
        self.units.copy_within(0..self.len, n);
        self.units[..n].copy_from_slice(&fragment[..n]);
        self.len += n;
    }

    /// Return the accumulated name and reset the buffer.
    pub fn take(&mut self) -> String {
        let name = char::decode_utf16(self.units[..self.len].iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
        self.len = 0;
        name
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Build a DOS 8.3 short filename from the name and extension bytes.
///
/// FAT short names use OEM codepage encoding (typically CP437). Bytes 0x80-0xFF
/// are decoded using the CP437 table rather than assuming UTF-8.
pub fn build_short_name(name: &[u8], ext: &[u8]) -> String {
    let name_str = decode_oem_string(name);
    let name_trimmed = name_str.trim_end();
    let ext_str = decode_oem_string(ext);
    let ext_trimmed = ext_str.trim_end();

    if ext_trimmed.is_empty() {
        name_trimmed.to_string()
    } else {
        format!("{name_trimmed}.{ext_trimmed}")
    }
}

fn decode_oem_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| cp437_to_char(b)).collect()
}

fn cp437_to_char(b: u8) -> char {
    match b {
        0x00 => ' ',
        0x01..=0x7F => b as char,
        _ => CP437_HIGH[b as usize - 0x80],
    }
}

/// CP437 to Unicode mapping for bytes 0x80-0xFF.
#[rustfmt::skip]
const CP437_HIGH: [char; 128] = [
    // 0x80-0x8F
    'Ç','ü','é','â','ä','à','å','ç', 'ê','ë','è','ï','î','ì','Ä','Å',
    // 0x90-0x9F
    'É','æ','Æ','ô','ö','ò','û','ù', 'ÿ','Ö','Ü','¢','£','¥','₧','ƒ',
    // 0xA0-0xAF
    'á','í','ó','ú','ñ','Ñ','ª','º', '¿','⌐','¬','½','¼','¡','«','»',
    // 0xB0-0xBF
    '░','▒','▓','│','┤','╡','╢','╖', '╕','╣','║','╗','╝','╜','╛','┐',
    // 0xC0-0xCF
    '└','┴','┬','├','─','┼','╞','╟', '╚','╔','╩','╦','╠','═','╬','╧',
    // 0xD0-0xDF
    '╨','╤','╥','╙','╘','╒','╓','╫', '╪','┘','┌','█','▄','▌','▐','▀',
    // 0xE0-0xEF
    'α','ß','Γ','π','Σ','σ','µ','τ', 'Φ','Θ','Ω','δ','∞','φ','ε','∩',
    // 0xF0-0xFF
    '≡','±','≥','≤','⌠','⌡','÷','≈', '°','∙','·','√','ⁿ','²','■','\u{00A0}',
];
