//! Little-endian field access and packed FAT date/time decoding.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime};

/// Read a little-endian `u16` at `offset`.
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&buf[offset..offset + 2])
}

/// Read a little-endian `u32` at `offset`.
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&buf[offset..offset + 4])
}

pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    LittleEndian::write_u16(&mut buf[offset..offset + 2], value);
}

pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[offset..offset + 4], value);
}

/// Decode a packed FAT date/time pair.
///
/// Returns `None` for a zero date or for fields that do not form a real
/// calendar date (common in erased or damaged entries).
pub fn fat_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    if date == 0 {
        return None;
    }
    let day = (date & 0x1F) as u32;
    let month = ((date >> 5) & 0x0F) as u32;
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let second = ((time & 0x1F) * 2) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second.min(59))
}

/// Pack a timestamp into FAT (date, time) words.
pub fn pack_fat_datetime(ts: &NaiveDateTime) -> (u16, u16) {
    use chrono::{Datelike, Timelike};
    let date = ((ts.year() - 1980).clamp(0, 127) as u16) << 9
        | (ts.month() as u16) << 5
        | ts.day() as u16;
    let time = (ts.hour() as u16) << 11 | (ts.minute() as u16) << 5 | (ts.second() as u16 / 2);
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_fields() {
        let mut buf = [0u8; 8];
        write_u16(&mut buf, 1, 0xBEEF);
        write_u32(&mut buf, 4, 0x0FFF_FFF8);
        assert_eq!(buf[1], 0xEF);
        assert_eq!(buf[2], 0xBE);
        assert_eq!(read_u16(&buf, 1), 0xBEEF);
        assert_eq!(read_u32(&buf, 4), 0x0FFF_FFF8);
    }

    #[test]
    fn test_fat_datetime() {
        // 2026-01-29 14:30:00
        let date = 29 | (1 << 5) | (46 << 9);
        let time = (30 << 5) | (14 << 11);
        let ts = fat_datetime(date, time).unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-01-29 14:30:00");
        assert_eq!(pack_fat_datetime(&ts), (date, time));
    }

    #[test]
    fn test_fat_datetime_invalid() {
        assert_eq!(fat_datetime(0, 0), None);
        // month 0 does not exist
        assert_eq!(fat_datetime(1 | (46 << 9), 0), None);
    }
}
