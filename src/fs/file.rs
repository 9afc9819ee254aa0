//! File content streaming.

use std::io::{self, Read, Seek, Write};

use log::{debug, warn};

use super::fat::FatVolume;
use super::table::{END_OF_CHAIN, FREE_CLUSTER};
use crate::error::Result;

impl<R: Read + Seek> FatVolume<R> {
    /// Stream the content of the chain starting at `cluster` into `sink`.
    ///
    /// Whole clusters are written until `size` bytes are covered or the
    /// chain ends, so the output may carry slack past the logical size.
    /// With `erased` set the file is recovered by assuming its clusters
    /// are the free clusters following the start cluster. Returns the
    /// number of bytes written.
    pub fn read_file(
        &mut self,
        cluster: u32,
        size: u64,
        sink: &mut dyn Write,
        erased: bool,
    ) -> Result<u64> {
        let bytes_per_cluster = self.desc.bytes_per_cluster;
        let mut buf = vec![0u8; bytes_per_cluster as usize];
        let mut contiguous = erased;
        let mut remaining = size;
        let mut written = 0u64;
        let mut cluster = cluster;

        while remaining > 0 {
            self.check_cancelled()?;
            if cluster < 2 || !self.is_valid_cluster(cluster) {
                warn!("File chain reached invalid cluster {cluster}, stopping");
                break;
            }

            self.read_cluster(cluster, &mut buf)?;
            sink.write_all(&buf)?;
            written += bytes_per_cluster;
            remaining = remaining.saturating_sub(bytes_per_cluster);
            if remaining == 0 {
                break;
            }

            let current = cluster;
            cluster = if erased {
                match self.next_free_after(current)? {
                    Some(next) => next,
                    None => break,
                }
            } else if contiguous {
                match self.next_cluster(current)? {
                    FREE_CLUSTER => current + 1,
                    next => {
                        debug!("Cluster {current} is allocated, leaving contiguous mode");
                        contiguous = false;
                        next
                    }
                }
            } else {
                match self.next_cluster(current)? {
                    FREE_CLUSTER => {
                        warn!(
                            "Cluster {current} has a free successor (damaged FAT?), \
                             trying contiguous mode"
                        );
                        contiguous = true;
                        current + 1
                    }
                    next => next,
                }
            };

            if cluster == END_OF_CHAIN {
                debug!("End of chain after cluster {current}");
                break;
            }
        }

        Ok(written)
    }

    /// First free cluster after `cluster`, for erased-file recovery.
    fn next_free_after(&mut self, cluster: u32) -> Result<Option<u32>> {
        let mut candidate = cluster + 1;
        while self.is_valid_cluster(candidate) {
            if self.is_free(candidate)? {
                return Ok(Some(candidate));
            }
            candidate += 1;
        }
        Ok(None)
    }
}

/// Writer that forwards at most `limit` bytes and silently drops the
/// rest. Used to trim cluster slack off file content.
pub struct LimitedWriter<W> {
    inner: W,
    remaining: u64,
}

impl<W: Write> LimitedWriter<W> {
    pub fn new(inner: W, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let keep = (buf.len() as u64).min(self.remaining) as usize;
        if keep > 0 {
            self.inner.write_all(&buf[..keep])?;
            self.remaining -= keep as u64;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::bytes::{write_u16, write_u32};
    use crate::fs::fat::OpenOptions;
    use std::io::Cursor;

    const DATA: usize = 512 * 3;

    fn image() -> Vec<u8> {
        let mut img = vec![0u8; DATA + 512 * 126];
        img[0] = 0xEB;
        write_u16(&mut img, 0x0B, 512);
        img[0x0D] = 1;
        write_u16(&mut img, 0x0E, 1);
        img[0x10] = 2;
        write_u32(&mut img, 0x20, 131);
        write_u32(&mut img, 0x24, 1);
        write_u32(&mut img, 0x2C, 2);
        write_u32(&mut img, 512, 0x0FFF_FFF8);
        write_u32(&mut img, 516, 0x0FFF_FFFF);
        write_u32(&mut img, 520, 0x0FFF_FFFF);
        img
    }

    fn fill_cluster(img: &mut [u8], cluster: u32, byte: u8) {
        let off = DATA + (cluster as usize - 2) * 512;
        img[off..off + 512].fill(byte);
    }

    fn set_fat(img: &mut [u8], cluster: u32, value: u32) {
        write_u32(img, 512 + cluster as usize * 4, value);
    }

    fn read(img: Vec<u8>, cluster: u32, size: u64, erased: bool) -> Vec<u8> {
        let mut vol = FatVolume::open(Cursor::new(img), OpenOptions::default()).unwrap();
        let mut out = Vec::new();
        let n = vol.read_file(cluster, size, &mut out, erased).unwrap();
        assert_eq!(n as usize, out.len());
        out
    }

    #[test]
    fn test_follows_chain_with_slack() {
        let mut img = image();
        set_fat(&mut img, 10, 20);
        set_fat(&mut img, 20, 0x0FFF_FFFF);
        fill_cluster(&mut img, 10, b'a');
        fill_cluster(&mut img, 20, b'b');
        let out = read(img, 10, 600, false);
        assert_eq!(out.len(), 1024);
        assert!(out[..512].iter().all(|&b| b == b'a'));
        assert!(out[512..].iter().all(|&b| b == b'b'));
    }

    #[test]
    fn test_zero_size_reads_nothing() {
        assert!(read(image(), 10, 0, false).is_empty());
    }

    #[test]
    fn test_free_link_switches_to_contiguous() {
        let mut img = image();
        // 10 -> free: content assumed to go on in 11
        fill_cluster(&mut img, 10, b'a');
        fill_cluster(&mut img, 11, b'b');
        set_fat(&mut img, 12, 0x0FFF_FFFF);
        let out = read(img, 10, 1024, false);
        assert_eq!(out.len(), 1024);
        assert_eq!(out[600], b'b');
    }

    #[test]
    fn test_contiguous_run_resumes_chain() {
        let mut img = image();
        // 10 -> free, 11 -> 20 -> end: the file is 10, 11, 20
        set_fat(&mut img, 11, 20);
        set_fat(&mut img, 20, 0x0FFF_FFFF);
        fill_cluster(&mut img, 10, b'a');
        fill_cluster(&mut img, 11, b'b');
        fill_cluster(&mut img, 12, b'X');
        fill_cluster(&mut img, 20, b'c');
        let out = read(img, 10, 1536, false);
        assert_eq!(out.len(), 1536);
        assert!(out[512..1024].iter().all(|&b| b == b'b'));
        assert!(out[1024..].iter().all(|&b| b == b'c'));
    }

    #[test]
    fn test_erased_file_skips_allocated_clusters() {
        let mut img = image();
        fill_cluster(&mut img, 30, b'x');
        set_fat(&mut img, 31, 0x0FFF_FFFF);
        fill_cluster(&mut img, 31, b'!');
        fill_cluster(&mut img, 32, b'y');
        let out = read(img, 30, 1024, true);
        assert!(out[..512].iter().all(|&b| b == b'x'));
        assert!(out[512..].iter().all(|&b| b == b'y'));
    }

    #[test]
    fn test_limited_writer_trims() {
        let mut w = LimitedWriter::new(Vec::new(), 5);
        w.write_all(b"Hello").unwrap();
        w.write_all(b" world").unwrap();
        assert_eq!(w.into_inner(), b"Hello");
    }
}
