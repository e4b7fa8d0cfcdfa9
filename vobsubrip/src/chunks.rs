//! The chunk index cache.
//!
//! Scanning a VOB set to discover which byte ranges belong to which
//! `(vob, cell)` pair is expensive, so we persist the discovered ranges
//! next to the source as a `*.chunks` file.  The cache is pure
//! memoization: it is only reused when a freshly computed checksum and
//! the source length both match what was stored, and any mismatch or
//! parse failure silently falls back to a full rescan.

use std::fs;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::vob::{VobSource, SECTOR_SIZE};
use crate::Result;

/// Bump this when the file layout changes.
const CHUNK_FILE_VERSION: u32 = 1;

/// A half-open byte interval of the VOB set belonging to one cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRange {
    /// First byte of the range.
    pub start: i64,
    /// One past the last byte of the range.
    pub end: i64,
    /// The owning `(vob << 16 | cell)` tag.
    pub vc: u32,
}

impl ChunkRange {
    /// The length of this range in bytes.
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    /// Is this range empty?
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Compute the 32-bit sum-of-words checksum of a byte source, reading it
/// to the end.  A trailing odd byte is summed as a low byte.
pub fn sum_of_words<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 0x10000];
    let mut checksum = 0u32;
    let mut carry: Option<u8> = None;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let mut bytes = &buf[..n];
        if let Some(low) = carry.take() {
            checksum = checksum.wrapping_add(u16::from_le_bytes([low, bytes[0]]).into());
            bytes = &bytes[1..];
        }
        let mut words = bytes.chunks_exact(2);
        for word in &mut words {
            checksum = checksum
                .wrapping_add(u16::from_le_bytes([word[0], word[1]]).into());
        }
        carry = words.remainder().first().copied();
    }
    if let Some(low) = carry {
        checksum = checksum.wrapping_add(u32::from(low));
    }
    Ok(checksum)
}

/// Compute the checksum of a whole VOB source, sector by sector.  The
/// sum is taken over the raw (still scrambled, if applicable) bytes, so
/// it can be computed without any CSS keys.
pub fn source_checksum(source: &mut dyn VobSource) -> Result<u32> {
    source.seek_sector(0)?;
    let mut checksum = 0u32;
    let mut sector = [0u8; SECTOR_SIZE];
    for _ in 0..source.len() / SECTOR_SIZE as i64 {
        source.read_sector(&mut sector)?;
        checksum = checksum.wrapping_add(sum_of_words(&mut &sector[..])?);
    }
    Ok(checksum)
}

/// Try to load a chunk index for a source with the given freshly
/// computed checksum and length.  Returns `None` (never an error) when
/// the cache is missing, stale or unreadable.
pub fn load_chunks(path: &Path, checksum: u32, source_len: i64) -> Option<Vec<ChunkRange>> {
    match read_chunk_file(path, checksum, source_len) {
        Ok(ranges) => Some(ranges),
        Err(err) => {
            debug!("ignoring chunk cache {}: {}", path.display(), err);
            None
        }
    }
}

fn read_chunk_file(path: &Path, checksum: u32, source_len: i64) -> Result<Vec<ChunkRange>> {
    let mut f = BufReader::new(fs::File::open(path)?);
    let version = f.read_u32::<LittleEndian>()?;
    anyhow::ensure!(version == CHUNK_FILE_VERSION, "version {}", version);
    let stored_checksum = f.read_u32::<LittleEndian>()?;
    anyhow::ensure!(
        stored_checksum == checksum,
        "checksum 0x{:08x} != 0x{:08x}",
        stored_checksum,
        checksum
    );
    let stored_len = f.read_i64::<LittleEndian>()?;
    anyhow::ensure!(
        stored_len == source_len,
        "length {} != {}",
        stored_len,
        source_len
    );
    let count = f.read_u32::<LittleEndian>()?;
    let mut ranges = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = f.read_i64::<LittleEndian>()?;
        let end = f.read_i64::<LittleEndian>()?;
        let vc = f.read_u32::<LittleEndian>()?;
        ranges.push(ChunkRange { start, end, vc });
    }
    Ok(ranges)
}

/// Persist a chunk index for a source with the given checksum and
/// length.
pub fn save_chunks(
    path: &Path,
    checksum: u32,
    source_len: i64,
    ranges: &[ChunkRange],
) -> Result<()> {
    let mut f = BufWriter::new(fs::File::create(path)?);
    f.write_u32::<LittleEndian>(CHUNK_FILE_VERSION)?;
    f.write_u32::<LittleEndian>(checksum)?;
    f.write_i64::<LittleEndian>(source_len)?;
    f.write_u32::<LittleEndian>(cast::u32(ranges.len())?)?;
    for range in ranges {
        f.write_i64::<LittleEndian>(range.start)?;
        f.write_i64::<LittleEndian>(range.end)?;
        f.write_u32::<LittleEndian>(range.vc)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ranges() -> Vec<ChunkRange> {
        vec![
            ChunkRange { start: 0, end: 0x5000, vc: 1 << 16 | 1 },
            ChunkRange { start: 0x5000, end: 0xa000, vc: 1 << 16 | 2 },
        ]
    }

    #[test]
    fn checksum_sums_little_endian_words() {
        let mut data = &[0x01, 0x02, 0x03, 0x04][..];
        assert_eq!(sum_of_words(&mut data).unwrap(), 0x0201 + 0x0403);
        let mut odd = &[0x01, 0x02, 0xff][..];
        assert_eq!(sum_of_words(&mut odd).unwrap(), 0x0201 + 0xff);
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.chunks");
        let ranges = sample_ranges();
        save_chunks(&path, 0xdead_beef, 0xa000, &ranges).unwrap();
        let loaded = load_chunks(&path, 0xdead_beef, 0xa000).unwrap();
        assert_eq!(loaded, ranges);
    }

    #[test]
    fn reject_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.chunks");
        save_chunks(&path, 0xdead_beef, 0xa000, &sample_ranges()).unwrap();
        // Wrong checksum.
        assert_eq!(load_chunks(&path, 0xdead_bee0, 0xa000), None);
        // Wrong length.
        assert_eq!(load_chunks(&path, 0xdead_beef, 0xa001), None);
        // Truncated file.
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 4]).unwrap();
        assert_eq!(load_chunks(&path, 0xdead_beef, 0xa000), None);
    }

    #[test]
    fn missing_cache_is_not_an_error() {
        assert_eq!(load_chunks(Path::new("/nonexistent.chunks"), 0, 0), None);
    }
}
