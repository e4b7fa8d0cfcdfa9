//! Access to the VOB sector stream.
//!
//! The demux engine does not care where its sectors come from: a set of
//! ordinary `VTS_xx_n.VOB` files, a raw DVD device, or a test fixture.
//! `VobSource` is that seam.  The only implementation we ship reads
//! plain files; device access with CSS key negotiation belongs to an
//! external collaborator.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use log::debug;

use crate::Result;

/// DVD sectors are always this big.
pub const SECTOR_SIZE: usize = 2048;

/// One raw sector.
pub type Sector = [u8; SECTOR_SIZE];

/// A seekable, sector-granular byte source holding VOB data.
pub trait VobSource: Send {
    /// Does this source read from a DVD, with cell addresses that match
    /// the IFO tables?
    fn is_dvd(&self) -> bool {
        false
    }

    /// Has the CSS disc key already been negotiated?
    fn has_disc_key(&self) -> bool {
        false
    }

    /// Has a CSS title key already been negotiated?
    fn has_title_key(&self) -> bool {
        false
    }

    /// Total length of the source, in bytes.
    fn len(&self) -> i64;

    /// Is the source empty?
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seek to the given sector index.
    fn seek_sector(&mut self, sector: u64) -> Result<()>;

    /// Read the next sector.  A short read is an error.
    fn read_sector(&mut self, buf: &mut Sector) -> Result<()>;
}

struct VobPart {
    file: fs::File,
    path: PathBuf,
    /// Byte offset of this part within the concatenated stream.
    start: i64,
    len: i64,
}

/// A sequence of ordinary VOB files exposed as one sector stream.
pub struct VobFileSet {
    parts: Vec<VobPart>,
    total_len: i64,
    /// Current byte position in the concatenated stream.
    position: i64,
}

impl VobFileSet {
    /// Open the VOB files belonging to a `VTS_xx_0.IFO`, or a single
    /// `*.vob` passed directly.
    pub fn open(input: &Path) -> Result<VobFileSet> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("ifo") => VobFileSet::from_paths(&vob_paths_for_ifo(input)?),
            Some("vob") => VobFileSet::from_paths(std::slice::from_ref(&input.to_owned())),
            _ => Err(anyhow!(
                "{}: expected an *.ifo or *.vob file",
                input.display()
            )),
        }
    }

    /// Open an explicit list of VOB files as one stream.
    pub fn from_paths(paths: &[PathBuf]) -> Result<VobFileSet> {
        if paths.is_empty() {
            return Err(anyhow!("no VOB files to open"));
        }
        let mut parts = Vec::with_capacity(paths.len());
        let mut total_len = 0i64;
        for path in paths {
            let file = fs::File::open(path)
                .with_context(|| format!("could not open {}", path.display()))?;
            let len = cast::i64(file.metadata()?.len())?;
            debug!("VOB part {} ({} bytes)", path.display(), len);
            parts.push(VobPart {
                file,
                path: path.clone(),
                start: total_len,
                len,
            });
            total_len += len;
        }
        Ok(VobFileSet {
            parts,
            total_len,
            position: 0,
        })
    }
}

/// Derive the `VTS_xx_1.VOB`..`VTS_xx_9.VOB` siblings of an IFO path.
/// `VTS_xx_0.VOB` holds the title-set menu and carries no subtitles for
/// the feature, so it is skipped.
fn vob_paths_for_ifo(ifo: &Path) -> Result<Vec<PathBuf>> {
    let stem = ifo
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("{}: bad file name", ifo.display()))?;
    let base = stem
        .strip_suffix("_0")
        .ok_or_else(|| anyhow!("{}: expected a VTS_xx_0.IFO name", ifo.display()))?;
    let dir = ifo.parent().unwrap_or_else(|| Path::new("."));

    let mut paths = vec![];
    for i in 1..=9 {
        let mut candidate = dir.join(format!("{}_{}.VOB", base, i));
        if !candidate.exists() {
            candidate = dir.join(format!("{}_{}.vob", base.to_ascii_lowercase(), i));
        }
        if !candidate.exists() {
            break;
        }
        paths.push(candidate);
    }
    if paths.is_empty() {
        return Err(anyhow!("no VOB files found next to {}", ifo.display()));
    }
    Ok(paths)
}

impl VobSource for VobFileSet {
    fn len(&self) -> i64 {
        self.total_len
    }

    fn seek_sector(&mut self, sector: u64) -> Result<()> {
        let position = cast::i64(sector * SECTOR_SIZE as u64)?;
        if position > self.total_len {
            return Err(anyhow!("seek to sector {} is past the end", sector));
        }
        self.position = position;
        Ok(())
    }

    fn read_sector(&mut self, buf: &mut Sector) -> Result<()> {
        let mut filled = 0usize;
        while filled < SECTOR_SIZE {
            let part = self
                .parts
                .iter_mut()
                .find(|p| p.start <= self.position && self.position < p.start + p.len)
                .ok_or_else(|| anyhow!("read past the end of the VOB set"))?;
            let in_part = cast::u64(self.position - part.start).unwrap_or(0);
            part.file.seek(SeekFrom::Start(in_part))?;
            let available = cast::usize(part.len - self.position + part.start)
                .unwrap_or(0)
                .min(SECTOR_SIZE - filled);
            part.file
                .read_exact(&mut buf[filled..filled + available])
                .with_context(|| format!("short read in {}", part.path.display()))?;
            filled += available;
            self.position += available as i64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn concatenates_parts() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.vob");
        let b = dir.path().join("b.vob");
        fs::File::create(&a)
            .unwrap()
            .write_all(&[0xaa; SECTOR_SIZE])
            .unwrap();
        fs::File::create(&b)
            .unwrap()
            .write_all(&[0xbb; SECTOR_SIZE])
            .unwrap();

        let mut set = VobFileSet::from_paths(&[a, b]).unwrap();
        assert_eq!(set.len(), 2 * SECTOR_SIZE as i64);
        assert!(!set.is_dvd());

        let mut sector = [0u8; SECTOR_SIZE];
        set.seek_sector(1).unwrap();
        set.read_sector(&mut sector).unwrap();
        assert_eq!(sector[0], 0xbb);
        set.seek_sector(0).unwrap();
        set.read_sector(&mut sector).unwrap();
        assert_eq!(sector[0], 0xaa);
        set.read_sector(&mut sector).unwrap();
        assert_eq!(sector[0], 0xbb);
        assert!(set.read_sector(&mut sector).is_err());
    }
}
