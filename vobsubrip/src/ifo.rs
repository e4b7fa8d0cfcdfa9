//! Parse the program-chain tables of a VTS IFO file.
//!
//! An IFO file is a table of big-endian values at fixed offsets.  We
//! only decode the parts a subtitle ripper needs: the title's video
//! attributes, the subpicture language-id table, and the program chains
//! (PGCs) with their palettes, angle blocks and cell address tables.
//!
//! Useful references:
//!
//! - [DVD-Video info](http://dvd.sourceforge.net/dvdinfo/ifo.html)
//! - `libdvdread`'s `ifo_read.c`, which decodes the same tables.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::Context;
use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, trace, warn};

use crate::errors::RipError;
use crate::Result;

/// The signature every video title set IFO starts with.
const IFO_SIGNATURE: &[u8; 12] = b"DVDVIDEO-VTS";

/// Offset of the title's video attributes word.
const VIDEO_ATTRS: u64 = 0x200;

/// Offset of the subpicture stream count, followed by 6-byte attribute
/// entries carrying the language ids.
const SUBP_ATTRS: u64 = 0x254;

/// Offset of the PGCIT sector pointer.
const PGCIT_SECTOR_PTR: u64 = 0xc0 + 0x0c;

/// A program chain can hold at most this many angles (angle 0 is the
/// full physical cell list; 1-9 are the derived per-angle subsets).
pub const MAX_ANGLES: usize = 10;

/// Television systems a DVD title can be authored for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoSystem {
    /// 29.97 fps, 480/240 lines.
    Ntsc,
    /// 25 fps, 576/288 lines.
    Pal,
}

/// Video attributes of the title, decoded from the word at `0x200`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoTitleInfo {
    /// NTSC or PAL.
    pub system: VideoSystem,
    /// Source frame size in pixels.
    pub size: (u16, u16),
    /// Display frame rate.
    pub fps: f64,
}

/// Frame sizes by picture-size code and television system.
static RESOLUTIONS: [[(u16, u16); 2]; 4] = [
    [(720, 480), (720, 576)],
    [(704, 480), (704, 576)],
    [(352, 480), (352, 576)],
    [(352, 240), (352, 288)],
];

/// An RGB palette entry, converted from the YCbCr values in the IFO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// The 16-color subtitle palette of a program chain.
pub type Palette = [Rgb; 16];

/// A contiguous playback unit within a VOB.
#[derive(Clone, Debug, Default)]
pub struct Cell {
    /// Owning VOB id.
    pub vob: u16,
    /// Cell id within the VOB.
    pub cell: u16,
    /// Playback duration, in milliseconds.
    pub t_time: i64,
    /// Running total of playback time before this cell, in milliseconds.
    pub t_total: i64,
    /// Time offset to add to in-cell presentation timestamps; resets to
    /// `t_total` at cells flagged as discontinuities.
    pub t_offset: i64,
    /// Does the System Time Clock restart at this cell?
    pub discontinuity: bool,
    /// First VOBU start sector.
    pub first_sector: u32,
    /// Last VOBU end sector (inclusive).
    pub last_sector: u32,
    /// Angle this cell belongs to; 0 means "all angles".
    pub angle: usize,
}

impl Cell {
    /// The `(vob << 16 | cell)` tag used to key chunk ranges and cell
    /// selections.
    pub fn vc(&self) -> u32 {
        u32::from(self.vob) << 16 | u32::from(self.cell)
    }
}

/// A program chain: an ordered, possibly multi-angle playback sequence
/// of cells, with the subtitle palette and language table that apply to
/// it.
#[derive(Clone, Debug)]
pub struct Pgc {
    /// Total playback time of the chain, in milliseconds.
    pub duration: i64,
    /// Subtitle palette, already converted to RGB.
    pub palette: Palette,
    /// Language id per subpicture stream (0 when the stream is absent).
    pub lang_ids: [u16; 32],
    /// Cell lists per angle.  `angles[0]` is the full physical list;
    /// entries 1-9 are derived subsets and are empty beyond `n_angles`.
    pub angles: Vec<Vec<Cell>>,
    /// Number of real angles (0 for a title without angle blocks).
    pub n_angles: usize,
}

impl Pgc {
    /// The cell list for the given angle, falling back to the physical
    /// list for angle 0.
    pub fn cells(&self, angle: usize) -> &[Cell] {
        &self.angles[angle]
    }
}

/// The parsed program-chain information of one video title set.
#[derive(Debug)]
pub struct Ifo {
    /// Video attributes of the title.
    pub video: VideoTitleInfo,
    /// All program chains, in IFO order.
    pub pgcs: Vec<Pgc>,
}

impl Ifo {
    /// Open and parse a `VTS_xx_0.IFO` file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Ifo> {
        let path = path.as_ref();
        let mut f = fs::File::open(path)
            .with_context(|| format!("could not open {}", path.display()))?;
        Ifo::read_from(&mut f, path)
            .with_context(|| format!("could not parse {}", path.display()))
    }

    /// Parse IFO data from a seekable reader.  `path` is only used for
    /// error reporting.
    pub(crate) fn read_from<R: Read + Seek>(f: &mut R, path: &Path) -> Result<Ifo> {
        let mut signature = [0u8; 12];
        f.seek(SeekFrom::Start(0))?;
        f.read_exact(&mut signature)?;
        if &signature != IFO_SIGNATURE {
            return Err(RipError::BadIfoSignature {
                path: path.to_owned(),
            }
            .into());
        }

        let video = read_video_attrs(f)?;
        debug!("video attributes: {:?}", video);
        let lang_ids = read_lang_ids(f)?;

        // Locate the program chain information table.
        f.seek(SeekFrom::Start(PGCIT_SECTOR_PTR))?;
        let pgcit = u64::from(f.read_u32::<BigEndian>()?) * 0x800;
        f.seek(SeekFrom::Start(pgcit))?;
        let n_pgcs = f.read_u16::<BigEndian>()?;
        trace!("{} program chains at 0x{:x}", n_pgcs, pgcit);

        let mut pgcs = Vec::with_capacity(usize::from(n_pgcs));
        for i in 0..u64::from(n_pgcs) {
            f.seek(SeekFrom::Start(pgcit + 8 + i * 8 + 4))?;
            let offset = u64::from(f.read_u32::<BigEndian>()?);
            let pgc = read_pgc(f, pgcit + offset, &video, &lang_ids)?;
            let cell_sum: i64 = pgc.angles[0].iter().map(|c| c.t_time).sum();
            if cell_sum != pgc.duration {
                warn!(
                    "PGC {}: cell times sum to {}ms but the chain claims {}ms",
                    i + 1,
                    cell_sum,
                    pgc.duration
                );
            }
            pgcs.push(pgc);
        }

        Ok(Ifo { video, pgcs })
    }
}

/// Decode the video attributes word.
fn read_video_attrs<R: Read + Seek>(f: &mut R) -> Result<VideoTitleInfo> {
    f.seek(SeekFrom::Start(VIDEO_ATTRS))?;
    let attrs = f.read_u16::<BigEndian>()?;
    let system = match (attrs >> 12) & 3 {
        0 => VideoSystem::Ntsc,
        1 => VideoSystem::Pal,
        other => {
            return Err(RipError::Parse(format!(
                "unknown television system {}",
                other
            ))
            .into())
        }
    };
    let picture_size = usize::from((attrs >> 2) & 3);
    let size = RESOLUTIONS[picture_size][match system {
        VideoSystem::Ntsc => 0,
        VideoSystem::Pal => 1,
    }];
    let fps = match system {
        VideoSystem::Ntsc => 30.0 / 1.001,
        VideoSystem::Pal => 25.0,
    };
    Ok(VideoTitleInfo { system, size, fps })
}

/// Read the title-level subpicture language-id table.
fn read_lang_ids<R: Read + Seek>(f: &mut R) -> Result<[u16; 32]> {
    f.seek(SeekFrom::Start(SUBP_ATTRS))?;
    let count = f.read_u16::<BigEndian>()?.min(32);
    let mut ids = [0u16; 32];
    for id in ids.iter_mut().take(usize::from(count)) {
        // 6-byte attribute entry; the middle word is the language code.
        f.read_u16::<BigEndian>()?;
        *id = f.read_u16::<BigEndian>()?;
        f.read_u16::<BigEndian>()?;
    }
    Ok(ids)
}

/// Decode one program chain at `base`.
fn read_pgc<R: Read + Seek>(
    f: &mut R,
    base: u64,
    video: &VideoTitleInfo,
    title_lang_ids: &[u16; 32],
) -> Result<Pgc> {
    f.seek(SeekFrom::Start(base + 2))?;
    let _n_progs = f.read_u8()?;
    let n_cells = f.read_u8()?;

    let mut raw_time = [0u8; 4];
    f.read_exact(&mut raw_time)?;
    let duration = bcd_time_ms(&raw_time, video);

    // Subpicture stream control: the availability bit gates the
    // title-level language table, giving this chain's own view of it.
    f.seek(SeekFrom::Start(base + 0x1c))?;
    let mut lang_ids = [0u16; 32];
    let mut any_stream = false;
    for (j, id) in lang_ids.iter_mut().enumerate() {
        let control = f.read_u32::<BigEndian>()?;
        if control & 0x8000_0000 != 0 {
            *id = title_lang_ids[j];
            any_stream = true;
        }
    }
    if !any_stream {
        debug!("PGC marks no subpicture streams, using the title's table");
        lang_ids = *title_lang_ids;
    }

    // Palette, stored as (0, Y, Cr, Cb) per entry.
    f.seek(SeekFrom::Start(base + 0xa4))?;
    let mut palette = [Rgb::default(); 16];
    for entry in palette.iter_mut() {
        f.read_u8()?;
        let y = f.read_u8()?;
        let cr = f.read_u8()?;
        let cb = f.read_u8()?;
        *entry = ycbcr_to_rgb(y, cb, cr);
    }

    // Cell table offsets, relative to the start of the PGC.
    f.seek(SeekFrom::Start(base + 0xe6))?;
    let _prog_off = u64::from(f.read_u16::<BigEndian>()?);
    let cell_off = u64::from(f.read_u16::<BigEndian>()?);
    let pos_off = u64::from(f.read_u16::<BigEndian>()?);
    if cell_off == 0 || pos_off == 0 {
        return Err(RipError::Parse("PGC has no cell tables".to_string()).into());
    }

    // Cell playback information: 0x18 bytes per cell.
    let mut cells: Vec<Cell> = Vec::with_capacity(usize::from(n_cells));
    let mut angle = 0usize;
    let mut n_angles = 0usize;
    for j in 0..u64::from(n_cells) {
        f.seek(SeekFrom::Start(base + cell_off + j * 0x18))?;
        let category = f.read_u8()?;
        // The top two bits classify angle-block boundaries.
        match category >> 6 {
            0 => angle = 0,
            1 => angle = 1,
            _ => angle += 1,
        }
        if angle >= MAX_ANGLES {
            warn!("angle block overflows {} angles, clamping", MAX_ANGLES - 1);
            angle = MAX_ANGLES - 1;
        }
        n_angles = n_angles.max(angle);

        let discontinuity = category & 0x02 != 0;
        let mut skip = [0u8; 3];
        f.read_exact(&mut skip)?;
        f.read_exact(&mut raw_time)?;
        let t_time = bcd_time_ms(&raw_time, video);
        let first_sector = f.read_u32::<BigEndian>()?;
        f.seek(SeekFrom::Current(8))?;
        let last_sector = f.read_u32::<BigEndian>()?;

        cells.push(Cell {
            t_time,
            discontinuity,
            first_sector,
            last_sector,
            angle,
            ..Cell::default()
        });
    }

    // Cell position information: vob and cell ids, 4 bytes per cell.
    for (j, cell) in cells.iter_mut().enumerate() {
        f.seek(SeekFrom::Start(base + pos_off + j as u64 * 4))?;
        cell.vob = f.read_u16::<BigEndian>()?;
        f.read_u8()?;
        cell.cell = u16::from(f.read_u8()?);
    }

    // Replicate the physical cell list into per-angle subsets: untagged
    // cells play in every angle, tagged cells only in their own run.
    let mut angles: Vec<Vec<Cell>> = Vec::with_capacity(MAX_ANGLES);
    angles.push(cells);
    for a in 1..MAX_ANGLES {
        let subset: Vec<Cell> = angles[0]
            .iter()
            .filter(|c| a <= n_angles && (c.angle == 0 || c.angle == a))
            .cloned()
            .collect();
        angles.push(subset);
    }
    for angle_cells in angles.iter_mut() {
        recompute_times(angle_cells);
    }

    Ok(Pgc {
        duration,
        palette,
        lang_ids,
        angles,
        n_angles,
    })
}

/// Recompute the running `t_total`/`t_offset` bookkeeping for one
/// angle's cell sequence.
fn recompute_times(cells: &mut [Cell]) {
    let mut t_total = 0i64;
    let mut t_offset = 0i64;
    for cell in cells {
        if cell.discontinuity {
            t_offset = t_total;
        }
        cell.t_total = t_total;
        cell.t_offset = t_offset;
        t_total += cell.t_time;
        t_offset += cell.t_time;
    }
}

fn bcd(b: u8) -> i64 {
    i64::from(b >> 4) * 10 + i64::from(b & 0x0f)
}

/// Decode a BCD `hh:mm:ss:ff` timestamp into milliseconds.  The frame
/// count is decoded with the title's nominal frame rate; 30 fps content
/// is then rescaled by 30/29.97 to get wall-clock time.
fn bcd_time_ms(raw: &[u8; 4], video: &VideoTitleInfo) -> i64 {
    let fps = match video.system {
        VideoSystem::Ntsc => 30.0,
        VideoSystem::Pal => 25.0,
    };
    let mut ms = (bcd(raw[0]) * 3600 + bcd(raw[1]) * 60 + bcd(raw[2])) as f64
        * 1000.0
        + bcd(raw[3] & 0x3f) as f64 * 1000.0 / fps;
    if video.system == VideoSystem::Ntsc {
        ms *= 30.0 / 29.97;
    }
    ms.round() as i64
}

/// Convert a palette entry from studio-range YCbCr to RGB (BT.601).
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> Rgb {
    let y = (f64::from(y) - 16.0) * 255.0 / 219.0;
    let cb = f64::from(cb) - 128.0;
    let cr = f64::from(cr) - 128.0;
    let clamp = |v: f64| v.max(0.0).min(255.0) as u8;
    Rgb {
        r: clamp(y + 1.4022 * cr),
        g: clamp(y - 0.3456 * cb - 0.7145 * cr),
        b: clamp(y + 1.7710 * cb),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    /// Build a minimal single-PGC IFO image in memory.
    pub fn synthetic_ifo(system: VideoSystem) -> Vec<u8> {
        let mut buf = vec![0u8; 0xa00];
        buf[..12].copy_from_slice(IFO_SIGNATURE);

        // Video attributes: picture-size code 0.
        let attrs: u16 = match system {
            VideoSystem::Ntsc => 0x0000,
            VideoSystem::Pal => 0x1000,
        };
        buf[0x200..0x202].copy_from_slice(&attrs.to_be_bytes());

        // One subpicture stream, English.
        buf[0x254..0x256].copy_from_slice(&1u16.to_be_bytes());
        buf[0x258] = b'e';
        buf[0x259] = b'n';

        // PGCIT at sector 1.
        buf[0xcc..0xd0].copy_from_slice(&1u32.to_be_bytes());
        buf[0x800..0x802].copy_from_slice(&1u16.to_be_bytes());
        // Entry 0: offset 0x10 from the PGCIT.
        buf[0x80c..0x810].copy_from_slice(&0x10u32.to_be_bytes());

        let base = 0x810;
        let (rate_bits, total_ss, c1_ss, c2_ss) = match system {
            // 2s + 3s at the 30 fps rate class.
            VideoSystem::Ntsc => (0xc0u8, 0x05u8, 0x02u8, 0x03u8),
            VideoSystem::Pal => (0x40, 0x05, 0x02, 0x03),
        };
        buf[base + 2] = 1; // programs
        buf[base + 3] = 2; // cells
        buf[base + 6] = total_ss;
        buf[base + 7] = rate_bits;

        // Stream 0 is available.
        buf[base + 0x1c] = 0x80;

        // Palette entry 0: white.
        buf[base + 0xa4 + 1] = 235;
        buf[base + 0xa4 + 2] = 128;
        buf[base + 0xa4 + 3] = 128;

        let cell_off = 0x100u16;
        let pos_off = 0x130u16;
        buf[base + 0xe6..base + 0xe8].copy_from_slice(&0xfeu16.to_be_bytes());
        buf[base + 0xe8..base + 0xea].copy_from_slice(&cell_off.to_be_bytes());
        buf[base + 0xea..base + 0xec].copy_from_slice(&pos_off.to_be_bytes());

        // Two cells: 2s over sectors 0-9, 3s over sectors 10-19.
        let cell_base = base + usize::from(cell_off);
        buf[cell_base + 6] = c1_ss;
        buf[cell_base + 7] = rate_bits;
        buf[cell_base + 0x14..cell_base + 0x18]
            .copy_from_slice(&9u32.to_be_bytes());
        let cell2 = cell_base + 0x18;
        buf[cell2 + 6] = c2_ss;
        buf[cell2 + 7] = rate_bits;
        buf[cell2 + 8..cell2 + 12].copy_from_slice(&10u32.to_be_bytes());
        buf[cell2 + 0x14..cell2 + 0x18].copy_from_slice(&19u32.to_be_bytes());

        // Cell positions: vob 1 cells 1 and 2.
        let pos_base = base + usize::from(pos_off);
        buf[pos_base + 1] = 1;
        buf[pos_base + 3] = 1;
        buf[pos_base + 5] = 1;
        buf[pos_base + 7] = 2;

        buf
    }

    fn parse(buf: Vec<u8>) -> Result<Ifo> {
        Ifo::read_from(&mut Cursor::new(buf), Path::new("synthetic.ifo"))
    }

    #[test]
    fn parse_synthetic_ifo() {
        let ifo = parse(synthetic_ifo(VideoSystem::Pal)).unwrap();
        assert_eq!(ifo.video.system, VideoSystem::Pal);
        assert_eq!(ifo.video.size, (720, 576));
        assert_eq!(ifo.pgcs.len(), 1);

        let pgc = &ifo.pgcs[0];
        assert_eq!(pgc.duration, 5000);
        assert_eq!(pgc.lang_ids[0], 0x656e);
        assert_eq!(pgc.palette[0], Rgb { r: 255, g: 255, b: 255 });
        assert_eq!(pgc.n_angles, 0);

        let cells = pgc.cells(0);
        assert_eq!(cells.len(), 2);
        assert_eq!((cells[0].vob, cells[0].cell), (1, 1));
        assert_eq!((cells[1].vob, cells[1].cell), (1, 2));
        assert_eq!(cells[0].t_time, 2000);
        assert_eq!(cells[1].t_time, 3000);
        assert_eq!(cells[1].t_total, 2000);
        assert_eq!(cells[1].t_offset, 2000);
        assert_eq!(cells[0].first_sector, 0);
        assert_eq!(cells[0].last_sector, 9);
        assert_eq!(cells[1].first_sector, 10);
        assert_eq!(cells[1].last_sector, 19);
    }

    #[test]
    fn cell_times_sum_to_chain_duration() {
        for system in [VideoSystem::Ntsc, VideoSystem::Pal] {
            let ifo = parse(synthetic_ifo(system)).unwrap();
            let pgc = &ifo.pgcs[0];
            let sum: i64 = pgc.cells(0).iter().map(|c| c.t_time).sum();
            assert_eq!(sum, pgc.duration);
        }
    }

    #[test]
    fn ntsc_times_are_rescaled() {
        let ifo = parse(synthetic_ifo(VideoSystem::Ntsc)).unwrap();
        let pgc = &ifo.pgcs[0];
        // 5000ms of 30 fps content lasts 5005ms of wall-clock time.
        assert_eq!(pgc.duration, 5005);
    }

    #[test]
    fn reject_bad_signature() {
        let mut buf = synthetic_ifo(VideoSystem::Pal);
        buf[0] = b'X';
        let err = parse(buf).unwrap_err();
        assert!(err.downcast_ref::<RipError>().is_some());
    }

    #[test]
    fn reject_truncated_tables() {
        let mut buf = synthetic_ifo(VideoSystem::Pal);
        buf.truncate(0x500);
        assert!(parse(buf).is_err());
    }
}
