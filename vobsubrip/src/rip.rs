//! The demux and extraction engine.
//!
//! This is the resumable core loop: walk the selected chunk ranges of
//! the VOB set sector by sector, descramble where needed, follow the
//! navigation packs to know which cell we are in, reconcile
//! presentation timestamps across cell boundaries, and copy the sectors
//! of the selected subpicture streams into one raw output stream.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use log::{debug, trace, warn};

use crate::cc::ClosedCaptionSink;
use crate::chunks::{self, ChunkRange};
use crate::css::CssDecrypter;
use crate::errors::RipError;
use crate::ifo::{Cell, Ifo, Palette, Pgc, VideoTitleInfo};
use crate::lang;
use crate::mpeg2::{pes, ps};
use crate::vob::{Sector, VobSource, SECTOR_SIZE};
use crate::Result;

/// Report progress after each this many scanned bytes.
const PROGRESS_STRIDE: i64 = 0x10_0000;

/// Fixed part of the false-discontinuity slack, in milliseconds.  An
/// empirical constant carried over from long use; cell time tables are
/// simply not accurate to better than this.
const DISCONTINUITY_SLACK_MS: i64 = 1000;

/// What to rip, and how.
#[derive(Clone, Debug)]
pub struct RipperConfig {
    /// 1-based program chain number.
    pub pgc: usize,
    /// 1-based angle number (ignored for titles without angle blocks).
    pub angle: usize,
    /// Selected `(vob << 16 | cell)` tags; empty means every cell of
    /// the angle.
    pub vcs: Vec<u32>,
    /// Selected subpicture streams, by stream index.
    pub stream_ids: [bool; 32],
    /// Feed video packs to the closed-caption sink.
    pub closed_caption: bool,
    /// Keep only subtitles carrying the forced display command.
    pub forced_only: bool,
    /// Rebase all start times onto the earliest extracted packet.
    pub reset_time: bool,
    /// Close the hosting UI when the job ends.
    pub close_when_done: bool,
    /// Ring the terminal bell when the job ends.
    pub beep: bool,
    /// With `close_when_done`, close even after a failed job.
    pub close_ignore_errors: bool,
}

impl Default for RipperConfig {
    fn default() -> RipperConfig {
        RipperConfig {
            pgc: 1,
            angle: 1,
            vcs: vec![],
            stream_ids: [false; 32],
            closed_caption: false,
            forced_only: false,
            reset_time: false,
            close_when_done: false,
            beep: false,
            close_ignore_errors: false,
        }
    }
}

/// One extracted subtitle packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubPos {
    /// Byte offset of the packet's first sector in the output stream.
    pub filepos: i64,
    /// Corrected presentation start, in milliseconds.
    pub start: i64,
    /// Owning VOB id.
    pub vob: u16,
    /// Owning cell id.
    pub cell: u16,
    /// Cumulative playback time before the owning cell, in
    /// milliseconds.
    pub cell_time: i64,
    /// Cleared by the forced-only filter for unflagged packets.
    pub valid: bool,
}

/// All packets extracted for one subpicture stream.
#[derive(Clone, Debug)]
pub struct LanguageTrack {
    /// The 2-letter language code, packed big-endian.
    pub lang_id: u16,
    /// Display name of the language.
    pub name: &'static str,
    /// Extracted packets, in stream order.
    pub subpos: Vec<SubPos>,
}

/// Everything a `.idx`/`.sub` writer needs: the raw concatenated-sector
/// stream, the per-stream packet lists, and the title attributes they
/// were ripped under.
#[derive(Clone, Debug)]
pub struct RipOutput {
    /// The raw subtitle stream, whole 2048-byte sectors end to end.
    pub stream: Vec<u8>,
    /// One track per stream index 0-31.
    pub tracks: Vec<LanguageTrack>,
    /// The program chain's subtitle palette.
    pub palette: Palette,
    /// Video attributes of the title.
    pub video: VideoTitleInfo,
}

/// How a scan ended, short of a hard error.
#[derive(Debug)]
pub(crate) enum ScanEnd {
    /// The scan reached the natural end of its chunk ranges.
    Completed(RipOutput),
    /// The abort flag was observed; the output is present only when the
    /// caller asked to keep partial results.
    Aborted(Option<RipOutput>),
}

/// Cooperative cancellation flags, polled once per sector.
#[derive(Debug, Default)]
pub(crate) struct AbortFlags {
    pub abort: AtomicBool,
    pub save_partial: AtomicBool,
}

/// Where scan messages and progress go.  The worker thread forwards
/// these to the installed callback.
pub(crate) trait ScanObserver {
    fn message(&mut self, text: &str);
    fn progress(&mut self, fraction: f64);
}

/// Validate the PGC/angle selection and expand the cell list.
pub(crate) fn selected_cells(ifo: &Ifo, config: &RipperConfig) -> Result<(Vec<Cell>, Vec<u32>)> {
    if config.pgc == 0 || config.pgc > ifo.pgcs.len() {
        return Err(RipError::Config(format!(
            "PGC {} is out of range 1-{}",
            config.pgc,
            ifo.pgcs.len()
        ))
        .into());
    }
    let pgc = &ifo.pgcs[config.pgc - 1];
    let angle = if pgc.n_angles == 0 {
        if config.angle > 1 {
            return Err(
                RipError::Config("the title has no angle blocks".to_string()).into()
            );
        }
        0
    } else {
        if config.angle == 0 || config.angle > pgc.n_angles {
            return Err(RipError::Config(format!(
                "angle {} is out of range 1-{}",
                config.angle, pgc.n_angles
            ))
            .into());
        }
        config.angle
    };
    let cells = pgc.cells(angle).to_vec();
    if cells.is_empty() {
        return Err(RipError::Config("the angle has no cells".to_string()).into());
    }
    let selected: Vec<u32> = if config.vcs.is_empty() {
        cells.iter().map(Cell::vc).collect()
    } else {
        for &vc in &config.vcs {
            if !cells.iter().any(|c| c.vc() == vc) {
                return Err(RipError::Config(format!(
                    "vob {} cell {} is not part of the selected angle",
                    vc >> 16,
                    vc & 0xffff
                ))
                .into());
            }
        }
        config.vcs.clone()
    };
    Ok((cells, selected))
}

/// The byte ranges a scan will walk, and whether it has to discover the
/// per-cell boundaries itself.
struct ScanPlan {
    ranges: Vec<ChunkRange>,
    discover: bool,
    checksum: u32,
}

fn build_plan(
    source: &mut dyn VobSource,
    cells: &[Cell],
    selected: &[u32],
    chunk_path: Option<&Path>,
) -> Result<ScanPlan> {
    if source.is_dvd() {
        // The IFO cell addresses are sector-exact on a DVD.
        let ranges = cells
            .iter()
            .filter(|c| selected.contains(&c.vc()))
            .map(|c| ChunkRange {
                start: i64::from(c.first_sector) * SECTOR_SIZE as i64,
                end: (i64::from(c.last_sector) + 1) * SECTOR_SIZE as i64,
                vc: c.vc(),
            })
            .collect();
        return Ok(ScanPlan {
            ranges,
            discover: false,
            checksum: 0,
        });
    }

    let checksum = chunks::source_checksum(source)?;
    if let Some(path) = chunk_path {
        if let Some(ranges) = chunks::load_chunks(path, checksum, source.len()) {
            debug!("reusing {} cached chunk ranges", ranges.len());
            let ranges = ranges
                .into_iter()
                .filter(|r| selected.contains(&r.vc))
                .collect();
            return Ok(ScanPlan {
                ranges,
                discover: false,
                checksum,
            });
        }
    }

    // No usable cache: scan everything once and record what we find.
    let sectors = source.len() / SECTOR_SIZE as i64;
    Ok(ScanPlan {
        ranges: vec![ChunkRange {
            start: 0,
            end: sectors * SECTOR_SIZE as i64,
            vc: 0,
        }],
        discover: true,
        checksum,
    })
}

/// A pending cell transition, resolved by the next packet carrying a
/// PTS.
struct Pending {
    discontinuity: bool,
    t_diff: i64,
}

/// Mutable state of one scan pass.
struct ScanState {
    stream: Vec<u8>,
    tracks: Vec<LanguageTrack>,
    /// The cell the navigation packs say we are in, if it belongs to
    /// the selected program chain.
    cur: Option<Cell>,
    in_selected: bool,
    nav_count: u64,
    /// Running zero reference subtracted from every presentation time.
    t_start: i64,
    /// Reconciled time of the most recent packet.
    last_time: i64,
    pending: Option<Pending>,
    /// Chunk discovery bookkeeping: the open range and everything
    /// closed so far.
    open: Option<(i64, u32)>,
    discovered: Vec<ChunkRange>,
}

impl ScanState {
    fn new(pgc: &Pgc) -> ScanState {
        let tracks = (0..32)
            .map(|s| {
                let lang_id = pgc.lang_ids[s];
                LanguageTrack {
                    lang_id,
                    name: lang::lang_name(lang_id),
                    subpos: vec![],
                }
            })
            .collect();
        ScanState {
            stream: vec![],
            tracks,
            cur: None,
            in_selected: false,
            nav_count: 0,
            t_start: 0,
            last_time: 0,
            pending: None,
            open: None,
            discovered: vec![],
        }
    }

    /// Handle a navigation pack: refresh the current cell and the chunk
    /// discovery bookkeeping.
    fn on_nav(
        &mut self,
        buf: &Sector,
        sector: i64,
        cells: &[Cell],
        selected: &[u32],
        discover: bool,
        observer: &mut dyn ScanObserver,
    ) {
        self.nav_count += 1;
        let vob = u16::from_be_bytes([buf[0x420], buf[0x421]]);
        let cell = u16::from(buf[0x422]);
        let vc = u32::from(vob) << 16 | u32::from(cell);
        if self.cur.as_ref().map(|c| c.vc() == vc).unwrap_or(false) {
            return;
        }

        let byte_pos = sector * SECTOR_SIZE as i64;
        if discover {
            if let Some((start, open_vc)) = self.open.take() {
                self.discovered.push(ChunkRange {
                    start,
                    end: byte_pos,
                    vc: open_vc,
                });
            }
            self.open = Some((byte_pos, vc));
        }

        let prev_offset = self.cur.as_ref().map(|c| c.t_offset);
        match cells.iter().find(|c| c.vc() == vc) {
            Some(c) => {
                observer.message(&format!("Entering vob {} cell {}.", vob, cell));
                self.in_selected = selected.contains(&vc);
                if let Some(prev) = prev_offset {
                    self.pending = Some(Pending {
                        discontinuity: c.discontinuity,
                        t_diff: c.t_offset - prev,
                    });
                }
                self.cur = Some(c.clone());
            }
            None => {
                debug!(
                    "vob {} cell {} is not part of the selected program chain",
                    vob, cell
                );
                self.in_selected = false;
                self.cur = None;
            }
        }
    }

    /// Handle a private-stream-1 pack: record a `SubPos` for the lead
    /// packet of each subtitle and copy the sector to the output.
    fn on_subtitle(
        &mut self,
        buf: &Sector,
        inner_offset: usize,
        config: &RipperConfig,
        observer: &mut dyn ScanObserver,
    ) {
        let packet = match pes::packet(&buf[inner_offset..]) {
            Ok((_, packet)) => packet,
            Err(err) => {
                warn!("skipping an unparseable subtitle packet: {:?}", err);
                return;
            }
        };
        if !(0x20..=0x3f).contains(&packet.substream_id) {
            trace!("ignoring substream 0x{:02x}", packet.substream_id);
            return;
        }
        let s = usize::from(packet.substream_id - 0x20);
        if !config.stream_ids[s] || !self.in_selected {
            return;
        }
        let cell = match &self.cur {
            Some(cell) => cell.clone(),
            None => return,
        };

        if let Some(pts_dts) = &packet.header_data.pts_dts {
            let pts_ms = pts_dts.pts.to_ms();
            if let Some(pending) = self.pending.take() {
                if pending.discontinuity {
                    if pending.t_diff > 0
                        && pending.t_diff < pts_ms + DISCONTINUITY_SLACK_MS
                    {
                        observer.message(&format!(
                            "False discontinuity of {}ms detected, folding it \
                             into the start time.",
                            pending.t_diff
                        ));
                        self.t_start += pending.t_diff;
                    } else {
                        debug!("discontinuity, re-anchoring at {}ms", pts_ms);
                        // Re-anchor without moving the reconciled
                        // timeline backward: packets overrunning the
                        // previous cell's table time must not push the
                        // next cell's starts into the past.
                        self.t_start =
                            pts_ms - (self.last_time - cell.t_offset).max(0);
                    }
                }
            }
            let start = cell.t_offset + pts_ms - self.t_start;
            self.last_time = start;
            trace!("stream {}: subtitle at {}ms", s, start);
            self.tracks[s].subpos.push(SubPos {
                filepos: self.stream.len() as i64,
                start,
                vob: cell.vob,
                cell: cell.cell,
                cell_time: cell.t_total,
                valid: true,
            });
        }
        self.stream.extend_from_slice(buf);
    }

    fn close_discovery(&mut self, end: i64) {
        if let Some((start, vc)) = self.open.take() {
            self.discovered.push(ChunkRange { start, end, vc });
        }
    }

    fn into_output(self, pgc: &Pgc, video: VideoTitleInfo) -> RipOutput {
        RipOutput {
            stream: self.stream,
            tracks: self.tracks,
            palette: pgc.palette,
            video,
        }
    }
}

/// Run one full extraction pass.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create(
    ifo: &Ifo,
    source: &mut dyn VobSource,
    css: &mut dyn CssDecrypter,
    cc: &mut dyn ClosedCaptionSink,
    config: &RipperConfig,
    chunk_path: Option<&Path>,
    abort: &AbortFlags,
    observer: &mut dyn ScanObserver,
) -> Result<ScanEnd> {
    let (cells, selected) = selected_cells(ifo, config)?;
    if !config.stream_ids.iter().any(|&wanted| wanted) && !config.closed_caption {
        return Err(RipError::Config("no streams selected".to_string()).into());
    }
    let pgc = &ifo.pgcs[config.pgc - 1];

    let plan = build_plan(source, &cells, &selected, chunk_path)?;
    let total: i64 = plan.ranges.iter().map(|r| r.len()).sum();
    if total == 0 {
        return Err(RipError::Config("nothing to scan".to_string()).into());
    }
    let end_of_plan = plan.ranges.iter().map(|r| r.end).max().unwrap_or(0);
    if source.len() < end_of_plan {
        return Err(anyhow!(
            "the VOB set is {} bytes short of its cell addresses",
            end_of_plan - source.len()
        ));
    }

    let mut state = ScanState::new(pgc);
    let mut buf = [0u8; SECTOR_SIZE];
    let mut done = 0i64;
    let mut next_report = PROGRESS_STRIDE;
    for range in &plan.ranges {
        let first = range.start / SECTOR_SIZE as i64;
        let last = range.end / SECTOR_SIZE as i64;
        source.seek_sector(cast::u64(first)?)?;
        for sector in first..last {
            if abort.abort.load(Ordering::Relaxed) {
                observer.message("Aborted.");
                let output = if abort.save_partial.load(Ordering::Relaxed) {
                    Some(state.into_output(pgc, ifo.video))
                } else {
                    None
                };
                return Ok(ScanEnd::Aborted(output));
            }
            source.read_sector(&mut buf)?;
            process_sector(
                &mut state, &mut buf, sector, range, source, css, cc, config,
                &cells, &selected, plan.discover, observer,
            )?;
            done += SECTOR_SIZE as i64;
            if done >= next_report {
                observer.progress(done as f64 / total as f64);
                next_report += PROGRESS_STRIDE;
            }
        }
    }

    if state.nav_count == 0 {
        return Err(RipError::NoTimeline.into());
    }
    if plan.discover {
        state.close_discovery(end_of_plan);
        if let Some(path) = chunk_path {
            match chunks::save_chunks(path, plan.checksum, source.len(), &state.discovered)
            {
                Ok(()) => debug!(
                    "saved {} chunk ranges to {}",
                    state.discovered.len(),
                    path.display()
                ),
                // The cache only affects the cost of the next run.
                Err(err) => {
                    warn!("could not save chunk cache {}: {}", path.display(), err)
                }
            }
        }
    }

    let mut output = state.into_output(pgc, ifo.video);
    if config.forced_only {
        forced_only_pass(&mut output);
        observer.message("Kept forced subtitles only.");
    }
    if config.reset_time {
        reset_times(&mut output);
    }
    observer.progress(1.0);
    Ok(ScanEnd::Completed(output))
}

/// Decode and dispatch one sector.
#[allow(clippy::too_many_arguments)]
fn process_sector(
    state: &mut ScanState,
    buf: &mut Sector,
    sector: i64,
    range: &ChunkRange,
    source: &mut dyn VobSource,
    css: &mut dyn CssDecrypter,
    cc: &mut dyn ClosedCaptionSink,
    config: &RipperConfig,
    cells: &[Cell],
    selected: &[u32],
    discover: bool,
    observer: &mut dyn ScanObserver,
) -> Result<()> {
    // Everything in a VOB must start with a pack header; anything else
    // means we have lost sector alignment and cannot trust the rest.
    let (inner_offset, id) = {
        let (rest, _header) = ps::header(&buf[..]).map_err(|_| {
            RipError::BadPackHeader {
                sector: sector as u64,
            }
        })?;
        if rest.len() < 4 || rest[..3] != [0x00, 0x00, 0x01] {
            trace!("sector {}: no start code after the pack header", sector);
            return Ok(());
        }
        (SECTOR_SIZE - rest.len(), rest[3])
    };

    match id {
        0xbb => {
            // Only system headers followed by PCI data are navigation
            // packs.
            if buf[0x26..0x2a] != [0x00, 0x00, 0x01, 0xbf] {
                trace!("sector {}: system header without PCI", sector);
                return Ok(());
            }
            state.on_nav(buf, sector, cells, selected, discover, observer);
        }
        0xe0 | 0xbd => {
            // The PES headers themselves are never scrambled, so the
            // flag byte can be trusted before descrambling.
            if buf[0x14] & 0x30 != 0 {
                if !css.has_key() {
                    search_css_key(source, css, range, sector, state, observer)?;
                }
                css.decrypt(buf);
            }
            if id == 0xe0 {
                if config.closed_caption && state.in_selected {
                    cc.extract(state.last_time, buf);
                }
            } else {
                state.on_subtitle(buf, inner_offset, config, observer);
            }
        }
        other => trace!("sector {}: ignoring stream 0x{:02x}", sector, other),
    }
    Ok(())
}

/// Rescan the current chunk from its start until the decrypter reports
/// a key, then seek back behind the sector that triggered the search.
fn search_css_key(
    source: &mut dyn VobSource,
    css: &mut dyn CssDecrypter,
    range: &ChunkRange,
    cur_sector: i64,
    state: &ScanState,
    observer: &mut dyn ScanObserver,
) -> Result<()> {
    let (vob, cell) = match &state.cur {
        Some(c) => (c.vob, c.cell),
        None => ((range.vc >> 16) as u16, (range.vc & 0xffff) as u16),
    };
    observer.message(&format!(
        "Searching for the CSS key of vob {} cell {}...",
        vob, cell
    ));

    let first = range.start / SECTOR_SIZE as i64;
    let last = range.end / SECTOR_SIZE as i64;
    let mut probe = [0u8; SECTOR_SIZE];
    source.seek_sector(cast::u64(first)?)?;
    let mut found = false;
    for _ in first..last {
        source.read_sector(&mut probe)?;
        if css.find_key(&probe) {
            found = true;
            break;
        }
    }
    if !found && !css.has_key() {
        return Err(RipError::NoCssKey { vob, cell }.into());
    }
    observer.message("Found the CSS key.");
    source.seek_sector(cast::u64(cur_sector + 1)?)?;
    Ok(())
}

/// Reassemble every subtitle packet from the output stream and clear
/// the `valid` flag of those not carrying the forced display command.
/// The valid set can only shrink here.
fn forced_only_pass(output: &mut RipOutput) {
    #[derive(Default)]
    struct Partial {
        buf: Vec<u8>,
        want: usize,
        index: usize,
    }
    let mut partials: Vec<Partial> = (0..32).map(|_| Partial::default()).collect();

    for packet in ps::pes_packets(&output.stream) {
        let packet = match packet {
            Ok(packet) => packet.pes_packet,
            Err(_) => continue,
        };
        if !(0x20..=0x3f).contains(&packet.substream_id) {
            continue;
        }
        let s = usize::from(packet.substream_id - 0x20);
        let partial = &mut partials[s];

        // A PTS marks the lead sector of a new packet; its first two
        // payload bytes give the full packet size.
        if packet.header_data.pts_dts.is_some() {
            partial.buf.clear();
            partial.want = if packet.data.len() >= 2 {
                usize::from(u16::from_be_bytes([packet.data[0], packet.data[1]]))
            } else {
                0
            };
        } else if partial.want == 0 {
            continue;
        }
        partial.buf.extend_from_slice(packet.data);

        if partial.want > 0 && partial.buf.len() >= partial.want {
            if !packet_is_forced(&partial.buf[..partial.want]) {
                if let Some(sp) = output.tracks[s].subpos.get_mut(partial.index) {
                    sp.valid = false;
                }
            }
            partial.index += 1;
            partial.buf.clear();
            partial.want = 0;
        }
    }

    // A packet truncated by the end of the stream cannot prove it is
    // forced.
    for (s, partial) in partials.iter().enumerate() {
        if partial.want > 0 {
            if let Some(sp) = output.tracks[s].subpos.get_mut(partial.index) {
                sp.valid = false;
            }
        }
    }
}

/// Walk the control sequences of a reassembled subpicture packet,
/// looking for the forced display command (0x00).
fn packet_is_forced(packet: &[u8]) -> bool {
    if packet.len() < 4 {
        return false;
    }
    let size = usize::from(u16::from_be_bytes([packet[0], packet[1]])).min(packet.len());
    let mut offset = usize::from(u16::from_be_bytes([packet[2], packet[3]]));
    loop {
        if offset + 4 > size {
            return false;
        }
        let next = usize::from(u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]));
        let mut p = offset + 4;
        loop {
            if p >= size {
                return false;
            }
            match packet[p] {
                0x00 => return true,
                0x01 | 0x02 => p += 1,
                0x03 | 0x04 => p += 3,
                0x05 => p += 7,
                0x06 => p += 5,
                0xff => break,
                _ => return false,
            }
        }
        // The last sequence points at itself.
        if next == offset {
            return false;
        }
        offset = next;
    }
}

/// Rebase every start time onto the earliest extracted packet.
fn reset_times(output: &mut RipOutput) {
    let first = output
        .tracks
        .iter()
        .flat_map(|t| t.subpos.iter())
        .map(|sp| sp.start)
        .min();
    if let Some(first) = first {
        debug!("rebasing start times by {}ms", first);
        for track in &mut output.tracks {
            for sp in &mut track.subpos {
                sp.start -= first;
            }
        }
    }
}
