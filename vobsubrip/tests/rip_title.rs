//! Rip a small synthetic title set through the public API.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use vobsubrip::{Callback, Ripper, SECTOR_SIZE};

/// Build a minimal single-PGC PAL IFO image: one English subpicture
/// stream and two cells of 2s and 3s covering sectors 0-9 and 10-19 of
/// vob 1.
fn build_ifo() -> Vec<u8> {
    let mut buf = vec![0u8; 0xa00];
    buf[..12].copy_from_slice(b"DVDVIDEO-VTS");
    buf[0x200..0x202].copy_from_slice(&0x1000u16.to_be_bytes()); // PAL
    buf[0x254..0x256].copy_from_slice(&1u16.to_be_bytes());
    buf[0x258..0x25a].copy_from_slice(b"en");
    buf[0xcc..0xd0].copy_from_slice(&1u32.to_be_bytes()); // PGCIT at sector 1
    buf[0x800..0x802].copy_from_slice(&1u16.to_be_bytes());
    buf[0x80c..0x810].copy_from_slice(&0x10u32.to_be_bytes());

    let base = 0x810;
    buf[base + 2] = 1; // programs
    buf[base + 3] = 2; // cells
    buf[base + 6] = 0x05; // 5 seconds
    buf[base + 7] = 0x40; // 25 fps rate class
    buf[base + 0x1c] = 0x80; // stream 0 available
    buf[base + 0xe6..base + 0xe8].copy_from_slice(&0xfeu16.to_be_bytes());
    buf[base + 0xe8..base + 0xea].copy_from_slice(&0x100u16.to_be_bytes());
    buf[base + 0xea..base + 0xec].copy_from_slice(&0x130u16.to_be_bytes());

    let cell1 = base + 0x100;
    buf[cell1 + 6] = 0x02;
    buf[cell1 + 7] = 0x40;
    buf[cell1 + 0x14..cell1 + 0x18].copy_from_slice(&9u32.to_be_bytes());
    let cell2 = cell1 + 0x18;
    buf[cell2 + 6] = 0x03;
    buf[cell2 + 7] = 0x40;
    buf[cell2 + 8..cell2 + 12].copy_from_slice(&10u32.to_be_bytes());
    buf[cell2 + 0x14..cell2 + 0x18].copy_from_slice(&19u32.to_be_bytes());

    let pos = base + 0x130;
    buf[pos + 1] = 1; // vob 1 cell 1
    buf[pos + 3] = 1;
    buf[pos + 5] = 1; // vob 1 cell 2
    buf[pos + 7] = 2;
    buf
}

const PACK: [u8; 14] = [
    0x00, 0x00, 0x01, 0xba, 0x44, 0x02, 0xaf, 0xa7, 0x04, 0x03, 0x01, 0x89,
    0xc3, 0x00,
];

fn nav_sector(vob: u16, cell: u8) -> Vec<u8> {
    let mut s = vec![0u8; SECTOR_SIZE];
    s[..14].copy_from_slice(&PACK);
    s[14..18].copy_from_slice(&[0x00, 0x00, 0x01, 0xbb]);
    s[0x26..0x2a].copy_from_slice(&[0x00, 0x00, 0x01, 0xbf]);
    s[0x420..0x422].copy_from_slice(&vob.to_be_bytes());
    s[0x422] = cell;
    s
}

fn pad_sector() -> Vec<u8> {
    let mut s = vec![0u8; SECTOR_SIZE];
    s[..14].copy_from_slice(&PACK);
    s[14..18].copy_from_slice(&[0x00, 0x00, 0x01, 0xbe]);
    s[18..20].copy_from_slice(&((SECTOR_SIZE - 20) as u16).to_be_bytes());
    s
}

/// A subtitle lead sector for stream 0x20 with the given PTS (in
/// 90 kHz ticks) and a minimal unforced subpicture payload.
fn sub_sector(pts: u64) -> Vec<u8> {
    let mut s = vec![0u8; SECTOR_SIZE];
    s[..14].copy_from_slice(&PACK);
    s[14..18].copy_from_slice(&[0x00, 0x00, 0x01, 0xbd]);
    let mut body = vec![0x81, 0x80, 0x05];
    body.extend_from_slice(&[
        0x21 | ((pts >> 29) as u8 & 0x0e),
        (pts >> 22) as u8,
        ((pts >> 14) as u8 & 0xfe) | 1,
        (pts >> 7) as u8,
        ((pts << 1) as u8) | 1,
    ]);
    body.push(0x20);
    body.extend_from_slice(&[0x00, 0x0a, 0x00, 0x04, 0x00, 0x00, 0x00, 0x04, 0x01, 0xff]);
    s[18..20].copy_from_slice(&(body.len() as u16).to_be_bytes());
    s[20..20 + body.len()].copy_from_slice(&body);
    s
}

fn build_vob() -> Vec<u8> {
    let mut vob = vec![];
    vob.extend(nav_sector(1, 1));
    vob.extend(sub_sector(500 * 90));
    for _ in 2..10 {
        vob.extend(pad_sector());
    }
    vob.extend(nav_sector(1, 2));
    vob.extend(sub_sector(500 * 90));
    for _ in 12..20 {
        vob.extend(pad_sector());
    }
    vob
}

struct ChannelCallback(Sender<bool>);

impl Callback for ChannelCallback {
    fn on_finished(&mut self, succeeded: bool) {
        let _ = self.0.send(succeeded);
    }
}

fn write_title(dir: &Path) {
    fs::write(dir.join("VTS_01_0.IFO"), build_ifo()).unwrap();
    fs::write(dir.join("VTS_01_1.VOB"), build_vob()).unwrap();
}

#[test]
fn rips_a_title_from_a_parameter_file() {
    let dir = tempfile::tempdir().unwrap();
    write_title(dir.path());
    let params_path = dir.path().join("job.params");
    fs::write(&params_path, "VTS_01_0.IFO\nmovie\n1\n1\nALL\n").unwrap();

    let ripper = Ripper::new();
    let (done, finished) = unbounded();
    ripper.set_callback(Box::new(ChannelCallback(done)));
    ripper.load_params(&params_path).unwrap();
    ripper.index().unwrap();
    assert!(finished.recv_timeout(Duration::from_secs(10)).unwrap());

    let output = ripper.take_output().unwrap();
    assert_eq!(output.stream.len(), 2 * SECTOR_SIZE);
    let subpos = &output.tracks[0].subpos;
    assert_eq!(subpos.len(), 2);
    assert_eq!(subpos[0].start, 500);
    assert_eq!(subpos[1].start, 2500);
    assert_eq!((subpos[1].vob, subpos[1].cell), (1, 2));
    assert_eq!(output.tracks[0].name, "English");
    assert_eq!(output.video.size, (720, 576));

    // The chunk cache appears next to the IFO, and a second run reuses
    // it and agrees with the first.
    assert!(dir.path().join("VTS_01_0.chunks").exists());
    ripper.index().unwrap();
    assert!(finished.recv_timeout(Duration::from_secs(10)).unwrap());
    let second = ripper.take_output().unwrap();
    assert_eq!(second.stream, output.stream);
    assert_eq!(&second.tracks[0].subpos[..], &subpos[..]);
}

#[test]
fn rejects_a_directory_without_vobs() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("VTS_01_0.IFO"), build_ifo()).unwrap();
    let ripper = Ripper::new();
    assert!(ripper.set_input(dir.path().join("VTS_01_0.IFO")).is_err());
}
