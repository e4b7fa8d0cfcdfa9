//! # MPEG-2 Packetized Elementary Streams (PES)
//!
//! These packets are nested inside the MPEG-2 Program Stream packets
//! found in a VOB sector.  We only have full parsing support for the
//! private-stream-1 packets that carry DVD subpictures.
//!
//! [PES]: http://dvd.sourceforge.net/dvdinfo/pes-hdr.html

use std::fmt;

use nom::bits::bits;
use nom::bits::complete::{tag as tag_bits, take as take_bits};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::combinator::{map, rest, value};
use nom::error::Error;
use nom::multi::length_value;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::clock::{clock, BitsInput, Clock};

/// Debug-prints a payload as a short hex prefix plus its length, rather
/// than dumping the whole packet.
struct PayloadBytes<'a>(&'a [u8]);

impl fmt::Debug for PayloadBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0.iter().take(16) {
            write!(f, "{:02x} ", byte)?;
        }
        write!(f, "({} bytes)", self.0.len())
    }
}

/// Possible combinations of PTS and DTS data which might appear inside a
/// PES header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PtsDtsFlags {
    /// No time stamps.
    #[default]
    None,
    /// Presentation Time Stamp only.
    Pts,
    /// Presentation and Decode Time Stamps.
    PtsDts,
}

/// Parse PTS & DTS flags in a PES packet header.  Consumes two bits.
fn pts_dts_flags(i: BitsInput) -> IResult<BitsInput, PtsDtsFlags> {
    alt((
        value(PtsDtsFlags::None, tag_bits(0b00, 2usize)),
        value(PtsDtsFlags::Pts, tag_bits(0b10, 2usize)),
        value(PtsDtsFlags::PtsDts, tag_bits(0b11, 2usize)),
    ))(i)
}

/// Presentation and Decode Time Stamps, if available.
#[derive(Debug, PartialEq, Eq)]
pub struct PtsDts {
    /// Presentation Time Stamp.
    pub pts: Clock,
    /// Decode Time Stamp.
    pub dts: Option<Clock>,
}

/// Helper for `pts_dts`.  Parses the PTS-only case.
fn pts_only(input: &[u8]) -> IResult<&[u8], PtsDts> {
    bits::<_, _, Error<BitsInput>, _, _>(|i| {
        let (i, _) = tag_bits(0b0010, 4usize)(i)?;
        let (i, pts) = clock(i)?;
        Ok((i, PtsDts { pts, dts: None }))
    })(input)
}

/// Helper for `pts_dts`.  Parses the PTS and DTS case.
fn pts_and_dts(input: &[u8]) -> IResult<&[u8], PtsDts> {
    bits::<_, _, Error<BitsInput>, _, _>(|i| {
        let (i, _) = tag_bits(0b0011, 4usize)(i)?;
        let (i, pts) = clock(i)?;
        let (i, _) = tag_bits(0b0001, 4usize)(i)?;
        let (i, dts) = clock(i)?;
        Ok((i, PtsDts { pts, dts: Some(dts) }))
    })(input)
}

/// Parse a `PtsDts` value in the format specified by `flags`.
fn pts_dts(i: &[u8], flags: PtsDtsFlags) -> IResult<&[u8], Option<PtsDts>> {
    match flags {
        PtsDtsFlags::None => Ok((i, None)),
        PtsDtsFlags::Pts => map(pts_only, Some)(i),
        PtsDtsFlags::PtsDts => map(pts_and_dts, Some)(i),
    }
}

/// Flags specifying which header data fields are present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderDataFlags {
    pub pts_dts_flags: PtsDtsFlags,
    pub escr_flag: bool,
    pub es_rate_flag: bool,
    pub dsm_trick_mode_flag: bool,
    pub additional_copy_info_flag: bool,
    pub crc_flag: bool,
    pub extension_flag: bool,
}

/// Deserialize a single Boolean flag bit.
fn bool_flag(i: BitsInput) -> IResult<BitsInput, bool> {
    map(take_bits(1usize), |b: u8| b == 1)(i)
}

fn header_data_flags(input: &[u8]) -> IResult<&[u8], HeaderDataFlags> {
    bits::<_, _, Error<BitsInput>, _, _>(|i| {
        let (i, pts_dts_flags) = pts_dts_flags(i)?;
        let (i, escr_flag) = bool_flag(i)?;
        let (i, es_rate_flag) = bool_flag(i)?;
        let (i, dsm_trick_mode_flag) = bool_flag(i)?;
        let (i, additional_copy_info_flag) = bool_flag(i)?;
        let (i, crc_flag) = bool_flag(i)?;
        let (i, extension_flag) = bool_flag(i)?;
        Ok((
            i,
            HeaderDataFlags {
                pts_dts_flags,
                escr_flag,
                es_rate_flag,
                dsm_trick_mode_flag,
                additional_copy_info_flag,
                crc_flag,
                extension_flag,
            },
        ))
    })(input)
}

/// Header data fields.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HeaderData {
    pub flags: HeaderDataFlags,
    pub pts_dts: Option<PtsDts>,
    /// There's lots of other header data we could deserialize here, but
    /// we're not interested in any of it for subtitles.  Specify a
    /// private placeholder field so we can extend this without breaking
    /// the API.
    _placeholder: (),
}

/// Parse PES header data, including the preceding flags and length
/// bytes.  Any header fields beyond the ones we support are discarded
/// using the declared header length.
fn header_data(input: &[u8]) -> IResult<&[u8], HeaderData> {
    let (input, flags) = header_data_flags(input)?;
    let (input, parsed) =
        length_value(be_u8, move |i| pts_dts(i, flags.pts_dts_flags))(input)?;
    Ok((
        input,
        HeaderData {
            flags,
            pts_dts: parsed,
            _placeholder: (),
        },
    ))
}

/// A [Packetized Elementary Stream][pes] header, not including the
/// `HeaderData` information (which is parsed separately).
///
/// [pes]: http://dvd.sourceforge.net/dvdinfo/pes-hdr.html
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub scrambling_control: u8,
    pub priority: bool,
    pub data_alignment_indicator: bool,
    pub copyright: bool,
    pub original: bool,
}

impl Header {
    /// Is the payload of this packet CSS-scrambled?
    pub fn scrambled(&self) -> bool {
        self.scrambling_control != 0
    }
}

/// Parse the first PES header byte after the length.
fn header(input: &[u8]) -> IResult<&[u8], Header> {
    bits::<_, _, Error<BitsInput>, _, _>(|i| {
        let (i, _) = tag_bits(0b10, 2usize)(i)?;
        let (i, scrambling_control): (_, u8) = take_bits(2usize)(i)?;
        let (i, priority) = bool_flag(i)?;
        let (i, data_alignment_indicator) = bool_flag(i)?;
        let (i, copyright) = bool_flag(i)?;
        let (i, original) = bool_flag(i)?;
        Ok((
            i,
            Header {
                scrambling_control,
                priority,
                data_alignment_indicator,
                copyright,
                original,
            },
        ))
    })(input)
}

/// A [Packetized Elementary Stream][pes] packet.
///
/// [pes]: http://dvd.sourceforge.net/dvdinfo/pes-hdr.html
#[derive(PartialEq, Eq)]
pub struct Packet<'a> {
    pub header: Header,
    pub header_data: HeaderData,
    pub substream_id: u8,
    pub data: &'a [u8],
}

impl<'a> fmt::Debug for Packet<'a> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Packet")
            .field("header", &self.header)
            .field("header_data", &self.header_data)
            .field("substream_id", &self.substream_id)
            .field("data", &PayloadBytes(self.data))
            .finish()
    }
}

fn packet_helper(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, header) = header(input)?;
    let (input, header_data) = header_data(input)?;
    let (input, substream_id) = be_u8(input)?;
    let (input, data) = rest(input)?;
    Ok((
        input,
        Packet {
            header,
            header_data,
            substream_id,
            data,
        },
    ))
}

/// Parse a private-stream-1 PES packet, up to its declared length.
pub fn packet(input: &[u8]) -> IResult<&[u8], Packet> {
    let (input, _) = tag(&[0x00, 0x00, 0x01, 0xbd][..])(input)?;
    length_value(be_u16, packet_helper)(input)
}
