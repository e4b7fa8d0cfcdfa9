//! # MPEG-2 Program Streams (PS)
//!
//! This is the container format of VOB sectors and of the raw subtitle
//! stream our extraction pass produces.

use std::fmt;

use log::{debug, trace, warn};
use nom::bits::bits;
use nom::bits::complete::{tag as tag_bits, take as take_bits};
use nom::bytes::complete::{tag, take};
use nom::error::Error;
use nom::IResult;

use super::clock::{clock_and_ext, BitsInput, Clock};
use super::pes;
use anyhow::anyhow;

use crate::Result;

/// A parsed [MPEG-2 Program Stream header][MPEG-PS] (MPEG-PS).
///
/// [MPEG-PS]: https://en.wikipedia.org/wiki/MPEG_program_stream
#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    /// The System Clock Reference (SCR) and SCR extension field.
    pub scr: Clock,
    /// The bit rate, in units of 50 bytes per second.
    pub bit_rate: u32,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[PS packet @ {}, {} kbps]",
            self.scr,
            (self.bit_rate * 50 * 8) / 1024
        )
    }
}

/// The bit-packed portion of a pack header: SCR, bit rate and the
/// stuffing-byte count.
fn header_bits(i: BitsInput) -> IResult<BitsInput, (Clock, u32, usize)> {
    // MPEG-2 version tag.
    let (i, _) = tag_bits(0b01, 2usize)(i)?;
    // System Clock Reference.
    let (i, scr) = clock_and_ext(i)?;
    // Bit rate.
    let (i, bit_rate): (_, u32) = take_bits(22usize)(i)?;
    // Marker bits.
    let (i, _) = tag_bits(0b11, 2usize)(i)?;
    // Reserved.
    let (i, _): (_, u8) = take_bits(5usize)(i)?;
    // Number of bytes of stuffing.
    let (i, stuffing_length): (_, usize) = take_bits(3usize)(i)?;
    Ok((i, (scr, bit_rate, stuffing_length)))
}

/// Parse a Program Stream pack header, including any stuffing bytes.
pub fn header(input: &[u8]) -> IResult<&[u8], Header> {
    // Sync bytes.
    let (input, _) = tag(&[0x00, 0x00, 0x01, 0xba][..])(input)?;
    // 10-byte header.
    let (input, (scr, bit_rate, stuffing_length)) =
        bits::<_, _, Error<BitsInput>, _, _>(header_bits)(input)?;
    // Stuffing bytes.  We just want to ignore these.
    let (input, _) = take(stuffing_length)(input)?;
    Ok((input, Header { scr, bit_rate }))
}

/// A [Packetized Elementary Stream][pes] packet with a Program Stream
/// header.
///
/// [pes]: http://dvd.sourceforge.net/dvdinfo/pes-hdr.html
#[derive(Debug, PartialEq, Eq)]
pub struct PesPacket<'a> {
    pub ps_header: Header,
    pub pes_packet: pes::Packet<'a>,
}

/// Parse a Program Stream packet and the following PES packet.
pub fn pes_packet(input: &[u8]) -> IResult<&[u8], PesPacket> {
    let (input, ps_header) = header(input)?;
    let (input, pes_packet) = pes::packet(input)?;
    Ok((
        input,
        PesPacket {
            ps_header,
            pes_packet,
        },
    ))
}

/// An iterator over all the PES packets in an MPEG-2 Program Stream.
pub struct PesPackets<'a> {
    /// The remaining input to parse.
    remaining: &'a [u8],
}

impl<'a> Iterator for PesPackets<'a> {
    type Item = Result<PesPacket<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Search for the start of a Program Stream packet.
            let needle = &[0x00, 0x00, 0x01, 0xba];
            let start = self
                .remaining
                .windows(needle.len())
                .position(|window| needle == window);

            if let Some(start) = start {
                // We found the start, so try to parse it.
                self.remaining = &self.remaining[start..];
                match pes_packet(self.remaining) {
                    // We found a packet!
                    Ok((remaining, packet)) => {
                        self.remaining = remaining;
                        trace!("decoded packet {:?}", &packet);
                        return Some(Ok(packet));
                    }
                    // We have only a partial packet, and we hit the end
                    // of our data.
                    Err(nom::Err::Incomplete(needed)) => {
                        self.remaining = &[];
                        warn!("incomplete packet, need: {:?}", needed);
                        return Some(Err(anyhow!("incomplete PES packet")));
                    }
                    // We got something that looked like a packet but
                    // wasn't parseable.  Log it and keep trying.
                    Err(err) => {
                        self.remaining = &self.remaining[needle.len()..];
                        debug!("skipping packet {:?}", &err);
                    }
                }
            } else {
                // We didn't find the start of a packet.
                self.remaining = &[];
                trace!("reached end of data");
                return None;
            }
        }
    }
}

/// Iterate over all the PES packets in an MPEG-2 Program Stream (or at
/// least those which contain subtitles).
pub fn pes_packets(input: &[u8]) -> PesPackets {
    PesPackets { remaining: input }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pack header with SCR base 2815200, no stuffing.
    pub const PACK_HEADER: [u8; 14] = [
        0x00, 0x00, 0x01, 0xba, 0x44, 0x02, 0xaf, 0xa7, 0x04, 0x03, 0x01,
        0x89, 0xc3, 0x00,
    ];

    #[test]
    fn parse_header() {
        let (rest, parsed) = header(&PACK_HEADER[..]).unwrap();
        assert_eq!(rest, &[][..]);
        assert_eq!(parsed.scr, Clock::base(2_815_200).with_ext(1));
        assert_eq!(parsed.bit_rate, 25_200);
    }

    #[test]
    fn reject_bad_sync_bytes() {
        let mut broken = PACK_HEADER;
        broken[3] = 0xbb;
        assert!(header(&broken[..]).is_err());
    }
}
