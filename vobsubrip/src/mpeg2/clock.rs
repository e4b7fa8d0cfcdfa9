//! # MPEG-2 clock values
//!
//! These are used as PTS and DTS timestamps and as the System Clock
//! Reference in pack headers.  The base value counts at 90 kHz; the
//! 9-bit extension (where present) subdivides each tick by 300.

use std::fmt;

use nom::bits::complete::{tag as tag_bits, take as take_bits};
use nom::IResult;

/// Frequency of the base clock, in Hz.
const TICKS_PER_SECOND: u64 = 90_000;

/// Bit-oriented input, as used by `nom::bits` parsers.
pub(crate) type BitsInput<'a> = (&'a [u8], usize);

/// A 33-bit MPEG-2 clock value with an optional 9-bit extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clock {
    base: u64,
    ext: u16,
}

impl Clock {
    /// Construct a clock from a 33-bit base value.
    pub fn base(base: u64) -> Clock {
        Clock { base, ext: 0 }
    }

    /// Attach an extension field to this clock.
    pub fn with_ext(self, ext: u16) -> Clock {
        Clock { ext, ..self }
    }

    /// The clock value in seconds.
    pub fn to_seconds(self) -> f64 {
        let ticks = self.base as f64 + self.ext as f64 / 300.0;
        ticks / TICKS_PER_SECOND as f64
    }

    /// The clock value in milliseconds, discarding the extension.
    pub fn to_ms(self) -> i64 {
        (self.base / (TICKS_PER_SECOND / 1000)) as i64
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:1.5}", self.to_seconds())
    }
}

/// Parse a single marker bit, which must be 1.
fn marker(i: BitsInput) -> IResult<BitsInput, u8> {
    tag_bits(0b1, 1usize)(i)
}

/// Parse a 33-bit clock value, validating the marker bits that interrupt
/// it.  Consumes 36 bits.
pub(crate) fn clock(i: BitsInput) -> IResult<BitsInput, Clock> {
    let (i, hi): (_, u64) = take_bits(3usize)(i)?;
    let (i, _) = marker(i)?;
    let (i, mid): (_, u64) = take_bits(15usize)(i)?;
    let (i, _) = marker(i)?;
    let (i, lo): (_, u64) = take_bits(15usize)(i)?;
    let (i, _) = marker(i)?;
    Ok((i, Clock::base(hi << 30 | mid << 15 | lo)))
}

/// Parse a clock value followed by a 9-bit extension.  Consumes 46 bits.
pub(crate) fn clock_and_ext(i: BitsInput) -> IResult<BitsInput, Clock> {
    let (i, clock) = clock(i)?;
    let (i, ext): (_, u16) = take_bits(9usize)(i)?;
    let (i, _) = marker(i)?;
    Ok((i, clock.with_ext(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_clock() {
        // The 5-byte PTS encoding from a real subtitle packet, minus the
        // leading 4-bit tag.
        let input = &[0x21, 0x00, 0xab, 0xe9, 0xc1][..];
        let ((rest, offset), value) = clock((input, 4)).unwrap();
        assert_eq!(rest, &[][..]);
        assert_eq!(offset, 0);
        assert_eq!(value, Clock::base(2_815_200));
    }

    #[test]
    fn reject_cleared_marker_bit() {
        // Same as above, with the final marker bit zeroed.
        let input = &[0x21, 0x00, 0xab, 0xe9, 0xc0][..];
        assert!(clock((input, 4)).is_err());
    }

    #[test]
    fn clock_to_ms() {
        assert_eq!(Clock::base(2_815_200).to_ms(), 31_280);
    }
}
