//! Closed-caption extraction seam.
//!
//! Line-21 caption decoding is a separate concern; when the caller asks
//! for captions, the engine hands every video pack to this sink along
//! with the reconciled presentation time.

use crate::vob::Sector;

/// A consumer of video packs carrying closed-caption data.
pub trait ClosedCaptionSink: Send {
    /// Offer one video sector at the given presentation time.
    fn extract(&mut self, time_ms: i64, sector: &Sector);
}

/// A sink that discards everything.
#[derive(Debug, Default)]
pub struct NullCcSink;

impl ClosedCaptionSink for NullCcSink {
    fn extract(&mut self, _time_ms: i64, _sector: &Sector) {}
}
