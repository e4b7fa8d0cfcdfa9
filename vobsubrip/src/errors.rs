//! Error types for the ripping engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors with a well-defined cause.  Most call sites propagate these
/// through `anyhow`, but callers who need to distinguish (for example)
/// "a job is already running" from a real failure can downcast.
#[derive(Debug, Error)]
pub enum RipError {
    /// The IFO file did not start with the `DVDVIDEO-VTS` signature.
    #[error("{path}: not a VTS IFO file")]
    BadIfoSignature {
        /// Path of the rejected file.
        path: PathBuf,
    },

    /// A sector did not begin with an MPEG-2 pack start code.
    #[error("bad pack header in sector {sector}")]
    BadPackHeader {
        /// Index of the offending sector, counted from the start of the
        /// VOB set.
        sector: u64,
    },

    /// A scrambled chunk yielded no CSS key.
    #[error("could not find the CSS key for vob {vob} cell {cell}")]
    NoCssKey {
        /// VOB id of the chunk that defeated the key search.
        vob: u16,
        /// Cell id of the chunk.
        cell: u16,
    },

    /// The whole scan produced no navigation packs, so there is no
    /// timeline to anchor subtitle times to.
    #[error("no navigation packs found")]
    NoTimeline,

    /// `Ripper::index` was called while a job was already running.
    #[error("an indexing job is already running")]
    Busy,

    /// The rip configuration does not match the loaded IFO.
    #[error("invalid rip configuration: {0}")]
    Config(String),

    /// A parameter file line did not match the grammar of its phase.
    #[error("parameter file line {line}: {message}")]
    ParamFile {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// We could not parse binary data.
    #[error("could not parse: {0}")]
    Parse(String),
}
