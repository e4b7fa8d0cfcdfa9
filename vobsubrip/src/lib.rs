//! This library rips the subpicture (subtitle) streams out of a DVD
//! title set: it parses the program-chain tables of a `VTS_xx_0.IFO`
//! file, demultiplexes the MPEG-2 Program Stream spread across the
//! matching VOB files, reconciles presentation timestamps across
//! discontinuous playback cells, and hands back a raw subtitle stream
//! plus per-language packet lists that a `.idx`/`.sub` writer can
//! consume.
//!
//! Ripping runs on a worker thread with cooperative cancellation, and
//! everything a job has to say arrives through a [`Callback`]:
//!
//! ```rust,no_run
//! use vobsubrip::{Callback, Ripper, RipperConfig};
//!
//! struct Console;
//!
//! impl Callback for Console {
//!     fn on_message(&mut self, text: &str) {
//!         eprintln!("{}", text);
//!     }
//!
//!     fn on_finished(&mut self, succeeded: bool) {
//!         eprintln!("finished: {}", succeeded);
//!     }
//! }
//!
//! fn main() -> vobsubrip::Result<()> {
//!     let ripper = Ripper::new();
//!     ripper.set_callback(Box::new(Console));
//!     ripper.set_input("VTS_01_0.IFO")?;
//!     let mut config = RipperConfig::default();
//!     config.stream_ids[0] = true;
//!     ripper.set_config(config)?;
//!     ripper.index()?;
//!     // The results arrive through the callback; afterwards, collect
//!     // them with `Ripper::take_output`.
//!     Ok(())
//! }
//! ```
//!
//! ## Limitations
//!
//! - CSS descrambling is a call contract, not an implementation: plug
//!   in your own [`css::CssDecrypter`] for scrambled sources.
//! - The `.idx`/`.sub` files themselves are not written here; the
//!   [`RipOutput`] carries everything a writer needs.
//! - Only the IFO tables a subtitle ripper needs are decoded.
//!
//! ## Background references
//!
//! - [DVD-Video information](http://dvd.sourceforge.net/dvdinfo/),
//!   particularly the IFO, PES and subpicture pages.
//! - `libdvdread`, which decodes the same IFO tables.

#![warn(missing_docs)]

pub mod cc;
mod chunks;
pub mod css;
mod errors;
pub mod ifo;
pub mod lang;
mod mpeg2;
mod params;
mod rip;
mod ripper;
pub mod vob;

pub use anyhow::{Error, Result};

pub use crate::chunks::{load_chunks, save_chunks, source_checksum, ChunkRange};
pub use crate::errors::RipError;
pub use crate::params::{LangSelection, LangToken, ParamFile};
pub use crate::rip::{LanguageTrack, RipOutput, RipperConfig, SubPos};
pub use crate::ripper::{Callback, Ripper};
pub use crate::vob::SECTOR_SIZE;
