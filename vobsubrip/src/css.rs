//! CSS descrambling seam.
//!
//! Actual key cracking and descrambling belong to an external library;
//! the engine only needs to ask for a key at the start of each scrambled
//! chunk and to descramble individual sectors.

use crate::vob::Sector;

/// A CSS key searcher and sector descrambler.
pub trait CssDecrypter: Send {
    /// Try to recover a title key starting from the given sector.
    /// Returns `true` if a key is now available.
    fn find_key(&mut self, sector: &Sector) -> bool;

    /// Is a title key currently available?
    fn has_key(&self) -> bool;

    /// Descramble one sector in place.
    fn decrypt(&self, sector: &mut Sector);
}

/// A decrypter that never finds a key.  Used for unscrambled sources,
/// where `find_key` is never reached.
#[derive(Debug, Default)]
pub struct NullDecrypter;

impl CssDecrypter for NullDecrypter {
    fn find_key(&mut self, _sector: &Sector) -> bool {
        false
    }

    fn has_key(&self) -> bool {
        false
    }

    fn decrypt(&self, _sector: &mut Sector) {}
}
