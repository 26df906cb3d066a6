use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A PostgreSQL Log Sequence Number: a 64-bit WAL byte position, canonically split
/// into an upper/lower 32-bit half and rendered as uppercase `"X/X"` hex with no
/// leading zeros in either half (§3, §6.3).
///
/// Grounded on `src/pg/wal.rs::WalCursor` (`Display`/`FromStr` over a hex position),
/// but the teacher's cursor additionally carries a timeline id used only by its
/// wal2json-flavoured resumption file; the wire protocol's LSN itself is the single
/// `u64` modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn new(value: u64) -> Self {
        Lsn(value)
    }

    pub fn segment(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn offset(self) -> u32 {
        self.0 as u32
    }

    pub fn from_parts(segment: u32, offset: u32) -> Self {
        Lsn(((segment as u64) << 32) | offset as u64)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.segment(), self.offset())
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| Error::incorrect(format!("invalid LSN {s:?}: expected <hex>/<hex>")))?;
        let hi = u32::from_str_radix(hi, 16)
            .map_err(|_| Error::incorrect(format!("invalid LSN {s:?}: bad upper half")))?;
        let lo = u32::from_str_radix(lo, 16)
            .map_err(|_| Error::incorrect(format!("invalid LSN {s:?}: bad lower half")))?;
        Ok(Lsn::from_parts(hi, lo))
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Lsn(value)
    }
}

impl From<Lsn> for u64 {
    fn from(value: Lsn) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        for n in [0u64, 1, 0xFFFF_FFFF, 0x1_0000_0000, u64::MAX, 0x1698235] {
            let lsn = Lsn::new(n);
            let s = lsn.to_string();
            assert_eq!(s.parse::<Lsn>().unwrap(), lsn, "round trip of {n:x} via {s:?}");
        }
    }

    #[test]
    fn canonical_form_has_no_leading_zeros() {
        assert_eq!(Lsn::from_parts(0x16, 0x1698235).to_string(), "16/1698235");
        assert_eq!(Lsn::ZERO.to_string(), "0/0");
    }

    #[test]
    fn display_is_uppercase() {
        assert_eq!(Lsn::from_parts(0xAB, 0xCD).to_string(), "AB/CD");
    }

    #[test]
    fn ordering_matches_numeric_value() {
        assert!(Lsn::new(10) < Lsn::new(11));
        assert!(Lsn::from_parts(1, 0) > Lsn::from_parts(0, u32::MAX));
    }
}
