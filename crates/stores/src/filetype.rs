use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Bitmask over the on-disk file kinds a sector owns.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SectorFileType: u8 {
        const UNSEALED = 1 << 0;
        const SEALED = 1 << 1;
        const CACHE = 1 << 2;
    }
}

impl SectorFileType {
    pub const NONE: Self = Self::empty();

    /// Number of distinct file kinds.
    pub const FILE_TYPES: usize = 3;

    /// True if any bit outside the known file kinds is set.
    pub fn has_unknown(self) -> bool {
        Self::from_bits(self.bits()).is_none()
    }

    /// Indices (0..FILE_TYPES) of the kinds present in this mask.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        self.iter_names()
            .map(|(_, kind)| kind.bits().trailing_zeros() as usize)
    }
}

impl fmt::Display for SectorFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; SectorFileType::FILE_TYPES] = ["unsealed", "sealed", "cache"];
        let names: Vec<&str> = self.indices().map(|i| NAMES[i]).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_and_display() {
        let t = SectorFileType::UNSEALED | SectorFileType::CACHE;
        assert_eq!(t.indices().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(t.to_string(), "unsealed|cache");
        assert_eq!(SectorFileType::NONE.to_string(), "none");
    }

    #[test]
    fn unknown_bits_are_detected() {
        assert!(!(SectorFileType::SEALED | SectorFileType::CACHE).has_unknown());
        assert!(SectorFileType::from_bits_retain(0b1000).has_unknown());
        assert!(SectorFileType::from_bits(0b1000).is_none());
        assert_eq!((!SectorFileType::SEALED).bits(), 0b101);
    }

    #[test]
    fn unknown_bits_are_skipped_by_indices() {
        let t = SectorFileType::from_bits_retain(0b1001);
        assert_eq!(t.indices().collect::<Vec<_>>(), vec![0]);
        assert_eq!(t.to_string(), "unsealed");
    }
}
