use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a sector by the miner actor that owns it and its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorId {
    pub miner: u64,
    pub number: u64,
}

impl SectorId {
    pub fn new(miner: u64, number: u64) -> Self {
        Self { miner, number }
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}
