//! Sector storage primitives shared by sealing workers.
//!
//! Currently this is the per-sector file lock table used to serialise access
//! to unsealed / sealed / cache files while tasks move or read them.

pub mod filetype;
pub mod index_locks;

pub use filetype::SectorFileType;
pub use index_locks::{IndexLocks, SectorLockGuard};
