//! Per-sector read/write locks over sector file kinds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use sealer_core::{CtxCond, SealerError, SectorId};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::filetype::SectorFileType;

#[derive(Debug, Default)]
struct LockState {
    readers: [u32; SectorFileType::FILE_TYPES],
    writers: SectorFileType,
}

impl LockState {
    fn can_lock(&self, read: SectorFileType, write: SectorFileType) -> bool {
        if write.indices().any(|i| self.readers[i] > 0) {
            return false;
        }
        !self.writers.intersects(read) && !self.writers.intersects(write)
    }

    fn try_lock(&mut self, read: SectorFileType, write: SectorFileType) -> bool {
        if !self.can_lock(read, write) {
            return false;
        }
        for i in read.indices() {
            self.readers[i] += 1;
        }
        self.writers = self.writers | write;
        true
    }

    fn unlock(&mut self, read: SectorFileType, write: SectorFileType) {
        for i in read.indices() {
            self.readers[i] = self.readers[i].saturating_sub(1);
        }
        self.writers = self.writers & !write;
    }
}

#[derive(Debug, Default)]
struct SectorLock {
    state: StdMutex<LockState>,
    cond: CtxCond,
}

impl SectorLock {
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lock(&self, ctx: &CancellationToken, read: SectorFileType, write: SectorFileType) -> Result<(), SealerError> {
        loop {
            let signal = {
                let mut state = self.state();
                if state.try_lock(read, write) {
                    return Ok(());
                }
                self.cond.notified()
            };

            tokio::select! {
                _ = signal.cancelled() => {}
                _ = ctx.cancelled() => return Err(SealerError::Cancelled),
            }
        }
    }

    fn try_lock(&self, read: SectorFileType, write: SectorFileType) -> bool {
        self.state().try_lock(read, write)
    }

    fn unlock(&self, read: SectorFileType, write: SectorFileType) {
        self.state().unlock(read, write);
        self.cond.broadcast();
    }
}

struct LockEntry {
    lock: Arc<SectorLock>,
    refs: usize,
}

type LockTable = Arc<StdMutex<HashMap<SectorId, LockEntry>>>;

/// Lock table keyed by sector. Entries exist only while someone holds or
/// waits for a lock on that sector.
#[derive(Clone, Default)]
pub struct IndexLocks {
    locks: LockTable,
}

impl IndexLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the requested file kinds can be locked, or `ctx` is cancelled.
    ///
    /// Returns `Ok(None)` when nothing was requested.
    pub async fn lock(
        &self,
        ctx: &CancellationToken,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> Result<Option<SectorLockGuard>, SealerError> {
        let Some(slk) = self.acquire_entry(sector, read, write)? else {
            return Ok(None);
        };

        match slk.lock(ctx, read, write).await {
            Ok(()) => Ok(Some(self.guard(sector, slk, read, write))),
            Err(e) => {
                debug!(sector = %sector, %read, %write, "sector lock wait cancelled");
                self.release_entry(sector);
                Err(e)
            }
        }
    }

    /// Lock without waiting. Returns `Ok(None)` if a conflicting lock is held
    /// or nothing was requested.
    pub fn try_lock(
        &self,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> Result<Option<SectorLockGuard>, SealerError> {
        let Some(slk) = self.acquire_entry(sector, read, write)? else {
            return Ok(None);
        };

        if slk.try_lock(read, write) {
            Ok(Some(self.guard(sector, slk, read, write)))
        } else {
            self.release_entry(sector);
            Ok(None)
        }
    }

    /// Number of sectors with live lock entries.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn acquire_entry(
        &self,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> Result<Option<Arc<SectorLock>>, SealerError> {
        let wanted = read | write;
        if wanted.is_empty() {
            return Ok(None);
        }
        if wanted.has_unknown() {
            return Err(SealerError::UnknownFileTypes(wanted.bits()));
        }

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = locks.entry(sector).or_insert_with(|| LockEntry {
            lock: Arc::new(SectorLock::default()),
            refs: 0,
        });
        entry.refs += 1;
        Ok(Some(entry.lock.clone()))
    }

    fn release_entry(&self, sector: SectorId) {
        release_entry(&self.locks, sector);
    }

    fn guard(&self, sector: SectorId, lock: Arc<SectorLock>, read: SectorFileType, write: SectorFileType) -> SectorLockGuard {
        SectorLockGuard {
            table: self.locks.clone(),
            sector,
            lock,
            read,
            write,
        }
    }
}

fn release_entry(table: &LockTable, sector: SectorId) {
    let mut locks = table.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = locks.get_mut(&sector) {
        entry.refs -= 1;
        if entry.refs == 0 {
            locks.remove(&sector);
        }
    }
}

/// Held sector lock; released on drop.
pub struct SectorLockGuard {
    table: LockTable,
    sector: SectorId,
    lock: Arc<SectorLock>,
    read: SectorFileType,
    write: SectorFileType,
}

impl SectorLockGuard {
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    pub fn read(&self) -> SectorFileType {
        self.read
    }

    pub fn write(&self) -> SectorFileType {
        self.write
    }
}

impl Drop for SectorLockGuard {
    fn drop(&mut self) {
        self.lock.unlock(self.read, self.write);
        release_entry(&self.table, self.sector);
    }
}
