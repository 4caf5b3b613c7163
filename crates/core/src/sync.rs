//! Broadcast-only condition variable whose waits can be cancelled.

use std::sync::{Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::SealerError;

/// Like a condition variable, but broadcast-only and aware of request
/// cancellation.
///
/// Each generation of waiters shares one single-use signal. `broadcast`
/// fires and discards it, so a waiter arriving afterwards gets a fresh one
/// and never observes a stale wake-up.
#[derive(Debug, Default)]
pub struct CtxCond {
    notif: StdMutex<Option<CancellationToken>>,
}

impl CtxCond {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every current waiter. A no-op when nobody is waiting.
    pub fn broadcast(&self) {
        let mut notif = self.notif.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(signal) = notif.take() {
            signal.cancel();
        }
    }

    /// Signal fired by the next `broadcast`.
    ///
    /// For callers guarding their state with a synchronous lock: take the
    /// signal while still holding it, release, then await `cancelled()`.
    pub fn notified(&self) -> CancellationToken {
        let mut notif = self.notif.lock().unwrap_or_else(PoisonError::into_inner);
        notif.get_or_insert_with(CancellationToken::new).clone()
    }

    /// Release `guard`, block until the next `broadcast` or until `ctx` is
    /// cancelled, then re-acquire `lock`.
    ///
    /// `guard` must have been obtained from `lock`. The lock is held again on
    /// return whichever way the wait ended.
    pub async fn wait<'a, T>(
        &self,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        ctx: &CancellationToken,
    ) -> (MutexGuard<'a, T>, Result<(), SealerError>) {
        // Taken before releasing `lock` so a broadcast issued right after the
        // caller's state change is not missed.
        let signal = self.notified();
        drop(guard);

        let res = tokio::select! {
            _ = signal.cancelled() => Ok(()),
            _ = ctx.cancelled() => Err(SealerError::Cancelled),
        };

        (lock.lock().await, res)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn broadcast_without_waiters_is_harmless() {
        let cond = CtxCond::new();
        cond.broadcast();
        cond.broadcast();

        let lock = Mutex::new(());
        let ctx = CancellationToken::new();
        let guard = lock.lock().await;

        // A stale broadcast must not wake a later wait.
        let waited = tokio::time::timeout(Duration::from_millis(100), cond.wait(&lock, guard, &ctx)).await;
        assert!(waited.is_err(), "wait returned without a broadcast");
    }

    #[tokio::test]
    async fn cancellation_unblocks_and_relocks() {
        let cond = CtxCond::new();
        let lock = Mutex::new(5u32);
        let ctx = CancellationToken::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let guard = lock.lock().await;
        let (guard, res) = cond.wait(&lock, guard, &ctx).await;
        assert!(matches!(res, Err(SealerError::Cancelled)));
        assert_eq!(*guard, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn broadcast_wakes_all_waiters() {
        let cond = Arc::new(CtxCond::new());
        let lock = Arc::new(Mutex::new(false));
        let mut handles = Vec::new();

        for _ in 0..3 {
            let cond = cond.clone();
            let lock = lock.clone();
            handles.push(tokio::spawn(async move {
                let ctx = CancellationToken::new();
                let mut guard = lock.lock().await;
                while !*guard {
                    let (g, res) = cond.wait(&lock, guard, &ctx).await;
                    res.unwrap();
                    guard = g;
                }
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        *lock.lock().await = true;
        cond.broadcast();

        for h in handles {
            tokio::time::timeout(Duration::from_secs(5), h)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
    }
}
