//! Integration tests for per-sector file locks.

use std::time::Duration;

use sealer_core::{SealerError, SectorId};
use sealer_stores::{IndexLocks, SectorFileType};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn sector(n: u64) -> SectorId {
    SectorId::new(1000, n)
}

#[tokio::test]
async fn empty_request_takes_no_lock() {
    let locks = IndexLocks::new();
    let ctx = CancellationToken::new();
    let guard = locks
        .lock(&ctx, sector(1), SectorFileType::NONE, SectorFileType::NONE)
        .await
        .unwrap();
    assert!(guard.is_none());
    assert!(locks.is_empty());
}

#[tokio::test]
async fn unknown_file_types_are_rejected() {
    let locks = IndexLocks::new();
    let err = locks
        .try_lock(sector(1), SectorFileType::from_bits_retain(0b1000), SectorFileType::NONE)
        .err()
        .expect("expected an error");
    assert!(matches!(err, SealerError::UnknownFileTypes(0b1000)));
    assert!(locks.is_empty());
}

#[tokio::test]
async fn write_lock_blocks_until_reader_drops() {
    let locks = IndexLocks::new();
    let ctx = CancellationToken::new();

    let reader = locks
        .lock(&ctx, sector(2), SectorFileType::SEALED, SectorFileType::NONE)
        .await
        .unwrap()
        .expect("reader lock");

    assert!(locks
        .try_lock(sector(2), SectorFileType::NONE, SectorFileType::SEALED)
        .unwrap()
        .is_none());

    let writer_locks = locks.clone();
    let writer_ctx = ctx.clone();
    let writer = tokio::spawn(async move {
        writer_locks
            .lock(&writer_ctx, sector(2), SectorFileType::NONE, SectorFileType::SEALED)
            .await
            .map(|g| g.is_some())
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!writer.is_finished(), "writer must wait for the reader");

    drop(reader);
    let got = tokio::time::timeout(TIMEOUT, writer).await.unwrap().unwrap().unwrap();
    assert!(got);
    assert!(locks.is_empty(), "entry should be removed once unreferenced");
}

#[tokio::test]
async fn different_file_types_do_not_conflict() {
    let locks = IndexLocks::new();
    let _cache = locks
        .try_lock(sector(3), SectorFileType::NONE, SectorFileType::CACHE)
        .unwrap()
        .expect("cache write");
    let unsealed = locks
        .try_lock(sector(3), SectorFileType::NONE, SectorFileType::UNSEALED)
        .unwrap();
    assert!(unsealed.is_some());

    // Same file type on another sector is independent too.
    let other = locks
        .try_lock(sector(4), SectorFileType::NONE, SectorFileType::CACHE)
        .unwrap();
    assert!(other.is_some());
}

#[tokio::test]
async fn cancelled_wait_returns_error_and_cleans_up() {
    let locks = IndexLocks::new();
    let ctx = CancellationToken::new();
    let held = locks
        .lock(&ctx, sector(5), SectorFileType::NONE, SectorFileType::SEALED)
        .await
        .unwrap()
        .expect("writer");

    let waiter_ctx = CancellationToken::new();
    let canceller = waiter_ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let res = tokio::time::timeout(
        TIMEOUT,
        locks.lock(&waiter_ctx, sector(5), SectorFileType::SEALED, SectorFileType::NONE),
    )
    .await
    .unwrap();
    assert!(matches!(res, Err(SealerError::Cancelled)));

    assert_eq!(locks.len(), 1);
    drop(held);
    assert!(locks.is_empty());
}

#[test]
fn guard_releases_without_a_runtime() {
    let locks = IndexLocks::new();
    let writer = locks
        .try_lock(sector(6), SectorFileType::NONE, SectorFileType::SEALED)
        .unwrap()
        .expect("writer");
    drop(writer);

    let reader = locks
        .try_lock(sector(6), SectorFileType::SEALED, SectorFileType::NONE)
        .unwrap();
    assert!(reader.is_some(), "released lock must be free straight away");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn release_under_contention_is_immediate() {
    let locks = IndexLocks::new();
    let ctx = CancellationToken::new();

    // Keeps the sector's entry busy with readers coming and going.
    let stop = CancellationToken::new();
    let churn_locks = locks.clone();
    let churn_stop = stop.clone();
    let churn = tokio::spawn(async move {
        while !churn_stop.is_cancelled() {
            let _ = churn_locks.try_lock(sector(7), SectorFileType::CACHE, SectorFileType::NONE);
            tokio::task::yield_now().await;
        }
    });

    for _ in 0..200 {
        let writer = locks
            .lock(&ctx, sector(7), SectorFileType::NONE, SectorFileType::SEALED)
            .await
            .unwrap()
            .expect("writer");
        drop(writer);
        let again = locks
            .try_lock(sector(7), SectorFileType::NONE, SectorFileType::SEALED)
            .unwrap();
        assert!(again.is_some(), "write lock must be reusable right after release");
    }

    stop.cancel();
    churn.await.unwrap();
}
