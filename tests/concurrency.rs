//! Concurrent admission against a single key.

use std::sync::Arc;
use std::time::Duration;

use keel_ratelimit::storage::{GcConfig, MemoryStorage};
use keel_ratelimit::{Algorithm, LimiterConfig, LimiterFactory};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

const CALLERS: usize = 50;
const LIMIT: u64 = 10;

async fn admitted_under_contention(algorithm: &str) -> (usize, usize) {
    let storage = Arc::new(MemoryStorage::with_gc(GcConfig::manual()));
    let limiter = Arc::new(
        LimiterFactory::create(
            LimiterConfig::new(algorithm, LIMIT, Duration::from_secs(60)).with_storage(storage),
        )
        .unwrap(),
    );
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                limiter
                    .allow("hot:key", &CancellationToken::new())
                    .await
                    .unwrap()
                    .is_allowed()
            })
        })
        .collect();

    let mut allowed = 0;
    let mut denied = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        } else {
            denied += 1;
        }
    }
    (allowed, denied)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_token_bucket_never_over_admits() {
    let (allowed, denied) = admitted_under_contention("token_bucket").await;
    assert_eq!(allowed, LIMIT as usize);
    assert_eq!(denied, CALLERS - LIMIT as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_sliding_window_never_over_admits() {
    let (allowed, denied) = admitted_under_contention("sliding_window").await;
    assert_eq!(allowed, LIMIT as usize);
    assert_eq!(denied, CALLERS - LIMIT as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_contended_keys_stay_isolated() {
    let storage = Arc::new(MemoryStorage::with_gc(GcConfig::manual()));
    let limiter = Arc::new(
        LimiterFactory::create(
            LimiterConfig::new("token_bucket", 3, Duration::from_secs(60)).with_storage(storage),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let key = format!("tenant:{}", i % 4);
                let allowed = limiter
                    .allow(&key, &CancellationToken::new())
                    .await
                    .unwrap()
                    .is_allowed();
                (i % 4, allowed)
            })
        })
        .collect();

    let mut per_key = [0u64; 4];
    for handle in handles {
        let (key, allowed) = handle.await.unwrap();
        if allowed {
            per_key[key] += 1;
        }
    }
    assert_eq!(per_key, [3, 3, 3, 3]);
}
