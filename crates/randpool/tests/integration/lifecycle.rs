use std::time::Duration;

use randpool::{CacheError, FetchError};
use randpool_test::{MockFetcher, wait_for};

use crate::utils::{setup_cache, single_config};

#[tokio::test]
async fn test_stop_during_fetch() {
    let (cache, fetcher) = setup_cache(MockFetcher::new().gated(), single_config(3));

    fetcher.wait_for_calls(1).await;
    cache.stop();
    assert!(cache.is_paused());

    // the fetch in flight still delivers
    fetcher.release(5);
    wait_for(|| cache.cached_values() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.cached_values(), 1);

    // consuming while paused does not refill
    assert_eq!(cache.get(), Ok(vec![0]));
    assert_eq!(cache.get(), Err(CacheError::Empty { paused: true }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 1);

    cache.resume();
    assert!(!cache.is_paused());
    wait_for(|| cache.cached_values() == 3).await;
    assert_eq!(fetcher.calls(), 4);
}

#[tokio::test]
async fn test_get_or_wait_paused() {
    let (cache, fetcher) = setup_cache(MockFetcher::new().gated(), single_config(2));
    cache.stop();

    assert_eq!(
        cache.get_or_wait().await,
        Err(CacheError::Empty { paused: true })
    );
    fetcher.release(1);
}

#[tokio::test]
async fn test_get_or_wait_waits_for_refill() {
    let fetcher = MockFetcher::new().with_delay(Duration::from_millis(30));
    let (cache, _fetcher) = setup_cache(fetcher, single_config(1));

    assert_eq!(cache.get(), Err(CacheError::Empty { paused: false }));
    assert_eq!(cache.get_or_wait().await, Ok(vec![0]));
    assert_eq!(cache.get_or_wait().await, Ok(vec![1]));
}

#[tokio::test]
async fn test_get_or_wait_sees_latched_error() {
    let fetcher = MockFetcher::new().gated();
    fetcher.push_error(FetchError::KeyNotRunning);
    let (cache, fetcher) = setup_cache(fetcher, single_config(2));

    let waiter = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_or_wait().await })
    };

    fetcher.wait_for_calls(1).await;
    fetcher.release(1);

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        result,
        Err(CacheError::Terminal(FetchError::KeyNotRunning))
    );
}

#[tokio::test]
async fn test_get_or_wait_deadline() {
    let (cache, fetcher) = setup_cache(MockFetcher::new().gated(), single_config(2));

    let result = tokio::time::timeout(Duration::from_millis(30), cache.get_or_wait()).await;
    assert!(result.is_err());

    // waiting did not start additional fetches
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(fetcher.max_in_flight(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers() {
    let fetcher = MockFetcher::new().with_delay(Duration::from_millis(1));
    let (cache, fetcher) = setup_cache(fetcher, single_config(2));

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                let mut values = Vec::new();
                for _ in 0..5 {
                    values.extend(cache.get_or_wait().await.unwrap());
                }
                values
            })
        })
        .collect();

    let mut values = Vec::new();
    for consumer in consumers {
        values.extend(consumer.await.unwrap());
    }
    values.sort();
    values.dedup();

    // every value was handed out exactly once
    assert_eq!(values.len(), 20);
    assert_eq!(fetcher.max_in_flight(), 1);
}
