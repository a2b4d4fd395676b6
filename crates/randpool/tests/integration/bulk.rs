use std::time::Duration;

use randpool::{CacheError, FetchError};
use randpool_test::{MockFetcher, wait_for};

use crate::utils::{bulk_config, setup_cache};

#[tokio::test]
async fn test_bulk_split() {
    let fetcher = MockFetcher::new();
    fetcher.push_success(60);
    let (cache, fetcher) = setup_cache(fetcher, bulk_config(4, 4, 5, 15));

    wait_for(|| cache.cached_values() == 4).await;
    cache.stop();

    assert_eq!(fetcher.counts(), vec![20]);
    assert_eq!(cache.requests_used(), 1);
    assert_eq!(cache.bits_used(), 60);

    // the last batch of the bulk comes out first
    assert_eq!(cache.get(), Ok(vec![15, 16, 17, 18, 19]));
    assert_eq!(cache.get(), Ok(vec![10, 11, 12, 13, 14]));
    assert_eq!(cache.get(), Ok(vec![5, 6, 7, 8, 9]));
    assert_eq!(cache.get(), Ok(vec![0, 1, 2, 3, 4]));
    assert_eq!(cache.get(), Err(CacheError::Empty { paused: true }));
}

#[tokio::test]
async fn test_bulk_only_when_it_fits() {
    let (cache, fetcher) = setup_cache(MockFetcher::new().gated(), bulk_config(10, 4, 1, 3));

    fetcher.wait_for_calls(1).await;
    assert_eq!(cache.cached_values(), 0);
    fetcher.release(1);

    fetcher.wait_for_calls(2).await;
    assert_eq!(cache.cached_values(), 4);
    fetcher.release(1);

    // 8 batches leave no room for another bulk of 4
    wait_for(|| cache.cached_values() == 8).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 2);

    // a bulk of 4 only fits again once the stack is down to 6 batches
    fetcher.release(1);
    cache.get().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 2);
    cache.get().unwrap();
    wait_for(|| cache.cached_values() == 10).await;
    assert_eq!(fetcher.counts(), vec![4, 4, 4]);
    assert_eq!(fetcher.max_in_flight(), 1);
}

#[tokio::test]
async fn test_insufficient_bits_without_resize() {
    let fetcher = MockFetcher::new();
    fetcher.push_error(FetchError::InsufficientBits { bits_left: 12 });
    let (cache, fetcher) = setup_cache(fetcher, bulk_config(6, 3, 2, 20));

    wait_for(|| cache.error().is_some()).await;

    let expected = Err(CacheError::Terminal(FetchError::InsufficientBits {
        bits_left: 12,
    }));
    assert_eq!(cache.get(), expected);
    assert_eq!(cache.get(), expected);
    assert_eq!(cache.get_or_wait().await, expected);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.counts(), vec![6]);
    assert_eq!(cache.requests_used(), 0);
}

#[tokio::test]
async fn test_insufficient_bits_resize() {
    let fetcher = MockFetcher::new();
    fetcher.push_error(FetchError::InsufficientBits { bits_left: 45 });
    fetcher.push_success(40);
    fetcher.push_success(60);
    let (cache, fetcher) = setup_cache(fetcher, bulk_config(6, 3, 2, 20));

    wait_for(|| cache.cached_values() == 5).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // floor(45 / 20) = 2 batches, then back to the configured bulk of 3
    assert_eq!(fetcher.counts(), vec![6, 4, 6]);
    assert_eq!(cache.requests_used(), 2);
    assert_eq!(cache.bits_used(), 100);
    assert_eq!(cache.error(), None);
}

#[tokio::test]
async fn test_resized_fetch_fails() {
    let fetcher = MockFetcher::new();
    fetcher.push_error(FetchError::InsufficientBits { bits_left: 45 });
    fetcher.push_error(FetchError::InsufficientRequests);
    let (cache, fetcher) = setup_cache(fetcher, bulk_config(6, 3, 2, 20));

    wait_for(|| cache.error().is_some()).await;
    assert_eq!(cache.error(), Some(&FetchError::InsufficientRequests));
    assert_eq!(fetcher.counts(), vec![6, 4]);
    assert_eq!(cache.cached_values(), 0);
}

#[tokio::test]
async fn test_insufficient_bits_single_mode_latches() {
    let fetcher = MockFetcher::new();
    fetcher.push_error(FetchError::InsufficientBits { bits_left: 1_000 });
    let (cache, fetcher) = setup_cache(fetcher, crate::utils::single_config(2));

    wait_for(|| cache.error().is_some()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.counts(), vec![1]);
}
