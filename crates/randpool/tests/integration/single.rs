use std::time::Duration;

use randpool::{CacheError, FetchError};
use randpool_test::{MockFetcher, wait_for};

use crate::utils::{setup_cache, single_config};

#[tokio::test]
async fn test_settles_and_refills() {
    let (cache, fetcher) = setup_cache(MockFetcher::new(), single_config(2));

    wait_for(|| cache.cached_values() == 2).await;
    assert_eq!(cache.requests_used(), 2);

    assert_eq!(cache.get(), Ok(vec![1]));

    // the cache refills on its own, without further calls
    wait_for(|| cache.cached_values() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(cache.cached_values(), 2);
    assert_eq!(fetcher.counts(), vec![1, 1, 1]);
}

#[tokio::test]
async fn test_accounting() {
    let fetcher = MockFetcher::new();
    fetcher.push_success(5);
    fetcher.push_success(7);
    fetcher.push_success(11);
    let (cache, _fetcher) = setup_cache(fetcher, single_config(3));

    wait_for(|| cache.cached_values() == 3).await;
    assert_eq!(cache.requests_used(), 3);
    assert_eq!(cache.bits_used(), 23);
}

#[tokio::test]
async fn test_one_fetch_at_a_time() {
    let target_depth = 4;
    let (cache, fetcher) = setup_cache(MockFetcher::new().gated(), single_config(target_depth));

    for call in 1..=target_depth {
        fetcher.wait_for_calls(call).await;
        assert_eq!(fetcher.in_flight(), 1);
        // the fetch was issued at this depth, and has not delivered yet
        assert!(cache.cached_values() < target_depth);
        assert_eq!(cache.cached_values(), call - 1);
        fetcher.release(1);
    }

    wait_for(|| cache.cached_values() == target_depth).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), target_depth);
    assert_eq!(fetcher.max_in_flight(), 1);
}

#[tokio::test]
async fn test_lifo_order() {
    let (cache, fetcher) = setup_cache(MockFetcher::new().gated(), single_config(3));

    fetcher.release(3);
    wait_for(|| cache.cached_values() == 3).await;
    cache.stop();

    assert_eq!(cache.get(), Ok(vec![2]));
    assert_eq!(cache.get(), Ok(vec![1]));
    assert_eq!(cache.get(), Ok(vec![0]));
    assert_eq!(cache.get(), Err(CacheError::Empty { paused: true }));
}

#[tokio::test]
async fn test_error_latches() {
    let fetcher = MockFetcher::new();
    fetcher.push_success(3);
    fetcher.push_error(FetchError::Service {
        code: 402,
        message: "account frozen".into(),
    });
    let (cache, fetcher) = setup_cache(fetcher, single_config(3));

    wait_for(|| cache.error().is_some()).await;
    assert_eq!(cache.cached_values(), 1);

    let expected = CacheError::Terminal(FetchError::Service {
        code: 402,
        message: "account frozen".into(),
    });
    // the error takes precedence over the batch that is still cached
    assert_eq!(cache.get(), Err(expected.clone()));
    assert_eq!(cache.get(), Err(expected.clone()));
    assert!(expected.is_terminal());
    assert_eq!(cache.cached_values(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(cache.requests_used(), 1);
    assert_eq!(cache.bits_used(), 3);
}
