//! Helpers for testing the random value cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - A [`MockFetcher`] is usually shared with the cache under test through an `Arc`, so
//!    the test can still inspect the recorded requests and control the fetcher afterwards.
//!
//!  - A [`gated`](MockFetcher::gated) fetcher blocks every fetch until the test lets it
//!    through with [`release`](MockFetcher::release). Use this to observe the cache while a
//!    fetch is in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use randpool::request::{RandomMethod, RequestTemplate};
use randpool::{FetchError, FetchResult, Fetcher, Response};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `randpool` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("randpool=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A request for six-sided dice rolls, drawn with replacement.
pub fn dice() -> RequestTemplate {
    RequestTemplate::new(RandomMethod::Integers {
        min: 1,
        max: 6,
        replacement: true,
    })
}

/// Waits until `condition` holds.
///
/// # Panics
///
/// Panics if the condition does not hold within 5 seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}

/// What the [`MockFetcher`] answers to a single request.
#[derive(Debug, Clone)]
enum Step {
    Success { bits_used: Option<u64> },
    Failure(FetchError),
}

/// A scripted [`Fetcher`] that records all requests.
///
/// Unless scripted otherwise, every fetch succeeds with `count` consecutive integers, starting
/// at 0 for the first fetch and continuing where the previous fetch left off. Each value costs
/// [`bits_per_value`](Self::bits_per_value) bits.
#[derive(Debug)]
pub struct MockFetcher {
    script: Mutex<VecDeque<Step>>,
    counts: Mutex<Vec<usize>>,
    next_value: AtomicI64,
    bits_per_value: u64,
    delay: Duration,
    gate: Option<Semaphore>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self {
            script: Default::default(),
            counts: Default::default(),
            next_value: AtomicI64::new(0),
            bits_per_value: 3,
            delay: Duration::ZERO,
            gate: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks every fetch until it is let through with [`release`](Self::release).
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Delays every fetch by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the bit cost of a single value for unscripted fetches.
    pub fn bits_per_value(mut self, bits: u64) -> Self {
        self.bits_per_value = bits;
        self
    }

    /// Makes the next unanswered fetch succeed with the given bit cost.
    pub fn push_success(&self, bits_used: u64) {
        self.script.lock().unwrap().push_back(Step::Success {
            bits_used: Some(bits_used),
        });
    }

    /// Makes the next unanswered fetch fail.
    pub fn push_error(&self, error: FetchError) {
        self.script.lock().unwrap().push_back(Step::Failure(error));
    }

    /// Lets `fetches` gated fetches complete.
    pub fn release(&self, fetches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(fetches);
        }
    }

    /// The value counts of all fetches so far, including those still in flight.
    pub fn counts(&self) -> Vec<usize> {
        self.counts.lock().unwrap().clone()
    }

    /// The number of fetches so far, including those still in flight.
    pub fn calls(&self) -> usize {
        self.counts.lock().unwrap().len()
    }

    /// The number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The highest number of fetches that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Waits until at least `calls` fetches have been started.
    pub async fn wait_for_calls(&self, calls: usize) {
        wait_for(|| self.calls() >= calls).await
    }

    fn respond(&self, count: usize) -> FetchResult<i64> {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Success { bits_used: None });

        match step {
            Step::Failure(error) => Err(error),
            Step::Success { bits_used } => {
                let start = self.next_value.fetch_add(count as i64, Ordering::SeqCst);
                Ok(Response {
                    bits_used: bits_used.unwrap_or(count as u64 * self.bits_per_value),
                    data: (start..start + count as i64).collect(),
                })
            }
        }
    }
}

impl Fetcher for MockFetcher {
    type Request = RequestTemplate;
    type Item = i64;

    fn fetch<'a>(
        &'a self,
        _request: &'a RequestTemplate,
        count: usize,
    ) -> BoxFuture<'a, FetchResult<i64>> {
        Box::pin(async move {
            self.counts.lock().unwrap().push(count);
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let result = self.respond(count);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}
