//! # The random value cache
//!
//! Fetching random values from a remote service is slow compared to how often they are
//! usually needed. A [`RandomCache`] hides that latency by keeping a stack of pre-fetched
//! batches around, and refilling it in the background whenever a batch is taken out.
//!
//! ## Population
//!
//! The cache tries to keep [`CacheConfig::target_depth`] batches ready. A single background
//! task (the "population task") repeatedly asks the [`Fetcher`] for more values until the
//! stack is full. There is never more than one population task, and thus never more than one
//! fetch in flight per cache. The task is started when the cache is created, after every
//! successful [`get`](RandomCache::get) that leaves room for another fetch, and on
//! [`resume`](RandomCache::resume).
//!
//! In bulk mode ([`CacheConfig::bulk_batch_count`] > 0) one fetch yields several batches.
//! A bulk fetch is only issued while the whole bulk still fits into the stack.
//!
//! When the service reports that the remaining bit allowance does not cover a bulk fetch,
//! the cache retries exactly once with the number of batches that still fit into the
//! allowance, based on [`CacheConfig::single_batch_bit_size`]. The request template itself is
//! never modified, the shrunk size is only passed to that one fetch.
//!
//! ## Errors
//!
//! Any other fetch failure disables the cache for good: the error is latched and returned as
//! [`CacheError::Terminal`] from every subsequent access. There is no way to recover a
//! disabled cache other than creating a new one.
//!
//! ## Ordering
//!
//! Batches are served most recent first. Within a bulk, batches are pushed in the order the
//! service returned the values, so the last values of a bulk are consumed first.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::config::CacheConfig;
use crate::fetch::{FetchError, Fetcher};

mod error;
mod populate;
mod stack;

pub use error::CacheError;

use stack::Stack;

/// State shared between the cache handles and the population task.
struct Shared<F: Fetcher> {
    fetcher: F,
    request: F::Request,
    config: CacheConfig,
    runtime: Handle,

    stack: Mutex<Stack<F::Item>>,
    paused: AtomicBool,
    /// Set while a population task is running.
    populating: AtomicBool,
    error: OnceLock<FetchError>,

    bits_used: AtomicU64,
    requests_used: AtomicU64,

    /// Notified whenever batches are pushed or an error is latched.
    pushed: Notify,
}

impl<F: Fetcher> Shared<F> {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn cached_values(&self) -> usize {
        self.stack.lock().unwrap().len()
    }

    /// Starts the population task if the stack has room for another fetch.
    fn refresh(self: &Arc<Self>) {
        let has_room = self.stack.lock().unwrap().has_room(&self.config);
        if has_room {
            self.spawn_population();
        }
    }
}

/// A self-populating cache of random value batches.
///
/// Cloning a `RandomCache` is cheap and yields another handle to the same cache.
pub struct RandomCache<F: Fetcher> {
    shared: Arc<Shared<F>>,
}

impl<F: Fetcher> Clone for RandomCache<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: Fetcher> fmt::Debug for RandomCache<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomCache")
            .field("config", &self.shared.config)
            .field("cached_values", &self.cached_values())
            .field("paused", &self.is_paused())
            .field(
                "populating",
                &self.shared.populating.load(Ordering::Relaxed),
            )
            .field("error", &self.shared.error.get())
            .finish()
    }
}

impl<F: Fetcher> RandomCache<F> {
    /// Creates a new cache and immediately starts populating it.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new(fetcher: F, request: F::Request, mut config: CacheConfig) -> Self {
        config.results_per_batch = config.results_per_batch.max(1);

        let shared = Arc::new(Shared {
            fetcher,
            request,
            config,
            runtime: Handle::current(),
            stack: Mutex::new(Stack::with_capacity(config.target_depth)),
            paused: AtomicBool::new(false),
            populating: AtomicBool::new(false),
            error: OnceLock::new(),
            bits_used: AtomicU64::new(0),
            requests_used: AtomicU64::new(0),
            pushed: Notify::new(),
        });
        shared.spawn_population();

        Self { shared }
    }

    /// The configuration this cache was created with.
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Takes the most recently fetched batch out of the cache.
    ///
    /// This never waits. See [`get_or_wait`](Self::get_or_wait) for a variant that waits for
    /// the cache to be refilled.
    pub fn get(&self) -> Result<Vec<F::Item>, CacheError> {
        let result = self.take();
        let tag = match &result {
            Ok(_) => "hit",
            Err(err) => err.metrics_tag(),
        };
        metric!(counter("cache.access") += 1, "result" => tag);
        result
    }

    fn take(&self) -> Result<Vec<F::Item>, CacheError> {
        if let Some(err) = self.shared.error.get() {
            return Err(CacheError::Terminal(err.clone()));
        }

        let batch = self.shared.stack.lock().unwrap().pop();
        match batch {
            Some(batch) => {
                tracing::trace!(len = batch.len(), "Taking batch from cache");
                self.shared.refresh();
                Ok(batch)
            }
            None => Err(CacheError::Empty {
                paused: self.is_paused(),
            }),
        }
    }

    /// Takes the most recently fetched batch out of the cache, waiting for one if necessary.
    ///
    /// Errors if the cache is paused and empty, or if it has been disabled by a fetch error.
    /// Otherwise, this waits until a batch becomes available, with no upper bound. Use
    /// [`tokio::time::timeout`] to limit the wait.
    pub async fn get_or_wait(&self) -> Result<Vec<F::Item>, CacheError> {
        loop {
            let pushed = self.shared.pushed.notified();
            tokio::pin!(pushed);
            // register before looking, so a push in between is not lost
            pushed.as_mut().enable();

            match self.get() {
                Err(CacheError::Empty { paused: false }) => {}
                result => return result,
            }

            self.shared.spawn_population();
            // another waiter may have taken the batch we were woken up for, so poll as well
            let _ = tokio::time::timeout(self.shared.config.wait_interval, pushed).await;
        }
    }

    /// Pauses the cache.
    ///
    /// A fetch that is already in flight still completes and its batches are added, but no
    /// further fetches are started until [`resume`](Self::resume) is called.
    pub fn stop(&self) {
        tracing::debug!("Pausing random value cache");
        self.shared.paused.store(true, Ordering::Release);
    }

    /// Resumes a paused cache and starts refilling it if needed.
    pub fn resume(&self) {
        tracing::debug!("Resuming random value cache");
        self.shared.paused.store(false, Ordering::Release);
        self.shared.refresh();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// The number of batches currently held.
    pub fn cached_values(&self) -> usize {
        self.shared.cached_values()
    }

    /// The total number of bits charged by successful fetches.
    pub fn bits_used(&self) -> u64 {
        self.shared.bits_used.load(Ordering::Acquire)
    }

    /// The number of successful fetches. A bulk fetch counts as one request.
    pub fn requests_used(&self) -> u64 {
        self.shared.requests_used.load(Ordering::Acquire)
    }

    /// The error that disabled this cache, if any.
    pub fn error(&self) -> Option<&FetchError> {
        self.shared.error.get()
    }
}
