use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::Instrument;

use super::Shared;
use crate::fetch::{FetchError, FetchResult, Fetcher, Response};

/// Marks a population task as running, and clears the mark when dropped.
///
/// Dropping the guard also happens when the task panics or is aborted, so the cache never gets
/// stuck believing a population task is still running.
struct PopulatingGuard<F: Fetcher> {
    shared: Arc<Shared<F>>,
}

impl<F: Fetcher> PopulatingGuard<F> {
    fn acquire(shared: &Arc<Shared<F>>) -> Option<Self> {
        shared
            .populating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self {
            shared: Arc::clone(shared),
        })
    }
}

impl<F: Fetcher> Drop for PopulatingGuard<F> {
    fn drop(&mut self) {
        self.shared.populating.store(false, Ordering::Release);
    }
}

impl<F: Fetcher> Shared<F> {
    /// Spawns the population task, unless one is running already.
    ///
    /// Does nothing while the cache is paused or disabled.
    pub(super) fn spawn_population(self: &Arc<Self>) {
        if self.is_paused() || self.error.get().is_some() {
            return;
        }
        let Some(guard) = PopulatingGuard::acquire(self) else {
            return;
        };

        let task = async move {
            guard.shared.populate().await;

            let shared = Arc::clone(&guard.shared);
            drop(guard);
            // a batch may have been taken after the loop decided the stack was full, but
            // before the guard was released
            shared.refresh();
        };
        self.runtime
            .spawn(task.instrument(tracing::debug_span!("cache.populate")));
    }

    /// Fetches until the stack is full, the cache is paused, or a fetch fails for good.
    async fn populate(&self) {
        loop {
            if self.error.get().is_some() || self.is_paused() {
                break;
            }
            if !self.stack.lock().unwrap().has_room(&self.config) {
                break;
            }

            let result = match self.fetch(self.config.request_count()).await {
                Err(FetchError::InsufficientBits { bits_left }) if self.config.is_bulk() => {
                    self.fetch_downsized(bits_left).await
                }
                result => result,
            };

            match result {
                Ok(response) => self.add_response(response),
                Err(err) => {
                    self.latch(err);
                    break;
                }
            }
        }
    }

    /// Retries a bulk fetch once with as many batches as `bits_left` still pays for.
    async fn fetch_downsized(&self, bits_left: u64) -> FetchResult<F::Item> {
        let single_batch_bits = self.config.single_batch_bit_size;
        if single_batch_bits == 0 || bits_left <= single_batch_bits {
            return Err(FetchError::InsufficientBits { bits_left });
        }

        // never more than the configured bulk, so the stack cannot overflow
        let adjusted_bulk = usize::try_from(bits_left / single_batch_bits)
            .unwrap_or(usize::MAX)
            .min(self.config.bulk_batch_count);
        tracing::info!(
            bits_left,
            adjusted_bulk,
            bulk = self.config.bulk_batch_count,
            "Shrinking bulk request to the remaining bit allowance"
        );
        metric!(counter("cache.resize") += 1);

        self.fetch(adjusted_bulk * self.config.results_per_batch)
            .await
    }

    async fn fetch(&self, count: usize) -> FetchResult<F::Item> {
        let mode = if self.config.is_bulk() {
            "bulk"
        } else {
            "single"
        };
        tracing::debug!(count, mode, "Fetching random values");

        let start = Instant::now();
        let result = self
            .fetcher
            .fetch(&self.request, count)
            .await
            .and_then(|response| {
                // batches are cut from the data, so a wrong length would corrupt the stack
                if response.data.len() == count {
                    Ok(response)
                } else {
                    Err(FetchError::BadResponse(format!(
                        "expected {count} values, got {}",
                        response.data.len()
                    )))
                }
            });

        metric!(timer("cache.fetch.duration") = start.elapsed(), "mode" => mode);
        metric!(
            counter("cache.fetch") += 1,
            "mode" => mode,
            "status" => match &result {
                Ok(_) => "ok",
                Err(err) => err.metrics_tag(),
            },
        );
        result
    }

    /// Adds the batches of a successful fetch to the stack and wakes up waiting consumers.
    ///
    /// The response length has already been checked against the requested count.
    fn add_response(&self, response: Response<F::Item>) {
        let Response { bits_used, data } = response;

        let depth = {
            let mut stack = self.stack.lock().unwrap();
            if self.config.is_bulk() {
                stack.push_chunks(data, self.config.results_per_batch);
            } else {
                stack.push(data);
            }
            self.requests_used.fetch_add(1, Ordering::AcqRel);
            self.bits_used.fetch_add(bits_used, Ordering::AcqRel);
            stack.len()
        };

        metric!(gauge("cache.depth") = depth as u64);
        self.pushed.notify_waiters();
    }

    /// Disables the cache for good.
    fn latch(&self, err: FetchError) {
        tracing::error!(
            error = &err as &dyn std::error::Error,
            "Random value cache disabled"
        );
        metric!(counter("cache.latched") += 1, "error" => err.metrics_tag());

        if self.error.set(err).is_err() {
            tracing::warn!("Random value cache was already disabled");
        }
        // waiters have to observe the error instead of waiting for batches
        self.pushed.notify_waiters();
    }
}
