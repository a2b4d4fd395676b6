use crate::config::CacheConfig;

/// The batches held by a cache, consumed most recent first.
#[derive(Debug)]
pub(super) struct Stack<T> {
    batches: Vec<Vec<T>>,
}

impl<T> Stack<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            batches: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn push(&mut self, batch: Vec<T>) {
        self.batches.push(batch);
    }

    /// Splits `data` into batches of `results_per_batch` values and pushes them in order.
    ///
    /// The last chunk is shorter if `data` does not divide evenly. Returns the number of
    /// pushed batches.
    pub fn push_chunks(&mut self, data: Vec<T>, results_per_batch: usize) -> usize {
        let results_per_batch = results_per_batch.max(1);
        let mut data = data.into_iter().peekable();
        let mut pushed = 0;
        while data.peek().is_some() {
            self.batches
                .push(data.by_ref().take(results_per_batch).collect());
            pushed += 1;
        }
        pushed
    }

    pub fn pop(&mut self) -> Option<Vec<T>> {
        self.batches.pop()
    }

    /// Whether a regular fetch would still fit without exceeding the target depth.
    pub fn has_room(&self, config: &CacheConfig) -> bool {
        if config.is_bulk() {
            config
                .target_depth
                .checked_sub(config.bulk_batch_count)
                .is_some_and(|limit| self.len() <= limit)
        } else {
            self.len() < config.target_depth
        }
    }
}
