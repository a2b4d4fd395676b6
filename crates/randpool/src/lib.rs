//! A self-populating cache of pre-fetched random value batches.
//!
//! See [`cache`] for how the cache keeps itself filled, and [`fetch`] for the contract a
//! transport has to implement to feed it.

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod request;

pub use cache::{CacheError, RandomCache};
pub use config::CacheConfig;
pub use fetch::{FetchError, FetchResult, Fetcher, Response};
