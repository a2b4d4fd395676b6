//! The contract between the cache and the randomness service.
//!
//! The cache does not know how values are obtained. It hands a [`Fetcher`] the request it
//! was configured with together with the number of values it wants, and gets back either a
//! [`Response`] or a [`FetchError`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

/// A successful exchange with the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response<T> {
    /// The number of bits the service charged for this request.
    pub bits_used: u64,
    /// The generated values, in the order the service returned them.
    pub data: Vec<T>,
}

/// A failed exchange with the service.
///
/// The cache only interprets [`InsufficientBits`](Self::InsufficientBits); every other variant
/// permanently disables it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The remaining bit allowance does not cover the request.
    #[error("insufficient bits: {bits_left} bits left")]
    InsufficientBits { bits_left: u64 },
    /// The account has no requests left.
    #[error("insufficient requests left")]
    InsufficientRequests,
    /// The service responded with something that is not a valid response.
    #[error("bad response: {0}")]
    BadResponse(String),
    /// The JSON-RPC layer reported an error.
    #[error("json-rpc error: {0}")]
    JsonRpc(String),
    /// The API key is not running.
    #[error("api key is not running")]
    KeyNotRunning,
    /// The request could not be sent in time.
    #[error("request was not sent after {0:?}")]
    SendTimeout(Duration),
    /// The service reported an error of its own.
    #[error("service error {code}: {message}")]
    Service { code: i64, message: String },
}

impl FetchError {
    pub(crate) fn metrics_tag(&self) -> &'static str {
        match self {
            Self::InsufficientBits { .. } => "insufficient_bits",
            Self::InsufficientRequests => "insufficient_requests",
            Self::BadResponse(_) => "bad_response",
            Self::JsonRpc(_) => "json_rpc",
            Self::KeyNotRunning => "key_not_running",
            Self::SendTimeout(_) => "send_timeout",
            Self::Service { .. } => "service",
        }
    }
}

pub type FetchResult<T> = Result<Response<T>, FetchError>;

/// Performs a single exchange with the randomness service.
pub trait Fetcher: 'static + Send + Sync {
    /// The request template the cache is configured with.
    ///
    /// The cache never inspects or modifies it.
    type Request: 'static + Send + Sync;

    /// A single random value.
    type Item: 'static + Send;

    /// Requests `count` values as described by `request`.
    fn fetch<'a>(
        &'a self,
        request: &'a Self::Request,
        count: usize,
    ) -> BoxFuture<'a, FetchResult<Self::Item>>;
}

impl<F: Fetcher> Fetcher for Arc<F> {
    type Request = F::Request;
    type Item = F::Item;

    fn fetch<'a>(
        &'a self,
        request: &'a Self::Request,
        count: usize,
    ) -> BoxFuture<'a, FetchResult<Self::Item>> {
        (**self).fetch(request, count)
    }
}
