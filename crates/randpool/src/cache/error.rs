use thiserror::Error;

use crate::fetch::FetchError;

/// An error returned when taking a batch out of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// There is no batch available right now.
    ///
    /// If the cache is `paused`, it will stay empty until it is resumed. Otherwise it is
    /// being refilled in the background.
    #[error("cache is empty (paused: {paused})")]
    Empty { paused: bool },
    /// A fetch failed in a way the cache cannot recover from.
    ///
    /// The cache will not fetch any more values. Every further access returns this error.
    #[error("cache disabled: {0}")]
    Terminal(FetchError),
}

impl CacheError {
    /// Whether this error is permanent.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub(super) fn metrics_tag(&self) -> &'static str {
        match self {
            Self::Empty { paused: false } => "empty",
            Self::Empty { paused: true } => "paused",
            Self::Terminal(_) => "terminal",
        }
    }
}
