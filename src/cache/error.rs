//! Errors surfaced by the slab caches.
//!
//! The caches have no failure modes of their own beyond contract violations.
//! Anything a consumer callback returns is passed through untouched.

use thiserror::Error;

/// Contract violations detected by a cache.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache has no slab capacity; only raw predictions can be pulled")]
    NoCapacity,

    #[error("Prediction stream exhausted after {total} predictions")]
    Exhausted { total: usize },

    #[error("Cache observed a failed refill and must be discarded")]
    Poisoned,

    #[error("Raw predictions are only served by zero-capacity caches")]
    HasCapacity,
}

/// Failure of a slab fetch: either a contract violation or a loader error.
#[derive(Error, Debug)]
pub enum FetchError<E> {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Slab loader failed")]
    Loader(#[source] E),
}

impl<E> FetchError<E> {
    /// The contract violation, if this is not a loader failure.
    pub fn cache_error(&self) -> Option<CacheError> {
        match self {
            FetchError::Cache(err) => Some(*err),
            FetchError::Loader(_) => None,
        }
    }
}
