//! Prediction sources for oracular caches.
//!
//! An oracle is a finite, immutable sequence of target-dimension indices the
//! consumer promises to request, in order. Oracles are shared behind an `Arc`
//! so several caches (e.g. one per extraction cursor) can read the same
//! sequence, each through its own [`PredictionStream`].

use std::sync::Arc;

use crate::cache::error::CacheError;

/// A finite sequence of predicted target-dimension indices.
pub trait Oracle: Send + Sync {
    /// Number of predictions.
    fn total(&self) -> usize;

    /// Prediction at `position`, which must be less than [`Oracle::total`].
    fn get(&self, position: usize) -> usize;
}

/// Oracle over an explicit list of predictions.
#[derive(Debug, Clone, Default)]
pub struct FixedOracle {
    predictions: Vec<usize>,
}

impl FixedOracle {
    pub fn new(predictions: Vec<usize>) -> Self {
        Self { predictions }
    }
}

impl From<Vec<usize>> for FixedOracle {
    fn from(predictions: Vec<usize>) -> Self {
        Self::new(predictions)
    }
}

impl Oracle for FixedOracle {
    fn total(&self) -> usize {
        self.predictions.len()
    }

    fn get(&self, position: usize) -> usize {
        self.predictions[position]
    }
}

/// Oracle predicting `length` consecutive indices starting at `start`.
#[derive(Debug, Clone, Copy)]
pub struct ConsecutiveOracle {
    start: usize,
    length: usize,
}

impl ConsecutiveOracle {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }
}

impl Oracle for ConsecutiveOracle {
    fn total(&self) -> usize {
        self.length
    }

    fn get(&self, position: usize) -> usize {
        self.start + position
    }
}

/// A cache's private read position in a shared oracle.
#[derive(Clone)]
pub(crate) struct PredictionStream {
    oracle: Arc<dyn Oracle>,
    total: usize,
    counter: usize,
}

impl PredictionStream {
    pub(crate) fn new(oracle: Arc<dyn Oracle>) -> Self {
        let total = oracle.total();
        Self {
            oracle,
            total,
            counter: 0,
        }
    }

    /// Consume the next prediction.
    pub(crate) fn advance(&mut self) -> Result<usize, CacheError> {
        if self.counter >= self.total {
            return Err(CacheError::Exhausted { total: self.total });
        }
        let index = self.oracle.get(self.counter);
        self.counter += 1;
        Ok(index)
    }

    /// Look at a prediction without consuming anything.
    pub(crate) fn peek(&self, position: usize) -> usize {
        self.oracle.get(position)
    }

    /// Number of predictions consumed so far.
    pub(crate) fn position(&self) -> usize {
        self.counter
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }
}

impl std::fmt::Debug for PredictionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionStream")
            .field("total", &self.total)
            .field("counter", &self.counter)
            .finish()
    }
}
