//! Slab caches for chunked matrices.
//!
//! This module contains the cache policies and the pieces they share:
//! - [`stats`]: how many slabs fit in a memory budget
//! - [`lru`]: reactive LRU cache for access patterns without foreknowledge
//! - [`oracular`]: batch-refilling cache driven by an [`oracle::Oracle`]
//! - [`subsetted`]: oracular cache that records the part of each slab in use
//! - [`variable`]: oracular cache bounded by total slab size
//! - [`typical`]: picks a cache for the usual extractor setups
//! - [`loader`]: consumer hooks that create and fill slabs
//! - [`pool`]: slab arena addressed by stable slot handles

pub mod error;
pub mod loader;
pub mod lru;
pub mod oracle;
pub mod oracular;
pub mod pool;
pub mod stats;
pub mod subset;
pub mod subsetted;
pub mod typical;
pub mod variable;

pub use error::{CacheError, FetchError};
pub use loader::{SlabFactory, SlabIdentify, SlabMeasure, SlabPopulate, SubsetPopulate};
pub use lru::LruSlabCache;
pub use oracle::{ConsecutiveOracle, FixedOracle, Oracle};
pub use oracular::{OracularSlabCache, ReuseTracking};
pub use stats::SlabCacheStats;
pub use subset::{SlabSubset, SubsetSelection};
pub use subsetted::OracularSubsettedSlabCache;
pub use typical::{SlabCache, TypicalSlabCacheWorkspace};
pub use variable::OracularVariableSlabCache;
