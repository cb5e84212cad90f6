//! Cache selection for the common extraction setups.
//!
//! Extractors without an oracle get an LRU cache; with an oracle they get an
//! oracular cache, or a subsetted one when only part of each slab is needed.

use std::hash::Hash;
use std::sync::Arc;

use crate::cache::lru::LruSlabCache;
use crate::cache::oracle::Oracle;
use crate::cache::oracular::OracularSlabCache;
use crate::cache::stats::SlabCacheStats;
use crate::cache::subsetted::OracularSubsettedSlabCache;

/// One of the fixed-count slab caches.
#[derive(Debug)]
pub enum SlabCache<Id: Hash + Eq, Slab> {
    Lru(LruSlabCache<Id, Slab>),
    Oracular(OracularSlabCache<Id, Slab>),
    Subsetted(OracularSubsettedSlabCache<Id, Slab>),
}

impl<Id, Slab> SlabCache<Id, Slab>
where
    Id: Copy + Eq + Hash,
{
    pub fn max_slabs(&self) -> usize {
        match self {
            SlabCache::Lru(cache) => cache.max_slabs(),
            SlabCache::Oracular(cache) => cache.max_slabs(),
            SlabCache::Subsetted(cache) => cache.max_slabs(),
        }
    }

    pub fn num_slabs(&self) -> usize {
        match self {
            SlabCache::Lru(cache) => cache.num_slabs(),
            SlabCache::Oracular(cache) => cache.num_slabs(),
            SlabCache::Subsetted(cache) => cache.num_slabs(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SlabCache::Lru(_) => "lru",
            SlabCache::Oracular(_) => "oracular",
            SlabCache::Subsetted(_) => "subsetted",
        }
    }
}

/// Sizing plus the cache it produced.
#[derive(Debug)]
pub struct TypicalSlabCacheWorkspace<Id: Hash + Eq, Slab> {
    pub stats: SlabCacheStats,
    pub cache: SlabCache<Id, Slab>,
}

impl<Id, Slab> TypicalSlabCacheWorkspace<Id, Slab>
where
    Id: Copy + Eq + Hash,
{
    /// Build the cache matching the available foreknowledge.
    ///
    /// `subset` is ignored without an oracle.
    pub fn new(stats: SlabCacheStats, oracle: Option<Arc<dyn Oracle>>, subset: bool) -> Self {
        let max_slabs = stats.num_slabs_in_cache;
        let cache = match oracle {
            None => SlabCache::Lru(LruSlabCache::new(max_slabs)),
            Some(oracle) if subset => {
                SlabCache::Subsetted(OracularSubsettedSlabCache::new(oracle, max_slabs))
            }
            Some(oracle) => SlabCache::Oracular(OracularSlabCache::new(oracle, max_slabs)),
        };
        Self { stats, cache }
    }
}
