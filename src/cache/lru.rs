//! Reactive least-recently-used slab cache.
//!
//! Used when the access pattern is not known in advance. Slabs are decoded one
//! at a time on a miss; once `max_slabs` slabs exist, the least recently used
//! one is re-identified and repopulated in place.

use std::hash::Hash;

use lru::LruCache;
use tracing::trace;

use crate::cache::error::{CacheError, FetchError};
use crate::cache::loader::SlabPopulate;
use crate::cache::pool::{SlabPool, SlotId};

/// LRU cache of at most `max_slabs` slabs, keyed by slab id.
#[derive(Debug)]
pub struct LruSlabCache<Id: Hash + Eq, Slab> {
    max_slabs: usize,
    pool: SlabPool<Slab>,
    /// Resident ids, most recently used first.
    order: LruCache<Id, SlotId>,
    last: Option<(Id, SlotId)>,
    poisoned: bool,
}

impl<Id, Slab> LruSlabCache<Id, Slab>
where
    Id: Copy + Eq + Hash,
{
    pub fn new(max_slabs: usize) -> Self {
        Self {
            max_slabs,
            pool: SlabPool::with_capacity(max_slabs),
            order: LruCache::unbounded(),
            last: None,
            poisoned: false,
        }
    }

    /// Fetch the slab for `id`, populating it on a miss.
    ///
    /// `populate` is called with a single-slab batch and an empty reuse batch.
    pub fn find<L>(&mut self, id: Id, loader: &mut L) -> Result<&Slab, FetchError<L::Error>>
    where
        L: SlabPopulate<Id = Id, Slab = Slab>,
    {
        if self.max_slabs == 0 {
            return Err(CacheError::NoCapacity.into());
        }
        if self.poisoned {
            return Err(CacheError::Poisoned.into());
        }

        if let Some((last_id, slot)) = self.last {
            if last_id == id {
                return Ok(self.pool.get(slot));
            }
        }

        let hit = self.order.get(&id).copied();
        let slot = match hit {
            Some(slot) => slot,
            None => {
                self.poisoned = true;
                let slot = self.claim_slot(loader).map_err(FetchError::Loader)?;
                self.order.put(id, slot);
                let slab = self.pool.get_mut(slot);
                loader
                    .populate(&mut [(id, slab)], &mut [])
                    .map_err(FetchError::Loader)?;
                self.poisoned = false;
                slot
            }
        };

        self.last = Some((id, slot));
        Ok(self.pool.get(slot))
    }

    fn claim_slot<L>(&mut self, loader: &mut L) -> Result<SlotId, L::Error>
    where
        L: SlabPopulate<Id = Id, Slab = Slab>,
    {
        if self.pool.len() < self.max_slabs {
            return Ok(self.pool.insert(loader.create()?));
        }

        match self.order.pop_lru() {
            Some((_, slot)) => {
                trace!(slot = %slot, resident = self.order.len(), "Evicted least recently used slab");
                Ok(slot)
            }
            None => Ok(self.pool.insert(loader.create()?)),
        }
    }

    /// Maximum number of slabs.
    pub fn max_slabs(&self) -> usize {
        self.max_slabs
    }

    /// Number of slabs currently resident.
    pub fn num_slabs(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::loader::SlabFactory;

    #[derive(Debug, Default)]
    struct TestSlab {
        chunk_id: usize,
        populate_number: usize,
    }

    #[derive(Default)]
    struct TestLoader {
        nalloc: usize,
        counter: usize,
        fail_on: Option<usize>,
    }

    impl SlabFactory for TestLoader {
        type Id = usize;
        type Slab = TestSlab;
        type Error = &'static str;

        fn create(&mut self) -> Result<TestSlab, Self::Error> {
            self.nalloc += 1;
            Ok(TestSlab::default())
        }
    }

    impl SlabPopulate for TestLoader {
        fn populate(
            &mut self,
            needed: &mut [(usize, &mut TestSlab)],
            reused: &mut [(usize, &mut TestSlab)],
        ) -> Result<(), Self::Error> {
            assert!(reused.is_empty());
            for (id, slab) in needed.iter_mut() {
                if self.fail_on == Some(*id) {
                    return Err("decode failed");
                }
                slab.chunk_id = *id;
                slab.populate_number = self.counter;
                self.counter += 1;
            }
            Ok(())
        }
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruSlabCache::new(2);
        let mut loader = TestLoader::default();
        assert_eq!(cache.max_slabs(), 2);
        assert_eq!(cache.num_slabs(), 0);

        assert_eq!(cache.find(1, &mut loader).unwrap().populate_number, 0);
        assert_eq!(cache.find(2, &mut loader).unwrap().populate_number, 1);
        // Touching 1 makes 2 the eviction candidate.
        assert_eq!(cache.find(1, &mut loader).unwrap().populate_number, 0);

        let slab = cache.find(3, &mut loader).unwrap();
        assert_eq!(slab.chunk_id, 3);
        assert_eq!(slab.populate_number, 2);

        assert_eq!(cache.find(1, &mut loader).unwrap().populate_number, 0);
        let slab = cache.find(2, &mut loader).unwrap();
        assert_eq!(slab.chunk_id, 2);
        assert_eq!(slab.populate_number, 3);

        assert_eq!(loader.nalloc, 2);
        assert_eq!(cache.num_slabs(), 2);
    }

    #[test]
    fn test_repeated_id_short_circuits() {
        let mut cache = LruSlabCache::new(3);
        let mut loader = TestLoader::default();
        for _ in 0..5 {
            assert_eq!(cache.find(7, &mut loader).unwrap().chunk_id, 7);
        }
        assert_eq!(loader.counter, 1);
        assert_eq!(loader.nalloc, 1);
    }

    #[test]
    fn test_single_slab_cache() {
        let mut cache = LruSlabCache::new(1);
        let mut loader = TestLoader::default();
        for id in [1, 2, 1, 2] {
            assert_eq!(cache.find(id, &mut loader).unwrap().chunk_id, id);
        }
        assert_eq!(loader.nalloc, 1);
        assert_eq!(loader.counter, 4);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut cache: LruSlabCache<usize, TestSlab> = LruSlabCache::new(0);
        let mut loader = TestLoader::default();
        let err = cache.find(1, &mut loader).unwrap_err();
        assert_eq!(err.cache_error(), Some(CacheError::NoCapacity));
        assert_eq!(loader.nalloc, 0);
    }

    #[test]
    fn test_failed_populate_poisons() {
        let mut cache = LruSlabCache::new(2);
        let mut loader = TestLoader {
            fail_on: Some(2),
            ..Default::default()
        };
        cache.find(1, &mut loader).unwrap();
        assert!(matches!(
            cache.find(2, &mut loader),
            Err(FetchError::Loader("decode failed"))
        ));

        let err = cache.find(1, &mut loader).unwrap_err();
        assert_eq!(err.cache_error(), Some(CacheError::Poisoned));
    }
}
