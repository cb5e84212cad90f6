//! Oracle-driven slab cache with a fixed slab count.
//!
//! The cache reads ahead in the prediction stream to find the next
//! `max_slabs` distinct slabs and populates all of them in one batch:
//!
//! - slabs already resident and needed again are kept as they are
//! - slabs no longer needed give up their slots to newly needed ones
//! - new slots are only created while fewer than `max_slabs` exist
//!
//! A refill runs whenever the consumer reaches the prediction where the
//! previous lookahead stopped.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use crate::cache::error::{CacheError, FetchError};
use crate::cache::loader::{SlabIdentify, SlabPopulate};
use crate::cache::oracle::{Oracle, PredictionStream};
use crate::cache::pool::{FreeList, SlabPool, SlotId};

/// Whether `populate` also receives the slabs kept from the previous cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReuseTracking {
    #[default]
    Disabled,
    Enabled,
}

/// Oracle-aware cache holding at most `max_slabs` slabs.
#[derive(Debug)]
pub struct OracularSlabCache<Id, Slab> {
    predictions: PredictionStream,
    max_slabs: usize,
    reuse: ReuseTracking,

    pool: SlabPool<Slab>,
    current: HashMap<Id, SlotId>,
    /// Assignments for the cycle being built; `None` until a slot is found.
    future: HashMap<Id, Option<SlotId>>,
    spare: FreeList,

    in_need: Vec<Id>,
    to_populate: Vec<(Id, SlotId)>,
    to_reuse: Vec<(Id, SlotId)>,
    refresh_point: usize,

    last: Option<(Id, SlotId)>,
    poisoned: bool,
}

impl<Id, Slab> OracularSlabCache<Id, Slab>
where
    Id: Copy + Eq + Hash,
{
    /// `max_slabs` may be zero, in which case only [`Self::predict`] is usable.
    pub fn new(oracle: Arc<dyn Oracle>, max_slabs: usize) -> Self {
        Self {
            predictions: PredictionStream::new(oracle),
            max_slabs,
            reuse: ReuseTracking::Disabled,
            pool: SlabPool::with_capacity(max_slabs),
            current: HashMap::with_capacity(max_slabs),
            future: HashMap::with_capacity(max_slabs),
            spare: FreeList::default(),
            in_need: Vec::new(),
            to_populate: Vec::new(),
            to_reuse: Vec::new(),
            refresh_point: 0,
            last: None,
            poisoned: false,
        }
    }

    pub fn with_reuse_tracking(mut self, reuse: ReuseTracking) -> Self {
        self.reuse = reuse;
        self
    }

    /// Pull the next raw prediction without touching any slab.
    ///
    /// Only zero-capacity caches serve raw predictions; otherwise the stream
    /// would drift from the slab assignments [`Self::next`] relies on.
    pub fn predict(&mut self) -> Result<usize, CacheError> {
        if self.max_slabs > 0 {
            return Err(CacheError::HasCapacity);
        }
        self.predictions.advance()
    }

    /// Fetch the slab holding the next predicted index, and the index's
    /// offset within it.
    pub fn next<L>(&mut self, loader: &mut L) -> Result<(&Slab, usize), FetchError<L::Error>>
    where
        L: SlabIdentify<Id = Id, Slab = Slab> + SlabPopulate,
    {
        if self.max_slabs == 0 {
            return Err(CacheError::NoCapacity.into());
        }
        if self.poisoned {
            return Err(CacheError::Poisoned.into());
        }

        let position = self.predictions.position();
        let index = self.predictions.advance()?;
        let (id, offset) = loader.identify(index);

        if let Some((last_id, slot)) = self.last {
            if last_id == id {
                return Ok((self.pool.get(slot), offset));
            }
        }

        if position == self.refresh_point {
            self.poisoned = true;
            self.refill(id, loader).map_err(FetchError::Loader)?;
            self.poisoned = false;
        }

        let slot = self.current[&id];
        self.last = Some((id, slot));
        Ok((self.pool.get(slot), offset))
    }

    fn refill<L>(&mut self, first: Id, loader: &mut L) -> Result<(), L::Error>
    where
        L: SlabIdentify<Id = Id, Slab = Slab> + SlabPopulate,
    {
        self.reserve(first);
        let mut used = 1;
        let mut last_future = first;
        let total = self.predictions.total();

        loop {
            self.refresh_point += 1;
            if self.refresh_point >= total {
                break;
            }

            let (id, _) = loader.identify(self.predictions.peek(self.refresh_point));
            if id == last_future {
                continue;
            }
            last_future = id;
            if self.future.contains_key(&id) {
                continue;
            }

            if used == self.max_slabs {
                break;
            }
            used += 1;
            self.reserve(id);
        }

        // Anything still in `current` is not needed again this cycle.
        self.spare.release(self.current.drain().map(|(_, slot)| slot));
        for id in self.in_need.drain(..) {
            let slot = self.pool.acquire(&mut self.spare, || loader.create())?;
            self.future.insert(id, Some(slot));
            self.to_populate.push((id, slot));
        }

        let populated = self.to_populate.len();
        let reused = self.future.len() - populated;
        if populated > 0 {
            let slots = self
                .to_populate
                .iter()
                .chain(self.to_reuse.iter())
                .map(|&(_, slot)| slot);
            let mut slabs = self.pool.many_mut(slots);
            let reused_slabs = slabs.split_off(populated);

            let mut needed: Vec<(Id, &mut Slab)> =
                self.to_populate.iter().map(|&(id, _)| id).zip(slabs).collect();
            let mut kept: Vec<(Id, &mut Slab)> =
                self.to_reuse.iter().map(|&(id, _)| id).zip(reused_slabs).collect();
            loader.populate(&mut needed, &mut kept)?;
        }
        self.to_populate.clear();
        self.to_reuse.clear();

        self.current
            .extend(self.future.drain().filter_map(|(id, slot)| slot.map(|slot| (id, slot))));

        debug!(
            populated,
            reused,
            refresh_point = self.refresh_point,
            allocated = self.pool.len(),
            "Refilled oracular slab cache"
        );
        Ok(())
    }

    fn reserve(&mut self, id: Id) {
        match self.current.remove(&id) {
            Some(slot) => {
                self.future.insert(id, Some(slot));
                if self.reuse == ReuseTracking::Enabled {
                    self.to_reuse.push((id, slot));
                }
            }
            None => {
                self.future.insert(id, None);
                self.in_need.push(id);
            }
        }
    }

    /// Maximum number of slabs.
    pub fn max_slabs(&self) -> usize {
        self.max_slabs
    }

    /// Number of slabs assigned in the current cycle.
    pub fn num_slabs(&self) -> usize {
        self.current.len()
    }

    pub fn reuse_tracking(&self) -> ReuseTracking {
        self.reuse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::loader::SlabFactory;
    use crate::cache::oracle::FixedOracle;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[derive(Debug, Default, Clone)]
    struct TestSlab {
        chunk_id: usize,
        populate_number: usize,
        cycle: usize,
        reuse_number: usize,
    }

    struct TestLoader {
        nalloc: usize,
        counter: usize,
        cycle: usize,
        fail_on: Option<usize>,
    }

    impl TestLoader {
        fn new() -> Self {
            Self {
                nalloc: 0,
                counter: 0,
                cycle: 1,
                fail_on: None,
            }
        }
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

    impl SlabIdentify for TestLoader {
        fn identify(&self, index: usize) -> (usize, usize) {
            (index / 10, index % 10)
        }
    }

    impl SlabPopulate for TestLoader {
        fn populate(
            &mut self,
            needed: &mut [(usize, &mut TestSlab)],
            reused: &mut [(usize, &mut TestSlab)],
        ) -> Result<(), Self::Error> {
            assert!(!needed.is_empty());
            for (id, slab) in needed.iter_mut() {
                if self.fail_on == Some(*id) {
                    return Err("decode failed");
                }
                slab.chunk_id = *id;
                slab.populate_number = self.counter;
                slab.cycle = self.cycle;
                slab.reuse_number = 0;
                self.counter += 1;
            }
            for (_, slab) in reused.iter_mut() {
                slab.reuse_number += 1;
            }
            self.cycle += 1;
            Ok(())
        }
    }

    fn make_cache(predictions: &[usize], max_slabs: usize) -> OracularSlabCache<usize, TestSlab> {
        OracularSlabCache::new(Arc::new(FixedOracle::new(predictions.to_vec())), max_slabs)
    }

    #[test]
    fn test_consecutive() {
        let predictions = [11, 22, 33, 44, 55, 66, 77, 88, 99];
        let mut cache = make_cache(&predictions, 3);
        let mut loader = TestLoader::new();
        assert_eq!(cache.max_slabs(), 3);
        assert_eq!(cache.num_slabs(), 0);

        for (i, &p) in predictions.iter().enumerate() {
            let (slab, offset) = cache.next(&mut loader).unwrap();
            assert_eq!(slab.chunk_id, p / 10);
            assert_eq!(offset, p % 10);
            assert_eq!(slab.populate_number, i);
            assert_eq!(slab.cycle, i / 3 + 1);
        }

        assert_eq!(loader.nalloc, 3);
        assert_eq!(cache.num_slabs(), 3);
    }

    #[test]
    fn test_reuse() {
        let predictions = [11, 22, 12, 31, 23, 14, 28, 45, 11, 36, 32, 42, 24, 15];
        let mut cache = make_cache(&predictions, 3);
        let mut loader = TestLoader::new();

        for &p in &predictions[..7] {
            let (slab, offset) = cache.next(&mut loader).unwrap();
            assert_eq!(slab.chunk_id, p / 10);
            assert_eq!(offset, p % 10);
            assert_eq!(slab.cycle, 1);
            assert_eq!(slab.populate_number, p / 10 - 1);
        }

        for &p in &predictions[7..12] {
            let (slab, offset) = cache.next(&mut loader).unwrap();
            assert_eq!(slab.chunk_id, p / 10);
            assert_eq!(offset, p % 10);
            match slab.chunk_id {
                1 => assert_eq!((slab.populate_number, slab.cycle), (0, 1)),
                3 => assert_eq!((slab.populate_number, slab.cycle), (2, 1)),
                _ => assert_eq!((slab.populate_number, slab.cycle), (3, 2)),
            }
        }

        for &p in &predictions[12..] {
            let (slab, offset) = cache.next(&mut loader).unwrap();
            assert_eq!(slab.chunk_id, p / 10);
            assert_eq!(offset, p % 10);
            match slab.chunk_id {
                1 => assert_eq!((slab.populate_number, slab.cycle), (0, 1)),
                // Slab 2 was evicted in cycle 2 and must be reloaded.
                _ => assert_eq!((slab.populate_number, slab.cycle), (4, 3)),
            }
        }

        assert_eq!(loader.nalloc, 3);
    }

    #[test]
    fn test_consecutive_reuse() {
        let predictions = [11, 12, 32, 33, 21, 23, 10, 12, 44, 46, 23, 24];
        let mut cache = make_cache(&predictions, 3);
        let mut loader = TestLoader::new();

        for &p in &predictions[..8] {
            let (slab, offset) = cache.next(&mut loader).unwrap();
            assert_eq!(slab.chunk_id, p / 10);
            assert_eq!(offset, p % 10);
            assert_eq!(slab.cycle, 1);
            // Slab 3 is seen before slab 2.
            let expected = match slab.chunk_id {
                1 => 0,
                3 => 1,
                _ => 2,
            };
            assert_eq!(slab.populate_number, expected);
        }

        for &p in &predictions[8..] {
            let (slab, offset) = cache.next(&mut loader).unwrap();
            assert_eq!(slab.chunk_id, p / 10);
            assert_eq!(offset, p % 10);
            if slab.chunk_id == 4 {
                assert_eq!((slab.populate_number, slab.cycle), (3, 2));
            } else {
                assert_eq!((slab.populate_number, slab.cycle), (2, 1));
            }
        }

        assert_eq!(loader.nalloc, 3);
    }

    #[test]
    fn test_reuse_tracking_reports_kept_slabs() {
        let predictions = [11, 22, 12, 31, 23, 14, 28, 45, 11, 36, 32, 42, 24, 15];
        let mut cache = make_cache(&predictions, 3).with_reuse_tracking(ReuseTracking::Enabled);
        let mut loader = TestLoader::new();
        assert_eq!(cache.reuse_tracking(), ReuseTracking::Enabled);

        for _ in 0..7 {
            cache.next(&mut loader).unwrap();
        }

        // Cycle 2 keeps slabs 1 and 3.
        let (slab, _) = cache.next(&mut loader).unwrap();
        assert_eq!(slab.chunk_id, 4);
        assert_eq!(slab.reuse_number, 0);
        let (slab, _) = cache.next(&mut loader).unwrap();
        assert_eq!(slab.chunk_id, 1);
        assert_eq!(slab.reuse_number, 1);
        let (slab, _) = cache.next(&mut loader).unwrap();
        assert_eq!(slab.chunk_id, 3);
        assert_eq!(slab.reuse_number, 1);

        for _ in 10..12 {
            cache.next(&mut loader).unwrap();
        }

        // Cycle 3 keeps slab 1 again.
        let (slab, _) = cache.next(&mut loader).unwrap();
        assert_eq!(slab.chunk_id, 2);
        let (slab, _) = cache.next(&mut loader).unwrap();
        assert_eq!(slab.chunk_id, 1);
        assert_eq!(slab.reuse_number, 2);
    }

    #[test]
    fn test_stressed() {
        for cache_size in [3usize, 5, 10] {
            let mut rng = StdRng::seed_from_u64(cache_size as u64 + 1);
            let predictions: Vec<usize> = (0..10000).map(|_| rng.gen_range(10..60)).collect();

            let mut cache = make_cache(&predictions, cache_size);
            let mut loader = TestLoader::new();
            for &p in &predictions {
                let (slab, offset) = cache.next(&mut loader).unwrap();
                assert_eq!(slab.chunk_id, p / 10);
                assert_eq!(offset, p % 10);
            }

            assert_eq!(loader.nalloc, cache_size.min(5));
        }
    }

    #[test]
    fn test_zero_capacity_only_predicts() {
        let mut cache = make_cache(&[5, 15], 0);
        let mut loader = TestLoader::new();

        let err = cache.next(&mut loader).unwrap_err();
        assert_eq!(err.cache_error(), Some(CacheError::NoCapacity));

        assert_eq!(cache.predict(), Ok(5));
        assert_eq!(cache.predict(), Ok(15));
        assert_eq!(cache.predict(), Err(CacheError::Exhausted { total: 2 }));
    }

    #[test]
    fn test_exhausted_predictions() {
        let mut cache = make_cache(&[11, 12], 2);
        let mut loader = TestLoader::new();
        cache.next(&mut loader).unwrap();
        cache.next(&mut loader).unwrap();

        let err = cache.next(&mut loader).unwrap_err();
        assert_eq!(err.cache_error(), Some(CacheError::Exhausted { total: 2 }));
    }

    #[test]
    fn test_failed_refill_poisons() {
        let mut cache = make_cache(&[11, 22, 33, 44], 2);
        let mut loader = TestLoader::new();
        loader.fail_on = Some(3);

        cache.next(&mut loader).unwrap();
        cache.next(&mut loader).unwrap();
        assert!(matches!(
            cache.next(&mut loader),
            Err(FetchError::Loader("decode failed"))
        ));

        let err = cache.next(&mut loader).unwrap_err();
        assert_eq!(err.cache_error(), Some(CacheError::Poisoned));
    }
}
