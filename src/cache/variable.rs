//! Oracle-driven slab cache for slabs of varying size.
//!
//! Instead of a slab count, admission is bounded by a caller-defined size
//! metric such as bytes or non-zero elements. Slabs that are not resident are
//! charged their estimated size; resident slabs are charged their actual size,
//! which is never larger.
//!
//! Slots vacated by one cycle go on a free list and are reused before any new
//! slot is created, so the pool only grows to the peak number of slabs that
//! were resident at once.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::error::{CacheError, FetchError};
use crate::cache::loader::{SlabIdentify, SlabMeasure, SlabPopulate};
use crate::cache::oracle::{Oracle, PredictionStream};
use crate::cache::pool::{FreeList, SlabPool, SlotId};

/// Oracle-aware cache bounded by the total size of its slabs.
///
/// When slabs reference a shared memory buffer, the `reused` batch passed to
/// `populate` can be used to defragment that buffer before loading new slabs.
#[derive(Debug)]
pub struct OracularVariableSlabCache<Id, Slab> {
    predictions: PredictionStream,
    max_size: usize,
    used_size: usize,

    pool: SlabPool<Slab>,
    current: HashMap<Id, SlotId>,
    future: HashMap<Id, Option<SlotId>>,
    free: FreeList,

    in_need: Vec<Id>,
    to_populate: Vec<(Id, SlotId)>,
    to_reuse: Vec<(Id, SlotId)>,
    refresh_point: usize,

    last: Option<(Id, SlotId)>,
    poisoned: bool,
}

impl<Id, Slab> OracularVariableSlabCache<Id, Slab>
where
    Id: Copy + Eq + Hash,
{
    /// `max_size` may be zero, in which case only [`Self::predict`] is usable.
    pub fn new(oracle: Arc<dyn Oracle>, max_size: usize) -> Self {
        Self {
            predictions: PredictionStream::new(oracle),
            max_size,
            used_size: 0,
            pool: SlabPool::with_capacity(0),
            current: HashMap::new(),
            future: HashMap::new(),
            free: FreeList::default(),
            in_need: Vec::new(),
            to_populate: Vec::new(),
            to_reuse: Vec::new(),
            refresh_point: 0,
            last: None,
            poisoned: false,
        }
    }

    /// Pull the next raw prediction without touching any slab.
    ///
    /// Only zero-capacity caches serve raw predictions; otherwise the stream
    /// would drift from the slab assignments [`Self::next`] relies on.
    pub fn predict(&mut self) -> Result<usize, CacheError> {
        if self.max_size > 0 {
            return Err(CacheError::HasCapacity);
        }
        self.predictions.advance()
    }

    /// Fetch the slab holding the next predicted index, and the index's
    /// offset within it.
    pub fn next<L>(&mut self, loader: &mut L) -> Result<(&Slab, usize), FetchError<L::Error>>
    where
        L: SlabIdentify<Id = Id, Slab = Slab> + SlabPopulate + SlabMeasure,
    {
        if self.max_size == 0 {
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
        L: SlabIdentify<Id = Id, Slab = Slab> + SlabPopulate + SlabMeasure,
    {
        // The slab needed right now is admitted whatever its size.
        let mut used = self.cost(first, loader);
        if used > self.max_size {
            warn!(
                size = used,
                max_size = self.max_size,
                "Slab alone exceeds the cache size budget"
            );
        }
        self.reserve(first);

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

            match used.checked_add(self.cost(id, loader)) {
                Some(size) if size <= self.max_size => used = size,
                _ => break,
            }
            self.reserve(id);
        }
        self.used_size = used;

        self.free.release(self.current.drain().map(|(_, slot)| slot));
        for id in self.in_need.drain(..) {
            let slot = self.pool.acquire(&mut self.free, || loader.create())?;
            self.future.insert(id, Some(slot));
            self.to_populate.push((id, slot));
        }

        let populated = self.to_populate.len();
        let reused = self.to_reuse.len();
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
            used_size = self.used_size,
            max_size = self.max_size,
            free = self.free.len(),
            refresh_point = self.refresh_point,
            "Refilled variable slab cache"
        );
        Ok(())
    }

    /// Size charged for admitting `id` into the next cycle.
    fn cost<L>(&self, id: Id, loader: &L) -> usize
    where
        L: SlabMeasure<Id = Id, Slab = Slab>,
    {
        match self.current.get(&id) {
            Some(&slot) => loader.actual_size(id, self.pool.get(slot)),
            None => loader.estimated_size(id),
        }
    }

    fn reserve(&mut self, id: Id) {
        if let Some(slot) = self.current.remove(&id) {
            self.future.insert(id, Some(slot));
            self.to_reuse.push((id, slot));
        } else if let Some(slot) = self.free.pop() {
            self.future.insert(id, Some(slot));
            self.to_populate.push((id, slot));
        } else {
            self.future.insert(id, None);
            self.in_need.push(id);
        }
    }

    /// Maximum total size of the resident slabs.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Size charged by the most recent refill.
    pub fn used_size(&self) -> usize {
        self.used_size
    }

    /// Number of slabs assigned in the current cycle.
    pub fn num_slabs(&self) -> usize {
        self.current.len()
    }
}
