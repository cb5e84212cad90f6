//! Oracle-driven slab cache that tracks the subset of each slab in use.
//!
//! Refills work like [`crate::cache::oracular::OracularSlabCache`], but every
//! touch of a slab inside the lookahead window is recorded in a
//! [`SlabSubset`] so the consumer can extract only the rows/columns needed.
//!
//! A second, farther window is scanned at each refill. A slab needed in both
//! windows is extracted in full, since it would otherwise have to be reloaded
//! to serve offsets that were never recorded.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use crate::cache::error::{CacheError, FetchError};
use crate::cache::loader::{SlabIdentify, SubsetPopulate};
use crate::cache::oracle::{Oracle, PredictionStream};
use crate::cache::pool::{FreeList, SlabPool, SlotId};
use crate::cache::subset::SlabSubset;

/// Descriptor handles for the slabs of one lookahead window, in first-touch order.
#[derive(Debug)]
struct Window<Id> {
    handles: HashMap<Id, usize>,
    order: Vec<Id>,
}

impl<Id: Copy + Eq + Hash> Window<Id> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: HashMap::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
        }
    }

    fn get(&self, id: Id) -> Option<usize> {
        self.handles.get(&id).copied()
    }

    fn insert(&mut self, id: Id, handle: usize) {
        self.handles.insert(id, handle);
        self.order.push(id);
    }

    /// Empty the window, returning handles not shared with `keep` to `free`.
    fn release(&mut self, keep: &Window<Id>, free: &mut Vec<usize>) {
        for (id, handle) in self.handles.drain() {
            if !keep.handles.contains_key(&id) {
                free.push(handle);
            }
        }
        self.order.clear();
    }
}

/// Oracle-aware cache of at most `max_slabs` partially extracted slabs.
#[derive(Debug)]
pub struct OracularSubsettedSlabCache<Id, Slab> {
    predictions: PredictionStream,
    max_slabs: usize,

    pool: SlabPool<Slab>,
    current: HashMap<Id, SlotId>,
    future: HashMap<Id, SlotId>,
    spare: FreeList,

    subsets: Vec<SlabSubset>,
    free_subsets: Vec<usize>,
    close: Window<Id>,
    far: Window<Id>,
    close_refresh_point: usize,
    far_refresh_point: usize,
    /// First slab beyond the far window, where the next far scan resumes.
    far_start: Option<(Id, usize)>,

    to_reassign: Vec<(Id, usize)>,
    to_populate: Vec<(Id, SlotId, usize)>,

    last: Option<(Id, SlotId)>,
    poisoned: bool,
}

impl<Id, Slab> OracularSubsettedSlabCache<Id, Slab>
where
    Id: Copy + Eq + Hash,
{
    pub fn new(oracle: Arc<dyn Oracle>, max_slabs: usize) -> Self {
        Self {
            predictions: PredictionStream::new(oracle),
            max_slabs,
            pool: SlabPool::with_capacity(max_slabs),
            current: HashMap::with_capacity(max_slabs),
            future: HashMap::with_capacity(max_slabs),
            spare: FreeList::default(),
            subsets: Vec::with_capacity(max_slabs.saturating_mul(2)),
            free_subsets: Vec::new(),
            close: Window::with_capacity(max_slabs),
            far: Window::with_capacity(max_slabs),
            close_refresh_point: 0,
            far_refresh_point: 0,
            far_start: None,
            to_reassign: Vec::new(),
            to_populate: Vec::new(),
            last: None,
            poisoned: false,
        }
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
        L: SlabIdentify<Id = Id, Slab = Slab> + SubsetPopulate,
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

        if position == self.close_refresh_point {
            self.poisoned = true;
            self.refill(id, offset, loader).map_err(FetchError::Loader)?;
            self.poisoned = false;
        }

        let slot = self.current[&id];
        self.last = Some((id, slot));
        Ok((self.pool.get(slot), offset))
    }

    fn refill<L>(&mut self, first: Id, first_offset: usize, loader: &mut L) -> Result<(), L::Error>
    where
        L: SlabIdentify<Id = Id, Slab = Slab> + SubsetPopulate,
    {
        let total = self.predictions.total();

        if self.pool.is_empty() {
            // Only the very first cycle builds its own close window; later
            // cycles inherit the previous far window.
            self.requisition_close(first, first_offset);
            let mut used = 1;
            loop {
                self.close_refresh_point += 1;
                if self.close_refresh_point >= total {
                    break;
                }
                let (id, offset) = loader.identify(self.predictions.peek(self.close_refresh_point));
                if let Some(handle) = self.close.get(id) {
                    self.subsets[handle].add(offset);
                } else if used < self.max_slabs {
                    self.requisition_close(id, offset);
                    used += 1;
                } else {
                    self.far_start = Some((id, offset));
                    break;
                }
            }
            self.far_refresh_point = self.close_refresh_point;
        } else {
            self.close_refresh_point = self.far_refresh_point;
        }

        if self.far_refresh_point < total {
            if let Some((start, start_offset)) = self.far_start.take() {
                self.requisition_far(start, start_offset);
                let mut used = 1;
                loop {
                    self.far_refresh_point += 1;
                    if self.far_refresh_point >= total {
                        break;
                    }
                    let (id, offset) = loader.identify(self.predictions.peek(self.far_refresh_point));
                    if let Some(handle) = self.far.get(id) {
                        self.subsets[handle].add(offset);
                    } else if used < self.max_slabs {
                        self.requisition_far(id, offset);
                        used += 1;
                    } else {
                        self.far_start = Some((id, offset));
                        break;
                    }
                }
            }
        }

        // Resident slabs in the close window were extracted in full when
        // they were first seen in a far window.
        for &id in &self.close.order {
            match self.current.remove(&id) {
                Some(slot) => {
                    self.future.insert(id, slot);
                }
                None => self.to_reassign.push((id, self.close.handles[&id])),
            }
        }

        self.spare.release(self.current.drain().map(|(_, slot)| slot));
        for (id, handle) in self.to_reassign.drain(..) {
            let slot = self.pool.acquire(&mut self.spare, || loader.create())?;
            self.future.insert(id, slot);
            self.to_populate.push((id, slot, handle));
        }

        let populated = self.to_populate.len();
        let reused = self.future.len() - populated;
        if populated > 0 {
            for &(_, _, handle) in &self.to_populate {
                self.subsets[handle].finalize();
            }

            let slabs = self
                .pool
                .many_mut(self.to_populate.iter().map(|&(_, slot, _)| slot));
            let subsets = &self.subsets;
            let mut needed: Vec<(Id, &mut Slab, &SlabSubset)> = self
                .to_populate
                .iter()
                .zip(slabs)
                .map(|(&(id, _, handle), slab)| (id, slab, &subsets[handle]))
                .collect();
            loader.populate_subsets(&mut needed)?;
        }
        self.to_populate.clear();

        std::mem::swap(&mut self.current, &mut self.future);
        self.close.release(&self.far, &mut self.free_subsets);
        std::mem::swap(&mut self.close, &mut self.far);

        debug!(
            populated,
            reused,
            close_refresh_point = self.close_refresh_point,
            far_refresh_point = self.far_refresh_point,
            allocated = self.pool.len(),
            "Refilled subsetted slab cache"
        );
        Ok(())
    }

    fn new_subset(&mut self, offset: usize) -> usize {
        match self.free_subsets.pop() {
            Some(handle) => {
                self.subsets[handle].reset(offset);
                handle
            }
            None => {
                self.subsets.push(SlabSubset::new(offset));
                self.subsets.len() - 1
            }
        }
    }

    fn requisition_close(&mut self, id: Id, offset: usize) {
        let handle = self.new_subset(offset);
        self.close.insert(id, handle);
    }

    fn requisition_far(&mut self, id: Id, offset: usize) {
        match self.close.get(id) {
            // Needed in both windows, so one full extraction now beats a
            // partial one followed by a reload.
            Some(handle) => {
                self.subsets[handle].make_full();
                self.far.insert(id, handle);
            }
            None => {
                let handle = self.new_subset(offset);
                self.far.insert(id, handle);
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
}
