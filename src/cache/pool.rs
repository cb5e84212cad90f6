//! Slab storage addressed by stable slot handles.
//!
//! Slabs are created lazily and never dropped before the cache itself. Caches
//! refer to them through [`SlotId`] handles rather than references, so the
//! backing vector may grow freely while assignment maps point into it.

use std::fmt;

/// Stable handle to a slab in a [`SlabPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(usize);

impl SlotId {
    /// Position of the slot in its pool.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.index())
    }
}

/// Growable arena of slabs.
#[derive(Debug)]
pub struct SlabPool<Slab> {
    slabs: Vec<Slab>,
}

impl<Slab> SlabPool<Slab> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slabs: Vec::with_capacity(capacity),
        }
    }

    /// Add a slab, returning its handle.
    pub fn insert(&mut self, slab: Slab) -> SlotId {
        self.slabs.push(slab);
        SlotId(self.slabs.len() - 1)
    }

    /// Reuse a vacated slot if there is one, otherwise create a new slab.
    pub fn acquire<E>(
        &mut self,
        free: &mut FreeList,
        create: impl FnOnce() -> Result<Slab, E>,
    ) -> Result<SlotId, E> {
        match free.pop() {
            Some(slot) => Ok(slot),
            None => Ok(self.insert(create()?)),
        }
    }

    pub fn get(&self, slot: SlotId) -> &Slab {
        &self.slabs[slot.index()]
    }

    pub fn get_mut(&mut self, slot: SlotId) -> &mut Slab {
        &mut self.slabs[slot.index()]
    }

    /// Mutable references to several distinct slots, in request order.
    ///
    /// A slot requested more than once is only returned the first time.
    pub fn many_mut<I>(&mut self, slots: I) -> Vec<&mut Slab>
    where
        I: IntoIterator<Item = SlotId>,
    {
        let mut available: Vec<Option<&mut Slab>> = self.slabs.iter_mut().map(Some).collect();
        slots
            .into_iter()
            .filter_map(|slot| available.get_mut(slot.index()).and_then(Option::take))
            .collect()
    }

    /// Number of slabs ever created.
    pub fn len(&self) -> usize {
        self.slabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slabs.is_empty()
    }
}

/// Vacated slots awaiting reuse. Lowest slot is handed out first.
#[derive(Debug, Default)]
pub struct FreeList {
    slots: Vec<SlotId>,
}

impl FreeList {
    /// Return slots to the list.
    pub fn release(&mut self, slots: impl IntoIterator<Item = SlotId>) {
        self.slots.extend(slots);
        // Descending, so `pop` yields the lowest slot.
        self.slots.sort_unstable_by(|a, b| b.cmp(a));
    }

    pub fn pop(&mut self) -> Option<SlotId> {
        self.slots.pop()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
