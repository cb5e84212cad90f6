//! Consumer-side hooks the caches call to identify, create, and fill slabs.
//!
//! A cache never decodes anything itself. The consumer (typically a chunked
//! matrix extractor) implements these traits on one loader object, which the
//! cache borrows for the duration of each fetch.

use std::hash::Hash;

use crate::cache::subset::SlabSubset;

/// Creates slab storage.
pub trait SlabFactory {
    /// Key of a decoded chunk, typically its position along the target dimension.
    type Id: Copy + Eq + Hash;

    /// In-memory representation of one decoded slab.
    type Slab;

    /// Failure raised by any of the loader hooks.
    type Error;

    /// Create storage for one slab. The storage may be a placeholder that
    /// only gets sized during population.
    fn create(&mut self) -> Result<Self::Slab, Self::Error>;
}

/// Maps predicted indices onto slabs.
pub trait SlabIdentify: SlabFactory {
    /// Slab holding target index `index`, and the offset of `index` in it.
    ///
    /// With chunks of 10 rows, index 21 lives in slab 2 at offset 1.
    fn identify(&self, index: usize) -> (Self::Id, usize);
}

/// Fills whole slabs.
pub trait SlabPopulate: SlabFactory {
    /// Fill every slab in `needed` with the contents of its id.
    ///
    /// `needed` is never empty and is not sorted. `reused` lists slabs kept
    /// from the previous cycle when the cache tracks reuse; it is informational
    /// (e.g. for defragmenting a shared buffer) and may be ignored.
    fn populate(
        &mut self,
        needed: &mut [(Self::Id, &mut Self::Slab)],
        reused: &mut [(Self::Id, &mut Self::Slab)],
    ) -> Result<(), Self::Error>;
}

/// Fills the required subset of each slab.
pub trait SubsetPopulate: SlabFactory {
    /// Fill the part of each slab described by its [`SlabSubset`].
    ///
    /// `needed` is never empty and is not sorted.
    fn populate_subsets(
        &mut self,
        needed: &mut [(Self::Id, &mut Self::Slab, &SlabSubset)],
    ) -> Result<(), Self::Error>;
}

/// Reports slab sizes for budget accounting in variable-size caches.
///
/// Sizes may be in any unit (bytes, non-zero elements, ...) consistent with
/// the cache's `max_size`.
pub trait SlabMeasure: SlabFactory {
    /// Upper bound on the size of slab `id` before it is loaded.
    fn estimated_size(&self, id: Self::Id) -> usize;

    /// Size of the loaded slab `id`; no greater than its estimate.
    fn actual_size(&self, id: Self::Id, slab: &Self::Slab) -> usize;
}
