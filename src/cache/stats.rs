//! Cache sizing: how many slabs fit in a memory budget.

use serde::{Deserialize, Serialize};

/// Slab size and slab count for a cache budget.
///
/// A slab spans `target_length` elements of the target dimension and
/// `non_target_length` elements of the other dimension. The number of slabs
/// in the cache never exceeds the number needed to cover the whole target
/// dimension, since extra slabs could never be filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlabCacheStats {
    /// Number of elements in each slab.
    pub slab_size_in_elements: usize,

    /// Number of slabs that fit in the cache; `max_slabs` for the caches.
    pub num_slabs_in_cache: usize,
}

impl SlabCacheStats {
    /// Size a cache from a budget expressed in elements.
    ///
    /// With `require_minimum_cache`, a budget too small for a single slab is
    /// rounded up to one slab so that consecutive target elements within the
    /// same slab never trigger a second decode.
    pub fn new(
        target_length: usize,
        non_target_length: usize,
        target_num_slabs: usize,
        cache_size_in_elements: usize,
        require_minimum_cache: bool,
    ) -> Self {
        Self::from_slab_size(
            target_length.saturating_mul(non_target_length),
            target_num_slabs,
            cache_size_in_elements,
            require_minimum_cache,
        )
    }

    /// Size a cache from a budget expressed in bytes.
    ///
    /// An `element_size` of zero means slabs cost nothing, so every slab fits.
    pub fn from_bytes(
        target_length: usize,
        non_target_length: usize,
        target_num_slabs: usize,
        cache_size_in_bytes: usize,
        element_size: usize,
        require_minimum_cache: bool,
    ) -> Self {
        let cache_size_in_elements = if element_size == 0 {
            usize::MAX
        } else {
            cache_size_in_bytes / element_size
        };
        Self::new(
            target_length,
            non_target_length,
            target_num_slabs,
            cache_size_in_elements,
            require_minimum_cache,
        )
    }

    /// Size a cache when the slab element count is already known.
    pub fn from_slab_size(
        slab_size_in_elements: usize,
        target_num_slabs: usize,
        cache_size_in_elements: usize,
        require_minimum_cache: bool,
    ) -> Self {
        let num_slabs_in_cache = if slab_size_in_elements == 0 {
            target_num_slabs
        } else {
            let fitted = cache_size_in_elements / slab_size_in_elements;
            if fitted == 0 && require_minimum_cache {
                1
            } else {
                fitted
            }
        };

        Self {
            slab_size_in_elements,
            num_slabs_in_cache: num_slabs_in_cache.min(target_num_slabs),
        }
    }

    /// Whether any slab can be cached at all.
    pub fn is_caching(&self) -> bool {
        self.num_slabs_in_cache > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_budget() {
        let stats = SlabCacheStats::new(10, 20, 50, 1000, false);
        assert_eq!(stats.slab_size_in_elements, 200);
        assert_eq!(stats.num_slabs_in_cache, 5);

        let stats = SlabCacheStats::new(10, 20, 50, 100, false);
        assert_eq!(stats.num_slabs_in_cache, 0);
        assert!(!stats.is_caching());
    }

    #[test]
    fn test_minimum_cache_rounds_up() {
        let stats = SlabCacheStats::new(10, 20, 50, 100, true);
        assert_eq!(stats.slab_size_in_elements, 200);
        assert_eq!(stats.num_slabs_in_cache, 1);
    }

    #[test]
    fn test_capped_by_slabs_needed() {
        let stats = SlabCacheStats::new(10, 20, 50, usize::MAX, false);
        assert_eq!(stats.num_slabs_in_cache, 50);
    }

    #[test]
    fn test_byte_budget() {
        let stats = SlabCacheStats::from_bytes(10, 20, 50, 20000, 10, false);
        assert_eq!(stats.slab_size_in_elements, 200);
        assert_eq!(stats.num_slabs_in_cache, 10);

        // Zero-sized elements make every slab free.
        let stats = SlabCacheStats::from_bytes(10, 20, 50, 20000, 0, false);
        assert_eq!(stats.num_slabs_in_cache, 50);
    }

    #[test]
    fn test_empty_slabs_are_all_admissible() {
        let stats = SlabCacheStats::new(0, 20, 7, 0, false);
        assert_eq!(stats.slab_size_in_elements, 0);
        assert_eq!(stats.num_slabs_in_cache, 7);
    }

    #[test]
    fn test_dimension_product_saturates() {
        let stats = SlabCacheStats::new(usize::MAX, 3, 4, usize::MAX, false);
        assert_eq!(stats.slab_size_in_elements, usize::MAX);
        assert_eq!(stats.num_slabs_in_cache, 1);
    }
}
