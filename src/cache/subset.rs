//! Per-slab record of which offsets must be extracted.
//!
//! A descriptor starts as a single-offset block and only ever widens:
//!
//! - `Block` grows at either end while offsets stay contiguous
//! - a gap escalates it to `Index`, keeping every offset seen so far
//! - `Full` is terminal and absorbs further offsets

use std::collections::HashMap;

/// Shape of the region of a slab that must be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubsetSelection {
    /// Every row/column of the slab.
    Full,

    /// A contiguous run of offsets.
    Block { start: usize, length: usize },

    /// Unique offsets. Sorted once finalized, with `mapping[indices[i]] == i`.
    Index {
        indices: Vec<usize>,
        mapping: HashMap<usize, usize>,
    },
}

/// Subset descriptor handed to [`crate::cache::loader::SubsetPopulate`].
///
/// Offsets are relative to the start of the slab: if a slab holds rows 10-19,
/// row 11 is offset 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabSubset {
    selection: SubsetSelection,
}

impl SlabSubset {
    /// Descriptor for a slab first touched at `offset`.
    pub fn new(offset: usize) -> Self {
        Self {
            selection: SubsetSelection::Block {
                start: offset,
                length: 1,
            },
        }
    }

    /// Reset to a single-offset block, reusing the allocation.
    pub(crate) fn reset(&mut self, offset: usize) {
        self.selection = SubsetSelection::Block {
            start: offset,
            length: 1,
        };
    }

    /// Record a touch at `offset`.
    pub fn add(&mut self, offset: usize) {
        match &mut self.selection {
            SubsetSelection::Full => {}
            SubsetSelection::Block { start, length } => {
                let end = *start + *length;
                if offset == end {
                    *length += 1;
                } else if offset + 1 == *start {
                    *start = offset;
                    *length += 1;
                } else if offset < *start || offset > end {
                    let mut indices: Vec<usize> = (*start..end).collect();
                    indices.push(offset);
                    let mapping = indices.iter().enumerate().map(|(i, &x)| (x, i)).collect();
                    self.selection = SubsetSelection::Index { indices, mapping };
                }
            }
            SubsetSelection::Index { indices, mapping } => {
                if !mapping.contains_key(&offset) {
                    mapping.insert(offset, indices.len());
                    indices.push(offset);
                }
            }
        }
    }

    /// Escalate to a full-slab extraction.
    pub fn make_full(&mut self) {
        self.selection = SubsetSelection::Full;
    }

    /// Sort `Index` offsets and rebuild the reverse map.
    ///
    /// Offsets arrive in prediction order, which need not be sorted.
    pub fn finalize(&mut self) {
        if let SubsetSelection::Index { indices, mapping } = &mut self.selection {
            if !indices.windows(2).all(|w| w[0] < w[1]) {
                indices.sort_unstable();
                mapping.clear();
                mapping.extend(indices.iter().enumerate().map(|(i, &x)| (x, i)));
            }
        }
    }

    pub fn selection(&self) -> &SubsetSelection {
        &self.selection
    }

    pub fn is_full(&self) -> bool {
        matches!(self.selection, SubsetSelection::Full)
    }

    /// Whether `offset` is covered by this descriptor.
    pub fn contains(&self, offset: usize) -> bool {
        match &self.selection {
            SubsetSelection::Full => true,
            SubsetSelection::Block { start, length } => offset >= *start && offset < start + length,
            SubsetSelection::Index { mapping, .. } => mapping.contains_key(&offset),
        }
    }

    /// Position of `offset` within the extracted region, if it is covered.
    pub fn position(&self, offset: usize) -> Option<usize> {
        match &self.selection {
            SubsetSelection::Full => Some(offset),
            SubsetSelection::Block { start, length } => {
                (offset >= *start && offset < start + length).then(|| offset - start)
            }
            SubsetSelection::Index { mapping, .. } => mapping.get(&offset).copied(),
        }
    }

    /// Number of offsets selected, given the slab's full length.
    pub fn extracted_len(&self, slab_length: usize) -> usize {
        match &self.selection {
            SubsetSelection::Full => slab_length,
            SubsetSelection::Block { length, .. } => *length,
            SubsetSelection::Index { indices, .. } => indices.len(),
        }
    }
}
