//! Shared selection vectors
//!
//! A selection vector projects live rows within a vector buffer without
//! copying the underlying data. Filters compose selections; the buffers are
//! never touched.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionVector {
    indices: Arc<[u32]>,
}

impl SelectionVector {
    pub fn new(indices: Vec<u32>) -> Self {
        Self {
            indices: indices.into(),
        }
    }

    /// Identity selection over `count` rows.
    pub fn identity(count: usize) -> Self {
        Self::new((0..count as u32).collect())
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn get(&self, k: usize) -> u32 {
        self.indices[k]
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.indices.iter().copied()
    }

    /// Compose with an outer selection: the result selects
    /// `self[outer[k]]` for each `k`. Used when a filter runs on top of an
    /// already-filtered chunk.
    pub fn compose(&self, outer: &SelectionVector) -> SelectionVector {
        SelectionVector::new(outer.iter().map(|k| self.get(k as usize)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_without_copying_data() {
        let base = SelectionVector::new(vec![1, 3, 5, 7]);
        let outer = SelectionVector::new(vec![0, 2]);
        assert_eq!(base.compose(&outer), SelectionVector::new(vec![1, 5]));
    }
}
