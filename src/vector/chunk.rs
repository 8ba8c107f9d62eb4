//! Data chunks: the unit of operator-to-operator data flow

use crate::error::Result;
use crate::types::{LogicalType, Value};
use crate::vector::{SelectionVector, Vector};

/// An ordered sequence of vectors sharing one logical count and, after
/// filtering, one selection vector.
#[derive(Debug, Clone, Default)]
pub struct DataChunk {
    vectors: Vec<Vector>,
    count: usize,
}

impl DataChunk {
    pub fn new(vectors: Vec<Vector>) -> Self {
        let count = vectors.first().map(Vector::len).unwrap_or(0);
        debug_assert!(vectors.iter().all(|v| v.len() == count));
        Self { vectors, count }
    }

    /// An empty chunk with one writable vector per column type.
    pub fn with_types(types: &[LogicalType], cap: usize) -> Self {
        Self {
            vectors: types
                .iter()
                .map(|t| Vector::with_capacity(t.clone(), cap))
                .collect(),
            count: 0,
        }
    }

    /// A chunk with no columns but a logical row count; carries projection
    /// evaluation for FROM-less selects and constant folding.
    pub fn carrier(count: usize) -> Self {
        Self {
            vectors: Vec::new(),
            count,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn column_count(&self) -> usize {
        self.vectors.len()
    }

    pub fn column(&self, i: usize) -> &Vector {
        &self.vectors[i]
    }

    pub fn columns(&self) -> &[Vector] {
        &self.vectors
    }

    pub fn into_columns(self) -> Vec<Vector> {
        self.vectors
    }

    pub fn append_row(&mut self, row: &[Value]) -> Result<()> {
        debug_assert_eq!(row.len(), self.vectors.len());
        for (vector, value) in self.vectors.iter_mut().zip(row) {
            vector.push_value(value)?;
        }
        self.count += 1;
        Ok(())
    }

    /// Materialize logical row `k`.
    pub fn row(&self, k: usize) -> Vec<Value> {
        self.vectors.iter().map(|v| v.value_at(k)).collect()
    }

    /// Apply one shared selection to every vector. The filter's zero-copy
    /// contract: buffers move through untouched.
    pub fn slice(self, sel: &SelectionVector) -> DataChunk {
        let vectors: Vec<Vector> = self
            .vectors
            .into_iter()
            .map(|v| v.slice(sel))
            .collect();
        DataChunk {
            count: sel.len(),
            vectors,
        }
    }

    /// Materialize all selections into dense buffers.
    pub fn flatten(self) -> Result<DataChunk> {
        let count = self.count;
        let vectors = self
            .vectors
            .into_iter()
            .map(Vector::flatten)
            .collect::<Result<Vec<_>>>()?;
        Ok(DataChunk { vectors, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogicalType;

    #[test]
    fn shared_selection_keeps_columns_aligned() {
        let mut chunk = DataChunk::with_types(
            &[LogicalType::Integer, LogicalType::Varchar(None)],
            4,
        );
        for (i, s) in [(1, "a"), (2, "b"), (3, "c")] {
            chunk
                .append_row(&[Value::Integer(i), Value::Varchar(s.into())])
                .unwrap();
        }
        let filtered = chunk.slice(&SelectionVector::new(vec![2, 0]));
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.row(0), vec![Value::Integer(3), Value::Varchar("c".into())]);
        assert_eq!(filtered.row(1), vec![Value::Integer(1), Value::Varchar("a".into())]);
    }
}
