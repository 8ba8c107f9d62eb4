//! Typed column vectors
//!
//! A vector is a column buffer of one physical type, a validity mask, an
//! optional selection vector and a kind tag. Buffers are exclusively owned
//! by the chunk that produced them; only selection vectors are shared.

use crate::error::{Error, Result};
use crate::types::{LogicalType, PhysicalType, Value};
use crate::vector::SelectionVector;

/// Maximum number of rows in a vector or chunk.
pub const STANDARD_VECTOR_SIZE: usize = 1024;

/// Physical data buffer, one variant per [`PhysicalType`]. Type tags are
/// stored once per column, not per value.
#[derive(Debug, Clone)]
pub enum VectorBuffer {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Strings(Vec<String>),
}

impl VectorBuffer {
    fn with_capacity(ty: PhysicalType, cap: usize) -> Self {
        match ty {
            PhysicalType::Bool => VectorBuffer::Bool(Vec::with_capacity(cap)),
            PhysicalType::I8 => VectorBuffer::I8(Vec::with_capacity(cap)),
            PhysicalType::I16 => VectorBuffer::I16(Vec::with_capacity(cap)),
            PhysicalType::I32 => VectorBuffer::I32(Vec::with_capacity(cap)),
            PhysicalType::I64 => VectorBuffer::I64(Vec::with_capacity(cap)),
            PhysicalType::F32 => VectorBuffer::F32(Vec::with_capacity(cap)),
            PhysicalType::F64 => VectorBuffer::F64(Vec::with_capacity(cap)),
            PhysicalType::StringRef => VectorBuffer::Strings(Vec::with_capacity(cap)),
        }
    }

}

/// Buffer ownership: a flat vector owns a dense buffer, a constant vector
/// holds one physical value broadcast over the logical count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    Flat,
    Constant,
}

#[derive(Debug, Clone)]
pub struct Vector {
    logical: LogicalType,
    kind: VectorKind,
    buffer: VectorBuffer,
    /// Validity per physical position; false = NULL.
    validity: Vec<bool>,
    sel: Option<SelectionVector>,
    /// Logical row count. With a selection this equals the selection length;
    /// a constant broadcasts its single physical value over this count.
    count: usize,
}

impl Vector {
    pub fn with_capacity(logical: LogicalType, cap: usize) -> Self {
        let physical = logical.physical();
        Self {
            logical,
            kind: VectorKind::Flat,
            buffer: VectorBuffer::with_capacity(physical, cap),
            validity: Vec::with_capacity(cap),
            sel: None,
            count: 0,
        }
    }

    pub fn empty(logical: LogicalType) -> Self {
        Self::with_capacity(logical, 0)
    }

    /// A constant vector: physical count 1, broadcast over `count` rows.
    pub fn constant(value: &Value, logical: LogicalType, count: usize) -> Result<Self> {
        let mut vector = Self::with_capacity(logical, 1);
        vector.push_value(value)?;
        vector.kind = VectorKind::Constant;
        vector.count = count;
        Ok(vector)
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.logical
    }

    pub fn physical_type(&self) -> PhysicalType {
        self.logical.physical()
    }

    pub fn kind(&self) -> VectorKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn selection(&self) -> Option<&SelectionVector> {
        self.sel.as_ref()
    }

    /// The index contract: logical row `k` reads physical position `sel[k]`
    /// when a selection is present, else `k`; constants always read 0.
    #[inline]
    pub fn physical_index(&self, k: usize) -> usize {
        match self.kind {
            VectorKind::Constant => 0,
            VectorKind::Flat => match &self.sel {
                Some(sel) => sel.get(k) as usize,
                None => k,
            },
        }
    }

    #[inline]
    pub fn is_valid(&self, k: usize) -> bool {
        self.validity[self.physical_index(k)]
    }

    pub fn buffer(&self) -> &VectorBuffer {
        &self.buffer
    }

    /// Append one value; NULL appends a placeholder with validity false.
    pub fn push_value(&mut self, value: &Value) -> Result<()> {
        debug_assert!(self.sel.is_none() && self.kind == VectorKind::Flat);
        let valid = !value.is_null();
        match (&mut self.buffer, value) {
            (VectorBuffer::Bool(v), Value::Boolean(x)) => v.push(*x),
            (VectorBuffer::Bool(v), Value::Null) => v.push(false),
            (VectorBuffer::I8(v), Value::TinyInt(x)) => v.push(*x),
            (VectorBuffer::I8(v), Value::Null) => v.push(0),
            (VectorBuffer::I16(v), Value::SmallInt(x)) => v.push(*x),
            (VectorBuffer::I16(v), Value::Null) => v.push(0),
            (VectorBuffer::I32(v), Value::Integer(x)) => v.push(*x),
            (VectorBuffer::I32(v), Value::Date(x)) => v.push(*x),
            (VectorBuffer::I32(v), Value::Null) => v.push(0),
            (VectorBuffer::I64(v), Value::BigInt(x)) => v.push(*x),
            (VectorBuffer::I64(v), Value::Timestamp(x)) => v.push(*x),
            (VectorBuffer::I64(v), Value::Null) => v.push(0),
            (VectorBuffer::F32(v), Value::Real(x)) => v.push(*x),
            (VectorBuffer::F32(v), Value::Null) => v.push(0.0),
            (VectorBuffer::F64(v), Value::Double(x)) => v.push(*x),
            (VectorBuffer::F64(v), Value::Null) => v.push(0.0),
            (VectorBuffer::Strings(v), Value::Varchar(x)) => v.push(x.clone()),
            (VectorBuffer::Strings(v), Value::Blob(x)) => {
                v.push(String::from_utf8_lossy(x).into_owned())
            }
            (VectorBuffer::Strings(v), Value::Null) => v.push(String::new()),
            (_, value) => {
                return Err(Error::Internal(format!(
                    "cannot append {} to a {} vector",
                    value, self.logical
                )))
            }
        }
        self.validity.push(valid);
        self.count += 1;
        Ok(())
    }

    /// Materialize the value at logical row `k`.
    pub fn value_at(&self, k: usize) -> Value {
        let i = self.physical_index(k);
        if !self.validity[i] {
            return Value::Null;
        }
        match (&self.buffer, &self.logical) {
            (VectorBuffer::Bool(v), _) => Value::Boolean(v[i]),
            (VectorBuffer::I8(v), _) => Value::TinyInt(v[i]),
            (VectorBuffer::I16(v), _) => Value::SmallInt(v[i]),
            (VectorBuffer::I32(v), LogicalType::Date) => Value::Date(v[i]),
            (VectorBuffer::I32(v), _) => Value::Integer(v[i]),
            (VectorBuffer::I64(v), LogicalType::Timestamp) => Value::Timestamp(v[i]),
            (VectorBuffer::I64(v), _) => Value::BigInt(v[i]),
            (VectorBuffer::F32(v), _) => Value::Real(v[i]),
            (VectorBuffer::F64(v), _) => Value::Double(v[i]),
            (VectorBuffer::Strings(v), LogicalType::Blob) => {
                Value::Blob(v[i].clone().into_bytes())
            }
            (VectorBuffer::Strings(v), _) => Value::Varchar(v[i].clone()),
        }
    }

    /// Apply a selection, composing with any existing one. Zero-copy: the
    /// buffer moves, untouched.
    pub fn slice(mut self, sel: &SelectionVector) -> Vector {
        match self.kind {
            VectorKind::Constant => {
                self.count = sel.len();
                self
            }
            VectorKind::Flat => {
                self.sel = Some(match self.sel.take() {
                    Some(existing) => existing.compose(sel),
                    None => sel.clone(),
                });
                self.count = sel.len();
                self
            }
        }
    }

    /// Materialize any selection or constant broadcast into a dense buffer.
    pub fn flatten(self) -> Result<Vector> {
        if self.kind == VectorKind::Flat && self.sel.is_none() {
            return Ok(self);
        }
        let mut flat = Vector::with_capacity(self.logical.clone(), self.count);
        for k in 0..self.count {
            flat.push_value(&self.value_at(k))?;
        }
        Ok(flat)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_vector(values: &[Option<i32>]) -> Vector {
        let mut v = Vector::with_capacity(LogicalType::Integer, values.len());
        for x in values {
            let value = x.map(Value::Integer).unwrap_or(Value::Null);
            v.push_value(&value).unwrap();
        }
        v
    }

    #[test]
    fn selection_contract() {
        let v = int_vector(&[Some(10), Some(20), None, Some(40)]);
        let sliced = v.slice(&SelectionVector::new(vec![3, 1]));
        assert_eq!(sliced.len(), 2);
        assert_eq!(sliced.value_at(0), Value::Integer(40));
        assert_eq!(sliced.value_at(1), Value::Integer(20));
    }

    #[test]
    fn slicing_composes_selections() {
        let v = int_vector(&[Some(1), Some(2), Some(3), Some(4)]);
        let once = v.slice(&SelectionVector::new(vec![1, 2, 3]));
        let twice = once.slice(&SelectionVector::new(vec![2, 0]));
        assert_eq!(twice.value_at(0), Value::Integer(4));
        assert_eq!(twice.value_at(1), Value::Integer(2));
    }

    #[test]
    fn constant_broadcasts_index_zero() {
        let c = Vector::constant(&Value::Integer(7), LogicalType::Integer, 5).unwrap();
        assert_eq!(c.len(), 5);
        for k in 0..5 {
            assert_eq!(c.physical_index(k), 0);
            assert_eq!(c.value_at(k), Value::Integer(7));
        }
    }

    #[test]
    fn flatten_materializes_selection() {
        let v = int_vector(&[Some(1), None, Some(3)]);
        let sliced = v.slice(&SelectionVector::new(vec![2, 1]));
        let flat = sliced.flatten().unwrap();
        assert!(flat.selection().is_none());
        assert_eq!(flat.value_at(0), Value::Integer(3));
        assert_eq!(flat.value_at(1), Value::Null);
    }

    #[test]
    fn null_round_trips_through_buffer() {
        let v = int_vector(&[None, Some(5)]);
        assert_eq!(v.value_at(0), Value::Null);
        assert_eq!(v.value_at(1), Value::Integer(5));
    }
}
