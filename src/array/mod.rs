// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! Typed column vectors.
//!
//! An [`Array`] is an immutable, optionally-nullable column vector; an
//! [`ArrayBuilder`] is its mutable counterpart. Appendable blocks keep
//! live builders and serve reads from them, so builders also support
//! copying out a prefix with [`ArrayBuilder::snapshot`].

use std::convert::TryFrom;
use std::ops::{Bound, RangeBounds};

use serde::{Deserialize, Serialize};

use crate::types::{DataType, DataTypeExt, DataTypeKind, DataValue};

mod data_chunk;
mod iterator;
mod primitive_array;
mod utf8_array;

pub use self::data_chunk::*;
pub use self::iterator::ArrayIter;
pub use self::primitive_array::*;
pub use self::utf8_array::*;

/// A trait over all array builders.
pub trait ArrayBuilder: Send + Sync + 'static {
    /// Corresponding `Array` of this builder.
    type Array: Array<Builder = Self>;

    /// Create a new builder with `capacity`.
    fn new(capacity: usize) -> Self;

    /// Append a value to builder.
    fn push(&mut self, value: Option<&<Self::Array as Array>::Item>);

    /// Append an array to builder.
    fn append(&mut self, other: &Self::Array);

    /// Retrieve a reference to an already-pushed value.
    fn get(&self, idx: usize) -> Option<&<Self::Array as Array>::Item>;

    /// Number of values pushed so far.
    fn len(&self) -> usize;

    /// Copy out the first `len` values as an immutable array.
    fn snapshot(&self, len: usize) -> Self::Array;

    /// Drop every value past the first `len`, undoing rolled-back pushes.
    fn truncate(&mut self, len: usize);

    /// Finish build and return a new array.
    fn finish(self) -> Self::Array;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A trait over all arrays.
pub trait Array: Sized + Send + Sync + 'static {
    /// Corresponding builder of this array.
    type Builder: ArrayBuilder<Array = Self>;

    /// Type of element in the array.
    type Item: ToOwned + ?Sized;

    /// Retrieve a reference to value.
    fn get(&self, idx: usize) -> Option<&Self::Item>;

    /// Number of items of array.
    fn len(&self) -> usize;

    /// Get iterator of current array.
    fn iter(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self)
    }

    /// Check if `Array` is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An extension trait for [`Array`].
pub trait ArrayExt: Array {
    /// Filter the elements and return a new array.
    fn filter(&self, visibility: impl Iterator<Item = bool>) -> Self;

    /// Return a slice of self for the provided range.
    fn slice(&self, range: impl RangeBounds<usize>) -> Self;
}

impl<A: Array> ArrayExt for A {
    fn filter(&self, visibility: impl Iterator<Item = bool>) -> Self {
        let mut builder = Self::Builder::new(self.len());
        for (a, visible) in self.iter().zip(visibility) {
            if visible {
                builder.push(a);
            }
        }
        builder.finish()
    }

    fn slice(&self, range: impl RangeBounds<usize>) -> Self {
        let len = self.len();
        let begin = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&n) => n + 1,
            Bound::Excluded(&n) => n,
            Bound::Unbounded => len,
        };
        assert!(begin <= end, "range start must not be greater than end");
        assert!(end <= len, "range end out of bounds");

        let mut builder = Self::Builder::new(end - begin);
        for i in begin..end {
            builder.push(self.get(i));
        }
        builder.finish()
    }
}

pub type BoolArray = PrimitiveArray<bool>;
pub type I32Array = PrimitiveArray<i32>;
pub type I64Array = PrimitiveArray<i64>;
pub type F64Array = PrimitiveArray<f64>;

/// Embeds all types of arrays in `array` module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayImpl {
    Bool(BoolArray),
    Int32(I32Array),
    Int64(I64Array),
    Float64(F64Array),
    Utf8(Utf8Array),
}

pub type BoolArrayBuilder = PrimitiveArrayBuilder<bool>;
pub type I32ArrayBuilder = PrimitiveArrayBuilder<i32>;
pub type I64ArrayBuilder = PrimitiveArrayBuilder<i64>;
pub type F64ArrayBuilder = PrimitiveArrayBuilder<f64>;

/// Embeds all types of array builders in `array` module.
#[derive(Debug)]
pub enum ArrayBuilderImpl {
    Bool(BoolArrayBuilder),
    Int32(I32ArrayBuilder),
    Int64(I64ArrayBuilder),
    Float64(F64ArrayBuilder),
    Utf8(Utf8ArrayBuilder),
}

/// An error which can be returned when downcasting an [`ArrayImpl`] into a concrete type array.
#[derive(Debug, Clone)]
pub struct TypeMismatch;

macro_rules! impl_into {
    ($x:ty, $y:ident) => {
        impl From<$x> for ArrayImpl {
            fn from(array: $x) -> Self {
                Self::$y(array)
            }
        }

        impl TryFrom<ArrayImpl> for $x {
            type Error = TypeMismatch;

            fn try_from(array: ArrayImpl) -> Result<Self, Self::Error> {
                match array {
                    ArrayImpl::$y(array) => Ok(array),
                    _ => Err(TypeMismatch),
                }
            }
        }

        impl<'a> TryFrom<&'a ArrayImpl> for &'a $x {
            type Error = TypeMismatch;

            fn try_from(array: &'a ArrayImpl) -> Result<Self, Self::Error> {
                match array {
                    ArrayImpl::$y(array) => Ok(array),
                    _ => Err(TypeMismatch),
                }
            }
        }
    };
}

impl_into! { PrimitiveArray<bool>, Bool }
impl_into! { PrimitiveArray<i32>, Int32 }
impl_into! { PrimitiveArray<i64>, Int64 }
impl_into! { PrimitiveArray<f64>, Float64 }
impl_into! { Utf8Array, Utf8 }

impl ArrayBuilderImpl {
    /// Create a new array builder from data type.
    pub fn new(ty: &DataType) -> Self {
        Self::with_capacity(ty, 0)
    }

    /// Create a new array builder from data type with reserved capacity.
    pub fn with_capacity(ty: &DataType, capacity: usize) -> Self {
        match ty.kind() {
            DataTypeKind::Bool => Self::Bool(BoolArrayBuilder::new(capacity)),
            DataTypeKind::Int32 => Self::Int32(I32ArrayBuilder::new(capacity)),
            DataTypeKind::Int64 => Self::Int64(I64ArrayBuilder::new(capacity)),
            DataTypeKind::Float64 => Self::Float64(F64ArrayBuilder::new(capacity)),
            DataTypeKind::String => Self::Utf8(Utf8ArrayBuilder::new(capacity)),
        }
    }

    /// Appends an element to the back of array.
    pub fn push(&mut self, v: &DataValue) {
        match (self, v) {
            (Self::Bool(a), DataValue::Bool(v)) => a.push(Some(v)),
            (Self::Int32(a), DataValue::Int32(v)) => a.push(Some(v)),
            (Self::Int64(a), DataValue::Int64(v)) => a.push(Some(v)),
            (Self::Float64(a), DataValue::Float64(v)) => a.push(Some(v)),
            (Self::Utf8(a), DataValue::String(v)) => a.push(Some(v)),
            (Self::Bool(a), DataValue::Null) => a.push(None),
            (Self::Int32(a), DataValue::Null) => a.push(None),
            (Self::Int64(a), DataValue::Null) => a.push(None),
            (Self::Float64(a), DataValue::Null) => a.push(None),
            (Self::Utf8(a), DataValue::Null) => a.push(None),
            _ => panic!("failed to push value: type mismatch"),
        }
    }

    /// Appends an [`ArrayImpl`].
    pub fn append(&mut self, array_impl: &ArrayImpl) {
        match (self, array_impl) {
            (Self::Bool(builder), ArrayImpl::Bool(arr)) => builder.append(arr),
            (Self::Int32(builder), ArrayImpl::Int32(arr)) => builder.append(arr),
            (Self::Int64(builder), ArrayImpl::Int64(arr)) => builder.append(arr),
            (Self::Float64(builder), ArrayImpl::Float64(arr)) => builder.append(arr),
            (Self::Utf8(builder), ArrayImpl::Utf8(arr)) => builder.append(arr),
            _ => panic!("failed to append array: type mismatch"),
        }
    }

    /// Number of values pushed so far.
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(a) => a.len(),
            Self::Int32(a) => a.len(),
            Self::Int64(a) => a.len(),
            Self::Float64(a) => a.len(),
            Self::Utf8(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out the first `len` values as an immutable array.
    pub fn snapshot(&self, len: usize) -> ArrayImpl {
        match self {
            Self::Bool(a) => ArrayImpl::Bool(a.snapshot(len)),
            Self::Int32(a) => ArrayImpl::Int32(a.snapshot(len)),
            Self::Int64(a) => ArrayImpl::Int64(a.snapshot(len)),
            Self::Float64(a) => ArrayImpl::Float64(a.snapshot(len)),
            Self::Utf8(a) => ArrayImpl::Utf8(a.snapshot(len)),
        }
    }

    /// Drop every value past the first `len`.
    pub fn truncate(&mut self, len: usize) {
        match self {
            Self::Bool(a) => a.truncate(len),
            Self::Int32(a) => a.truncate(len),
            Self::Int64(a) => a.truncate(len),
            Self::Float64(a) => a.truncate(len),
            Self::Utf8(a) => a.truncate(len),
        }
    }

    /// Get the value at the given index.
    pub fn get(&self, idx: usize) -> DataValue {
        match self {
            Self::Bool(a) => match a.get(idx) {
                Some(val) => DataValue::Bool(*val),
                None => DataValue::Null,
            },
            Self::Int32(a) => match a.get(idx) {
                Some(val) => DataValue::Int32(*val),
                None => DataValue::Null,
            },
            Self::Int64(a) => match a.get(idx) {
                Some(val) => DataValue::Int64(*val),
                None => DataValue::Null,
            },
            Self::Float64(a) => match a.get(idx) {
                Some(val) => DataValue::Float64(*val),
                None => DataValue::Null,
            },
            Self::Utf8(a) => match a.get(idx) {
                Some(val) => DataValue::String(val.to_string()),
                None => DataValue::Null,
            },
        }
    }

    /// Finish build and return a new array.
    pub fn finish(self) -> ArrayImpl {
        match self {
            Self::Bool(a) => ArrayImpl::Bool(a.finish()),
            Self::Int32(a) => ArrayImpl::Int32(a.finish()),
            Self::Int64(a) => ArrayImpl::Int64(a.finish()),
            Self::Float64(a) => ArrayImpl::Float64(a.finish()),
            Self::Utf8(a) => ArrayImpl::Utf8(a.finish()),
        }
    }
}

impl ArrayImpl {
    /// Get the value at the given index.
    pub fn get(&self, idx: usize) -> DataValue {
        match self {
            Self::Bool(a) => match a.get(idx) {
                Some(val) => DataValue::Bool(*val),
                None => DataValue::Null,
            },
            Self::Int32(a) => match a.get(idx) {
                Some(val) => DataValue::Int32(*val),
                None => DataValue::Null,
            },
            Self::Int64(a) => match a.get(idx) {
                Some(val) => DataValue::Int64(*val),
                None => DataValue::Null,
            },
            Self::Float64(a) => match a.get(idx) {
                Some(val) => DataValue::Float64(*val),
                None => DataValue::Null,
            },
            Self::Utf8(a) => match a.get(idx) {
                Some(val) => DataValue::String(val.to_string()),
                None => DataValue::Null,
            },
        }
    }

    /// Number of items of array.
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(a) => a.len(),
            Self::Int32(a) => a.len(),
            Self::Int64(a) => a.len(),
            Self::Float64(a) => a.len(),
            Self::Utf8(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filter the elements and return a new array.
    pub fn filter(&self, visibility: impl Iterator<Item = bool>) -> Self {
        match self {
            Self::Bool(a) => Self::Bool(a.filter(visibility)),
            Self::Int32(a) => Self::Int32(a.filter(visibility)),
            Self::Int64(a) => Self::Int64(a.filter(visibility)),
            Self::Float64(a) => Self::Float64(a.filter(visibility)),
            Self::Utf8(a) => Self::Utf8(a.filter(visibility)),
        }
    }

    /// Return a slice of self for the provided range.
    pub fn slice(&self, range: impl RangeBounds<usize> + Clone) -> Self {
        match self {
            Self::Bool(a) => Self::Bool(a.slice(range)),
            Self::Int32(a) => Self::Int32(a.slice(range)),
            Self::Int64(a) => Self::Int64(a.slice(range)),
            Self::Float64(a) => Self::Float64(a.slice(range)),
            Self::Utf8(a) => Self::Utf8(a.slice(range)),
        }
    }

    /// Get the type of value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataTypeKind::Bool.not_null(),
            Self::Int32(_) => DataTypeKind::Int32.not_null(),
            Self::Int64(_) => DataTypeKind::Int64.not_null(),
            Self::Float64(_) => DataTypeKind::Float64.not_null(),
            Self::Utf8(_) => DataTypeKind::String.not_null(),
        }
    }

    /// Estimated heap size in bytes, used by the buffer manager's weigher.
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::Bool(a) => a.estimated_size(),
            Self::Int32(a) => a.estimated_size(),
            Self::Int64(a) => a.estimated_size(),
            Self::Float64(a) => a.estimated_size(),
            Self::Utf8(a) => a.estimated_size(),
        }
    }
}

/// Create a single element array from data value.
impl From<&DataValue> for ArrayImpl {
    fn from(val: &DataValue) -> Self {
        match val {
            &DataValue::Bool(v) => Self::Bool([v].into_iter().map(Some).collect()),
            &DataValue::Int32(v) => Self::Int32([v].into_iter().map(Some).collect()),
            &DataValue::Int64(v) => Self::Int64([v].into_iter().map(Some).collect()),
            &DataValue::Float64(v) => Self::Float64([v].into_iter().map(Some).collect()),
            DataValue::String(v) => Self::Utf8([Some(v)].into_iter().collect()),
            DataValue::Null => panic!("can not build array from NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter() {
        let array: I32Array = (0..=60).map(Some).collect();
        let filtered = array.filter((0..=60).map(|x| x >= 60));
        assert_eq!(
            filtered.iter().map(|x| x.cloned()).collect::<Vec<_>>(),
            vec![Some(60)]
        );
    }

    #[test]
    fn test_builder_snapshot() {
        let mut builder = ArrayBuilderImpl::new(&DataTypeKind::Int32.not_null());
        for i in 0..10 {
            builder.push(&DataValue::Int32(i));
        }
        let prefix = builder.snapshot(4);
        assert_eq!(prefix.len(), 4);
        assert_eq!(prefix.get(3), DataValue::Int32(3));
        // the builder keeps growing after a snapshot
        builder.push(&DataValue::Int32(10));
        assert_eq!(builder.len(), 11);
    }

    #[test]
    fn test_type_mismatch() {
        let mut builder = ArrayBuilderImpl::new(&DataTypeKind::String.not_null());
        builder.push(&DataValue::String("a".into()));
        let array = builder.finish();
        assert!(<&Utf8Array>::try_from(&array).is_ok());
        assert!(<&I32Array>::try_from(&array).is_err());
    }
}
