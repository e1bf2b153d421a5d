// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

use std::iter::FromIterator;

use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};

use super::{Array, ArrayBuilder};
use crate::types::NativeType;

/// `PrimitiveArray` is a collection of primitive types, such as `i32`, `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveArray<T: NativeType> {
    valid: BitVec,
    data: Vec<T>,
}

impl<T: NativeType> FromIterator<Option<T>> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut builder = <Self as Array>::Builder::new(iter.size_hint().0);
        for e in iter {
            builder.push(e.as_ref());
        }
        builder.finish()
    }
}

impl<T: NativeType> Array for PrimitiveArray<T> {
    type Item = T;
    type Builder = PrimitiveArrayBuilder<T>;

    fn get(&self, idx: usize) -> Option<&T> {
        self.valid[idx].then(|| &self.data[idx])
    }

    fn len(&self) -> usize {
        self.valid.len()
    }
}

impl<T: NativeType> PrimitiveArray<T> {
    pub fn from_parts(valid: BitVec, data: Vec<T>) -> Self {
        assert_eq!(valid.len(), data.len());
        Self { valid, data }
    }

    pub fn valid_bitmap(&self) -> &BitVec {
        &self.valid
    }

    pub fn raw_data(&self) -> &[T] {
        &self.data
    }

    pub fn estimated_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>() + self.valid.len() / 8
    }
}

/// `PrimitiveArrayBuilder` constructs a `PrimitiveArray` from `Option<&T>`.
#[derive(Debug)]
pub struct PrimitiveArrayBuilder<T: NativeType> {
    valid: BitVec,
    data: Vec<T>,
}

impl<T: NativeType> ArrayBuilder for PrimitiveArrayBuilder<T> {
    type Array = PrimitiveArray<T>;

    fn new(capacity: usize) -> Self {
        Self {
            valid: BitVec::with_capacity(capacity),
            data: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, value: Option<&T>) {
        self.valid.push(value.is_some());
        self.data.push(value.cloned().unwrap_or_default());
    }

    fn append(&mut self, other: &PrimitiveArray<T>) {
        self.valid.extend_from_bitslice(&other.valid);
        self.data.extend_from_slice(&other.data);
    }

    fn get(&self, idx: usize) -> Option<&T> {
        self.valid[idx].then(|| &self.data[idx])
    }

    fn len(&self) -> usize {
        self.valid.len()
    }

    fn snapshot(&self, len: usize) -> PrimitiveArray<T> {
        assert!(len <= self.valid.len());
        PrimitiveArray {
            valid: self.valid[..len].to_bitvec(),
            data: self.data[..len].to_vec(),
        }
    }

    fn truncate(&mut self, len: usize) {
        self.valid.truncate(len);
        self.data.truncate(len);
    }

    fn finish(self) -> PrimitiveArray<T> {
        PrimitiveArray {
            valid: self.valid,
            data: self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_i32() {
        let iter = (0i32..1000).map(|x| if x % 2 == 0 { None } else { Some(x) });
        let array = iter.clone().collect::<PrimitiveArray<i32>>();
        assert_eq!(
            array.iter().map(|x| x.cloned()).collect::<Vec<_>>(),
            iter.collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_snapshot_prefix() {
        let mut builder = PrimitiveArrayBuilder::<i64>::new(0);
        for i in 0..8i64 {
            builder.push(Some(&i));
        }
        let array = builder.snapshot(5);
        assert_eq!(array.len(), 5);
        assert_eq!(array.get(4), Some(&4));
    }
}
