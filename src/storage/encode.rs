// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

//! Serialization of column vectors into block column files.
//!
//! A column file stores one column of one block:
//!
//! ```plain
//! | magic | type | cksum_type | reserved | row count | checksum |  payload  |
//! |  4B   |  1B  |     1B     |    2B    |    4B     |    8B    | variable  |
//! ```
//!
//! The payload is a validity bitmap (one byte per 8 rows) followed by the
//! values: fixed-width little-endian for scalars, a `u32` offset table plus
//! raw bytes for strings. The checksum covers the payload.

use bitvec::vec::BitVec;
use bytes::{Buf, BufMut};

use super::{build_checksum, verify_checksum, ChecksumType, StorageResult, TracedStorageError};
use crate::array::{Array, ArrayBuilder, ArrayImpl, Utf8Array, Utf8ArrayBuilder};
use crate::types::{DataType, DataTypeKind, NativeType};

pub const COLUMN_FILE_MAGIC: u32 = 0x00BA_5A17;
pub const COLUMN_FILE_HEADER_SIZE: usize = 4 + 1 + 1 + 2 + 4 + 8;

fn kind_tag(kind: DataTypeKind) -> u8 {
    match kind {
        DataTypeKind::Bool => 0,
        DataTypeKind::Int32 => 1,
        DataTypeKind::Int64 => 2,
        DataTypeKind::Float64 => 3,
        DataTypeKind::String => 4,
    }
}

/// Encode a primitive value into a fixed-width buffer.
pub trait PrimitiveFixedWidthEncode: NativeType {
    /// Width of each element.
    const WIDTH: usize;

    /// Encode current primitive data to the end of the buffer.
    fn encode(&self, buffer: &mut impl BufMut);

    /// Decode a data from a bytes array.
    fn decode(buffer: &mut impl Buf) -> Self;
}

impl PrimitiveFixedWidthEncode for bool {
    const WIDTH: usize = std::mem::size_of::<u8>();

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u8(*self as u8)
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_u8() != 0
    }
}

impl PrimitiveFixedWidthEncode for i32 {
    const WIDTH: usize = std::mem::size_of::<i32>();

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_i32_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_i32_le()
    }
}

impl PrimitiveFixedWidthEncode for i64 {
    const WIDTH: usize = std::mem::size_of::<i64>();

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_i64_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_i64_le()
    }
}

impl PrimitiveFixedWidthEncode for f64 {
    const WIDTH: usize = std::mem::size_of::<f64>();

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_f64_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_f64_le()
    }
}

fn encode_valid_bitmap(valid: &BitVec, buffer: &mut Vec<u8>) {
    let mut byte = 0u8;
    for (i, bit) in valid.iter().enumerate() {
        if *bit {
            byte |= 1 << (i % 8);
        }
        if i % 8 == 7 {
            buffer.put_u8(byte);
            byte = 0;
        }
    }
    if valid.len() % 8 != 0 {
        buffer.put_u8(byte);
    }
}

fn decode_valid_bitmap(data: &mut &[u8], rows: usize) -> StorageResult<BitVec> {
    let nbytes = (rows + 7) / 8;
    if data.remaining() < nbytes {
        return Err(TracedStorageError::decode("validity bitmap truncated"));
    }
    let bytes = &data[..nbytes];
    let mut valid = BitVec::with_capacity(rows);
    for i in 0..rows {
        valid.push(bytes[i / 8] & (1 << (i % 8)) != 0);
    }
    data.advance(nbytes);
    Ok(valid)
}

fn encode_payload(array: &ArrayImpl, buffer: &mut Vec<u8>) {
    fn primitive<T: PrimitiveFixedWidthEncode>(
        array: &crate::array::PrimitiveArray<T>,
        buffer: &mut Vec<u8>,
    ) {
        encode_valid_bitmap(array.valid_bitmap(), buffer);
        for item in array.raw_data() {
            item.encode(buffer);
        }
    }

    match array {
        ArrayImpl::Bool(a) => primitive(a, buffer),
        ArrayImpl::Int32(a) => primitive(a, buffer),
        ArrayImpl::Int64(a) => primitive(a, buffer),
        ArrayImpl::Float64(a) => primitive(a, buffer),
        ArrayImpl::Utf8(a) => {
            encode_valid_bitmap(a.valid_bitmap(), buffer);
            let mut acc = 0u32;
            buffer.put_u32_le(0);
            for item in a.iter() {
                acc += item.map(|s| s.len() as u32).unwrap_or(0);
                buffer.put_u32_le(acc);
            }
            for item in a.iter().flatten() {
                buffer.put_slice(item.as_bytes());
            }
        }
    }
}

fn decode_payload(ty: &DataType, rows: usize, mut data: &[u8]) -> StorageResult<ArrayImpl> {
    fn primitive<T: PrimitiveFixedWidthEncode>(
        valid: BitVec,
        rows: usize,
        data: &mut &[u8],
    ) -> StorageResult<crate::array::PrimitiveArray<T>> {
        if data.remaining() < rows * T::WIDTH {
            return Err(TracedStorageError::decode("column payload truncated"));
        }
        let mut values = Vec::with_capacity(rows);
        for _ in 0..rows {
            values.push(T::decode(data));
        }
        Ok(crate::array::PrimitiveArray::from_parts(valid, values))
    }

    let valid = decode_valid_bitmap(&mut data, rows)?;
    Ok(match ty.kind() {
        DataTypeKind::Bool => ArrayImpl::Bool(primitive(valid, rows, &mut data)?),
        DataTypeKind::Int32 => ArrayImpl::Int32(primitive(valid, rows, &mut data)?),
        DataTypeKind::Int64 => ArrayImpl::Int64(primitive(valid, rows, &mut data)?),
        DataTypeKind::Float64 => ArrayImpl::Float64(primitive(valid, rows, &mut data)?),
        DataTypeKind::String => {
            if data.remaining() < (rows + 1) * 4 {
                return Err(TracedStorageError::decode("offset table truncated"));
            }
            let mut offsets = Vec::with_capacity(rows + 1);
            for _ in 0..=rows {
                offsets.push(data.get_u32_le() as usize);
            }
            let mut builder = Utf8ArrayBuilder::new(rows);
            for i in 0..rows {
                if valid[i] {
                    let slice = &data[offsets[i]..offsets[i + 1]];
                    let s = std::str::from_utf8(slice)
                        .map_err(|e| TracedStorageError::decode(format!("invalid utf8: {}", e)))?;
                    builder.push(Some(s));
                } else {
                    builder.push(None);
                }
            }
            ArrayImpl::Utf8(builder.finish())
        }
    })
}

/// Encode one column vector into the column-file representation.
pub fn encode_column(array: &ArrayImpl, checksum_type: ChecksumType) -> Vec<u8> {
    let mut payload = Vec::with_capacity(array.estimated_size());
    encode_payload(array, &mut payload);

    let mut data = Vec::with_capacity(COLUMN_FILE_HEADER_SIZE + payload.len());
    data.put_u32_le(COLUMN_FILE_MAGIC);
    data.put_u8(kind_tag(array.data_type().kind()));
    data.put_u8(checksum_type.to_tag());
    data.put_u16_le(0);
    data.put_u32_le(array.len() as u32);
    data.put_u64_le(build_checksum(checksum_type, &payload));
    data.extend_from_slice(&payload);
    data
}

/// Decode a column vector from the column-file representation.
pub fn decode_column(ty: &DataType, mut data: &[u8]) -> StorageResult<ArrayImpl> {
    if data.remaining() < COLUMN_FILE_HEADER_SIZE {
        return Err(TracedStorageError::decode("column header truncated"));
    }
    if data.get_u32_le() != COLUMN_FILE_MAGIC {
        return Err(TracedStorageError::decode("invalid column file magic"));
    }
    let tag = data.get_u8();
    if tag != kind_tag(ty.kind()) {
        return Err(TracedStorageError::decode(format!(
            "column type tag mismatch: file has {}, schema expects {}",
            tag,
            kind_tag(ty.kind())
        )));
    }
    let checksum_type = ChecksumType::from_tag(data.get_u8())
        .ok_or_else(|| TracedStorageError::decode("invalid checksum type"))?;
    data.advance(2);
    let rows = data.get_u32_le() as usize;
    let checksum = data.get_u64_le();
    verify_checksum(checksum_type, data, checksum)?;
    decode_payload(ty, rows, data)
}

/// Number of rows recorded in an encoded column file, without decoding it.
pub fn decode_row_count(mut data: &[u8]) -> StorageResult<u32> {
    if data.remaining() < COLUMN_FILE_HEADER_SIZE {
        return Err(TracedStorageError::decode("column header truncated"));
    }
    data.advance(8);
    Ok(data.get_u32_le())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataTypeExt;

    fn roundtrip(array: ArrayImpl, ty: DataType) {
        let encoded = encode_column(&array, ChecksumType::Crc32);
        assert_eq!(decode_row_count(&encoded).unwrap() as usize, array.len());
        let decoded = decode_column(&ty, &encoded).unwrap();
        assert_eq!(decoded, array);
    }

    #[test]
    fn test_int32_roundtrip() {
        let array: crate::array::I32Array =
            (0..100).map(|x| if x % 7 == 0 { None } else { Some(x) }).collect();
        roundtrip(ArrayImpl::Int32(array), DataTypeKind::Int32.nullable());
    }

    #[test]
    fn test_utf8_roundtrip() {
        let array: Utf8Array = (0..100)
            .map(|x| if x % 3 == 0 { None } else { Some(format!("val-{}", x)) })
            .collect();
        roundtrip(ArrayImpl::Utf8(array), DataTypeKind::String.nullable());
    }

    #[test]
    fn test_corrupted_payload() {
        let array: crate::array::I64Array = (0..10i64).map(Some).collect();
        let mut encoded = encode_column(&ArrayImpl::Int64(array), ChecksumType::Crc32);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        let err = decode_column(&DataTypeKind::Int64.nullable(), &encoded).unwrap_err();
        assert!(matches!(err.kind(), crate::storage::StorageError::Checksum(..)));
    }
}
