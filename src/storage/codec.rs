//! Fixed-layout binary codec for point sequences
//!
//! The byte stream is not self-describing: the caller supplies the counter's
//! configured `LogicalType` on both sides. All integers are little-endian and
//! floats round-trip through their IEEE-754 bit patterns.
//!
//! Record layouts:
//! - `int64`/`float64` class: 12 bytes = timestamp u32 + value 8 bytes
//! - `int32`/`float32` class: 8 bytes = timestamp u32 + value 4 bytes
//! - `string`: timestamp u32 + length u32 + UTF-8 payload, no padding

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{DataPoint, LogicalType, Value};

/// Serialize a point sequence into the on-disk record layout for `ty`.
///
/// Every value must match `ty`; a mismatch is a configuration error.
pub fn serialize(points: &[DataPoint], ty: LogicalType) -> StorageResult<Vec<u8>> {
    let mut buf = match ty.record_width() {
        Some(width) => Vec::with_capacity(points.len() * width),
        None => Vec::with_capacity(points.len() * 16),
    };

    for point in points {
        buf.extend_from_slice(&point.timestamp.to_le_bytes());

        match (ty, &point.value) {
            (LogicalType::Int64, Value::I64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (LogicalType::Float64, Value::F64(v)) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            (LogicalType::Int32, Value::I32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (LogicalType::Float32, Value::F32(v)) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            (LogicalType::Str, Value::Str(s)) => {
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            (ty, value) => {
                return Err(StorageError::UnsupportedType(format!(
                    "cannot encode {} value as {}",
                    value.logical_type(),
                    ty
                )))
            }
        }
    }

    Ok(buf)
}

/// Deserialize a byte stream produced by [`serialize`] back into points.
///
/// Fails with `CorruptData` if the buffer is not an exact multiple of the
/// fixed record size, or a string length prefix reads past the buffer end.
pub fn deserialize(data: &[u8], ty: LogicalType) -> StorageResult<Vec<DataPoint>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    match ty {
        LogicalType::Int64 => decode_fixed(data, 12, |rec| {
            Value::I64(i64::from_le_bytes(rec[4..12].try_into().unwrap()))
        }),
        LogicalType::Float64 => decode_fixed(data, 12, |rec| {
            Value::F64(f64::from_bits(u64::from_le_bytes(
                rec[4..12].try_into().unwrap(),
            )))
        }),
        LogicalType::Int32 => decode_fixed(data, 8, |rec| {
            Value::I32(i32::from_le_bytes(rec[4..8].try_into().unwrap()))
        }),
        LogicalType::Float32 => decode_fixed(data, 8, |rec| {
            Value::F32(f32::from_bits(u32::from_le_bytes(
                rec[4..8].try_into().unwrap(),
            )))
        }),
        LogicalType::Str => decode_strings(data),
    }
}

fn decode_fixed(
    data: &[u8],
    width: usize,
    decode_value: impl Fn(&[u8]) -> Value,
) -> StorageResult<Vec<DataPoint>> {
    if data.len() % width != 0 {
        return Err(StorageError::CorruptData(format!(
            "buffer length {} is not a multiple of record size {}",
            data.len(),
            width
        )));
    }

    Ok(data
        .chunks_exact(width)
        .map(|rec| DataPoint {
            timestamp: u32::from_le_bytes(rec[0..4].try_into().unwrap()),
            value: decode_value(rec),
        })
        .collect())
}

fn decode_strings(data: &[u8]) -> StorageResult<Vec<DataPoint>> {
    let mut points = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        if offset + 8 > data.len() {
            return Err(StorageError::CorruptData(
                "truncated string record header".to_string(),
            ));
        }

        let timestamp = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
        let len = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;

        if offset + 8 + len > data.len() {
            return Err(StorageError::CorruptData(format!(
                "string length {} reads past buffer end",
                len
            )));
        }

        let payload = String::from_utf8_lossy(&data[offset + 8..offset + 8 + len]).into_owned();
        points.push(DataPoint {
            timestamp,
            value: Value::Str(payload),
        });

        offset += 8 + len;
    }

    Ok(points)
}
