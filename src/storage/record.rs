//! Record encoding: ordered column values to bytes and back.
//!
//! Values are concatenated in declared column order behind a leading
//! null bitmap. The encoding is schema-driven: decoding needs the same
//! ordered list of storage classes that produced the record.

use crate::common::{Error, ErrorCode, Result, Value};

/// Physical class a SQL data type is coerced to at the value level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Int,
    Double,
    Str,
}

/// Encode values into a record image.
///
/// # Layout
/// ```text
/// [null bitmap: ceil(n/8) bytes][col 0][col 1]...
/// ```
/// Null columns occupy no bytes beyond their bitmap bit. `Int` and
/// `Double` are 8 bytes little-endian; `Str` is a u32 length prefix
/// plus UTF-8 bytes.
pub fn encode_record(classes: &[StorageClass], values: &[Value]) -> Result<Vec<u8>> {
    if classes.len() != values.len() {
        return Err(Error::new(
            ErrorCode::InvalidParameter,
            "storage",
            format!(
                "record arity mismatch: {} columns, {} values",
                classes.len(),
                values.len()
            ),
        ));
    }

    let bitmap_len = values.len().div_ceil(8);
    let mut out = vec![0u8; bitmap_len];

    for (i, (class, value)) in classes.iter().zip(values).enumerate() {
        if value.is_null() {
            out[i / 8] |= 1 << (i % 8);
            continue;
        }
        match class {
            StorageClass::Int => {
                let v = value.as_int().ok_or_else(|| type_mismatch(i, "INT", value))?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            StorageClass::Double => {
                let v = value
                    .as_number()
                    .ok_or_else(|| type_mismatch(i, "DOUBLE", value))?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            StorageClass::Str => {
                let s = value.render();
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    Ok(out)
}

/// Decode a record image produced by [`encode_record`].
pub fn decode_record(classes: &[StorageClass], bytes: &[u8]) -> Result<Vec<Value>> {
    let bitmap_len = classes.len().div_ceil(8);
    if bytes.len() < bitmap_len {
        return Err(corrupt("record shorter than its null bitmap"));
    }

    let mut values = Vec::with_capacity(classes.len());
    let mut pos = bitmap_len;

    for (i, class) in classes.iter().enumerate() {
        if bytes[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        match class {
            StorageClass::Int => {
                let end = pos + 8;
                if bytes.len() < end {
                    return Err(corrupt("truncated INT column"));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[pos..end]);
                values.push(Value::Int(i64::from_le_bytes(buf)));
                pos = end;
            }
            StorageClass::Double => {
                let end = pos + 8;
                if bytes.len() < end {
                    return Err(corrupt("truncated DOUBLE column"));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[pos..end]);
                values.push(Value::Double(f64::from_le_bytes(buf)));
                pos = end;
            }
            StorageClass::Str => {
                if bytes.len() < pos + 4 {
                    return Err(corrupt("truncated STRING length"));
                }
                let mut len_buf = [0u8; 4];
                len_buf.copy_from_slice(&bytes[pos..pos + 4]);
                let len = u32::from_le_bytes(len_buf) as usize;
                pos += 4;
                if bytes.len() < pos + len {
                    return Err(corrupt("truncated STRING column"));
                }
                let s = std::str::from_utf8(&bytes[pos..pos + len])
                    .map_err(|_| corrupt("non-UTF-8 STRING column"))?;
                values.push(Value::Str(s.to_string()));
                pos += len;
            }
        }
    }

    Ok(values)
}

fn type_mismatch(ordinal: usize, expected: &str, value: &Value) -> Error {
    Error::new(
        ErrorCode::SqlTypeMismatch,
        "storage",
        format!(
            "column {} expects {}, got '{}'",
            ordinal,
            expected,
            value.render()
        ),
    )
}

fn corrupt(what: &str) -> Error {
    Error::new(ErrorCode::Unknown, "storage", format!("corrupt record: {}", what))
}
