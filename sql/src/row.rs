//! Row serialization: a schema-aware, non-order-preserving codec for the
//! value bytes stored at a row key. Unlike [`crate::key`], this format does
//! not need to sort — it optimizes for compact storage and cheap decode of
//! a single column, not for comparison.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use rust_decimal::Decimal;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::types::{DataType, Value};

/// Encodes a row as: a null-bitmap (one bit per column, `1` meaning NULL),
/// followed by the non-null columns' values in schema order.
pub fn encode_row(schema: &Schema, row: &[Value]) -> Result<Vec<u8>> {
    if row.len() != schema.columns.len() {
        return Err(Error::ConstraintViolation(format!(
            "column count mismatch: expected {}, got {}",
            schema.columns.len(),
            row.len()
        )));
    }
    let mut out = Vec::new();
    let bitmap_len = schema.columns.len().div_ceil(8);
    let mut bitmap = vec![0u8; bitmap_len];
    for (i, v) in row.iter().enumerate() {
        if v.is_null() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    out.extend_from_slice(&bitmap);
    for (i, (col, v)) in schema.columns.iter().zip(row.iter()).enumerate() {
        if v.is_null() {
            continue;
        }
        encode_value(&mut out, col.datatype, v).map_err(|e| {
            Error::ConstraintViolation(format!("column {} ({}): {}", i, col.name, e))
        })?;
    }
    Ok(out)
}

pub fn decode_row(schema: &Schema, bytes: &[u8]) -> Result<Vec<Value>> {
    let bitmap_len = schema.columns.len().div_ceil(8);
    if bytes.len() < bitmap_len {
        return Err(Error::Codec("row shorter than its null bitmap".into()));
    }
    let (bitmap, rest) = bytes.split_at(bitmap_len);
    let mut cursor = Cursor::new(rest);
    let mut row = Vec::with_capacity(schema.columns.len());
    for (i, col) in schema.columns.iter().enumerate() {
        if bitmap[i / 8] & (1 << (i % 8)) != 0 {
            row.push(Value::Null);
        } else {
            row.push(decode_value(&mut cursor, col.datatype)?);
        }
    }
    Ok(row)
}

fn encode_value(out: &mut Vec<u8>, ty: DataType, v: &Value) -> Result<()> {
    match (ty, v) {
        (DataType::Boolean, Value::Boolean(b)) => out.write_u8(*b as u8).unwrap(),
        (_, Value::Boolean(b)) if ty.is_numeric() => out.write_i64::<BE>(*b as i64).unwrap(),
        (DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt, v) => {
            out.write_i64::<BE>(v.as_int()?).unwrap()
        }
        (DataType::UTinyInt | DataType::USmallInt | DataType::UInt | DataType::UBigInt, v) => {
            out.write_u64::<BE>(v.as_int()? as u64).unwrap()
        }
        (DataType::Float | DataType::Double, v) => out.write_f64::<BE>(v.as_float()?).unwrap(),
        (DataType::Decimal, Value::Decimal(d)) => write_bytes(out, d.to_string().as_bytes()),
        (DataType::Decimal, v) => write_bytes(out, Decimal::from_str(&v.as_float()?.to_string())
            .map_err(|e| Error::Codec(e.to_string()))?
            .to_string()
            .as_bytes()),
        (DataType::Text, Value::Text(s)) => write_bytes(out, s.as_bytes()),
        (DataType::Binary, Value::Binary(b)) => write_bytes(out, b),
        (DataType::Date, Value::Date(d)) => write_bytes(out, d.to_string().as_bytes()),
        (DataType::Time, Value::Time(t)) => write_bytes(out, t.to_string().as_bytes()),
        (DataType::DateTime, Value::DateTime(dt)) => write_bytes(out, dt.to_string().as_bytes()),
        (ty, v) => {
            return Err(Error::TypeMismatch(format!("cannot store {} as {}", v, ty)));
        }
    }
    Ok(())
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.write_u32::<BE>(bytes.len() as u32).unwrap();
    out.extend_from_slice(bytes);
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = cursor.read_u32::<BE>().map_err(|e| Error::Codec(e.to_string()))? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|e| Error::Codec(e.to_string()))?;
    Ok(buf)
}

fn decode_value(cursor: &mut Cursor<&[u8]>, ty: DataType) -> Result<Value> {
    let io_err = |e: std::io::Error| Error::Codec(e.to_string());
    Ok(match ty {
        DataType::Boolean => Value::Boolean(cursor.read_u8().map_err(io_err)? != 0),
        DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => {
            Value::Int(cursor.read_i64::<BE>().map_err(io_err)?)
        }
        DataType::UTinyInt | DataType::USmallInt | DataType::UInt | DataType::UBigInt => {
            Value::UInt(cursor.read_u64::<BE>().map_err(io_err)?)
        }
        DataType::Float | DataType::Double => Value::Float(cursor.read_f64::<BE>().map_err(io_err)?.into()),
        DataType::Decimal => {
            let bytes = read_bytes(cursor)?;
            let s = String::from_utf8(bytes).map_err(|e| Error::Codec(e.to_string()))?;
            Value::Decimal(Decimal::from_str(&s).map_err(|e| Error::Codec(e.to_string()))?)
        }
        DataType::Text => {
            let bytes = read_bytes(cursor)?;
            Value::Text(String::from_utf8(bytes).map_err(|e| Error::Codec(e.to_string()))?)
        }
        DataType::Binary => Value::Binary(read_bytes(cursor)?),
        DataType::Date => {
            let bytes = read_bytes(cursor)?;
            let s = String::from_utf8(bytes).map_err(|e| Error::Codec(e.to_string()))?;
            Value::Date(chrono::NaiveDate::from_str(&s).map_err(|e| Error::Codec(e.to_string()))?)
        }
        DataType::Time => {
            let bytes = read_bytes(cursor)?;
            let s = String::from_utf8(bytes).map_err(|e| Error::Codec(e.to_string()))?;
            Value::Time(chrono::NaiveTime::from_str(&s).map_err(|e| Error::Codec(e.to_string()))?)
        }
        DataType::DateTime => {
            let bytes = read_bytes(cursor)?;
            let s = String::from_utf8(bytes).map_err(|e| Error::Codec(e.to_string()))?;
            Value::DateTime(
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .map_err(|e| Error::Codec(e.to_string()))?,
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Column;

    fn schema() -> Schema {
        Schema {
            columns: vec![
                Column { name: "id".into(), datatype: DataType::Int, nullable: false, primary_key: true, default: None },
                Column { name: "name".into(), datatype: DataType::Text, nullable: true, primary_key: false, default: None },
            ],
        }
    }

    #[test]
    fn row_roundtrips() {
        let schema = schema();
        let row = vec![Value::Int(42), Value::Text("hello".into())];
        let encoded = encode_row(&schema, &row).unwrap();
        let decoded = decode_row(&schema, &encoded).unwrap();
        assert!(matches!(decoded[0], Value::Int(42)));
        assert!(matches!(decoded[1], Value::Text(ref s) if s == "hello"));
    }

    #[test]
    fn null_roundtrips_without_consuming_value_bytes() {
        let schema = schema();
        let row = vec![Value::Int(1), Value::Null];
        let encoded = encode_row(&schema, &row).unwrap();
        let decoded = decode_row(&schema, &encoded).unwrap();
        assert!(decoded[1].is_null());
    }

    #[test]
    fn column_count_mismatch_is_rejected() {
        let schema = schema();
        assert!(encode_row(&schema, &[Value::Int(1)]).is_err());
    }
}
