//! Order-preserving encoding of the byte keys the storage layer sees:
//! rows, secondary index entries, and catalog metadata.
//!
//! This sits one layer above [`kv::mvcc`]'s own key envelope — every byte
//! string produced here is the "logical key" that a
//! [`kv::mvcc::Transaction`] wraps in its own `Key::Version(..)` tag before
//! it ever reaches the storage engine. Variable-length fields reuse
//! [`kv::mvcc::keycode`]'s escape-and-terminate encoding directly, so that
//! the two layers compose without surprises: a prefix scan over an encoded
//! table or index range behaves exactly like a prefix scan over a raw MVCC
//! key range.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::types::{DataType, Value};

use kv::mvcc::keycode;

const TAG_CATALOG: u8 = 0x00;
const TAG_ROW: u8 = 0x01;
const TAG_INDEX: u8 = 0x02;

pub mod catalog_tag {
    pub const DATABASE: u8 = 0x01;
    pub const TABLE: u8 = 0x02;
    pub const NEXT_TABLE_ID: u8 = 0x03;
    pub const NEXT_INDEX_ID: u8 = 0x04;
    pub const NEXT_ROW_ID: u8 = 0x05;
}

/// Encodes a single value into its memcmp-comparable form and appends it to
/// `out`. Every encoding is self-delimiting, so values concatenate safely
/// into multi-column tuples.
pub fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(0x00),
        Value::Boolean(b) => {
            out.push(0x01);
            out.push(if *b { 1 } else { 0 });
        }
        Value::Int(i) => {
            out.push(0x02);
            // Flip the sign bit so that two's-complement integers compare
            // correctly as unsigned big-endian bytes.
            out.extend_from_slice(&(*i as u64 ^ (1 << 63)).to_be_bytes());
        }
        Value::UInt(u) => {
            out.push(0x03);
            out.extend_from_slice(&u.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(0x04);
            out.extend_from_slice(&encode_f64(f.0));
        }
        Value::Decimal(d) => {
            out.push(0x05);
            keycode::encode_bytes(out, d.to_string().as_bytes());
        }
        Value::Text(s) => {
            out.push(0x06);
            keycode::encode_bytes(out, s.as_bytes());
        }
        Value::Binary(b) => {
            out.push(0x07);
            keycode::encode_bytes(out, b);
        }
        Value::Date(d) => {
            out.push(0x08);
            out.extend_from_slice(&(d.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp() as u64 ^ (1 << 63)).to_be_bytes());
        }
        Value::Time(t) => {
            out.push(0x09);
            out.extend_from_slice(&(t.num_seconds_from_midnight() as u64).to_be_bytes());
        }
        Value::DateTime(dt) => {
            out.push(0x0a);
            out.extend_from_slice(&(dt.and_utc().timestamp() as u64 ^ (1 << 63)).to_be_bytes());
        }
    }
}

use chrono::Timelike;

/// Orders IEEE-754 floats the same way their numeric value orders: flips
/// the sign bit of positive numbers and all bits of negative numbers.
fn encode_f64(f: f64) -> [u8; 8] {
    let bits = f.to_bits();
    let flipped = if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) };
    flipped.to_be_bytes()
}

fn decode_f64(bytes: [u8; 8]) -> f64 {
    let bits = u64::from_be_bytes(bytes);
    let orig = if bits & (1 << 63) != 0 { bits & !(1 << 63) } else { !bits };
    f64::from_bits(orig)
}

/// Decodes a single value previously written by [`encode_value`], returning
/// it and the remaining bytes.
pub fn decode_value(bytes: &[u8]) -> Result<(Value, &[u8])> {
    let (tag, rest) = bytes.split_first().ok_or_else(|| Error::Codec("empty key value".into()))?;
    match *tag {
        0x00 => Ok((Value::Null, rest)),
        0x01 => {
            let (b, rest) = rest.split_first().ok_or_else(|| Error::Codec("truncated bool".into()))?;
            Ok((Value::Boolean(*b != 0), rest))
        }
        0x02 => {
            let (head, rest) = take8(rest)?;
            let v = u64::from_be_bytes(head) ^ (1 << 63);
            Ok((Value::Int(v as i64), rest))
        }
        0x03 => {
            let (head, rest) = take8(rest)?;
            Ok((Value::UInt(u64::from_be_bytes(head)), rest))
        }
        0x04 => {
            let (head, rest) = take8(rest)?;
            Ok((Value::Float(decode_f64(head).into()), rest))
        }
        0x05 => {
            let (b, rest) = keycode::decode_bytes(rest)?;
            let s = String::from_utf8(b).map_err(|e| Error::Codec(e.to_string()))?;
            let d: Decimal = s.parse().map_err(|_| Error::Codec("invalid decimal".into()))?;
            Ok((Value::Decimal(d), rest))
        }
        0x06 => {
            let (b, rest) = keycode::decode_bytes(rest)?;
            Ok((Value::Text(String::from_utf8(b).map_err(|e| Error::Codec(e.to_string()))?), rest))
        }
        0x07 => {
            let (b, rest) = keycode::decode_bytes(rest)?;
            Ok((Value::Binary(b), rest))
        }
        0x08 => {
            let (head, rest) = take8(rest)?;
            let secs = (u64::from_be_bytes(head) ^ (1 << 63)) as i64;
            let dt = chrono::DateTime::from_timestamp(secs, 0).ok_or_else(|| Error::Codec("invalid date".into()))?;
            Ok((Value::Date(dt.naive_utc().date()), rest))
        }
        0x09 => {
            let (head, rest) = take8(rest)?;
            let secs = u64::from_be_bytes(head) as u32;
            let t = chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
                .ok_or_else(|| Error::Codec("invalid time".into()))?;
            Ok((Value::Time(t), rest))
        }
        0x0a => {
            let (head, rest) = take8(rest)?;
            let secs = (u64::from_be_bytes(head) ^ (1 << 63)) as i64;
            let dt = chrono::DateTime::from_timestamp(secs, 0).ok_or_else(|| Error::Codec("invalid datetime".into()))?;
            Ok((Value::DateTime(dt.naive_utc()), rest))
        }
        other => Err(Error::Codec(format!("unknown key value tag {:#04x}", other))),
    }
}

fn take8(bytes: &[u8]) -> Result<([u8; 8], &[u8])> {
    if bytes.len() < 8 {
        return Err(Error::Codec("truncated fixed-width value".into()));
    }
    let (head, rest) = bytes.split_at(8);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(head);
    Ok((buf, rest))
}

/// Encodes an ordered tuple of values (a primary key, or the indexed
/// columns of a secondary index entry).
pub fn encode_tuple(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        encode_value(&mut out, v);
    }
    out
}

pub fn decode_tuple(mut bytes: &[u8], arity: usize) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(arity);
    for _ in 0..arity {
        let (v, rest) = decode_value(bytes)?;
        values.push(v);
        bytes = rest;
    }
    Ok(values)
}

/// `0x01 | table_id | pk_tuple`
pub fn encode_row_key(table_id: u64, pk: &[Value]) -> Vec<u8> {
    let mut out = vec![TAG_ROW];
    out.extend_from_slice(&table_id.to_be_bytes());
    out.extend_from_slice(&encode_tuple(pk));
    out
}

/// `0x01 | table_id |` — the exclusive-prefix range covering every row of
/// the table, for full scans and range-deletes on DROP TABLE.
pub fn encode_row_prefix(table_id: u64) -> Vec<u8> {
    let mut out = vec![TAG_ROW];
    out.extend_from_slice(&table_id.to_be_bytes());
    out
}

/// `0x02 | index_id | key_tuple | pk_tuple`
pub fn encode_index_key(index_id: u64, key: &[Value], pk: &[Value]) -> Vec<u8> {
    let mut out = vec![TAG_INDEX];
    out.extend_from_slice(&index_id.to_be_bytes());
    out.extend_from_slice(&encode_tuple(key));
    out.extend_from_slice(&encode_tuple(pk));
    out
}

/// `0x02 | index_id | key_tuple |` — used to probe or range-scan an index
/// by a (possibly partial) prefix of its columns.
pub fn encode_index_prefix(index_id: u64, key: &[Value]) -> Vec<u8> {
    let mut out = vec![TAG_INDEX];
    out.extend_from_slice(&index_id.to_be_bytes());
    out.extend_from_slice(&encode_tuple(key));
    out
}

/// `0x00 | tag | name`
pub fn encode_catalog_key(tag: u8, name: &[u8]) -> Vec<u8> {
    let mut out = vec![TAG_CATALOG, tag];
    keycode::encode_bytes(&mut out, name);
    out
}

pub fn encode_catalog_counter(tag: u8) -> Vec<u8> {
    vec![TAG_CATALOG, tag]
}

/// `0x00 | NEXT_ROW_ID | table_id` — each table with a hidden `_rowid`
/// primary key gets its own auto-increment counter, keyed by table id
/// rather than by name so it survives a table rename.
pub fn encode_row_id_counter(table_id: u64) -> Vec<u8> {
    let mut out = vec![TAG_CATALOG, catalog_tag::NEXT_ROW_ID];
    out.extend_from_slice(&table_id.to_be_bytes());
    out
}

/// Given a decoded index key, splits off the trailing PK tuple, whose
/// width is `pk_arity` columns.
pub fn split_index_key(bytes: &[u8], index_id: u64, pk_arity: usize) -> Result<(Vec<Value>, Vec<Value>)> {
    let mut rest = bytes.strip_prefix(&[TAG_INDEX][..]).ok_or_else(|| Error::Codec("not an index key".into()))?;
    let (id_bytes, r) = take8(rest)?;
    rest = r;
    if u64::from_be_bytes(id_bytes) != index_id {
        return Err(Error::Codec("index key id mismatch".into()));
    }
    // Decode values until only the PK tuple remains; we don't know the key
    // arity up front, so decode everything and split from the back.
    let mut values = Vec::new();
    let mut cursor = rest;
    while !cursor.is_empty() {
        let (v, r) = decode_value(cursor)?;
        values.push(v);
        cursor = r;
    }
    if values.len() < pk_arity {
        return Err(Error::Codec("index key shorter than primary key".into()));
    }
    let split_at = values.len() - pk_arity;
    let pk = values.split_off(split_at);
    Ok((values, pk))
}

/// Sorts by the same order the byte encoding produces, exposed for tests
/// and for the optimizer's range-vs-index-order reasoning.
pub fn value_cmp_encoded(a: &Value, b: &Value) -> Ordering {
    let mut ea = Vec::new();
    let mut eb = Vec::new();
    encode_value(&mut ea, a);
    encode_value(&mut eb, b);
    ea.cmp(&eb)
}

/// Compares a value against the type it's meant to occupy, defaulting the
/// index-key datatype tag ordering (Null < Boolean < numbers < strings <
/// dates) when types genuinely differ — this mirrors `cmp_total`.
pub fn datatype_sort_rank(ty: DataType) -> u8 {
    match ty {
        DataType::Text | DataType::Binary => 6,
        DataType::Date | DataType::Time | DataType::DateTime => 8,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_key_roundtrip_and_order() {
        let k1 = encode_row_key(7, &[Value::Int(1)]);
        let k2 = encode_row_key(7, &[Value::Int(2)]);
        let k3 = encode_row_key(8, &[Value::Int(0)]);
        assert!(k1 < k2);
        assert!(k2 < k3);
        assert!(k1.starts_with(&encode_row_prefix(7)));
    }

    #[test]
    fn negative_integers_order_before_positive() {
        assert_eq!(value_cmp_encoded(&Value::Int(-5), &Value::Int(3)), Ordering::Less);
        assert_eq!(value_cmp_encoded(&Value::Int(-5), &Value::Int(-1)), Ordering::Less);
    }

    #[test]
    fn text_tuple_roundtrips() {
        let tuple = vec![Value::Text("hello".into()), Value::Int(5)];
        let encoded = encode_tuple(&tuple);
        let decoded = decode_tuple(&encoded, 2).unwrap();
        assert!(matches!(decoded[0], Value::Text(ref s) if s == "hello"));
        assert!(matches!(decoded[1], Value::Int(5)));
    }

    #[test]
    fn strings_order_lexicographically_with_prefix_before_extension() {
        assert_eq!(value_cmp_encoded(&Value::Text("a".into()), &Value::Text("ab".into())), Ordering::Less);
    }

    #[test]
    fn floats_order_numerically_across_sign() {
        assert_eq!(
            value_cmp_encoded(&Value::Float((-1.5).into()), &Value::Float(2.5.into())),
            Ordering::Less
        );
    }

    #[test]
    fn index_key_splits_back_into_key_and_pk() {
        let key_cols = vec![Value::Text("bob".into())];
        let pk_cols = vec![Value::Int(2)];
        let encoded = encode_index_key(3, &key_cols, &pk_cols);
        let (k, pk) = split_index_key(&encoded, 3, 1).unwrap();
        assert!(matches!(k[0], Value::Text(ref s) if s == "bob"));
        assert!(matches!(pk[0], Value::Int(2)));
    }
}
