//! A byte order-preserving encoding for the handful of primitives the MVCC
//! layer needs to turn its `Key` enum into keys that sort the same way the
//! enum's variants are declared, and the same way their payloads compare.
//!
//! This is not a general-purpose serde format: it only handles what `Key`
//! and `KeyPrefix` need. Each value is encoded in order:
//!
//! - `u8` tag: raw byte, used for the enum variant discriminant.
//! - `u64`: big-endian 8 bytes, so unsigned integers sort numerically.
//! - `bool`: `0x00` or `0x01`.
//! - byte string (non-terminal field): every `0x00` byte is escaped as
//!   `0x00 0xff`, and the whole string is terminated with `0x00 0x01`. This
//!   lets two encoded strings compare correctly even when one is a prefix of
//!   the other, and lets the decoder find the end of a variable-length field
//!   that isn't the last one.
//! - byte string (terminal field, i.e. the last field of the key): written
//!   raw, since there's nothing after it that needs a separator.

use crate::error::{CResult, Error};

pub fn encode_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn encode_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn decode_u64(bytes: &[u8]) -> CResult<(u64, &[u8])> {
    if bytes.len() < 8 {
        return Err(Error::DecodingFailed("truncated u64".into()));
    }
    let (head, rest) = bytes.split_at(8);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(head);
    Ok((u64::from_be_bytes(buf), rest))
}

pub fn encode_bool(out: &mut Vec<u8>, v: bool) {
    out.push(if v { 0x01 } else { 0x00 });
}

pub fn decode_bool(bytes: &[u8]) -> CResult<(bool, &[u8])> {
    match bytes.split_first() {
        Some((0x00, rest)) => Ok((false, rest)),
        Some((0x01, rest)) => Ok((true, rest)),
        Some((b, _)) => Err(Error::DecodingFailed(format!("invalid bool byte {:#04x}", b))),
        None => Err(Error::DecodingFailed("truncated bool".into())),
    }
}

/// Encodes a byte string that is followed by more fields: escapes `0x00` as
/// `0x00 0xff` and terminates with `0x00 0x01`.
pub fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.reserve(bytes.len() + 2);
    for &b in bytes {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x01);
}

/// Decodes a byte string previously encoded with [`encode_bytes`], returning
/// the decoded bytes and the remaining input.
pub fn decode_bytes(bytes: &[u8]) -> CResult<(Vec<u8>, &[u8])> {
    let mut decoded = Vec::new();
    let mut iter = bytes.iter().enumerate();
    loop {
        match iter.next() {
            Some((i, 0x00)) => match bytes.get(i + 1) {
                Some(0xff) => {
                    decoded.push(0x00);
                    iter.next();
                }
                Some(0x01) => return Ok((decoded, &bytes[i + 2..])),
                _ => return Err(Error::DecodingFailed("invalid escape in encoded bytes".into())),
            },
            Some((_, b)) => decoded.push(*b),
            None => return Err(Error::DecodingFailed("unterminated encoded bytes".into())),
        }
    }
}

/// Encodes a terminal byte string field: no escaping or terminator needed,
/// since nothing follows it in the key.
pub fn encode_raw(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip_and_order() {
        for case in [&b""[..], &b"a"[..], &b"\x00"[..], &b"\x00\x00"[..], &b"ab"[..]] {
            let mut buf = Vec::new();
            encode_bytes(&mut buf, case);
            let (decoded, rest) = decode_bytes(&buf).unwrap();
            assert_eq!(decoded, case);
            assert!(rest.is_empty());
        }

        let mut a = Vec::new();
        encode_bytes(&mut a, b"a");
        let mut b = Vec::new();
        encode_bytes(&mut b, b"ab");
        assert!(a < b, "prefix must sort before extension");

        let mut empty = Vec::new();
        encode_bytes(&mut empty, b"");
        let mut zero = Vec::new();
        encode_bytes(&mut zero, b"\x00");
        assert!(empty < zero);
    }

    #[test]
    fn u64_orders_numerically() {
        let mut a = Vec::new();
        encode_u64(&mut a, 1);
        let mut b = Vec::new();
        encode_u64(&mut b, 2);
        let mut c = Vec::new();
        encode_u64(&mut c, 256);
        assert!(a < b);
        assert!(b < c);
    }
}
