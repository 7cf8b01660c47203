//! The scalar type system: [`DataType`] tags columns and literals,
//! [`Value`] is the runtime representation every row, expression and index
//! key is built from.

use std::cmp::Ordering;
use std::fmt::{self, Display};

use ordered_float::OrderedFloat;
use rust_decimal::Decimal;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The declared type of a column or the inferred type of an expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    UTinyInt,
    USmallInt,
    UInt,
    UBigInt,
    Float,
    Double,
    Decimal,
    Text,
    Binary,
    Date,
    Time,
    DateTime,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Boolean
                | DataType::TinyInt
                | DataType::SmallInt
                | DataType::Int
                | DataType::BigInt
                | DataType::UTinyInt
                | DataType::USmallInt
                | DataType::UInt
                | DataType::UBigInt
                | DataType::Float
                | DataType::Double
                | DataType::Decimal
        )
    }

    /// The wire-protocol type tag a MySQL client would expect for a column
    /// of this type. Kept here so the handler's result-set renderer never
    /// has to re-derive it from the `sql` crate's internal representation.
    pub fn wire_tag(self) -> &'static str {
        match self {
            DataType::Boolean => "TINY",
            DataType::TinyInt => "TINY",
            DataType::SmallInt => "SHORT",
            DataType::Int => "LONG",
            DataType::BigInt => "LONGLONG",
            DataType::UTinyInt => "TINY",
            DataType::USmallInt => "SHORT",
            DataType::UInt => "LONG",
            DataType::UBigInt => "LONGLONG",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Decimal => "NEWDECIMAL",
            DataType::Text => "VAR_STRING",
            DataType::Binary => "BLOB",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::DateTime => "DATETIME",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::UTinyInt => "TINYINT UNSIGNED",
            DataType::USmallInt => "SMALLINT UNSIGNED",
            DataType::UInt => "INT UNSIGNED",
            DataType::UBigInt => "BIGINT UNSIGNED",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Decimal => "DECIMAL",
            DataType::Text => "TEXT",
            DataType::Binary => "BLOB",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::DateTime => "DATETIME",
        };
        write!(f, "{}", s)
    }
}

/// A runtime scalar value. `Null` is a distinct variant rather than an
/// `Option<Value>` wrapper so that every downstream match is exhaustive
/// about it (SQL three-valued logic is easy to get wrong by accident
/// otherwise).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    UInt(u64),
    Float(OrderedFloat<f64>),
    Decimal(Decimal),
    Text(String),
    Binary(Vec<u8>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int(_) => Some(DataType::BigInt),
            Value::UInt(_) => Some(DataType::UBigInt),
            Value::Float(_) => Some(DataType::Double),
            Value::Decimal(_) => Some(DataType::Decimal),
            Value::Text(_) => Some(DataType::Text),
            Value::Binary(_) => Some(DataType::Binary),
            Value::Date(_) => Some(DataType::Date),
            Value::Time(_) => Some(DataType::Time),
            Value::DateTime(_) => Some(DataType::DateTime),
        }
    }

    /// Truthiness under three-valued logic: `None` means UNKNOWN.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::UInt(u) => Some(*u != 0),
            Value::Float(f) => Some(f.0 != 0.0),
            Value::Decimal(d) => Some(!d.is_zero()),
            Value::Text(s) => Some(!s.is_empty() && s != "0"),
            _ => None,
        }
    }

    /// Converts to `i64`, following the "leading digit prefix" policy:
    /// numeric strings parse their leading integer prefix, non-numeric
    /// strings are a `TypeMismatch`.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Null => Ok(0),
            Value::Boolean(b) => Ok(*b as i64),
            Value::Int(i) => Ok(*i),
            Value::UInt(u) => Ok(*u as i64),
            Value::Float(f) => Ok(f.0 as i64),
            Value::Decimal(d) => d
                .to_string()
                .parse::<f64>()
                .map(|f| f as i64)
                .map_err(|e| Error::TypeMismatch(e.to_string())),
            Value::Text(s) => parse_leading_int(s),
            other => Err(Error::TypeMismatch(format!("cannot convert {} to integer", other))),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Null => Ok(0.0),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Ok(*i as f64),
            Value::UInt(u) => Ok(*u as f64),
            Value::Float(f) => Ok(f.0),
            Value::Decimal(d) => d.to_string().parse().map_err(|e: std::num::ParseFloatError| {
                Error::TypeMismatch(e.to_string())
            }),
            Value::Text(s) => s.trim().parse().or_else(|_| parse_leading_int(s).map(|i| i as f64)),
            other => Err(Error::TypeMismatch(format!("cannot convert {} to float", other))),
        }
    }

    /// Converts to a fixed-precision `Decimal`, used when either side of an
    /// arithmetic expression is itself `Decimal` so the whole computation
    /// stays exact instead of round-tripping through `f64`.
    pub fn as_decimal(&self) -> Result<Decimal> {
        match self {
            Value::Null => Ok(Decimal::ZERO),
            Value::Boolean(b) => Ok(Decimal::from(*b as i64)),
            Value::Int(i) => Ok(Decimal::from(*i)),
            Value::UInt(u) => Ok(Decimal::from(*u)),
            Value::Float(f) => Decimal::try_from(f.0).map_err(|e| Error::TypeMismatch(e.to_string())),
            Value::Decimal(d) => Ok(*d),
            Value::Text(s) => s.trim().parse::<Decimal>().map_err(|e: rust_decimal::Error| Error::TypeMismatch(e.to_string())),
            other => Err(Error::TypeMismatch(format!("cannot convert {} to decimal", other))),
        }
    }

    fn is_numeric_string(s: &str) -> bool {
        let s = s.trim();
        !s.is_empty() && (s.parse::<f64>().is_ok())
    }

    /// SQL three-valued comparison: `None` means the comparison is UNKNOWN
    /// (either operand is NULL, or the two values are incomparable, e.g. a
    /// non-numeric string against an integer).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Binary(a), Binary(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (Text(s), other) | (other, Text(s)) if other.datatype().map(|d| d.is_numeric()).unwrap_or(false) => {
                if !Self::is_numeric_string(s) {
                    return None;
                }
                let (a, b) = (self.as_float().ok()?, other.as_float().ok()?);
                let ord = a.partial_cmp(&b)?;
                if matches!(self, Text(_)) { Some(ord) } else { Some(ord.reverse()) }
            }
            (a, b) if a.datatype().map(|d| d.is_numeric()).unwrap_or(false)
                && b.datatype().map(|d| d.is_numeric()).unwrap_or(false) =>
            {
                a.as_float().ok()?.partial_cmp(&b.as_float().ok()?)
            }
            _ => None,
        }
    }

    /// Total order used by `ORDER BY`/`GROUP BY`/index keys, where NULL
    /// sorts first and NaN-free floats are ordered via `OrderedFloat`.
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Set-semantics equality (used by DISTINCT/UNION/INTERSECT/EXCEPT and
    /// hash join/group-by keys): NULL is never equal to anything, including
    /// itself, matching SQL's definition but diverging from `cmp_total`
    /// (which must give NULL a total order to sort deterministically).
    pub fn set_eq(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        matches!(self.compare(other), Some(Ordering::Equal))
    }
}

fn parse_leading_int(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == 0 || (end == 1 && !bytes[0].is_ascii_digit()) {
        return Ok(0);
    }
    trimmed[..end].parse().map_err(|e: std::num::ParseIntError| Error::TypeMismatch(e.to_string()))
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(v) => write!(f, "{}", v.0),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
            Value::Binary(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::DateTime(dt) => write!(f, "{}", dt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_never_set_equals_anything() {
        assert!(!Value::Null.set_eq(&Value::Null));
        assert!(!Value::Null.set_eq(&Value::Int(0)));
    }

    #[test]
    fn null_sorts_first_under_total_order() {
        assert_eq!(Value::Null.cmp_total(&Value::Int(-100)), Ordering::Less);
    }

    #[test]
    fn numeric_string_compares_as_number() {
        assert_eq!(Value::Text("10".into()).compare(&Value::Int(9)), Some(Ordering::Greater));
    }

    #[test]
    fn non_numeric_string_vs_int_is_unknown() {
        assert_eq!(Value::Text("abc".into()).compare(&Value::Int(9)), None);
    }

    #[test]
    fn leading_digit_prefix_conversion() {
        assert_eq!(Value::Text("42abc".into()).as_int().unwrap(), 42);
        assert_eq!(Value::Text("".into()).as_int().unwrap(), 0);
    }

    #[test]
    fn integers_convert_to_decimal_exactly() {
        assert_eq!(Value::Int(7).as_decimal().unwrap(), Decimal::from(7));
    }
}
