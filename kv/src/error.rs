//! Error types shared by the storage engine and the MVCC transaction layer.

use std::fmt::{self, Display};

pub type CResult<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage engine (`storage::engine::Engine` implementations)
/// and by the MVCC transaction layer built on top of it.
///
/// Kept as a flat, cloneable enum rather than a `Box<dyn Error>` chain so that
/// callers above (the SQL layer, the session handler) can match on the kind of
/// failure without downcasting.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A key that was expected to exist was not found.
    KeyNotFound(String),

    /// A value failed validation or carried an unexpected shape.
    Value(String),

    /// Encoding a key or value failed.
    EncodingFailed(String),

    /// Decoding a key or value failed; the payload is considered corrupt.
    DecodingFailed(String),

    /// Malformed or out-of-range input data.
    InvalidData(String),

    /// An unsupported format or option was requested.
    UnsupportedFormat(String),

    /// Parsing (of a command, a config value, ...) failed.
    Parse(String),

    /// A read-write operation was attempted against a read-only engine or transaction.
    ReadOnly,

    /// Writing a key conflicted with a newer or concurrently active version.
    /// The caller (the transaction coordinator) must translate this into a
    /// client-visible, retryable conflict.
    Serialization,

    /// The transaction has already been committed or rolled back.
    TransactionClosed,

    /// Detecting a format or a codec failed.
    DetectionFailed(String),

    /// Any other internal failure: I/O errors, lock poisoning, invariant violations.
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeyNotFound(key) => write!(f, "key not found: {}", key),
            Error::Value(msg) => write!(f, "invalid value: {}", msg),
            Error::EncodingFailed(msg) => write!(f, "encoding failed: {}", msg),
            Error::DecodingFailed(msg) => write!(f, "decoding failed: {}", msg),
            Error::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            Error::UnsupportedFormat(msg) => write!(f, "unsupported format: {}", msg),
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::ReadOnly => write!(f, "the transaction is read-only"),
            Error::Serialization => write!(f, "serialization failure, retry transaction"),
            Error::TransactionClosed => write!(f, "transaction has already been closed"),
            Error::DetectionFailed(msg) => write!(f, "detection failed: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::EncodingFailed(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::DecodingFailed(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(format!("lock poisoned: {}", err))
    }
}
