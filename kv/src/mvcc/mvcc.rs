//! This mod implements MVCC (Multi-Version Concurrency Control), a widely used method for ACID transactions and concurrency control.
//! It allows multiple concurrent transactions to access and modify the same dataset, isolates them from each other,
//! detects and handles conflicts, and commits their writes atomically as a single unit.
//! It uses an underlying storage engine to store raw keys and values.
//!
//!
//! VERSIONS
//! ========
//! MVCC handles concurrency control by managing multiple historical versions of keys, identified by a timestamp.
//! Every write adds a new version at a higher timestamp, with deletes having a special tombstone value.
//!
//! For example, the keys a,b,c,d may have the following values at various logical timestamps (x is tombstone):
//!
//! Time
//! 5
//! 4  a4
//! 3      b3      x
//! 2
//! 1  a1      c1  d1
//!    a   b   c   d   Keys
//!
//! * At time t1, a transaction writes a=a1,c=c1,d=d1 and commits it.
//! * At time t2, transaction T2 is started, will see the values a=a1, c=c1, d=d1.
//! * At t3, a transaction writes b=b3 and deletes D.
//! * At t4, a transaction writes a=a4.
//! * A different transaction t5 running at T=5 will see a=a4, b=b3, c=c1.
//!
//! KV Storage Engine uses logical timestamps with a sequence number stored in `Key::NextVersion`.
//! Each new read-write transaction takes its timestamp from the current value of `Key::NextVersion`
//! and then increments the value for the next transaction.
//!
//!
//! ISOLATION
//! =========
//! MVCC provides an isolation level called snapshot isolation.
//! Briefly, transactions see a consistent snapshot of the database state as of their start time.
//! Writes made by concurrent or subsequent transactions are never visible to it.
//! If two concurrent transactions write to the same key they will conflict and one of them must retry.
//! A transaction's writes become atomically visible to subsequent transactions only when they commit,
//! and are rolled back on failure.
//! Read-only transactions never conflict with other transactions.
//!
//! Transactions write new versions at their timestamp, storing them as `Key::Version(key, version) => value`.
//! If a transaction writes to a key and finds a newer version, it returns an error and the client must retry.
//!
//! Active (uncommitted) read-write transactions record their version in the active set,
//! stored as `Key::TxnActive(version)`.
//! When new transactions begin, they take a snapshot of this active set,
//! and any key versions that belong to a transaction in the active set are considered `invisible` (to anyone except that transaction itself).
//! Writes to keys that already have a past version in the active set will also return an error.
//!
//! To commit, a transaction simply deletes its record in the active set.
//! This will immediately (and, crucially, atomically) make all of its writes visible to subsequent transactions,
//! but not ongoing ones. If the transaction is cancelled and rolled back,
//! it maintains a record of all keys it wrote as `Key::TxnWrite(version, key)`,
//! so that it can find the corresponding versions and delete them before removing itself from the active set.
//!
//! mvcc:
//!   Writers don't block readers.
//!   Readers don't block writers.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use serde_derive::{Deserialize, Serialize};
use crate::error::{CResult, Error};
use crate::mvcc::keycode;
use crate::mvcc::transaction::{Transaction, TransactionState};
use crate::mvcc::Version;
use crate::storage::engine::Engine;

/// An MVCC-based transactional key-value engine.
/// It wraps an underlying storage engine that's used for raw key/value storage.
pub struct MVCC<E: Engine> {
    engine: Arc<Mutex<E>>,
}

pub trait MVCCDef<E: Engine> {
    fn new(engine: E) -> MVCC<E>;

    fn begin(&self) -> CResult<Transaction<E>>;

    fn begin_read_only(&self) -> CResult<Transaction<E>>;

    fn begin_as_of(&self, version: Version) -> CResult<Transaction<E>>;

    fn resume(&self, state: TransactionState) -> CResult<Transaction<E>>;

    fn status(&self) -> CResult<Status>;
}

/// MVCC keys, using an order-preserving encoding that matches the ordering of
/// the enum's variants and of their payloads.
/// Cow byte slices allow encoding borrowed values and decoding into owned values.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Key<'a> {
    /// The next available version.
    NextVersion,

    /// Active (uncommitted) transactions by version.
    TxnActive(Version),

    /// `A snapshot of the active set` at each version.
    /// Only written for versions where the active set is non-empty (excluding itself).
    TxnActiveSnapshot(Version),

    /// Keeps track of all keys written to by an active transaction (identified by its version), in case it needs to roll back.
    TxnWrite(
        Version,
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
    ),

    /// A versioned key/value pair.
    Version(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
        Version,
    ),

    /// Unversioned non-transactional key/value pairs.
    /// These exist separately from versioned keys, i.e. the unversioned key "abcdefg" is entirely independent of the versioned key "abcdefg@7".
    /// These are mostly used for metadata.
    Unversioned(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
    ),
}

/// Tag bytes for each `Key` variant, in declaration order. Used both when
/// encoding a full `Key` and when encoding a `KeyPrefix` for a scan.
mod tag {
    pub const NEXT_VERSION: u8 = 0;
    pub const TXN_ACTIVE: u8 = 1;
    pub const TXN_ACTIVE_SNAPSHOT: u8 = 2;
    pub const TXN_WRITE: u8 = 3;
    pub const VERSION: u8 = 4;
    pub const UNVERSIONED: u8 = 5;
}

pub(crate) const VERSION_TAG: u8 = tag::VERSION;
pub(crate) const UNVERSIONED_TAG: u8 = tag::UNVERSIONED;

impl<'a> Key<'a> {
    pub fn decode(bytes: &'a [u8]) -> CResult<Self> {
        let (t, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::DecodingFailed("empty MVCC key".into()))?;
        match *t {
            tag::NEXT_VERSION => Ok(Key::NextVersion),
            tag::TXN_ACTIVE => {
                let (version, _) = keycode::decode_u64(rest)?;
                Ok(Key::TxnActive(version))
            }
            tag::TXN_ACTIVE_SNAPSHOT => {
                let (version, _) = keycode::decode_u64(rest)?;
                Ok(Key::TxnActiveSnapshot(version))
            }
            tag::TXN_WRITE => {
                let (version, rest) = keycode::decode_u64(rest)?;
                Ok(Key::TxnWrite(version, Cow::Borrowed(rest)))
            }
            tag::VERSION => {
                let (key, rest) = keycode::decode_bytes(rest)?;
                let (version, _) = keycode::decode_u64(rest)?;
                Ok(Key::Version(Cow::Owned(key), version))
            }
            tag::UNVERSIONED => Ok(Key::Unversioned(Cow::Borrowed(rest))),
            other => Err(Error::DecodingFailed(format!("unknown MVCC key tag {:#04x}", other))),
        }
    }

    pub fn encode(&self) -> CResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Key::NextVersion => keycode::encode_u8(&mut out, tag::NEXT_VERSION),
            Key::TxnActive(version) => {
                keycode::encode_u8(&mut out, tag::TXN_ACTIVE);
                keycode::encode_u64(&mut out, *version);
            }
            Key::TxnActiveSnapshot(version) => {
                keycode::encode_u8(&mut out, tag::TXN_ACTIVE_SNAPSHOT);
                keycode::encode_u64(&mut out, *version);
            }
            Key::TxnWrite(version, key) => {
                keycode::encode_u8(&mut out, tag::TXN_WRITE);
                keycode::encode_u64(&mut out, *version);
                keycode::encode_raw(&mut out, key);
            }
            Key::Version(key, version) => {
                keycode::encode_u8(&mut out, tag::VERSION);
                keycode::encode_bytes(&mut out, key);
                keycode::encode_u64(&mut out, *version);
            }
            Key::Unversioned(key) => {
                keycode::encode_u8(&mut out, tag::UNVERSIONED);
                keycode::encode_raw(&mut out, key);
            }
        }
        Ok(out)
    }
}

/// MVCC key prefixes, for prefix scans. These must match the keys above, including the enum variant index.
pub(crate) enum KeyPrefix<'a> {
    TxnActive,
    TxnWrite(Version),
    Version(Cow<'a, [u8]>),
    Unversioned,
}

impl<'a> KeyPrefix<'a> {
    pub(crate) fn encode(&self) -> CResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            KeyPrefix::TxnActive => keycode::encode_u8(&mut out, tag::TXN_ACTIVE),
            KeyPrefix::TxnWrite(version) => {
                keycode::encode_u8(&mut out, tag::TXN_WRITE);
                keycode::encode_u64(&mut out, *version);
            }
            KeyPrefix::Version(key) => {
                keycode::encode_u8(&mut out, tag::VERSION);
                keycode::encode_bytes(&mut out, key);
            }
            KeyPrefix::Unversioned => keycode::encode_u8(&mut out, tag::UNVERSIONED),
        }
        Ok(out)
    }
}

impl<E: Engine> MVCCDef<E> for MVCC<E> {
    fn new(engine: E) -> MVCC<E> {
        MVCC { engine: Arc::new(Mutex::new(engine)) }
    }

    fn begin(&self) -> CResult<Transaction<E>> {
        Transaction::begin(self.engine.clone())
    }

    fn begin_read_only(&self) -> CResult<Transaction<E>> {
        Transaction::begin_read_only(self.engine.clone(), None)
    }

    fn begin_as_of(&self, version: Version) -> CResult<Transaction<E>> {
        Transaction::begin_read_only(self.engine.clone(), Some(version))
    }

    fn resume(&self, state: TransactionState) -> CResult<Transaction<E>> {
        Transaction::resume(self.engine.clone(), state)
    }

    fn status(&self) -> CResult<Status> {
        let mut engine = self.engine.lock()?;
        let versions = match engine.get(&Key::NextVersion.encode()?)? {
            Some(ref v) => bincode::deserialize::<Version>(v)?.saturating_sub(1),
            None => 0,
        };
        let active_txns =
            engine.scan_prefix(&KeyPrefix::TxnActive.encode()?).collect::<CResult<Vec<_>>>()?.len() as u64;
        Ok(Status { versions, active_txns, storage: engine.status()? })
    }
}

impl<E: Engine> Clone for MVCC<E> {
    fn clone(&self) -> Self {
        MVCC { engine: self.engine.clone() }
    }
}

/// MVCC engine status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// The total number of MVCC versions (i.e.  read-write transactions).
    pub versions: u64,
    /// Number of currently active transactions.
    pub active_txns: u64,
    /// The storage engine.
    pub storage: super::super::storage::Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encode_decode_roundtrip() {
        let cases: Vec<Key> = vec![
            Key::NextVersion,
            Key::TxnActive(7),
            Key::TxnActiveSnapshot(7),
            Key::TxnWrite(3, Cow::Borrowed(b"abc")),
            Key::Version(Cow::Borrowed(b"abc"), 3),
            Key::Unversioned(Cow::Borrowed(b"schema")),
        ];
        for key in cases {
            let encoded = key.encode().unwrap();
            let decoded = Key::decode(&encoded).unwrap();
            assert_eq!(key, decoded);
        }
    }

    #[test]
    fn version_key_orders_by_key_then_version() {
        let a1 = Key::Version(Cow::Borrowed(b"a"), 1).encode().unwrap();
        let a2 = Key::Version(Cow::Borrowed(b"a"), 2).encode().unwrap();
        let b1 = Key::Version(Cow::Borrowed(b"b"), 1).encode().unwrap();
        assert!(a1 < a2);
        assert!(a2 < b1);
    }
}
