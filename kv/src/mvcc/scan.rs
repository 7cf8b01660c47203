//! Dedups a raw engine scan over `Key::Version(key, version)` entries down to
//! the latest value visible to a transaction, for each distinct logical key.
//!
//! [`Transaction::scan`](super::transaction::Transaction::scan) materializes
//! the raw engine scan (under the engine's lock) before building this
//! iterator, rather than holding the lock open across `next()` calls. This
//! keeps the type simple -- no self-referential struct holding both the
//! `MutexGuard` and an iterator borrowing from it -- at the cost of
//! buffering a scan's raw rows in memory, which the [`Sort`]/[`Aggregate`]
//! operators above it do anyway.

use crate::error::{CResult, Error};
use crate::mvcc::mvcc::Key;
use crate::mvcc::transaction::TransactionState;

/// An iterator over the latest live and visible key/value pairs as of a
/// transaction's snapshot.
pub struct ScanIterator {
    inner: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl ScanIterator {
    /// Builds a `ScanIterator` from a raw, ascending `(encoded_key, value)`
    /// scan of `Key::Version` entries, keeping only the newest version of
    /// each logical key that is visible to `txn`, and dropping tombstones.
    pub(crate) fn from_versions(
        raw: Vec<(Vec<u8>, Vec<u8>)>,
        txn: &TransactionState,
    ) -> CResult<Self> {
        let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut current_key: Option<Vec<u8>> = None;
        let mut current_value: Option<Option<Vec<u8>>> = None;

        for (raw_key, raw_value) in raw {
            let (key, version) = match Key::decode(&raw_key)? {
                Key::Version(key, version) => (key.into_owned(), version),
                k => return Err(Error::Internal(format!("expected Key::Version, got {:?}", k))),
            };

            if current_key.as_deref() != Some(key.as_slice()) {
                if let (Some(k), Some(Some(v))) = (current_key.take(), current_value.take()) {
                    out.push((k, v));
                }
                current_key = Some(key);
            }

            if !txn.active.contains(&version) && version <= txn.version {
                current_value = Some(bincode::deserialize::<Option<Vec<u8>>>(&raw_value)?);
            }
        }
        if let (Some(k), Some(Some(v))) = (current_key, current_value) {
            out.push((k, v));
        }

        Ok(Self { inner: out.into_iter() })
    }
}

impl Iterator for ScanIterator {
    type Item = CResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Ok)
    }
}

impl DoubleEndedIterator for ScanIterator {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::collections::HashSet;

    fn state(version: u64) -> TransactionState {
        TransactionState { version, read_only: false, active: HashSet::new() }
    }

    #[test]
    fn keeps_latest_version_per_key() {
        let raw = vec![
            (Key::Version(Cow::Borrowed(b"a"), 1).encode().unwrap(), bincode::serialize(&Some(b"a1".to_vec())).unwrap()),
            (Key::Version(Cow::Borrowed(b"a"), 2).encode().unwrap(), bincode::serialize(&Some(b"a2".to_vec())).unwrap()),
            (Key::Version(Cow::Borrowed(b"b"), 1).encode().unwrap(), bincode::serialize(&Some(b"b1".to_vec())).unwrap()),
        ];
        let items: Vec<_> =
            ScanIterator::from_versions(raw, &state(2)).unwrap().collect::<CResult<Vec<_>>>().unwrap();
        assert_eq!(items, vec![(b"a".to_vec(), b"a2".to_vec()), (b"b".to_vec(), b"b1".to_vec())]);
    }

    #[test]
    fn drops_tombstones() {
        let raw = vec![
            (Key::Version(Cow::Borrowed(b"a"), 1).encode().unwrap(), bincode::serialize(&Some(b"a1".to_vec())).unwrap()),
            (Key::Version(Cow::Borrowed(b"a"), 2).encode().unwrap(), bincode::serialize::<Option<Vec<u8>>>(&None).unwrap()),
        ];
        let items: Vec<_> =
            ScanIterator::from_versions(raw, &state(2)).unwrap().collect::<CResult<Vec<_>>>().unwrap();
        assert!(items.is_empty());
    }
}
