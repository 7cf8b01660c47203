use std::borrow::Cow;
use std::collections::{Bound, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use serde_derive::{Deserialize, Serialize};
use crate::error::{CResult, Error};
use crate::mvcc::mvcc::{Key, KeyPrefix, UNVERSIONED_TAG, VERSION_TAG};
use crate::mvcc::scan::ScanIterator;
use crate::mvcc::Version;
use crate::storage::engine::Engine;

/// An MVCC transaction.
pub struct Transaction<E: Engine> {
    /// The underlying engine, shared by all transactions.
    engine: Arc<Mutex<E>>,

    /// The transaction state.
    st: TransactionState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionState {
    /// The version this transaction is running at.
    /// Only one read-write transaction can run at a given version, since this identifies its writes.
    pub version: Version,

    /// If true, the transaction is read only.
    pub read_only: bool,

    /// The set of concurrent active (uncommitted) transactions, as of the start of this transaction.
    /// Their writes should be invisible to this transaction even if they're writing at a lower version,
    /// since they're not committed yet.
    pub active: HashSet<Version>,
}

impl TransactionState {
    /// Returns whether the given version is visible to this transaction: it
    /// must not belong to a transaction that was still active when this one
    /// began (our own version is never in `active`, so our own writes remain
    /// visible to ourselves).
    fn is_visible(&self, version: Version) -> bool {
        !self.active.contains(&version)
    }
}

impl<E: Engine> Transaction<E> {
    /// Begins a new read-write transaction.
    pub fn begin(engine: Arc<Mutex<E>>) -> CResult<Self> {
        let mut session = engine.lock()?;

        let version = match session.get(&Key::NextVersion.encode()?)? {
            Some(ref v) => bincode::deserialize(v)?,
            None => 1,
        };
        session.set(&Key::NextVersion.encode()?, bincode::serialize(&(version + 1))?)?;

        let active = Self::scan_active(&mut session)?;
        if !active.is_empty() {
            session.set(
                &Key::TxnActiveSnapshot(version).encode()?,
                bincode::serialize(&active)?,
            )?;
        }
        session.set(&Key::TxnActive(version).encode()?, vec![])?;
        drop(session);

        Ok(Self { engine, st: TransactionState { version, read_only: false, active } })
    }

    /// Begins a read-only transaction. If `as_of` is given, it runs as of
    /// that historical version (and its active snapshot), otherwise it takes
    /// a fresh snapshot of the current active set.
    pub fn begin_read_only(engine: Arc<Mutex<E>>, as_of: Option<Version>) -> CResult<Self> {
        let mut session = engine.lock()?;

        let mut version = match session.get(&Key::NextVersion.encode()?)? {
            Some(ref v) => bincode::deserialize(v)?,
            None => 1,
        };

        let active = if let Some(as_of) = as_of {
            if as_of >= version {
                return Err(Error::Value(format!("version {} does not exist", as_of)));
            }
            version = as_of;
            match session.get(&Key::TxnActiveSnapshot(version).encode()?)? {
                Some(ref v) => bincode::deserialize(v)?,
                None => HashSet::new(),
            }
        } else {
            Self::scan_active(&mut session)?
        };
        drop(session);

        Ok(Self { engine, st: TransactionState { version, read_only: true, active } })
    }

    /// Resumes a transaction from a previously saved state (e.g. a session
    /// that survived a reconnect, or RepeatableRead re-entry across
    /// statements within the same explicit transaction).
    pub fn resume(engine: Arc<Mutex<E>>, st: TransactionState) -> CResult<Self> {
        Ok(Self { engine, st })
    }

    pub fn version(&self) -> Version {
        self.st.version
    }

    pub fn is_read_only(&self) -> bool {
        self.st.read_only
    }

    pub fn state(&self) -> &TransactionState {
        &self.st
    }

    /// Commits the transaction, making its writes visible to any transaction
    /// that begins after this call returns.
    pub fn commit(self) -> CResult<()> {
        if self.st.read_only {
            return Ok(());
        }
        let mut engine = self.engine.lock()?;
        let remove = engine
            .scan_prefix(&KeyPrefix::TxnWrite(self.st.version).encode()?)
            .map(|r| r.map(|(k, _)| k))
            .collect::<CResult<Vec<_>>>()?;
        for key in remove {
            engine.delete(&key)?;
        }
        engine.delete(&Key::TxnActive(self.st.version).encode()?)?;
        engine.flush()
    }

    /// Rolls back the transaction, removing all versions it wrote.
    pub fn rollback(self) -> CResult<()> {
        if self.st.read_only {
            return Ok(());
        }
        let mut engine = self.engine.lock()?;
        let mut rollback = Vec::new();
        let mut scan = engine.scan_prefix(&KeyPrefix::TxnWrite(self.st.version).encode()?);
        while let Some((key, _)) = scan.next().transpose()? {
            match Key::decode(&key)? {
                Key::TxnWrite(_, written) => {
                    rollback.push(Key::Version(written, self.st.version).encode()?)
                }
                k => return Err(Error::Internal(format!("expected TxnWrite key, got {:?}", k))),
            }
            rollback.push(key);
        }
        drop(scan);
        for key in rollback {
            engine.delete(&key)?;
        }
        engine.delete(&Key::TxnActive(self.st.version).encode()?)
    }

    /// Fetches the latest visible value for a key, if any.
    pub fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let mut engine = self.engine.lock()?;
        let from = Key::Version(Cow::Borrowed(key), 0).encode()?;
        let to = Key::Version(Cow::Borrowed(key), self.st.version).encode()?;
        let mut scan = engine.scan(from..=to).rev();
        while let Some((raw_key, value)) = scan.next().transpose()? {
            match Key::decode(&raw_key)? {
                Key::Version(_, version) => {
                    if self.st.is_visible(version) {
                        return Ok(bincode::deserialize::<Option<Vec<u8>>>(&value)?);
                    }
                }
                k => return Err(Error::Internal(format!("expected Key::Version, got {:?}", k))),
            }
        }
        Ok(None)
    }

    /// Sets a value for a key, replacing the existing value if any.
    pub fn set(&self, key: &[u8], value: Vec<u8>) -> CResult<()> {
        self.write(key, Some(value))
    }

    /// Deletes a key, or does nothing if it does not exist.
    pub fn delete(&self, key: &[u8]) -> CResult<()> {
        self.write(key, None)
    }

    /// Writes a new version (or a tombstone, for deletes), after checking
    /// for write-write conflicts against any version newer than our
    /// snapshot, or any version written by a still-active transaction.
    fn write(&self, key: &[u8], value: Option<Vec<u8>>) -> CResult<()> {
        if self.st.read_only {
            return Err(Error::ReadOnly);
        }
        let mut engine = self.engine.lock()?;

        // Conflict check: look at the latest version of this key regardless
        // of visibility. If it was written by a still-active transaction
        // (including ourselves, which is harmless) or by a transaction that
        // committed after our snapshot was taken, we must abort.
        let min_active = self.st.active.iter().min().copied().unwrap_or(self.st.version + 1);
        let from = Key::Version(Cow::Borrowed(key), min_active).encode()?;
        let to = Key::Version(Cow::Borrowed(key), u64::MAX).encode()?;
        if let Some((raw_key, _)) = engine.scan(from..=to).next_back().transpose()? {
            match Key::decode(&raw_key)? {
                Key::Version(_, version) => {
                    if !self.st.active.contains(&version) && version > self.st.version {
                        return Err(Error::Serialization);
                    }
                }
                k => return Err(Error::Internal(format!("expected Key::Version, got {:?}", k))),
            }
        }

        engine.set(&Key::TxnWrite(self.st.version, Cow::Borrowed(key)).encode()?, vec![])?;
        engine.set(
            &Key::Version(Cow::Borrowed(key), self.st.version).encode()?,
            bincode::serialize(&value)?,
        )?;
        Ok(())
    }

    /// Iterates over the latest live and visible key/value pairs in the
    /// given range of raw (unversioned) keys.
    pub fn scan(&self, range: (Bound<Vec<u8>>, Bound<Vec<u8>>)) -> CResult<ScanIterator> {
        let (start, end) = range;
        let start = match start {
            Bound::Included(k) => Bound::Included(Key::Version(Cow::Owned(k), 0).encode()?),
            Bound::Excluded(k) => {
                Bound::Excluded(Key::Version(Cow::Owned(k), u64::MAX).encode()?)
            }
            // The Version tag byte alone sorts below every encoded Version
            // key, since a prefix always sorts before its extensions.
            Bound::Unbounded => Bound::Included(vec![VERSION_TAG]),
        };
        let end = match end {
            Bound::Included(k) => Bound::Included(Key::Version(Cow::Owned(k), u64::MAX).encode()?),
            Bound::Excluded(k) => Bound::Excluded(Key::Version(Cow::Owned(k), 0).encode()?),
            // The next tag (Unversioned) sorts above every encoded Version key.
            Bound::Unbounded => Bound::Excluded(vec![UNVERSIONED_TAG]),
        };

        let mut engine = self.engine.lock()?;
        let raw: Vec<(Vec<u8>, Vec<u8>)> = engine.scan((start, end)).collect::<CResult<Vec<_>>>()?;
        drop(engine);
        ScanIterator::from_versions(raw, &self.st)
    }

    /// Iterates over the latest live and visible key/value pairs whose raw
    /// key starts with `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> CResult<ScanIterator> {
        let start = Bound::Included(prefix.to_vec());
        let end = match prefix.iter().rposition(|b| *b != 0xff) {
            Some(i) => Bound::Excluded(
                prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
            ),
            None => Bound::Unbounded,
        };
        self.scan((start, end))
    }

    /// Scans the set of currently active transaction versions.
    fn scan_active(session: &mut MutexGuard<E>) -> CResult<HashSet<Version>> {
        let mut active = HashSet::new();
        let mut scan = session.scan_prefix(&KeyPrefix::TxnActive.encode()?);
        while let Some((key, _)) = scan.next().transpose()? {
            match Key::decode(&key)? {
                Key::TxnActive(version) => {
                    active.insert(version);
                }
                k => return Err(Error::Internal(format!("expected TxnActive key, got {:?}", k))),
            }
        }
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::Memory;

    #[test]
    fn begin_assigns_increasing_versions() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let t1 = Transaction::begin(engine.clone()).unwrap();
        assert_eq!(t1.version(), 1);
        t1.commit().unwrap();
        let t2 = Transaction::begin(engine).unwrap();
        assert_eq!(t2.version(), 2);
    }

    #[test]
    fn set_get_visible_within_own_transaction() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let txn = Transaction::begin(engine).unwrap();
        txn.set(b"a", b"1".to_vec()).unwrap();
        assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_discards_writes() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let txn = Transaction::begin(engine.clone()).unwrap();
        txn.set(b"a", b"1".to_vec()).unwrap();
        txn.rollback().unwrap();

        let txn2 = Transaction::begin(engine).unwrap();
        assert_eq!(txn2.get(b"a").unwrap(), None);
    }

    #[test]
    fn commit_is_visible_to_later_transactions() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let txn = Transaction::begin(engine.clone()).unwrap();
        txn.set(b"a", b"1".to_vec()).unwrap();
        txn.commit().unwrap();

        let txn2 = Transaction::begin(engine).unwrap();
        assert_eq!(txn2.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn snapshot_does_not_see_later_commits() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let reader = Transaction::begin_read_only(engine.clone(), None).unwrap();

        let writer = Transaction::begin(engine).unwrap();
        writer.set(b"a", b"1".to_vec()).unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.get(b"a").unwrap(), None);
    }

    #[test]
    fn concurrent_writes_to_same_key_conflict() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let t1 = Transaction::begin(engine.clone()).unwrap();
        let t2 = Transaction::begin(engine).unwrap();

        t1.set(b"a", b"1".to_vec()).unwrap();
        t1.commit().unwrap();

        let err = t2.set(b"a", b"2".to_vec()).unwrap_err();
        assert_eq!(err, Error::Serialization);
    }

    #[test]
    fn delete_then_get_returns_none() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let txn = Transaction::begin(engine).unwrap();
        txn.set(b"a", b"1".to_vec()).unwrap();
        txn.delete(b"a").unwrap();
        assert_eq!(txn.get(b"a").unwrap(), None);
    }
}
