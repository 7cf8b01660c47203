//! `kv` is an ordered byte-key/byte-value storage engine with snapshot-isolated,
//! write-conflict-detecting MVCC transactions.
//!
//! Keys and values are arbitrary byte strings, stored in lexicographical key
//! order. Two storage engines are provided: [`storage::memory::Memory`], a
//! pure in-memory `BTreeMap`, and [`storage::log_cask::LogCask`], a
//! log-structured append-only store that keeps its live key index in memory
//! and recovers it by replaying the log on open.
//!
//! The [`mvcc`] module wraps any [`storage::engine::Engine`] with snapshot
//! isolation: each [`mvcc::Transaction`] reads a consistent point-in-time
//! view of the keyspace, and concurrent writers to the same key are detected
//! and rejected at commit time rather than silently lost.
//!
//! ## Getting started
//!
//! ```rust
//! use kv::error::Error;
//! use kv::storage::engine::Engine;
//! use kv::storage::log_cask::LogCask;
//!
//! fn run() -> Result<(), Error> {
//!     let storage_path = std::env::temp_dir().join("kvdb-doctest").join("kvdb");
//!
//!     let mut engine = LogCask::new(storage_path)?;
//!     engine.set(b"b", vec![0x01])?;
//!     engine.set(b"b", vec![0x02])?;
//!
//!     engine.set(b"e", vec![0x05])?;
//!     engine.delete(b"e")?;
//!
//!     engine.set(b"c", vec![0x00])?;
//!     engine.delete(b"c")?;
//!     engine.set(b"c", vec![0x03])?;
//!
//!     engine.set(b"", vec![])?;
//!
//!     engine.set(b"a", vec![0x01])?;
//!
//!     engine.delete(b"f")?;
//!
//!     engine.delete(b"d")?;
//!     engine.set(b"d", vec![0x04])?;
//!
//!     // Make sure the scan yields the expected results.
//!     assert_eq!(
//!             vec![
//!                 (b"".to_vec(), vec![]),
//!                 (b"a".to_vec(), vec![0x01]),
//!                 (b"b".to_vec(), vec![0x02]),
//!                 (b"c".to_vec(), vec![0x03]),
//!                 (b"d".to_vec(), vec![0x04]),
//!             ],
//!             engine.scan(..).collect::<Result<Vec<_>,Error>> ()?,
//!         );
//!
//!     engine.flush()?;
//!
//!     Ok(())
//! }
//!
//! fn main() {
//!     run().unwrap();
//! }
//! ```

pub mod error;
pub mod mvcc;
pub mod storage;

#[cfg(test)]
mod test {
    use crate::error::Error;
    use crate::storage::engine::Engine;
    use crate::storage::log_cask::LogCask;

    #[test]
    fn run() -> Result<(), Error> {
        let path = tempdir::TempDir::new("demo")?.path().join("kvdb");

        let mut engine = LogCask::new(path)?;
        engine.set(b"b", vec![0x01])?;
        engine.set(b"b", vec![0x02])?;

        engine.set(b"e", vec![0x05])?;
        engine.delete(b"e")?;

        engine.set(b"c", vec![0x00])?;
        engine.delete(b"c")?;
        engine.set(b"c", vec![0x03])?;

        engine.set(b"", vec![])?;

        engine.set(b"a", vec![0x01])?;

        engine.delete(b"f")?;

        engine.delete(b"d")?;
        engine.set(b"d", vec![0x04])?;

        // Make sure the scan yields the expected results.
        assert_eq!(
            vec![
                (b"".to_vec(), vec![]),
                (b"a".to_vec(), vec![0x01]),
                (b"b".to_vec(), vec![0x02]),
                (b"c".to_vec(), vec![0x03]),
                (b"d".to_vec(), vec![0x04]),
            ],
            engine.scan(..).collect::<Result<Vec<_>, Error>>()?,
        );

        engine.flush()?;

        Ok(())
    }
}
