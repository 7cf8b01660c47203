//! Per-session transaction state machine: `NoTxn` (autocommit) / `InTxn` /
//! `Aborted`, driving a single [`kv::mvcc::Transaction`] underneath.
//!
//! `kv::mvcc::Transaction::commit`/`rollback` consume `self` by value, so
//! the coordinator keeps at most one owned transaction in an `Option` and
//! takes it out whenever a statement closes it.

use std::sync::Arc;

use kv::mvcc::{Transaction, MVCCDef, MVCC};
use kv::storage::engine::Engine;
use sql::error::Error as SqlError;

use crate::error::{Error, Result};

/// `REPEATABLE READ` is the only isolation level this engine actually
/// enforces differently from the other: snapshot isolation against the
/// transaction's start version. `READ COMMITTED` is accepted as a session
/// variable (see DESIGN.md) but, since the KV store's write path always
/// checks for conflicts at write time regardless of the reader's declared
/// isolation, behaves identically to `REPEATABLE READ` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::RepeatableRead
    }
}

/// Owns the transaction state for one connection.
pub struct Coordinator<E: Engine> {
    mvcc: Arc<MVCC<E>>,
    txn: Option<Transaction<E>>,
    aborted: bool,
    pub isolation: IsolationLevel,
}

impl<E: Engine> Coordinator<E> {
    pub fn new(mvcc: Arc<MVCC<E>>) -> Self {
        Coordinator { mvcc, txn: None, aborted: false, isolation: IsolationLevel::default() }
    }

    pub fn in_txn(&self) -> bool {
        self.txn.is_some()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// `BEGIN` / `START TRANSACTION`.
    pub fn begin(&mut self) -> Result<()> {
        if self.aborted {
            return Err(Error::Sql(SqlError::TransactionAborted));
        }
        if self.txn.is_some() {
            return Err(Error::Sql(SqlError::NestedTransaction));
        }
        let txn = self.mvcc.begin().map_err(SqlError::from)?;
        self.txn = Some(txn);
        Ok(())
    }

    /// `COMMIT`. Whether the underlying commit succeeds or hits a write
    /// conflict, the session returns to `NoTxn` — a conflicting transaction
    /// is gone either way.
    pub fn commit(&mut self) -> Result<()> {
        if self.aborted {
            return Err(Error::Sql(SqlError::TransactionAborted));
        }
        let txn = self.txn.take().ok_or(Error::Sql(SqlError::NoTransaction))?;
        txn.commit().map_err(SqlError::from)?;
        Ok(())
    }

    /// `ROLLBACK`, valid from both `InTxn` and `Aborted`.
    pub fn rollback(&mut self) -> Result<()> {
        let txn = self.txn.take().ok_or(Error::Sql(SqlError::NoTransaction))?;
        self.aborted = false;
        txn.rollback().map_err(SqlError::from)?;
        Ok(())
    }

    /// Runs one statement's body against the appropriate transaction: the
    /// open explicit one if there is one, or a fresh implicit transaction
    /// that is committed on success and rolled back on error.
    ///
    /// A failure inside an explicit transaction moves the session to
    /// `Aborted` rather than closing the transaction — only `ROLLBACK`
    /// clears it, matching the coordinator's documented state machine.
    pub fn run_statement<T>(
        &mut self,
        read_only: bool,
        f: impl FnOnce(&Transaction<E>) -> sql::error::Result<T>,
    ) -> Result<T> {
        if self.aborted {
            return Err(Error::Sql(SqlError::TransactionAborted));
        }
        if let Some(txn) = &self.txn {
            return f(txn).map_err(|e| {
                self.aborted = true;
                Error::from(e)
            });
        }
        let txn = if read_only {
            self.mvcc.begin_read_only().map_err(SqlError::from)?
        } else {
            self.mvcc.begin().map_err(SqlError::from)?
        };
        match f(&txn) {
            Ok(v) => {
                txn.commit().map_err(SqlError::from)?;
                Ok(v)
            }
            Err(e) => {
                let _ = txn.rollback();
                Err(Error::from(e))
            }
        }
    }

    /// Rolls back any open transaction; used when a connection closes with
    /// one still in flight.
    pub fn close(&mut self) {
        if let Some(txn) = self.txn.take() {
            let _ = txn.rollback();
        }
        self.aborted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv::storage::memory::Memory;

    fn coordinator() -> Coordinator<Memory> {
        Coordinator::new(Arc::new(MVCC::new(Memory::new())))
    }

    #[test]
    fn nested_begin_is_rejected() {
        let mut c = coordinator();
        c.begin().unwrap();
        assert_eq!(c.begin(), Err(Error::Sql(SqlError::NestedTransaction)));
    }

    #[test]
    fn statement_error_aborts_explicit_transaction_until_rollback() {
        let mut c = coordinator();
        c.begin().unwrap();
        let err: Result<()> = c.run_statement(false, |_txn| Err(SqlError::ConstraintViolation("boom".into())));
        assert!(err.is_err());
        assert!(c.is_aborted());
        assert_eq!(
            c.run_statement(true, |_txn| Ok(())),
            Err(Error::Sql(SqlError::TransactionAborted))
        );
        c.rollback().unwrap();
        assert!(!c.is_aborted());
        assert!(!c.in_txn());
    }

    #[test]
    fn autocommit_statement_leaves_no_open_transaction() {
        let mut c = coordinator();
        c.run_statement(false, |_txn| Ok(())).unwrap();
        assert!(!c.in_txn());
    }

    #[test]
    fn commit_without_transaction_errors() {
        let mut c = coordinator();
        assert_eq!(c.commit(), Err(Error::Sql(SqlError::NoTransaction)));
    }

    #[test]
    fn rollback_clears_aborted_flag() {
        let mut c = coordinator();
        c.begin().unwrap();
        let _: Result<()> = c.run_statement(false, |_txn| Err(SqlError::Internal("boom".into())));
        assert!(c.is_aborted());
        c.rollback().unwrap();
        assert!(!c.is_aborted());
    }
}
