pub mod mvcc;
pub mod keycode;
mod scan;
mod transaction;

pub use mvcc::{Key, Status, MVCC, MVCCDef};
pub use scan::ScanIterator;
pub use transaction::{Transaction, TransactionState};

/// An MVCC version represents a logical timestamp. The latest version is incremented
/// when beginning each read-write transaction.
pub type Version = u64;
