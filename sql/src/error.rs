//! Error type for the SQL layer, plus its mapping onto the MySQL error
//! code/SQL state pairs that the handler surfaces to clients.

use std::fmt::{self, Display};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while lexing, parsing, analyzing, optimizing or executing
/// SQL. Kept as a flat enum, in the same style as [`kv::error::Error`], so
/// that the handler can map a variant to a MySQL error code without string
/// matching.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The input could not be tokenized or did not match the grammar.
    Syntax(String),
    /// A database named in the statement does not exist.
    UnknownDatabase(String),
    /// A statement referenced an unqualified table with no database selected.
    NoDatabaseSelected,
    /// A table named in the statement does not exist.
    UnknownTable(String),
    /// A column named in the statement does not resolve against any scope.
    UnknownColumn(String),
    /// CREATE DATABASE named something that already exists.
    DatabaseExists(String),
    /// CREATE TABLE named something that already exists.
    TableExists(String),
    /// CREATE INDEX named something that already exists on the table.
    IndexExists(String),
    /// An INSERT/UPDATE column list did not match its source's arity.
    ColumnCountMismatch(String),
    /// Two values could not be compared or combined under the type system's rules.
    TypeMismatch(String),
    /// A value violated a declared constraint (NOT NULL, uniqueness, column count).
    ConstraintViolation(String),
    /// The current session is not permitted to perform the action.
    AccessDenied(String),
    /// A write conflicted with a concurrent transaction; the client should retry.
    TransactionConflict,
    /// The current transaction was aborted by a prior statement error and
    /// must be rolled back before any further statement runs.
    TransactionAborted,
    /// BEGIN was issued while already inside an explicit transaction.
    NestedTransaction,
    /// A statement required no open transaction, or vice versa.
    NoTransaction,
    /// The query or connection was cancelled by KILL.
    Canceled,
    /// Encoding or decoding a key or row failed; the data is considered corrupt.
    Codec(String),
    /// Any other internal failure.
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Syntax(msg) => write!(f, "syntax error: {}", msg),
            Error::UnknownDatabase(name) => write!(f, "unknown database '{}'", name),
            Error::NoDatabaseSelected => write!(f, "no database selected"),
            Error::UnknownTable(name) => write!(f, "unknown table '{}'", name),
            Error::UnknownColumn(name) => write!(f, "unknown column '{}'", name),
            Error::DatabaseExists(name) => write!(f, "database '{}' already exists", name),
            Error::TableExists(name) => write!(f, "table '{}' already exists", name),
            Error::IndexExists(name) => write!(f, "index '{}' already exists", name),
            Error::ColumnCountMismatch(msg) => write!(f, "column count mismatch: {}", msg),
            Error::TypeMismatch(msg) => write!(f, "type mismatch: {}", msg),
            Error::ConstraintViolation(msg) => write!(f, "constraint violation: {}", msg),
            Error::AccessDenied(msg) => write!(f, "access denied: {}", msg),
            Error::TransactionConflict => write!(f, "transaction conflict, please retry"),
            Error::TransactionAborted => {
                write!(f, "current transaction is aborted, statements ignored until ROLLBACK")
            }
            Error::NestedTransaction => write!(f, "already in a transaction"),
            Error::NoTransaction => write!(f, "no transaction is in progress"),
            Error::Canceled => write!(f, "query was canceled"),
            Error::Codec(msg) => write!(f, "codec error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<kv::error::Error> for Error {
    fn from(err: kv::error::Error) -> Self {
        match err {
            kv::error::Error::Serialization => Error::TransactionConflict,
            kv::error::Error::ReadOnly => {
                Error::ConstraintViolation("cannot write in a read-only transaction".into())
            }
            kv::error::Error::TransactionClosed => Error::NoTransaction,
            kv::error::Error::EncodingFailed(m) | kv::error::Error::DecodingFailed(m) => {
                Error::Codec(m)
            }
            other => Error::Internal(other.to_string()),
        }
    }
}

/// The (code, sql_state) pair a client-visible error carries, independent of
/// the wire framer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MySqlError {
    pub code: u16,
    pub sql_state: &'static str,
}

impl Error {
    pub fn mysql_error(&self) -> MySqlError {
        match self {
            Error::Syntax(_) => MySqlError { code: 1064, sql_state: "42000" },
            Error::UnknownDatabase(_) => MySqlError { code: 1049, sql_state: "42000" },
            Error::NoDatabaseSelected => MySqlError { code: 1046, sql_state: "3D000" },
            Error::UnknownTable(_) => MySqlError { code: 1146, sql_state: "42S02" },
            Error::UnknownColumn(_) => MySqlError { code: 1054, sql_state: "42S22" },
            Error::DatabaseExists(_) => MySqlError { code: 1007, sql_state: "42000" },
            Error::TableExists(_) => MySqlError { code: 1050, sql_state: "42000" },
            Error::IndexExists(_) => MySqlError { code: 1061, sql_state: "42000" },
            Error::ColumnCountMismatch(_) => MySqlError { code: 1136, sql_state: "21S01" },
            Error::ConstraintViolation(_) => MySqlError { code: 1062, sql_state: "23000" },
            Error::TransactionConflict => MySqlError { code: 1213, sql_state: "40001" },
            Error::AccessDenied(_) => MySqlError { code: 1045, sql_state: "28000" },
            Error::TypeMismatch(_)
            | Error::TransactionAborted
            | Error::NestedTransaction
            | Error::NoTransaction
            | Error::Canceled
            | Error::Codec(_)
            | Error::Internal(_) => MySqlError { code: 1105, sql_state: "HY000" },
        }
    }
}
