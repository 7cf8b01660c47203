//! Error type for the server front end, in the same flat-enum style as
//! [`sql::error::Error`] and [`kv::error::Error`]: the query pipeline's
//! errors pass through unchanged, and config/IO failures specific to this
//! crate get their own variant rather than a string grab-bag.

use std::fmt::{self, Display};

use sql::error::MySqlError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// An error produced by the parse/analyze/optimize/execute pipeline.
    Sql(sql::error::Error),
    /// Loading or applying the server configuration failed.
    Config(String),
    /// Reading from or writing to the REPL/batch front end failed.
    Io(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Sql(e) => Display::fmt(e, f),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<sql::error::Error> for Error {
    fn from(err: sql::error::Error) -> Self {
        Error::Sql(err)
    }
}

impl From<kv::error::Error> for Error {
    fn from(err: kv::error::Error) -> Self {
        Error::Sql(sql::error::Error::from(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// The (code, sql_state) pair this error surfaces to a client. Anything
    /// outside the query pipeline (config, local IO) has no MySQL analogue,
    /// so it is reported as the generic internal error.
    pub fn mysql_error(&self) -> MySqlError {
        match self {
            Error::Sql(e) => e.mysql_error(),
            Error::Config(_) | Error::Io(_) => MySqlError { code: 1105, sql_state: "HY000" },
        }
    }
}
