use std::fmt::Display;

/// Pagezip errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Invalid user input, typically a rejected path or argument.
    InvalidInput(String),
    /// Inconsistent data observed while streaming, typically a page size
    /// or page count that drifted mid-snapshot.
    InvalidData(String),
    /// An IO error, tagged with the offending path where known.
    IO(String),
    /// A database engine error.
    Database(String),
    /// A compressor error.
    Compress(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::Database(msg) => write!(f, "database error: {msg}"),
            Error::Compress(msg) => write!(f, "compression error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidInput for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidData for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::InvalidData(format!($($args)*)).into() };
}

/// A pagezip Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<flate2::CompressError> for Error {
    fn from(err: flate2::CompressError) -> Self {
        Error::Compress(err.to_string())
    }
}
