use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown lookup suffix, or a suffix applied to a field of the wrong type.
    InvalidLookup,
    /// Flat keyword terms and combinator expressions mixed in one call.
    MixedQueryMode,
    /// Ordering/formatting requested after the cursor materialized.
    AlreadyExecuted,
    /// A writer could not acquire exclusive access within the configured timeout.
    LockTimeout,
    /// Bad field name, unknown field, or a missing identity field for upsert.
    SchemaViolation,
    /// A buffered flush failed; the whole batch was rolled back.
    TransactionFailure,
    /// Mutation attempted through a read-only handle.
    ReadOnly,
    NotFound,
    InvalidArgument,
    Storage,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        let kind = match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                ErrorKind::LockTimeout
            }
            _ => ErrorKind::Storage,
        };
        Error {
            kind,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
