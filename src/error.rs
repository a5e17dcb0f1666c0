use failure::Fail;

/// Custom Result type used for ckydb operations.
pub type Result<T> = std::result::Result<T, failure::Error>;

/// Error raised by `get`/`delete` when the key is absent from the index.
#[derive(Debug, Fail)]
#[fail(display = "key not found")]
pub struct NotFoundError;

/// Error raised when the index points at a timestamped key that no
/// segment actually contains, or a write targets a timestamp outside
/// every known segment range.
#[derive(Debug, Fail)]
#[fail(display = "data in the database is corrupted")]
pub struct CorruptedDataError;
