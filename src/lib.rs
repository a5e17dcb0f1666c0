#![deny(missing_docs)]
//! An embedded, memory-first, persistent key-value store for short
//! string keys and string values.
//!
//! ```
//! use ckydb::Ckydb;
//! use tempfile::TempDir;
//!
//! # fn main() -> ckydb::Result<()> {
//! let dir = TempDir::new().expect("unable to create temporary working directory");
//! let db = Ckydb::new(dir.path(), 4 * 1024, 5 * 60)?;
//!
//! db.set("cow", "500 months")?;
//! assert_eq!(db.get("cow")?, "500 months");
//!
//! db.delete("cow")?;
//! assert!(db.get("cow").is_err());
//! # Ok(())
//! # }
//! ```
mod cache;
mod codec;
mod error;
mod fs_util;
mod handle;
mod index;
mod store;

pub use error::{CorruptedDataError, NotFoundError, Result};
pub use handle::{Ckydb, DEFAULT_MAX_FILE_SIZE_KB, DEFAULT_VACUUM_INTERVAL_SEC};
pub use store::Store;
