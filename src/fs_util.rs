//! Path and file lifecycle helpers shared by the index manager and the
//! Store: folder/segment creation, directory scanning, timestamp
//! generation.
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const INDEX_FILENAME: &str = "index.idx";
pub const DEL_FILENAME: &str = "delete.del";
const LOG_EXT: &str = "log";
const DATA_EXT: &str = "cky";

/// Nanosecond wall-clock timestamp, zero-padded to 19 digits so that
/// lexicographic order matches chronological order.
pub fn now_nanos_padded() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch");
    format!("{:019}", since_epoch.as_nanos())
}

pub fn log_path(db_path: &Path, stamp: &str) -> PathBuf {
    db_path.join(format!("{}.{}", stamp, LOG_EXT))
}

pub fn data_path(db_path: &Path, stamp: &str) -> PathBuf {
    db_path.join(format!("{}.{}", stamp, DATA_EXT))
}

pub fn index_path(db_path: &Path) -> PathBuf {
    db_path.join(INDEX_FILENAME)
}

pub fn del_path(db_path: &Path) -> PathBuf {
    db_path.join(DEL_FILENAME)
}

/// Creates the database folder if it doesn't already exist.
pub fn ensure_db_folder(db_path: &Path) -> Result<()> {
    fs::create_dir_all(db_path)?;
    Ok(())
}

/// Creates an empty file at `path` if it doesn't already exist.
pub fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::File::create(path)?;
    }
    Ok(())
}

/// The stems (timestamps) of every file under `db_path` ending in `.log`
/// or `.cky` respectively, unsorted.
pub fn scan_segments(db_path: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let mut log_stamps = Vec::new();
    let mut data_stamps = Vec::new();

    for entry in fs::read_dir(db_path)? {
        let entry = entry?;
        let path = entry.path();
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s.to_owned(),
            None => continue,
        };
        match path.extension().and_then(|e| e.to_str()) {
            Some(LOG_EXT) => log_stamps.push(stem),
            Some(DATA_EXT) => data_stamps.push(stem),
            _ => {}
        }
    }

    Ok((log_stamps, data_stamps))
}
