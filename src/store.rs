//! The Store: on-disk layout, in-memory index/memtable/cache hierarchy,
//! and the read/write/delete/vacuum/roll algorithms built on top of
//! them. Not internally thread-safe — see `crate::handle::Ckydb` for
//! the mutex-guarded, background-task-running wrapper around it.
use crate::cache::Cache;
use crate::codec;
use crate::error::{CorruptedDataError, NotFoundError, Result};
use crate::fs_util;
use crate::index::Index;
use log::{error, warn};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Which in-memory mirror a timestamped key's record currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentTarget {
    Active,
    Cached,
}

/// The actual representation of the data store.
pub struct Store {
    db_path: PathBuf,
    max_file_size_kb: u64,
    index: Index,
    memtable: HashMap<String, String>,
    cache: Cache,
    data_files: Vec<String>,
    current_log_file: String,
}

impl Store {
    /// Constructs a Store bound to `db_path`. Performs no I/O; call
    /// `load()` before issuing any other operation.
    pub fn new(db_path: impl Into<PathBuf>, max_file_size_kb: u64) -> Self {
        let db_path = db_path.into();
        Self {
            index: Index::new(fs_util::index_path(&db_path)),
            db_path,
            max_file_size_kb,
            memtable: HashMap::new(),
            cache: Cache::default(),
            data_files: Vec::new(),
            current_log_file: String::new(),
        }
    }

    /// Loads the database from disk and updates its in-memory state.
    /// Idempotent: creates the folder and its constituent files on
    /// first run, sweeps any deletes pending from a previous process,
    /// then rebuilds `index`/`memtable`/`data_files`/`current_log_file`
    /// from what is actually on disk.
    pub fn load(&mut self) -> Result<()> {
        fs_util::ensure_db_folder(&self.db_path)?;
        self.ensure_log_file()?;
        fs_util::ensure_file(&fs_util::del_path(&self.db_path))?;
        fs_util::ensure_file(&fs_util::index_path(&self.db_path))?;

        self.vacuum()?;
        self.refresh_file_props()?;
        self.index.load()?;
        self.memtable = self.read_pairs(&fs_util::log_path(&self.db_path, &self.current_log_file))?;

        Ok(())
    }

    /// Sets the given key `k` to the value `v`.
    pub fn set(&mut self, k: &str, v: &str) -> Result<()> {
        let (tk, is_new) = self.index.resolve_or_create(k)?;

        let target = match self.locate_segment_for_write(&tk) {
            Ok(target) => target,
            Err(err) => {
                if is_new {
                    let _ = self.index.remove(k);
                }
                return Err(err);
            }
        };

        let old_value = self.value_in_target(target, &tk);
        self.apply_to_target(target, &tk, v);

        if let Err(err) = self.persist_target(target) {
            // Best-effort rollback: reverse the tentative in-memory
            // write and, for a freshly created key, the index entry
            // too. Failures here are swallowed, matching the source.
            if is_new {
                self.remove_from_target(target, &tk);
                let _ = self.persist_target(target);
                let _ = self.index.remove(k);
            } else if let Some(old) = old_value {
                self.apply_to_target(target, &tk, &old);
                let _ = self.persist_target(target);
            }
            return Err(err);
        }

        if target == SegmentTarget::Active {
            self.roll_log()?;
        }

        Ok(())
    }

    /// Gets the value corresponding to the given key `k`.
    pub fn get(&mut self, k: &str) -> Result<String> {
        let tk = self.index.get(k).map(str::to_owned).ok_or(NotFoundError)?;
        match self.read_value_for_key(&tk)? {
            Some(v) => Ok(v),
            None => {
                error!("index has timestamped key {} for {} but no segment contains it", tk, k);
                Err(CorruptedDataError.into())
            }
        }
    }

    /// Deletes the value for the given key `k`. Physical removal of the
    /// bytes from whichever segment holds them is deferred to the next
    /// `vacuum()`.
    pub fn delete(&mut self, k: &str) -> Result<()> {
        let tk = self.index.remove(k)?.ok_or(NotFoundError)?;
        self.append_to_del_log(&tk)
    }

    /// Clears all data in the database, on disk and in memory, leaving
    /// a pristine, empty, but initialized database behind.
    pub fn clear(&mut self) -> Result<()> {
        if self.db_path.exists() {
            fs::remove_dir_all(&self.db_path)?;
        }
        self.load()
    }

    /// Deletes all keys marked for deletion from every `.log`/`.cky`
    /// file and then truncates `delete.del`.
    pub fn vacuum(&mut self) -> Result<()> {
        let del_path = fs_util::del_path(&self.db_path);
        let content = fs::read_to_string(&del_path)?;
        let keys_to_delete = codec::decode_keys(&content)?;
        if keys_to_delete.is_empty() {
            return Ok(());
        }

        for entry in fs::read_dir(&self.db_path)? {
            let path = entry?.path();
            if !self.is_sweepable_segment(&path) {
                continue;
            }
            if let Err(err) = sweep_file(&path, &keys_to_delete) {
                warn!("failed to sweep deleted keys from {}: {}", path.display(), err);
            }
        }

        fs::write(&del_path, "")?;
        Ok(())
    }

    /// Seals the active log into a `.cky` data file and opens a fresh
    /// active log, if the active log has grown to at least
    /// `max_file_size_kb`. A no-op otherwise.
    pub fn roll_log(&mut self) -> Result<()> {
        if self.log_file_size()? < self.max_file_size_kb as f64 {
            return Ok(());
        }

        let old_stamp = self.current_log_file.clone();
        fs::rename(
            fs_util::log_path(&self.db_path, &old_stamp),
            fs_util::data_path(&self.db_path, &old_stamp),
        )?;

        self.memtable.clear();
        let insert_at = self
            .data_files
            .binary_search(&old_stamp)
            .unwrap_or_else(|i| i);
        self.data_files.insert(insert_at, old_stamp);

        let new_stamp = fs_util::now_nanos_padded();
        fs::File::create(fs_util::log_path(&self.db_path, &new_stamp))?;
        self.current_log_file = new_stamp;

        Ok(())
    }

    /// Size, in kilobytes, of the active log file. Used by the roller
    /// to decide whether `roll_log()` should actually roll.
    pub fn log_file_size(&self) -> Result<f64> {
        let meta = fs::metadata(fs_util::log_path(&self.db_path, &self.current_log_file))?;
        Ok(meta.len() as f64 / 1024.0)
    }

    fn ensure_log_file(&self) -> Result<()> {
        let (log_stamps, _) = fs_util::scan_segments(&self.db_path)?;
        if log_stamps.is_empty() {
            let stamp = fs_util::now_nanos_padded();
            fs::File::create(fs_util::log_path(&self.db_path, &stamp))?;
        }
        Ok(())
    }

    fn refresh_file_props(&mut self) -> Result<()> {
        let (log_stamps, mut data_stamps) = fs_util::scan_segments(&self.db_path)?;
        if log_stamps.len() != 1 {
            error!(
                "expected exactly one active .log file in {}, found {}",
                self.db_path.display(),
                log_stamps.len()
            );
            return Err(CorruptedDataError.into());
        }

        data_stamps.sort();
        self.current_log_file = log_stamps.into_iter().next().unwrap();
        self.data_files = data_stamps;
        Ok(())
    }

    fn locate_segment_for_write(&mut self, tk: &str) -> Result<SegmentTarget> {
        if tk >= self.current_log_file.as_str() {
            return Ok(SegmentTarget::Active);
        }
        if self.cache.is_in_range(tk) {
            return Ok(SegmentTarget::Cached);
        }

        let range = self.timestamp_range_for(tk).ok_or_else(|| {
            error!("timestamped key {} falls outside every known segment range", tk);
            CorruptedDataError
        })?;
        self.load_cache_for_range(range)?;
        Ok(SegmentTarget::Cached)
    }

    fn read_value_for_key(&mut self, tk: &str) -> Result<Option<String>> {
        if tk >= self.current_log_file.as_str() {
            return Ok(self.memtable.get(tk).cloned());
        }
        if self.cache.is_in_range(tk) {
            return Ok(self.cache.data.get(tk).cloned());
        }

        match self.timestamp_range_for(tk) {
            None => Ok(None),
            Some(range) => {
                self.load_cache_for_range(range)?;
                Ok(self.cache.data.get(tk).cloned())
            }
        }
    }

    /// Returns `(S[i-1], S[i])` for the first segment timestamp `S[i]`
    /// strictly greater than `tk`, where `S` is the sorted union of
    /// `data_files` and `current_log_file`. `None` if no such segment
    /// exists.
    fn timestamp_range_for(&self, tk: &str) -> Option<(String, String)> {
        let mut stamps: Vec<&str> = self.data_files.iter().map(String::as_str).collect();
        stamps.push(self.current_log_file.as_str());
        stamps.sort_unstable();

        for i in 1..stamps.len() {
            if stamps[i] > tk {
                return Some((stamps[i - 1].to_owned(), stamps[i].to_owned()));
            }
        }
        None
    }

    fn load_cache_for_range(&mut self, range: (String, String)) -> Result<()> {
        let (start, end) = range;
        let data = self.read_pairs(&fs_util::data_path(&self.db_path, &start))?;
        self.cache = Cache::loaded(data, start, end);
        Ok(())
    }

    fn value_in_target(&self, target: SegmentTarget, tk: &str) -> Option<String> {
        match target {
            SegmentTarget::Active => self.memtable.get(tk).cloned(),
            SegmentTarget::Cached => self.cache.data.get(tk).cloned(),
        }
    }

    fn apply_to_target(&mut self, target: SegmentTarget, tk: &str, v: &str) {
        match target {
            SegmentTarget::Active => {
                self.memtable.insert(tk.to_owned(), v.to_owned());
            }
            SegmentTarget::Cached => {
                self.cache.update(tk.to_owned(), v.to_owned());
            }
        }
    }

    fn remove_from_target(&mut self, target: SegmentTarget, tk: &str) {
        match target {
            SegmentTarget::Active => {
                self.memtable.remove(tk);
            }
            SegmentTarget::Cached => {
                self.cache.remove(tk);
            }
        }
    }

    fn persist_target(&self, target: SegmentTarget) -> Result<()> {
        match target {
            SegmentTarget::Active => self.persist_pairs(
                &self.memtable,
                &fs_util::log_path(&self.db_path, &self.current_log_file),
            ),
            SegmentTarget::Cached => self.persist_pairs(
                &self.cache.data,
                &fs_util::data_path(&self.db_path, &self.cache.start),
            ),
        }
    }

    fn persist_pairs(&self, data: &HashMap<String, String>, path: &Path) -> Result<()> {
        let content = codec::encode_pairs(data.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        fs::write(path, content)?;
        Ok(())
    }

    fn read_pairs(&self, path: &Path) -> Result<HashMap<String, String>> {
        let content = fs::read_to_string(path)?;
        codec::decode_pairs(&content)
    }

    fn append_to_del_log(&self, tk: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(fs_util::del_path(&self.db_path))?;
        write!(file, "{}{}", tk, codec::TSEP)?;
        Ok(())
    }

    fn is_sweepable_segment(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return false,
        };
        if name == fs_util::INDEX_FILENAME || name == fs_util::DEL_FILENAME {
            return false;
        }
        matches!(path.extension().and_then(|e| e.to_str()), Some("log") | Some("cky"))
    }
}

/// Removes every record containing one of `keys` as a substring, then
/// rewrites the file with the survivors rejoined by `TSEP` (no
/// trailing separator, matching the source's rejoin behavior — the
/// codec's decoder tolerates its absence).
fn sweep_file(path: &Path, keys: &[String]) -> Result<()> {
    let content = fs::read_to_string(path)?;
    if content.is_empty() {
        return Ok(());
    }

    let trimmed = content.strip_suffix(codec::TSEP).unwrap_or(&content);
    let kept: Vec<&str> = trimmed
        .split(codec::TSEP)
        .filter(|record| !keys.iter().any(|k| record.contains(k.as_str())))
        .collect();

    fs::write(path, kept.join(codec::TSEP))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_store(max_kb: u64) -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let mut store = Store::new(dir.path(), max_kb);
        store.load().unwrap();
        (dir, store)
    }

    #[test]
    fn round_trip_set_and_get() {
        let (_dir, mut store) = new_store(4 * 1024);
        store.set("cow", "500 months").unwrap();
        store.set("dog", "23 months").unwrap();

        assert_eq!(store.get("cow").unwrap(), "500 months");
        assert_eq!(store.get("dog").unwrap(), "23 months");
    }

    #[test]
    fn overwrite_keeps_same_timestamped_key() {
        let (_dir, mut store) = new_store(4 * 1024);
        store.set("hey", "English").unwrap();
        let tk_before = store.index.get("hey").unwrap().to_owned();

        store.set("hey", "Jane").unwrap();
        let tk_after = store.index.get("hey").unwrap().to_owned();

        assert_eq!(store.get("hey").unwrap(), "Jane");
        assert_eq!(tk_before, tk_after);
    }

    #[test]
    fn get_on_missing_key_is_not_found() {
        let (_dir, mut store) = new_store(4 * 1024);
        assert!(store.get("ghost").is_err());
    }

    #[test]
    fn delete_hides_value_but_leaves_bytes_on_disk_until_vacuum() {
        let (_dir, mut store) = new_store(4 * 1024);
        store.set("hey", "English").unwrap();
        let tk = store.index.get("hey").unwrap().to_owned();

        store.delete("hey").unwrap();
        assert!(store.get("hey").is_err());
        assert!(store.index.get("hey").is_none());

        let log_content = fs::read_to_string(fs_util::log_path(&store.db_path, &store.current_log_file)).unwrap();
        assert!(log_content.contains(&tk));

        let del_content = fs::read_to_string(fs_util::del_path(&store.db_path)).unwrap();
        assert!(del_content.contains(&tk));
    }

    #[test]
    fn vacuum_sweeps_deleted_bytes() {
        let (_dir, mut store) = new_store(4 * 1024);
        store.set("pig", "oink").unwrap();
        let tk = store.index.get("pig").unwrap().to_owned();

        store.delete("pig").unwrap();
        store.vacuum().unwrap();

        let log_content = fs::read_to_string(fs_util::log_path(&store.db_path, &store.current_log_file)).unwrap();
        assert!(!log_content.contains(&tk));

        let del_content = fs::read_to_string(fs_util::del_path(&store.db_path)).unwrap();
        assert!(del_content.is_empty());
    }

    #[test]
    fn clear_resets_to_pristine_empty_database() {
        let (_dir, mut store) = new_store(4 * 1024);
        store.set("cow", "500 months").unwrap();

        store.clear().unwrap();

        assert!(store.get("cow").is_err());
        assert!(store.data_files.is_empty());
        assert!(store.memtable.is_empty());
    }

    #[test]
    fn idempotent_load_leaves_state_unchanged() {
        let (_dir, mut store) = new_store(4 * 1024);
        store.set("cow", "500 months").unwrap();

        store.load().unwrap();
        let memtable_once = store.memtable.clone();
        let current_log_once = store.current_log_file.clone();

        store.load().unwrap();

        assert_eq!(store.memtable, memtable_once);
        assert_eq!(store.current_log_file, current_log_once);
        assert_eq!(store.get("cow").unwrap(), "500 months");
    }

    #[test]
    fn roll_log_seals_active_segment_and_starts_a_new_one() {
        // max_file_size_kb of 0 forces roll_log to trigger on the very
        // next opportunistic check.
        let (_dir, mut store) = new_store(0);
        let old_stamp = store.current_log_file.clone();

        store.set("cow", "500 months").unwrap();

        assert_ne!(store.current_log_file, old_stamp);
        assert!(store.memtable.is_empty());
        assert!(store.data_files.contains(&old_stamp));
        assert!(!fs_util::log_path(&store.db_path, &old_stamp).exists());
        assert!(fs_util::data_path(&store.db_path, &old_stamp).exists());
        assert_eq!(store.get("cow").unwrap(), "500 months");
    }

    #[test]
    fn set_after_roll_reads_from_uncached_sealed_segment() {
        let (_dir, mut store) = new_store(0);
        store.set("cow", "500 months").unwrap();
        // roll_log fired inside the set() above; a second set starts a
        // fresh active segment, leaving "cow" in a now-sealed one.
        store.set("dog", "23 months").unwrap();

        assert_eq!(store.get("cow").unwrap(), "500 months");
        assert_eq!(store.cache.start, store.data_files[0]);

        store.set("cow", "501 months").unwrap();
        assert_eq!(store.get("cow").unwrap(), "501 months");
    }
}
