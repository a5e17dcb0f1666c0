//! Durable `user key -> timestamped key` map backed by `index.idx`.
use crate::codec;
use crate::error::Result;
use crate::fs_util;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// The index manager. Growth is append-only; deletion triggers a full
/// rewrite from the in-memory map, per spec.
pub struct Index {
    path: PathBuf,
    map: HashMap<String, String>,
}

impl Index {
    /// Builds an empty, unloaded index bound to `path`. No I/O happens
    /// until `load()` is called.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            map: HashMap::new(),
        }
    }

    /// Replaces the in-memory map with the contents decoded from disk.
    pub fn load(&mut self) -> Result<()> {
        let content = fs::read_to_string(&self.path)?;
        self.map = codec::decode_pairs(&content)?;
        Ok(())
    }

    pub fn get(&self, k: &str) -> Option<&str> {
        self.map.get(k).map(String::as_str)
    }

    /// Returns `(tk, true)` for a freshly minted timestamped key if `k`
    /// was absent, appending `k KVSEP tk TSEP` to the index file.
    /// Returns `(tk, false)` if `k` already has a timestamped key.
    pub fn resolve_or_create(&mut self, k: &str) -> Result<(String, bool)> {
        if let Some(tk) = self.map.get(k) {
            return Ok((tk.clone(), false));
        }

        let tk = format!("{}-{}", fs_util::now_nanos_padded(), k);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        write!(file, "{}{}{}{}", k, codec::KVSEP, tk, codec::TSEP)?;

        self.map.insert(k.to_owned(), tk.clone());
        Ok((tk, true))
    }

    /// Removes `k` from the index and, if it was present, rewrites
    /// `index.idx` in full from the remaining in-memory map. Used both
    /// by `delete()` and by `set()`'s best-effort rollback.
    pub fn remove(&mut self, k: &str) -> Result<Option<String>> {
        let tk = self.map.remove(k);
        if tk.is_some() {
            self.rewrite()?;
        }
        Ok(tk)
    }

    fn rewrite(&self) -> Result<()> {
        let content = codec::encode_pairs(self.map.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_or_create_is_stable_across_calls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.idx");
        fs::File::create(&path).unwrap();

        let mut index = Index::new(path.clone());
        let (tk1, is_new1) = index.resolve_or_create("cow").unwrap();
        assert!(is_new1);

        let (tk2, is_new2) = index.resolve_or_create("cow").unwrap();
        assert!(!is_new2);
        assert_eq!(tk1, tk2);

        let mut reloaded = Index::new(path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("cow"), Some(tk1.as_str()));
    }

    #[test]
    fn remove_rewrites_file_without_removed_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.idx");
        fs::File::create(&path).unwrap();

        let mut index = Index::new(path.clone());
        let (tk_cow, _) = index.resolve_or_create("cow").unwrap();
        let (_, _) = index.resolve_or_create("dog").unwrap();

        let removed = index.remove("cow").unwrap();
        assert_eq!(removed.as_deref(), Some(tk_cow.as_str()));

        let mut reloaded = Index::new(path);
        reloaded.load().unwrap();
        assert!(reloaded.get("cow").is_none());
        assert!(reloaded.get("dog").is_some());
    }

    #[test]
    fn remove_of_absent_key_is_a_no_op() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.idx");
        fs::File::create(&path).unwrap();

        let mut index = Index::new(path);
        assert!(index.remove("ghost").unwrap().is_none());
    }
}
