//! Record encoding for `.idx`, `.log`, `.cky` and `.del` files.
//!
//! A file is a concatenation of records terminated (not separated) by
//! `TSEP`. A key-value record is `<left><KVSEP><right><TSEP>`; the del
//! file holds bare `<TK><TSEP>` records with no `KVSEP`.
use crate::error::{CorruptedDataError, Result};
use std::collections::HashMap;

/// Token separator terminating every record.
pub const TSEP: &str = "$%#@*&^&";
/// Separator between the two halves of a key-value record.
pub const KVSEP: &str = "><?&(^#";

/// Encodes `pairs` in iteration order as `k1 KVSEP v1 TSEP k2 KVSEP v2 TSEP ...`.
pub fn encode_pairs<'a, I>(pairs: I) -> String
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    let mut buf = String::new();
    for (k, v) in pairs {
        buf.push_str(k);
        buf.push_str(KVSEP);
        buf.push_str(v);
        buf.push_str(TSEP);
    }
    buf
}

/// Encodes `keys` as `k1 TSEP k2 TSEP ...`, used only for the del file.
pub fn encode_keys<'a, I>(keys: I) -> String
where
    I: Iterator<Item = &'a str>,
{
    let mut buf = String::new();
    for k in keys {
        buf.push_str(k);
        buf.push_str(TSEP);
    }
    buf
}

/// Decodes the contents of an index/log/cky file into its key-value map.
/// An empty file decodes to the empty map. Tolerates a missing trailing
/// `TSEP` (e.g. after a `vacuum()` rewrite that rejoins without one).
///
/// A file left by a crash mid-append has a trailing record with no
/// closing `TSEP` and possibly no `KVSEP` at all (the write landed
/// between the two). That last record, and only the last, is discarded
/// rather than raising `CorruptedDataError` when it fails to split into
/// exactly two halves; a malformed record anywhere else is still an
/// error.
pub fn decode_pairs(content: &str) -> Result<HashMap<String, String>> {
    let well_terminated = content.is_empty() || content.ends_with(TSEP);
    let records: Vec<&str> = split_records(content).collect();
    let last = records.len().wrapping_sub(1);

    let mut map = HashMap::new();
    for (i, record) in records.into_iter().enumerate() {
        let mut parts = record.splitn(2, KVSEP);
        let left = parts.next().ok_or(CorruptedDataError)?;
        match parts.next() {
            Some(right) => {
                map.insert(left.to_owned(), right.to_owned());
            }
            None if !well_terminated && i == last => {
                // Truncated trailing record from a crash mid-append; discard.
            }
            None => return Err(CorruptedDataError.into()),
        }
    }
    Ok(map)
}

/// Decodes the contents of a del file into the list of timestamped keys
/// awaiting sweep.
pub fn decode_keys(content: &str) -> Result<Vec<String>> {
    Ok(split_records(content).map(|s| s.to_owned()).collect())
}

fn split_records(content: &str) -> impl Iterator<Item = &str> {
    let trimmed = content.strip_suffix(TSEP).unwrap_or(content);
    trimmed.split(TSEP).filter(|s| !s.is_empty())
}
