// src/deposit/paths.rs

//! Logical payload paths
//!
//! A payload file's logical path may contain characters the archive's
//! downstream consumers refuse. Those are replaced by `_`; the caller keeps the
//! declared path as an "original path" annotation so the mapping can be undone.
//!
//! Deposits may also carry `original-filepaths.txt`, mapping a disk-safe
//! physical path to the logical path it stands for.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Name of the optional physical-to-logical path mapping inside a bag
pub const ORIGINAL_FILEPATHS: &str = "original-filepaths.txt";

/// Characters not allowed in logical file names
const FORBIDDEN_CHARS: [char; 9] = [':', '*', '?', '"', '<', '>', '|', ';', '#'];

/// Replace every forbidden or control character with `_`
pub fn sanitize_path(path: &str) -> String {
    path.chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Read `original-filepaths.txt` from a bag, if present
///
/// Returns a map from bag-relative physical path to logical path. The physical
/// path never contains whitespace; everything after the first run of
/// whitespace is the logical path.
pub fn read_original_filepaths(bag_dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = bag_dir.join(ORIGINAL_FILEPATHS);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| Error::load(&path, format!("cannot read: {e}")))?;
    let mut mapping = BTreeMap::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line = line.trim_start();
        let Some((physical, logical)) = line.split_once(char::is_whitespace) else {
            return Err(Error::load(
                &path,
                format!("line {}: expected two columns", lineno + 1),
            ));
        };
        let logical = logical.trim();
        if logical.is_empty() {
            return Err(Error::load(
                &path,
                format!("line {}: empty logical path", lineno + 1),
            ));
        }
        if mapping.insert(physical.to_string(), logical.to_string()).is_some() {
            return Err(Error::load(
                &path,
                format!("line {}: duplicate physical path {}", lineno + 1, physical),
            ));
        }
    }
    Ok(mapping)
}
