// src/bag/manifest.rs

//! Manifest and tag manifest files
//!
//! Each line is `<hex digest>␠␠<bag-relative path>\n`. Line breaks and `%` in
//! paths are percent-encoded so every entry stays on one line.

use crate::hash::DigestAlgorithm;

/// One line of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub algorithm: DigestAlgorithm,
    pub digest: String,
}

/// Algorithm named by a `manifest-<alg>.txt` or `tagmanifest-<alg>.txt` file name
pub fn manifest_algorithm(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix("manifest-")
        .and_then(|rest| rest.strip_suffix(".txt"))
}

/// Whether a bag-relative path names a tag manifest
pub fn is_tagmanifest(path: &str) -> bool {
    path.starts_with("tagmanifest-") && path.ends_with(".txt") && !path.contains('/')
}

fn encode_path(path: &str) -> String {
    path.replace('%', "%25")
        .replace('\n', "%0A")
        .replace('\r', "%0D")
}

fn decode_path(path: &str) -> String {
    path.replace("%0A", "\n")
        .replace("%0a", "\n")
        .replace("%0D", "\r")
        .replace("%0d", "\r")
        .replace("%25", "%")
}

/// Render manifest lines for `(path, digest)` pairs, in the given order
pub fn render_manifest<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (path, digest) in entries {
        out.push_str(digest);
        out.push_str("  ");
        out.push_str(&encode_path(path));
        out.push('\n');
    }
    out
}

/// Parse manifest content into `(digest, path)` pairs
///
/// Digests are lowercased. A line without a path is reported with its number.
pub fn parse_manifest(content: &str) -> Result<Vec<(String, String)>, String> {
    let mut entries = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let Some((digest, path)) = line.split_once(char::is_whitespace) else {
            return Err(format!("line {}: missing path", lineno + 1));
        };
        let path = path.trim_start();
        if path.is_empty() {
            return Err(format!("line {}: missing path", lineno + 1));
        }
        entries.push((digest.to_lowercase(), decode_path(path)));
    }
    Ok(entries)
}
