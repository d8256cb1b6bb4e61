// src/deposit/properties.rs

//! Flat `key=value` property store kept next to every deposit
//!
//! The file is rewritten as a whole on every save: the new content goes to a
//! temporary sibling which is synced and then renamed over the old file, so a
//! crash mid-write leaves the previously saved properties intact.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the property file inside a deposit directory
pub const PROPERTIES_FILE: &str = "deposit.properties";

pub const STATE_LABEL: &str = "state.label";
pub const STATE_DESCRIPTION: &str = "state.description";
pub const BAG_ID: &str = "bag-store.bag-id";
pub const DEPOSITOR_ID: &str = "depositor.userId";
pub const SWORD_TOKEN: &str = "dataverse.sword-token";
pub const DOI: &str = "identifier.doi";
pub const NBN: &str = "identifier.urn";
pub const ORIGIN: &str = "deposit.origin";
pub const VAULT_VERSION: &str = "vault.version";
pub const VAULT_BAG_NAME: &str = "vault.bag-name";

#[derive(Debug, Clone)]
pub struct DepositProperties {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl DepositProperties {
    /// Load the property file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::load(path, format!("cannot read property file: {e}")))?;
        let entries = parse(&content).map_err(|msg| Error::load(path, msg))?;
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Empty store that will be written to `path` on save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// Write every entry back to disk, replacing the previous file atomically
    pub fn save(&self) -> Result<()> {
        let temp_path = self.path.with_extension("properties.tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(render(&self.entries).as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        debug!("Saved {} properties to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}

fn parse(content: &str) -> std::result::Result<BTreeMap<String, String>, String> {
    let mut entries = BTreeMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("line {}: expected key=value, got '{}'", lineno + 1, line));
        };
        entries.insert(key.trim().to_string(), unescape(value.trim()));
    }
    Ok(entries)
}

fn render(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&escape(value));
        out.push('\n');
    }
    out
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
