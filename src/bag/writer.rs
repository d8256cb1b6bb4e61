// src/bag/writer.rs

//! Atomic bag archive output
//!
//! Entries are appended to an uncompressed tar stream that lives in a staging
//! file next to the final destination. Only [`AtomicBagWriter::close`] makes
//! the archive visible, by renaming the staging file over the final path. A
//! writer that saw an error, or that is dropped without being closed, removes
//! the staging file and leaves any previously published archive untouched.

use crate::error::{Error, Result};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Default timestamp for archive entries (2024-01-01 00:00:00 UTC)
pub const DEFAULT_MTIME: u64 = 1704067200;

/// File name of the published archive for a persistent identifier and version
///
/// `doi:10.5072/DANS-ABC` version 2 becomes `doi-10-5072-dans-abc-v2.tar`.
pub fn output_file_name(pid: &str, version: u32) -> String {
    let mut name = String::with_capacity(pid.len() + 8);
    for c in pid.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_end_matches('-');
    format!("{name}-v{version}.tar")
}

/// Tar writer that publishes by rename or not at all
pub struct AtomicBagWriter {
    final_path: PathBuf,
    archive: Option<tar::Builder<NamedTempFile>>,
    mtime: u64,
    poisoned: Option<String>,
    entries: usize,
    bytes_written: u64,
}

impl AtomicBagWriter {
    /// Open a staging file in the directory of `final_path`
    pub fn create(final_path: &Path) -> Result<Self> {
        let dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".bag-")
            .suffix(".tar.part")
            .tempfile_in(dir)?;
        debug!(
            "Staging {} at {}",
            final_path.display(),
            staging.path().display()
        );

        Ok(Self {
            final_path: final_path.to_path_buf(),
            archive: Some(tar::Builder::new(staging)),
            mtime: DEFAULT_MTIME,
            poisoned: None,
            entries: 0,
            bytes_written: 0,
        })
    }

    /// Timestamp written into every entry header
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Number of entries appended so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Payload bytes appended so far, headers excluded
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one entry of exactly `size` bytes read from `reader`
    pub fn append_reader<R: Read>(&mut self, name: &str, size: u64, reader: R) -> Result<()> {
        if let Some(reason) = &self.poisoned {
            return Err(poisoned_error(reason));
        }
        let Some(archive) = self.archive.as_mut() else {
            return Err(Error::InvalidArgument("bag writer already closed".to_string()));
        };

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(size);
        header.set_mtime(self.mtime);
        header.set_cksum();

        match archive.append_data(&mut header, name, reader) {
            Ok(()) => {
                self.entries += 1;
                self.bytes_written += size;
                Ok(())
            }
            Err(e) => {
                self.poison(format!("writing {name}: {e}"));
                Err(e.into())
            }
        }
    }

    /// Append one in-memory entry
    pub fn append_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.append_reader(name, bytes.len() as u64, bytes)
    }

    /// Mark the writer as failed; `close` will discard the staging file
    pub fn poison(&mut self, reason: impl Into<String>) {
        if self.poisoned.is_none() {
            self.poisoned = Some(reason.into());
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Finish the archive and rename it into place
    ///
    /// A pre-existing file at the final path is replaced. On a poisoned writer
    /// nothing is published and the original failure is reported again.
    pub fn close(mut self) -> Result<PathBuf> {
        let Some(archive) = self.archive.take() else {
            return Err(Error::InvalidArgument("bag writer already closed".to_string()));
        };

        if let Some(reason) = self.poisoned.take() {
            // Dropping the staging file deletes it
            drop(archive);
            warn!("Discarded staging archive for {}", self.final_path.display());
            return Err(poisoned_error(&reason));
        }

        let staging = archive.into_inner()?;
        staging.as_file().sync_all()?;

        if self.final_path.exists() {
            fs::remove_file(&self.final_path)?;
        }
        staging
            .persist(&self.final_path)
            .map_err(|e| Error::Io(e.error))?;

        info!(
            "Published bag {} ({} entries, {} bytes)",
            self.final_path.display(),
            self.entries,
            self.bytes_written
        );
        Ok(self.final_path.clone())
    }
}

impl Drop for AtomicBagWriter {
    fn drop(&mut self) {
        if self.archive.is_some() {
            debug!("Bag writer for {} dropped before close", self.final_path.display());
        }
    }
}

fn poisoned_error(reason: &str) -> Error {
    Error::Io(io::Error::other(format!(
        "bag writer aborted after an earlier error: {reason}"
    )))
}
