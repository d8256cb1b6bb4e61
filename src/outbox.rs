// src/outbox.rs

//! Final resting place of processed deposit directories
//!
//! ```text
//! <root>/processed/   ACCEPTED
//! <root>/rejected/    REJECTED
//! <root>/failed/      FAILED
//! ```
//!
//! Moves are plain renames, so the outbox must live on the same filesystem
//! as the inboxes.

use crate::deposit::DepositState;
use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PROCESSED: &str = "processed";
pub const REJECTED: &str = "rejected";
pub const FAILED: &str = "failed";

const SUBDIRS: [&str; 3] = [PROCESSED, REJECTED, FAILED];

/// Partitioned output tree for deposit directories
#[derive(Debug, Clone)]
pub struct Outbox {
    root: PathBuf,
    initialized: bool,
}

impl Outbox {
    /// Outbox rooted at `root`; call [`Outbox::init`] before moving anything
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            initialized: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Create the state directories
    ///
    /// Unless `allow_non_empty` is set, fails when any of them already holds
    /// entries, so a restart never mixes two runs silently.
    pub fn init(&mut self, allow_non_empty: bool) -> Result<()> {
        for subdir in SUBDIRS {
            let dir = self.root.join(subdir);
            fs::create_dir_all(&dir)?;
            if !allow_non_empty && fs::read_dir(&dir)?.next().is_some() {
                return Err(Error::OutboxNotEmpty {
                    path: self.root.clone(),
                    subdir: subdir.to_string(),
                });
            }
        }
        debug!("[outbox] Initialized {}", self.root.display());
        self.initialized = true;
        Ok(())
    }

    /// Directory that receives deposits in `state`
    pub fn dir_for(&self, state: DepositState) -> Result<PathBuf> {
        let subdir = match state {
            DepositState::Accepted => PROCESSED,
            DepositState::Rejected => REJECTED,
            DepositState::Failed => FAILED,
            other => return Err(Error::InvalidOutboxState(other)),
        };
        Ok(self.root.join(subdir))
    }

    /// Move a deposit directory into the subdirectory for `state`
    pub fn move_deposit(&self, deposit_dir: &Path, state: DepositState) -> Result<PathBuf> {
        if !self.initialized {
            return Err(Error::OutboxNotInitialized(self.root.clone()));
        }
        let target_dir = self.dir_for(state)?;
        let name = deposit_dir.file_name().ok_or_else(|| {
            Error::InvalidArgument(format!("{} has no directory name", deposit_dir.display()))
        })?;
        let target = target_dir.join(name);
        if target.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            )));
        }

        fs::rename(deposit_dir, &target)?;
        info!(
            "[outbox] Moved {} to {} ({})",
            deposit_dir.display(),
            target.display(),
            state
        );
        Ok(target)
    }

    /// Outbox for one batch, rooted at `<root>/<name>`
    ///
    /// The returned outbox still needs [`Outbox::init`].
    pub fn sub_outbox(&self, name: &str) -> Result<Outbox> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::InvalidArgument(format!("invalid batch name: {name:?}")));
        }
        if SUBDIRS.contains(&name) {
            return Err(Error::InvalidArgument(format!(
                "batch name {name} collides with an outbox directory"
            )));
        }
        Ok(Outbox::new(self.root.join(name)))
    }
}
