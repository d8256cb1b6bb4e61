// src/deposit/mod.rs

//! Deposit model
//!
//! A [`Deposit`] is the normalized, read-mostly view of one submission
//! directory: its payload files, its descriptive metadata and its lifecycle
//! state. Durable state lives in `deposit.properties`; the in-memory model is
//! dropped once the outbox has moved the directory.
//!
//! # Lifecycle
//!
//! ```text
//! DRAFT -> UPLOADED -> SUBMITTED -> VALIDATING -> ACCEPTED | REJECTED | FAILED | INVALID
//! ```
//!
//! Transitions only move forward. Terminal states are final; setting the
//! current terminal state again is a no-op.

pub mod bag_info;
mod loader;
pub mod metadata;
pub mod paths;
pub mod properties;

pub use bag_info::BagInfo;
pub use loader::{find_bag_dir, load_deposit};
pub use metadata::{DatasetMetadata, FileMetadata};
pub use properties::DepositProperties;

use crate::error::{Error, Result};
use crate::hash::{DigestAlgorithm, DigestSet};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Lifecycle state of a deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepositState {
    Draft,
    Uploaded,
    Submitted,
    /// Transient, set while the pipeline works on the deposit
    Validating,
    Accepted,
    Rejected,
    Failed,
    Invalid,
}

impl DepositState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Uploaded => "UPLOADED",
            Self::Submitted => "SUBMITTED",
            Self::Validating => "VALIDATING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
            Self::Invalid => "INVALID",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Rejected | Self::Failed | Self::Invalid
        )
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Uploaded => 1,
            Self::Submitted => 2,
            Self::Validating => 3,
            Self::Accepted | Self::Rejected | Self::Failed | Self::Invalid => 4,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: DepositState) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for DepositState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DepositState {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DRAFT" => Ok(Self::Draft),
            "UPLOADED" => Ok(Self::Uploaded),
            "SUBMITTED" => Ok(Self::Submitted),
            "VALIDATING" => Ok(Self::Validating),
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            "FAILED" => Ok(Self::Failed),
            "INVALID" => Ok(Self::Invalid),
            other => Err(Error::InvalidArgument(format!("unknown deposit state: {other}"))),
        }
    }
}

/// Loader strategy, selected by the `deposit.origin` property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceFormat {
    /// Regular submission: dataset.xml and files.xml are both required
    #[default]
    Sword2,
    /// Migrated dataset: identifiers are carried over and must be present
    Migration,
    /// Simplified submission: files.xml is optional, payload is discovered on disk
    Simple,
}

impl SourceFormat {
    /// Package type announced to the bag validator
    pub const fn package_type(&self) -> &'static str {
        match self {
            Self::Migration => "MIGRATION",
            Self::Sword2 | Self::Simple => "DEPOSIT",
        }
    }
}

impl FromStr for SourceFormat {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SWORD2" | "SWORD" | "API" => Ok(Self::Sword2),
            "MIGRATION" => Ok(Self::Migration),
            "SIMPLE" => Ok(Self::Simple),
            other => Err(Error::InvalidArgument(format!("unknown deposit origin: {other}"))),
        }
    }
}

/// One file under the bag's `data/` directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    /// Stable identifier, independent of the file's path
    pub id: String,
    /// Sanitized logical path relative to `data/`
    pub path: String,
    /// Bag-relative path of the bytes on disk
    pub physical_path: String,
    /// Declared logical path when sanitization changed it
    pub original_path: Option<String>,
    /// Effective file-level access category
    pub access_rights: Option<String>,
    /// Checksums already declared by the depositor
    pub checksums: DigestSet,
}

impl PayloadFile {
    /// Path of this file inside the produced bag
    pub fn bag_path(&self) -> String {
        format!("data/{}", self.path)
    }

    /// `Some(true)` when the file is not openly downloadable
    pub fn restricted(&self) -> Option<bool> {
        self.access_rights
            .as_deref()
            .map(|rights| rights != metadata::ANONYMOUS)
    }

    /// Algorithms from `required` that still need to be computed
    pub fn missing_algorithms(&self, required: &[DigestAlgorithm]) -> Vec<DigestAlgorithm> {
        required
            .iter()
            .copied()
            .filter(|a| !self.checksums.contains_key(a))
            .collect()
    }
}

/// Non-payload file of the source bag, kept as opaque bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFile {
    /// Bag-relative path, e.g. `bag-info.txt` or `metadata/dataset.xml`
    pub path: String,
    pub content: Vec<u8>,
}

/// One loaded deposit
#[derive(Debug)]
pub struct Deposit {
    id: String,
    dir: PathBuf,
    bag_dir: PathBuf,
    state: DepositState,
    state_message: String,
    properties: DepositProperties,

    pub bag_id: String,
    pub doi: Option<String>,
    pub nbn: Option<String>,
    pub version: Option<u32>,
    pub depositor_id: String,
    pub sword_token: String,
    /// Bag id of the first version when this deposit updates a dataset
    pub is_version_of: Option<String>,
    pub source_format: SourceFormat,
    pub created: Option<chrono::DateTime<chrono::FixedOffset>>,

    pub payload_files: Vec<PayloadFile>,
    pub metadata_files: BTreeMap<String, MetadataFile>,
    pub bag_info: BagInfo,
    pub dataset: DatasetMetadata,
}

impl Deposit {
    /// Directory name of the deposit, immutable
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bag_dir(&self) -> &Path {
        &self.bag_dir
    }

    pub fn state(&self) -> DepositState {
        self.state
    }

    pub fn state_message(&self) -> &str {
        &self.state_message
    }

    pub fn is_update(&self) -> bool {
        self.is_version_of.is_some()
    }

    /// Catalog key of the version series this deposit belongs to
    pub fn version_series_id(&self) -> &str {
        self.is_version_of.as_deref().unwrap_or(&self.bag_id)
    }

    /// Persistent identifier the output bag is named after
    pub fn persistent_identifier(&self) -> &str {
        self.doi
            .as_deref()
            .or(self.nbn.as_deref())
            .unwrap_or(&self.bag_id)
    }

    pub fn metadata_file(&self, path: &str) -> Option<&MetadataFile> {
        self.metadata_files.get(path)
    }

    pub fn properties(&self) -> &DepositProperties {
        &self.properties
    }

    /// Move to `next`, recording `message`
    ///
    /// Does not persist anything; see [`Deposit::transition_and_save`].
    pub fn transition(&mut self, next: DepositState, message: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::IllegalStateTransition {
                from: self.state,
                to: next,
            });
        }
        let message = message.into();
        if self.state != next {
            info!("Deposit {}: {} -> {} ({})", self.id, self.state, next, message);
        }
        self.state = next;
        self.state_message = message;
        Ok(())
    }

    /// Move to `next` and flush the property file
    pub fn transition_and_save(&mut self, next: DepositState, message: impl Into<String>) -> Result<()> {
        self.transition(next, message)?;
        self.save()
    }

    /// Write state and identifiers back to `deposit.properties`
    pub fn save(&mut self) -> Result<()> {
        use properties::*;

        self.properties.set(STATE_LABEL, self.state.as_str());
        self.properties.set(STATE_DESCRIPTION, self.state_message.clone());
        self.properties.set(BAG_ID, self.bag_id.clone());
        self.properties.set(SWORD_TOKEN, self.sword_token.clone());
        if let Some(doi) = &self.doi {
            self.properties.set(DOI, doi.clone());
        }
        if let Some(nbn) = &self.nbn {
            self.properties.set(NBN, nbn.clone());
        }
        if let Some(version) = self.version {
            self.properties.set(VAULT_VERSION, version.to_string());
        }
        self.properties.save()
    }

    pub(crate) fn set_bag_file_name(&mut self, name: &str) {
        self.properties.set(properties::VAULT_BAG_NAME, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            DepositState::Draft,
            DepositState::Uploaded,
            DepositState::Submitted,
            DepositState::Validating,
            DepositState::Accepted,
            DepositState::Rejected,
            DepositState::Failed,
            DepositState::Invalid,
        ] {
            assert_eq!(state.as_str().parse::<DepositState>().unwrap(), state);
        }
        assert!("BOGUS".parse::<DepositState>().is_err());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(DepositState::Submitted.can_transition_to(DepositState::Validating));
        assert!(DepositState::Validating.can_transition_to(DepositState::Failed));
        assert!(DepositState::Draft.can_transition_to(DepositState::Accepted));
        assert!(!DepositState::Validating.can_transition_to(DepositState::Submitted));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            DepositState::Accepted,
            DepositState::Rejected,
            DepositState::Failed,
            DepositState::Invalid,
        ] {
            assert!(terminal.is_terminal());
            assert!(terminal.can_transition_to(terminal));
            assert!(!terminal.can_transition_to(DepositState::Validating));
        }
        assert!(!DepositState::Accepted.can_transition_to(DepositState::Failed));
        assert!(!DepositState::Validating.is_terminal());
    }

    #[test]
    fn test_source_format() {
        assert_eq!("migration".parse::<SourceFormat>().unwrap(), SourceFormat::Migration);
        assert_eq!("SWORD2".parse::<SourceFormat>().unwrap(), SourceFormat::Sword2);
        assert_eq!(SourceFormat::Migration.package_type(), "MIGRATION");
        assert_eq!(SourceFormat::Simple.package_type(), "DEPOSIT");
        assert!("ftp".parse::<SourceFormat>().is_err());
    }

    #[test]
    fn test_payload_file_helpers() {
        let mut checksums = DigestSet::new();
        checksums.insert(DigestAlgorithm::Md5, "00".repeat(16));
        let file = PayloadFile {
            id: "file-0001".to_string(),
            path: "a/b.txt".to_string(),
            physical_path: "data/a/b.txt".to_string(),
            original_path: None,
            access_rights: Some("RESTRICTED_REQUEST".to_string()),
            checksums,
        };
        assert_eq!(file.bag_path(), "data/a/b.txt");
        assert_eq!(file.restricted(), Some(true));
        assert_eq!(
            file.missing_algorithms(&[DigestAlgorithm::Md5, DigestAlgorithm::Sha256]),
            vec![DigestAlgorithm::Sha256]
        );
    }
}
