// src/error.rs

//! Error types for the ingest pipeline
//!
//! Every per-deposit failure maps onto one terminal lifecycle state via
//! [`Error::target_state`], which is how the worker boundary decides where the
//! deposit directory ends up in the outbox.

use crate::deposit::DepositState;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// One rule violation reported by the bag validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    /// Rule number, e.g. "1.2.3"
    pub rule: String,
    /// Human readable description of the violation
    pub violation: String,
}

/// Render a violation list as a single message
pub(crate) fn format_violations(profile_version: &str, violations: &[RuleViolation]) -> String {
    let lines: Vec<String> = violations
        .iter()
        .map(|v| format!("- [{}] {}", v.rule, v.violation))
        .collect();
    format!(
        "Bag was not valid according to Profile version {}. Violations:\n{}",
        profile_version,
        lines.join("\n")
    )
}

#[derive(Error, Debug)]
pub enum Error {
    /// Deposit directory could not be turned into a Deposit
    #[error("cannot load deposit {path}: {message}")]
    Load { path: PathBuf, message: String },

    /// Validator rejected the bag
    #[error("{}", format_violations(.profile_version, .violations))]
    InvalidDeposit {
        profile_version: String,
        violations: Vec<RuleViolation>,
    },

    /// Validator said "not compliant" without telling us why
    #[error("validator reported a non-compliant bag without a rule violation list (profile version {0})")]
    ValidatorAnomaly(String),

    /// Remote service unreachable or answered with an unexpected status
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// Catalog state contradicts the deposit (e.g. update of an unknown dataset)
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("illegal state transition from {from} to {to}")]
    IllegalStateTransition { from: DepositState, to: DepositState },

    #[error("outbox {0} has not been initialized")]
    OutboxNotInitialized(PathBuf),

    #[error("outbox {path} already contains entries in {subdir}")]
    OutboxNotEmpty { path: PathBuf, subdir: String },

    #[error("deposit in state {0} cannot be moved to the outbox")]
    InvalidOutboxState(DepositState),

    #[error("digest requested before the stream was fully consumed")]
    DigestIncomplete,

    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl Error {
    /// Create a load error for a deposit path
    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a transport error for an endpoint
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Terminal state a deposit ends up in when processing fails with this error
    pub fn target_state(&self) -> DepositState {
        match self {
            Self::InvalidDeposit { .. } | Self::Consistency(_) => DepositState::Rejected,
            _ => DepositState::Failed,
        }
    }
}
