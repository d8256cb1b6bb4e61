// src/lib.rs

//! Bagforge deposit ingest pipeline
//!
//! Picks up archival submissions ("deposits") from inbox directories and
//! repackages each one into a checksummed bag archive.
//!
//! # Architecture
//!
//! - Deposits: a directory with `deposit.properties` and exactly one bag
//! - Lifecycle: durable state in `deposit.properties`, forward-only transitions
//! - Single-pass digests: payload bytes are read once for every manifest
//! - Atomic output: bags are staged and renamed into place, or not at all
//! - Outbox: finished deposit directories are partitioned by final state

pub mod bag;
pub mod config;
pub mod deposit;
mod error;
pub mod hash;
pub mod inbox;
pub mod outbox;
pub mod pipeline;
pub mod validator;
pub mod vault;

pub use bag::{AtomicBagWriter, BagPackager, PackagingReport, Vocabulary, output_file_name};
pub use config::BagforgeConfig;
pub use deposit::{Deposit, DepositState, PayloadFile, SourceFormat, load_deposit};
pub use error::{Error, Result, RuleViolation};
pub use hash::{DigestAlgorithm, DigestReader, DigestSet};
pub use inbox::{IngestArea, WatchHandle};
pub use outbox::Outbox;
pub use pipeline::{DepositProcessor, ProcessOutcome};
pub use validator::{BagValidator, ValidationReport, ValidatorClient};
pub use vault::{PriorRegistration, Registrar, SkeletonRecord, VaultCatalog, VaultCatalogClient};
