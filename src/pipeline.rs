// src/pipeline.rs

//! Per-deposit unit of work
//!
//! ```text
//! load -> VALIDATING -> validate -> resolve update -> register version
//!      -> package bag -> ACCEPTED -> outbox
//! ```
//!
//! Every error on the way is turned into a terminal state with the error text
//! as state description, persisted, and the deposit directory is moved to the
//! matching outbox directory. Only outbox failures are reported to the caller.

use crate::bag::{BagPackager, convert::default_converters, output_file_name};
use crate::config::BagforgeConfig;
use crate::deposit::{Deposit, DepositProperties, DepositState, load_deposit, properties};
use crate::error::Result;
use crate::outbox::Outbox;
use crate::validator::{BagValidator, ValidatorClient};
use crate::vault::{Registrar, VaultCatalogClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to one deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub deposit_id: String,
    pub state: DepositState,
    pub message: String,
    /// Location of the deposit directory in the outbox
    pub moved_to: PathBuf,
    /// Published bag, for accepted deposits
    pub bag: Option<PathBuf>,
}

/// Runs deposits through validation, registration and packaging
pub struct DepositProcessor {
    validator: Arc<dyn BagValidator>,
    registrar: Registrar,
    packager: BagPackager,
    output_dir: PathBuf,
}

impl DepositProcessor {
    pub fn new(
        validator: Arc<dyn BagValidator>,
        registrar: Registrar,
        packager: BagPackager,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            validator,
            registrar,
            packager,
            output_dir: output_dir.into(),
        }
    }

    /// Processor talking to the services named in `config`
    pub fn from_config(config: &BagforgeConfig) -> anyhow::Result<Self> {
        let validator = ValidatorClient::new(&config.validator.url, config.validator_timeout()?)?;
        let catalog = VaultCatalogClient::new(&config.vault.url, config.vault_timeout()?)?;
        let converters = default_converters(Arc::new(config.vocabulary()));
        let packager = BagPackager::new(&config.extra_algorithms()?, converters)
            .with_mtime(config.output.mtime);

        Ok(Self::new(
            Arc::new(validator),
            Registrar::new(Arc::new(catalog), config.vault.nbn_prefix.clone()),
            packager,
            &config.output.directory,
        ))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Process the deposit in directory `path` and move it into `outbox`
    pub fn process(&self, path: &Path, outbox: &Outbox) -> Result<ProcessOutcome> {
        let mut deposit = match load_deposit(path) {
            Ok(deposit) => deposit,
            Err(e) => {
                error!("[pipeline] {}", e);
                let message = e.to_string();
                record_failure(path, &message);
                let moved_to = outbox.move_deposit(path, DepositState::Failed)?;
                return Ok(ProcessOutcome {
                    deposit_id: dir_name(path),
                    state: DepositState::Failed,
                    message,
                    moved_to,
                    bag: None,
                });
            }
        };

        if deposit.state().is_terminal() {
            return self.finish_already_terminal(&deposit, outbox);
        }

        let (state, message, bag) = match self.run(&mut deposit) {
            Ok((bag, message)) => (DepositState::Accepted, message, Some(bag)),
            Err(e) => {
                let state = e.target_state();
                if state == DepositState::Rejected {
                    warn!("[pipeline] Deposit {} rejected: {}", deposit.id(), e);
                } else {
                    error!("[pipeline] Deposit {} failed: {}", deposit.id(), e);
                }
                (state, e.to_string(), None)
            }
        };

        if let Err(e) = deposit.transition_and_save(state, message.clone()) {
            error!(
                "[pipeline] Could not record state {} for deposit {}: {}",
                state,
                deposit.id(),
                e
            );
        }
        let moved_to = outbox.move_deposit(deposit.dir(), state)?;

        Ok(ProcessOutcome {
            deposit_id: deposit.id().to_string(),
            state,
            message,
            moved_to,
            bag,
        })
    }

    fn run(&self, deposit: &mut Deposit) -> Result<(PathBuf, String)> {
        deposit.transition_and_save(DepositState::Validating, "validating bag")?;

        let report = self
            .validator
            .validate(deposit.bag_dir(), deposit.source_format.package_type())?;

        self.registrar.resolve_update(deposit)?;
        let version = self.registrar.register_new_version(deposit)?;

        let file_name = output_file_name(deposit.persistent_identifier(), version);
        let output = self.output_dir.join(&file_name);
        let packaging = self.packager.package(deposit, &output)?;
        deposit.set_bag_file_name(&file_name);

        info!(
            "[pipeline] Deposit {} packaged as {} ({} payload files, {} bytes)",
            deposit.id(),
            output.display(),
            packaging.payload.len(),
            packaging.bytes_written
        );
        let message = format!(
            "bag {} version {} created (profile version {})",
            file_name, version, report.profile_version
        );
        Ok((output, message))
    }

    /// Deposits that were already finished before this run only need moving
    fn finish_already_terminal(&self, deposit: &Deposit, outbox: &Outbox) -> Result<ProcessOutcome> {
        let state = match deposit.state() {
            DepositState::Invalid => {
                warn!(
                    "[pipeline] Deposit {} is INVALID, moving it to the failed outbox",
                    deposit.id()
                );
                DepositState::Failed
            }
            other => other,
        };
        info!(
            "[pipeline] Deposit {} already finished as {}",
            deposit.id(),
            deposit.state()
        );
        let moved_to = outbox.move_deposit(deposit.dir(), state)?;
        Ok(ProcessOutcome {
            deposit_id: deposit.id().to_string(),
            state,
            message: deposit.state_message().to_string(),
            moved_to,
            bag: None,
        })
    }
}

/// Best-effort FAILED marker for deposits that could not even be loaded
fn record_failure(path: &Path, message: &str) {
    let file = path.join(properties::PROPERTIES_FILE);
    if !file.is_file() {
        return;
    }
    let result = DepositProperties::load(&file).and_then(|mut props| {
        props.set(properties::STATE_LABEL, DepositState::Failed.as_str());
        props.set(properties::STATE_DESCRIPTION, message);
        props.save()
    });
    if let Err(e) = result {
        warn!("[pipeline] Could not mark {} as failed: {}", path.display(), e);
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
